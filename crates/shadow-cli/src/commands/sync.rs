use shadow_core::{ShadowService, SyncParams};

use crate::commands::common::format_sync_lines;
use crate::error::CliError;

/// Returns whether every requested model synchronized successfully
pub async fn run_sync(
    service: &ShadowService,
    models: &[String],
    params: &SyncParams,
    as_json: bool,
) -> Result<bool, CliError> {
    let selection = (!models.is_empty()).then_some(models);
    let results = service.synchronize(selection, params).await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&results)?);
    } else if results.is_empty() {
        println!("No models registered.");
    } else {
        for line in format_sync_lines(&results) {
            println!("{line}");
        }
    }

    Ok(results.iter().all(shadow_core::SyncResult::is_success))
}
