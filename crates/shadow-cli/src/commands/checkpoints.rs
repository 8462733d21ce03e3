use shadow_core::ShadowService;

use crate::commands::common::{
    checkpoint_to_item, format_checkpoint_lines, require_model, CheckpointItem,
};
use crate::error::CliError;

pub async fn run_checkpoints(
    service: &ShadowService,
    model: Option<&str>,
    limit: usize,
    as_json: bool,
) -> Result<(), CliError> {
    let model_names = match model {
        Some(name) => {
            require_model(service, name)?;
            vec![name.to_string()]
        }
        None => service.registry().names(),
    };

    let mut checkpoints = Vec::new();
    for name in &model_names {
        checkpoints.extend(service.checkpoints(name, limit).await?);
    }

    if as_json {
        let json_items = checkpoints
            .iter()
            .map(checkpoint_to_item)
            .collect::<Vec<CheckpointItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if checkpoints.is_empty() {
        println!("No checkpoints recorded.");
        return Ok(());
    }

    for line in format_checkpoint_lines(&checkpoints) {
        println!("{line}");
    }
    Ok(())
}
