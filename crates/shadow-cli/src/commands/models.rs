use serde::Serialize;
use shadow_core::{ModelDefinition, ShadowService};

use crate::commands::common::format_timestamp;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct ModelItem {
    pub name: String,
    pub cached: Vec<String>,
    pub delegated: Vec<String>,
    pub initial_lookback_hours: Option<i64>,
    pub checkpoint: Option<String>,
}

pub async fn run_models(service: &ShadowService, as_json: bool) -> Result<(), CliError> {
    let mut items = Vec::with_capacity(service.registry().len());
    for definition in service.registry().models() {
        let checkpoint = service
            .checkpoints(definition.name(), 1)
            .await?
            .into_iter()
            .next()
            .map(|checkpoint| {
                format!(
                    "{} #{}",
                    format_timestamp(checkpoint.cursor_timestamp),
                    checkpoint.cursor_id
                )
            });
        items.push(model_to_item(definition, checkpoint));
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No models registered.");
        return Ok(());
    }

    for item in &items {
        println!(
            "{:<16}  cached: {}  delegated: {}  checkpoint: {}",
            item.name,
            render_names(&item.cached),
            render_names(&item.delegated),
            item.checkpoint.as_deref().unwrap_or("none")
        );
    }
    Ok(())
}

pub fn model_to_item(definition: &ModelDefinition, checkpoint: Option<String>) -> ModelItem {
    let describe = |cached: bool| {
        definition
            .attributes()
            .iter()
            .filter(|attribute| attribute.cached == cached)
            .map(|attribute| {
                if attribute.remote_name == attribute.local_alias {
                    attribute.local_alias.clone()
                } else {
                    format!("{} (as {})", attribute.remote_name, attribute.local_alias)
                }
            })
            .collect::<Vec<_>>()
    };

    ModelItem {
        name: definition.name().to_string(),
        cached: describe(true),
        delegated: describe(false),
        initial_lookback_hours: definition.initial_lookback().map(|lookback| lookback.num_hours()),
        checkpoint,
    }
}

fn render_names(names: &[String]) -> String {
    if names.is_empty() {
        "-".to_string()
    } else {
        names.join(", ")
    }
}
