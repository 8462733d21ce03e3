use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use shadow_core::util::datetime_from_millis;
use shadow_core::{RemoteId, ShadowRecord, ShadowService};

use crate::commands::common::{format_relative_time, require_model};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct RecordItem {
    pub id: String,
    pub remote_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub fields: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delegated: Option<BTreeMap<String, Value>>,
}

pub async fn run_show(
    service: &ShadowService,
    model: &str,
    remote_id: &str,
    resolve_remote: bool,
    as_json: bool,
) -> Result<(), CliError> {
    require_model(service, model)?;
    let remote_id = RemoteId::new(remote_id)
        .map_err(|_| CliError::InvalidRemoteId(remote_id.to_string()))?;

    let handle = service.synchronizer().handle(model)?;
    let definition = handle.definition();
    let mut records = handle.find_by_remote_id(&remote_id).await?;

    let mut items = Vec::with_capacity(records.len());
    for record in &mut records {
        let mut item = record_to_item(record);
        if resolve_remote {
            item.remote_exists = Some(record.has_remote(definition.source()).await);

            let mut delegated = BTreeMap::new();
            for attribute in definition.attributes().iter().filter(|attribute| !attribute.cached) {
                let value = handle
                    .read_field(record, &attribute.local_alias)
                    .await?
                    .unwrap_or(Value::Null);
                delegated.insert(attribute.local_alias.clone(), value);
            }
            item.delegated = Some(delegated);
        }
        items.push(item);
    }

    if as_json {
        println!("{}", serde_json::to_string_pretty(&items)?);
        return Ok(());
    }

    if items.is_empty() {
        println!("No local {model} records for remote id {remote_id}.");
        return Ok(());
    }

    for line in format_record_lines(&items, Utc::now().timestamp_millis()) {
        println!("{line}");
    }
    Ok(())
}

pub fn record_to_item(record: &ShadowRecord) -> RecordItem {
    RecordItem {
        id: record.id.to_string(),
        remote_id: record.remote_id().map(ToString::to_string),
        created_at: datetime_from_millis(record.created_at).to_rfc3339(),
        updated_at: datetime_from_millis(record.updated_at).to_rfc3339(),
        fields: record.fields.clone(),
        remote_exists: None,
        delegated: None,
    }
}

pub fn format_record_lines(items: &[RecordItem], now_ms: i64) -> Vec<String> {
    let mut lines = Vec::new();
    for item in items {
        let updated_ms = chrono::DateTime::parse_from_rfc3339(&item.updated_at)
            .map_or(now_ms, |updated| updated.timestamp_millis());
        let mut header = format!(
            "{}  remote={}  updated {}",
            item.id,
            item.remote_id.as_deref().unwrap_or("-"),
            format_relative_time(updated_ms, now_ms)
        );
        if let Some(exists) = item.remote_exists {
            header.push_str(if exists { "  (remote present)" } else { "  (remote missing)" });
        }
        lines.push(header);

        for (alias, value) in &item.fields {
            lines.push(format!("  {alias} = {value}"));
        }
        for (alias, value) in item.delegated.iter().flatten() {
            lines.push(format!("  {alias} = {value}  (remote)"));
        }
    }
    lines
}
