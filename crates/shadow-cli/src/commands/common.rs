use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use shadow_core::config::{ShadowConfig, CONFIG_PATH_ENV, DB_PATH_ENV};
use shadow_core::{ShadowService, SyncCheckpoint, SyncParams, SyncResult, SyncStatus};

use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct CheckpointItem {
    pub id: i64,
    pub model_name: String,
    pub cursor_timestamp: String,
    pub cursor_id: String,
    pub recorded_at: String,
    pub relative_time: String,
}

/// Parse a `key=value` feed parameter
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got '{raw}'"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("parameter key is empty in '{raw}'"));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Later occurrences of a key win
pub fn sync_params(pairs: &[(String, String)]) -> SyncParams {
    pairs.iter().cloned().collect()
}

pub fn resolve_config_path(cli_config: Option<PathBuf>) -> PathBuf {
    resolve_config_path_from(cli_config, env::var_os(CONFIG_PATH_ENV))
}

pub fn resolve_config_path_from(cli_config: Option<PathBuf>, env_value: Option<OsString>) -> PathBuf {
    cli_config
        .or_else(|| env_value.filter(|value| !value.is_empty()).map(PathBuf::from))
        .unwrap_or_else(default_config_path)
}

pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shadow")
        .join("models.json")
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>, config: &ShadowConfig) -> PathBuf {
    resolve_db_path_from(cli_db_path, config, env::var_os(DB_PATH_ENV))
}

pub fn resolve_db_path_from(
    cli_db_path: Option<PathBuf>,
    config: &ShadowConfig,
    env_value: Option<OsString>,
) -> PathBuf {
    cli_db_path
        .or_else(|| config.database_path.clone())
        .or_else(|| env_value.filter(|value| !value.is_empty()).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shadow")
        .join("shadow.db")
}

pub fn load_config(path: &Path) -> Result<ShadowConfig, CliError> {
    if !path.exists() {
        return Err(CliError::Config(format!(
            "models file not found at {}; pass --config or set {CONFIG_PATH_ENV}",
            path.display()
        )));
    }
    Ok(ShadowConfig::load_from_path(path)?)
}

pub async fn open_service(
    cli_config: Option<PathBuf>,
    cli_db_path: Option<PathBuf>,
) -> Result<ShadowService, CliError> {
    let config_path = resolve_config_path(cli_config);
    let config = load_config(&config_path)?;
    let registry = config.build_registry()?;
    let db_path = resolve_db_path(cli_db_path, &config);

    tracing::debug!(
        "Loaded {} models from {}, database at {}",
        registry.len(),
        config_path.display(),
        db_path.display()
    );
    Ok(ShadowService::open_path(db_path, registry).await?)
}

pub fn require_model(service: &ShadowService, model_name: &str) -> Result<(), CliError> {
    if service.registry().get(model_name).is_some() {
        Ok(())
    } else {
        Err(CliError::UnknownModel(model_name.to_string()))
    }
}

pub fn format_sync_lines(results: &[SyncResult]) -> Vec<String> {
    results
        .iter()
        .map(|result| {
            let cursor = result.checkpoint.as_ref().map_or_else(
                || "none".to_string(),
                |checkpoint| {
                    format!(
                        "{} #{}",
                        format_timestamp(checkpoint.cursor_timestamp),
                        checkpoint.cursor_id
                    )
                },
            );
            match &result.status {
                SyncStatus::Synchronized => format!(
                    "{:<16}  synced      +{} ~{} -{} ({} skipped)  checkpoint={cursor}",
                    result.model_name,
                    result.created,
                    result.updated,
                    result.destroyed,
                    result.skipped
                ),
                SyncStatus::NoChanges => {
                    format!("{:<16}  up to date  checkpoint={cursor}", result.model_name)
                }
                SyncStatus::Failed(failure) => {
                    format!("{:<16}  FAILED      {failure}", result.model_name)
                }
            }
        })
        .collect()
}

pub fn checkpoint_to_item(checkpoint: &SyncCheckpoint) -> CheckpointItem {
    let now_ms = Utc::now().timestamp_millis();
    CheckpointItem {
        id: checkpoint.id,
        model_name: checkpoint.model_name.clone(),
        cursor_timestamp: checkpoint.cursor_timestamp.to_rfc3339(),
        cursor_id: checkpoint.cursor_id.to_string(),
        recorded_at: checkpoint.recorded_at.to_rfc3339(),
        relative_time: format_relative_time(checkpoint.recorded_at.timestamp_millis(), now_ms),
    }
}

pub fn format_checkpoint_lines(checkpoints: &[SyncCheckpoint]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    checkpoints
        .iter()
        .map(|checkpoint| {
            format!(
                "{:<16}  {}  #{:<12}  {}",
                checkpoint.model_name,
                format_timestamp(checkpoint.cursor_timestamp),
                checkpoint.cursor_id.to_string(),
                format_relative_time(checkpoint.recorded_at.timestamp_millis(), now_ms)
            )
        })
        .collect()
}

pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
