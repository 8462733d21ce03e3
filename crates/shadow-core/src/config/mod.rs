//! Models file configuration.
//!
//! A JSON document declares every model that has a remote: where its
//! collection lives, which attributes are cached locally and how far back
//! the first pass looks. Secrets never live in the file; a model names the
//! environment variable holding its bearer token instead.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::registry::{ModelDefinition, ModelRegistry};
use crate::remote::HttpRemoteSource;
use crate::util::{is_http_url, normalize_text_option};

const CONFIG_SCHEMA_VERSION: u32 = 1;
const DEFAULT_PRIMARY_KEY: &str = "id";

/// Environment variable naming the models file
pub const CONFIG_PATH_ENV: &str = "SHADOW_CONFIG";
/// Environment variable naming the database file
pub const DB_PATH_ENV: &str = "SHADOW_DB_PATH";

/// Contents of the models file
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ShadowConfig {
    pub version: u32,
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub models: Vec<ModelConfig>,
}

/// One remote-backed model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    pub name: String,
    /// Base URL of the remote service
    pub site: String,
    /// Collection path; defaults to the pluralized snake_case model name
    #[serde(default)]
    pub collection: Option<String>,
    #[serde(default = "default_primary_key")]
    pub remote_primary_key: String,
    #[serde(default)]
    pub initial_lookback_hours: Option<u32>,
    /// Environment variable holding a bearer token for the remote
    #[serde(default)]
    pub auth_token_env: Option<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub attributes: Vec<AttributeConfig>,
}

/// One declared remote attribute
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AttributeConfig {
    /// Attribute name on the remote
    pub name: String,
    /// Local alias, if different
    #[serde(default, rename = "as")]
    pub alias: Option<String>,
    #[serde(default)]
    pub cached: bool,
}

fn default_primary_key() -> String {
    DEFAULT_PRIMARY_KEY.to_string()
}

impl ShadowConfig {
    /// Parse and validate a models file from a raw JSON payload.
    pub fn parse(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::InvalidInput(format!("invalid models file: {error}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate the models file at `path`
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = std::fs::read_to_string(path).map_err(|error| {
            Error::InvalidInput(format!("failed to read {}: {error}", path.display()))
        })?;
        Self::parse(&payload)
    }

    /// Check the schema version and every model declaration
    pub fn validate(&self) -> Result<()> {
        if self.version != CONFIG_SCHEMA_VERSION {
            return Err(Error::InvalidInput(format!(
                "unsupported models file version {} (expected {CONFIG_SCHEMA_VERSION})",
                self.version
            )));
        }

        let mut seen = HashSet::new();
        for model in &self.models {
            model.validate()?;
            if !seen.insert(model.name.trim()) {
                return Err(Error::InvalidInput(format!(
                    "model '{}' is declared twice",
                    model.name.trim()
                )));
            }
        }
        Ok(())
    }

    /// Build a registry of HTTP-backed models, reading tokens from the environment
    pub fn build_registry(&self) -> Result<ModelRegistry> {
        self.build_registry_with(|name| std::env::var(name).ok())
    }

    /// Build a registry, resolving token variables through `lookup_env`
    pub fn build_registry_with(
        &self,
        lookup_env: impl Fn(&str) -> Option<String>,
    ) -> Result<ModelRegistry> {
        let mut registry = ModelRegistry::new();
        for model in &self.models {
            registry.register(model.to_definition(&lookup_env)?)?;
        }
        Ok(registry)
    }
}

impl ModelConfig {
    /// Collection path used for this model
    pub fn collection_name(&self) -> String {
        normalize_text_option(self.collection.clone())
            .unwrap_or_else(|| format!("{}s", snake_case(self.name.trim())))
    }

    fn validate(&self) -> Result<()> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(Error::InvalidInput("model name must not be empty".into()));
        }
        if !is_http_url(self.site.trim()) {
            return Err(Error::InvalidInput(format!(
                "model '{name}' site must include http:// or https://"
            )));
        }
        if self.remote_primary_key.trim().is_empty() {
            return Err(Error::InvalidInput(format!(
                "model '{name}' remote_primary_key must not be empty"
            )));
        }
        if self.timeout_secs == Some(0) {
            return Err(Error::InvalidInput(format!(
                "model '{name}' timeout_secs must be positive"
            )));
        }
        for attribute in &self.attributes {
            let alias_blank = attribute
                .alias
                .as_deref()
                .is_some_and(|alias| alias.trim().is_empty());
            if attribute.name.trim().is_empty() || alias_blank {
                return Err(Error::InvalidInput(format!(
                    "model '{name}' declares an attribute with an empty name"
                )));
            }
        }
        Ok(())
    }

    fn to_definition(&self, lookup_env: &impl Fn(&str) -> Option<String>) -> Result<ModelDefinition> {
        let mut source = match self.timeout_secs {
            Some(secs) => {
                HttpRemoteSource::with_timeout(&self.site, self.collection_name(), Duration::from_secs(secs))?
            }
            None => HttpRemoteSource::new(&self.site, self.collection_name())?,
        }
        .with_primary_key(self.remote_primary_key.trim());

        if let Some(variable) = normalize_text_option(self.auth_token_env.clone()) {
            match normalize_text_option(lookup_env(&variable)) {
                Some(token) => source = source.with_bearer_token(token),
                None => tracing::warn!(
                    "{variable} is not set; requests for {} are unauthenticated",
                    self.name.trim()
                ),
            }
        }

        let mut builder = ModelDefinition::builder(self.name.trim(), Arc::new(source));
        for attribute in &self.attributes {
            let alias = attribute.alias.as_deref().unwrap_or(&attribute.name);
            builder = builder.declare(&attribute.name, alias, attribute.cached);
        }
        if let Some(hours) = self.initial_lookback_hours {
            builder = builder.initial_lookback(chrono::Duration::hours(i64::from(hours)));
        }
        builder.build()
    }
}

/// `BlogPost` -> `blog_post`
fn snake_case(name: &str) -> String {
    let mut snake = String::with_capacity(name.len() + 4);
    let mut previous_lower = false;
    for character in name.chars() {
        if character.is_uppercase() {
            if previous_lower {
                snake.push('_');
            }
            snake.extend(character.to_lowercase());
            previous_lower = false;
        } else {
            snake.push(character);
            previous_lower = character.is_lowercase() || character.is_ascii_digit();
        }
    }
    snake
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = r#"
    {
      "version": 1,
      "database_path": "/tmp/shadow-test.db",
      "models": [
        {
          "name": "User",
          "site": "https://people.example.com/",
          "initial_lookback_hours": 168,
          "auth_token_env": "PEOPLE_TOKEN",
          "attributes": [
            { "name": "email", "cached": true },
            { "name": "phone", "as": "telephone" }
          ]
        },
        {
          "name": "BlogPost",
          "site": "http://localhost:3000",
          "collection": "articles",
          "remote_primary_key": "uuid",
          "attributes": [{ "name": "title", "cached": true }]
        }
      ]
    }
    "#;

    #[test]
    fn parse_applies_defaults() {
        let config = ShadowConfig::parse(SAMPLE).unwrap();

        assert_eq!(
            config.database_path.as_deref(),
            Some(Path::new("/tmp/shadow-test.db"))
        );
        let user = &config.models[0];
        assert_eq!(user.remote_primary_key, "id");
        assert_eq!(user.collection_name(), "users");
        assert_eq!(user.attributes[1].alias.as_deref(), Some("telephone"));
        assert!(!user.attributes[1].cached);
        assert_eq!(config.models[1].collection_name(), "articles");
    }

    #[test]
    fn parse_rejects_unknown_fields() {
        let error = ShadowConfig::parse(r#"{"version": 1, "modles": []}"#).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn parse_rejects_invalid_declarations() {
        let wrong_version = r#"{"version": 2, "models": []}"#;
        assert!(ShadowConfig::parse(wrong_version)
            .unwrap_err()
            .to_string()
            .contains("version"));

        let bad_site = r#"{"version": 1, "models": [{"name": "User", "site": "people.local"}]}"#;
        assert!(ShadowConfig::parse(bad_site).is_err());

        let duplicate = r#"{"version": 1, "models": [
            {"name": "User", "site": "https://a.example.com"},
            {"name": "User", "site": "https://b.example.com"}
        ]}"#;
        assert!(ShadowConfig::parse(duplicate)
            .unwrap_err()
            .to_string()
            .contains("declared twice"));

        let blank_attribute = r#"{"version": 1, "models": [
            {"name": "User", "site": "https://a.example.com", "attributes": [{"name": " "}]}
        ]}"#;
        assert!(ShadowConfig::parse(blank_attribute).is_err());
    }

    #[test]
    fn build_registry_declares_models_in_order() {
        let config = ShadowConfig::parse(SAMPLE).unwrap();
        let registry = config
            .build_registry_with(|name| (name == "PEOPLE_TOKEN").then(|| "secret".to_string()))
            .unwrap();

        assert_eq!(registry.names(), vec!["User".to_string(), "BlogPost".to_string()]);
        let user = registry.get("User").unwrap();
        assert!(user.is_cached_alias("email"));
        assert_eq!(user.attribute("telephone").unwrap().remote_name, "phone");
        assert_eq!(user.initial_lookback(), Some(chrono::Duration::hours(168)));
        assert_eq!(registry.get("BlogPost").unwrap().initial_lookback(), None);
    }

    #[test]
    fn load_from_path_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.json");
        std::fs::write(&path, SAMPLE).unwrap();

        let config = ShadowConfig::load_from_path(&path).unwrap();
        assert_eq!(config.models.len(), 2);
        assert!(ShadowConfig::load_from_path(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn snake_case_splits_words() {
        assert_eq!(snake_case("User"), "user");
        assert_eq!(snake_case("BlogPost"), "blog_post");
        assert_eq!(snake_case("Mp3File"), "mp3_file");
    }
}
