//! Model definitions and the registry of models that have a remote.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::remote::RemoteSource;

/// One declared remote attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteAttribute {
    /// Attribute name on the remote resource
    pub remote_name: String,
    /// Name the attribute is exposed and stored under locally
    pub local_alias: String,
    /// Persist the value locally instead of delegating reads to the remote
    pub cached: bool,
}

/// A local model backed by a remote collection
#[derive(Clone)]
pub struct ModelDefinition {
    name: String,
    attributes: Vec<RemoteAttribute>,
    initial_lookback: Option<Duration>,
    source: Arc<dyn RemoteSource>,
}

impl fmt::Debug for ModelDefinition {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("ModelDefinition")
            .field("name", &self.name)
            .field("attributes", &self.attributes)
            .field("initial_lookback", &self.initial_lookback)
            .finish_non_exhaustive()
    }
}

impl ModelDefinition {
    /// Start declaring a model
    pub fn builder(name: impl Into<String>, source: Arc<dyn RemoteSource>) -> ModelDefinitionBuilder {
        ModelDefinitionBuilder {
            name: name.into(),
            attributes: Vec::new(),
            initial_lookback: None,
            source,
        }
    }

    /// Model name; also the key of its checkpoint lineage
    pub fn name(&self) -> &str {
        &self.name
    }

    /// All declared attributes in declaration order
    pub fn attributes(&self) -> &[RemoteAttribute] {
        &self.attributes
    }

    /// Cached attributes in declaration order
    pub fn cached_attributes(&self) -> impl Iterator<Item = &RemoteAttribute> {
        self.attributes.iter().filter(|attribute| attribute.cached)
    }

    /// The attribute exposed under `alias`. Later declarations win.
    pub fn attribute(&self, alias: &str) -> Option<&RemoteAttribute> {
        self.attributes
            .iter()
            .rev()
            .find(|attribute| attribute.local_alias == alias)
    }

    /// Whether `alias` is stored locally
    pub fn is_cached_alias(&self, alias: &str) -> bool {
        self.attribute(alias).is_some_and(|attribute| attribute.cached)
    }

    /// Lookback used for the first pass when no checkpoint exists
    pub const fn initial_lookback(&self) -> Option<Duration> {
        self.initial_lookback
    }

    /// Feed position used when no checkpoint exists: `now - lookback`, else the epoch
    pub fn initial_since(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.initial_lookback
            .and_then(|lookback| now.checked_sub_signed(lookback))
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Remote collection backing this model
    pub fn source(&self) -> &dyn RemoteSource {
        self.source.as_ref()
    }
}

/// Declarative builder for [`ModelDefinition`]
pub struct ModelDefinitionBuilder {
    name: String,
    attributes: Vec<RemoteAttribute>,
    initial_lookback: Option<Duration>,
    source: Arc<dyn RemoteSource>,
}

impl ModelDefinitionBuilder {
    /// Delegated attribute, read from the remote on demand
    #[must_use]
    pub fn attribute(self, remote_name: &str) -> Self {
        self.declare(remote_name, remote_name, false)
    }

    /// Delegated attribute exposed under another name
    #[must_use]
    pub fn attribute_as(self, remote_name: &str, local_alias: &str) -> Self {
        self.declare(remote_name, local_alias, false)
    }

    /// Attribute persisted locally and refreshed by synchronization
    #[must_use]
    pub fn cached(self, remote_name: &str) -> Self {
        self.declare(remote_name, remote_name, true)
    }

    /// Cached attribute stored under another name
    #[must_use]
    pub fn cached_as(self, remote_name: &str, local_alias: &str) -> Self {
        self.declare(remote_name, local_alias, true)
    }

    /// Declare an attribute explicitly
    #[must_use]
    pub fn declare(mut self, remote_name: &str, local_alias: &str, cached: bool) -> Self {
        self.attributes.push(RemoteAttribute {
            remote_name: remote_name.trim().to_string(),
            local_alias: local_alias.trim().to_string(),
            cached,
        });
        self
    }

    /// How far back the very first pass looks
    #[must_use]
    pub const fn initial_lookback(mut self, lookback: Duration) -> Self {
        self.initial_lookback = Some(lookback);
        self
    }

    /// Validate and finish the definition
    pub fn build(self) -> Result<ModelDefinition> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err(Error::InvalidInput("model name must not be empty".into()));
        }
        if let Some(attribute) = self
            .attributes
            .iter()
            .find(|attribute| attribute.remote_name.is_empty() || attribute.local_alias.is_empty())
        {
            return Err(Error::InvalidInput(format!(
                "model {name} declares an attribute with an empty name: {attribute:?}"
            )));
        }
        if self
            .initial_lookback
            .is_some_and(|lookback| lookback < Duration::zero())
        {
            return Err(Error::InvalidInput(format!(
                "model {name} has a negative initial lookback"
            )));
        }

        Ok(ModelDefinition {
            name,
            attributes: self.attributes,
            initial_lookback: self.initial_lookback,
            source: self.source,
        })
    }
}

/// Models with a remote, in registration order.
///
/// Populated at startup and handed to the synchronizer explicitly.
#[derive(Debug, Clone, Default)]
pub struct ModelRegistry {
    models: Vec<ModelDefinition>,
}

impl ModelRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a model; names must be unique
    pub fn register(&mut self, definition: ModelDefinition) -> Result<()> {
        if self.get(definition.name()).is_some() {
            return Err(Error::InvalidInput(format!(
                "model {} is already registered",
                definition.name()
            )));
        }
        self.models.push(definition);
        Ok(())
    }

    /// Look up a model by name
    pub fn get(&self, name: &str) -> Option<&ModelDefinition> {
        self.models.iter().find(|model| model.name() == name)
    }

    /// All models in registration order
    pub fn models(&self) -> &[ModelDefinition] {
        &self.models
    }

    /// Names of all models in registration order
    pub fn names(&self) -> Vec<String> {
        self.models.iter().map(|model| model.name().to_string()).collect()
    }

    /// Resolve an explicit model list, failing on the first unknown name
    pub fn select(&self, names: &[String]) -> Result<Vec<&ModelDefinition>> {
        names
            .iter()
            .map(|name| {
                self.get(name.trim())
                    .ok_or_else(|| Error::NotFound(format!("model {}", name.trim())))
            })
            .collect()
    }

    /// Number of registered models
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no model is registered
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
