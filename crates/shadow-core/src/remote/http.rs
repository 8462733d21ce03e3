//! HTTP remote source for resource-oriented JSON APIs.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::StatusCode;
use serde_json::Value;

use super::{RemoteSource, SyncParams};
use crate::error::{Error, Result};
use crate::models::{RemoteId, RemoteRecord};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Remote collection served at `{site}/{collection}`.
///
/// The change feed is `GET {site}/{collection}/updated?since=..&last_record_id=..`
/// and single records are `GET {site}/{collection}/{id}`.
#[derive(Debug, Clone)]
pub struct HttpRemoteSource {
    site: String,
    collection: String,
    primary_key: String,
    bearer_token: Option<String>,
    client: reqwest::Client,
}

impl HttpRemoteSource {
    /// Builds a source with the default timeout and `id` as primary key.
    pub fn new(site: impl Into<String>, collection: impl Into<String>) -> Result<Self> {
        Self::with_timeout(site, collection, Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
    }

    /// Builds a source whose requests time out after `timeout`.
    pub fn with_timeout(
        site: impl Into<String>,
        collection: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let site = normalize_site(site.into())?;
        let collection = normalize_text_option(Some(collection.into()))
            .map(|collection| collection.trim_matches('/').to_string())
            .filter(|collection| !collection.is_empty())
            .ok_or_else(|| Error::InvalidInput("collection must not be empty".into()))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| Error::InvalidInput(format!("Failed to construct HTTP client: {error}")))?;

        Ok(Self {
            site,
            collection,
            primary_key: "id".to_string(),
            bearer_token: None,
            client,
        })
    }

    /// Use another attribute as the remote primary key
    #[must_use]
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    /// Send `Authorization: Bearer <token>` with every request
    #[must_use]
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = normalize_text_option(Some(token.into()));
        self
    }

    /// URL of the change feed
    pub fn updated_url(&self) -> String {
        format!("{}/{}/updated", self.site, self.collection)
    }

    /// URL of a single record
    pub fn record_url(&self, id: &RemoteId) -> String {
        format!(
            "{}/{}/{}",
            self.site,
            self.collection,
            urlencoding::encode(id.as_str())
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json");
        match &self.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl RemoteSource for HttpRemoteSource {
    async fn fetch_changed(
        &self,
        since: DateTime<Utc>,
        after_id: Option<&RemoteId>,
        params: &SyncParams,
    ) -> Result<Vec<RemoteRecord>> {
        let query = change_query(since, after_id, params);
        let url = self.updated_url();
        tracing::debug!("Requesting changes from {url}");

        let response = self.request(&url).query(&query).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!(
                "change feed returned HTTP {status}: {}",
                compact_text(&body)
            )));
        }

        let body = response.text().await?;
        parse_change_feed(&body, &self.primary_key)
    }

    async fn fetch_one(&self, id: &RemoteId) -> Result<Option<RemoteRecord>> {
        let response = self.request(&self.record_url(id)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Fetch(format!(
                "record lookup returned HTTP {status}: {}",
                compact_text(&body)
            )));
        }

        let payload = response.json::<Value>().await?;
        RemoteRecord::from_json(payload, &self.primary_key).map(Some)
    }
}

/// Query parameters for the change feed. Caller parameters override the cursor ones.
fn change_query(
    since: DateTime<Utc>,
    after_id: Option<&RemoteId>,
    params: &SyncParams,
) -> Vec<(String, String)> {
    let mut query = SyncParams::new();
    query.insert(
        "since".to_string(),
        since.to_rfc3339_opts(SecondsFormat::AutoSi, true),
    );
    if let Some(after_id) = after_id {
        query.insert("last_record_id".to_string(), after_id.to_string());
    }
    query.extend(params.iter().map(|(key, value)| (key.clone(), value.clone())));
    query.into_iter().collect()
}

/// Parse a change feed payload.
///
/// Accepts a JSON array of records, or an object wrapping exactly one array
/// (e.g. `{"users": [...]}`).
pub fn parse_change_feed(payload: &str, primary_key: &str) -> Result<Vec<RemoteRecord>> {
    let value: Value = serde_json::from_str(payload)
        .map_err(|error| Error::Fetch(format!("invalid change feed JSON: {error}")))?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(object) => {
            let mut arrays = object.into_iter().filter_map(|(_, value)| match value {
                Value::Array(items) => Some(items),
                _ => None,
            });
            match (arrays.next(), arrays.next()) {
                (Some(items), None) => items,
                _ => {
                    return Err(Error::Fetch(
                        "change feed object must wrap exactly one array".into(),
                    ))
                }
            }
        }
        _ => return Err(Error::Fetch("change feed must be a JSON array".into())),
    };

    items
        .into_iter()
        .map(|item| RemoteRecord::from_json(item, primary_key))
        .collect()
}

fn normalize_site(raw: String) -> Result<String> {
    let site = normalize_text_option(Some(raw))
        .ok_or_else(|| Error::InvalidInput("site must not be empty".into()))?;
    if is_http_url(&site) {
        Ok(site.trim_end_matches('/').to_string())
    } else {
        Err(Error::InvalidInput(
            "site must include http:// or https://".into(),
        ))
    }
}
