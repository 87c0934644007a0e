use crate::error::{RefreshError, RefreshResult};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::debug;
use url::{Url, form_urlencoded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Display, EnumString, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    /// Only reads are cached and deduplicated.
    pub fn is_read(&self) -> bool {
        matches!(self, HttpMethod::Get)
    }
}

/// Method, query parameters and JSON body of one backend call.
///
/// Parameters live in a `BTreeMap` so iteration order is always sorted,
/// which keeps request fingerprints independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    pub method: HttpMethod,
    pub params: BTreeMap<String, Value>,
    pub body: Option<Value>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn with_method(method: HttpMethod) -> Self {
        Self { method, ..Self::default() }
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Deterministic cache/dedup key for `endpoint` with these options.
    pub fn fingerprint(&self, endpoint: &str) -> String {
        let mut key = format!("{} {}", self.method, endpoint);
        if !self.params.is_empty() {
            // percent-encoded, so `&` or `=` inside a value cannot alias another query
            let mut query = form_urlencoded::Serializer::new(String::new());
            for (k, v) in &self.params {
                query.append_pair(k, &param_to_string(v));
            }
            key.push('?');
            key.push_str(&query.finish());
        }
        if let Some(body) = &self.body {
            // serde_json maps are ordered, so nested keys serialise sorted
            key.push('#');
            key.push_str(&body.to_string());
        }
        key
    }
}

fn param_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Anything that can carry a request to the backend and hand back JSON.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, endpoint: &str, options: &RequestOptions) -> RefreshResult<Value>;
}

/// reqwest-backed transport that resolves endpoints against a base URL.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpTransport {
    /// Endpoints resolve below the full base URL, path prefix included:
    /// `http://host/app` with `/api/status` requests `http://host/app/api/status`.
    pub fn new(base_url: &str, timeout: Duration) -> eyre::Result<Self> {
        let mut base_url =
            Url::parse(base_url).map_err(|e| eyre::eyre!("Invalid base URL {}: {}", base_url, e))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn resolve(&self, endpoint: &str) -> RefreshResult<Url> {
        self.base_url.join(endpoint.trim_start_matches('/')).map_err(|e| RefreshError::network(endpoint, e))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, endpoint: &str, options: &RequestOptions) -> RefreshResult<Value> {
        let url = self.resolve(endpoint)?;
        let method = reqwest::Method::from_bytes(options.method.as_ref().as_bytes())
            .map_err(|e| RefreshError::network(endpoint, e))?;

        let mut request = self.client.request(method, url);
        if !options.params.is_empty() {
            let query: Vec<(&str, String)> =
                options.params.iter().map(|(k, v)| (k.as_str(), param_to_string(v))).collect();
            request = request.query(&query);
        }
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        debug!("{} {}", options.method, endpoint);
        let response = request.send().await.map_err(|e| RefreshError::network(endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RefreshError::HttpStatus { endpoint: endpoint.to_string(), status: status.as_u16() });
        }

        let text = response.text().await.map_err(|e| RefreshError::network(endpoint, e))?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .map_err(|e| RefreshError::Decode { endpoint: endpoint.to_string(), reason: e.to_string() })
    }
}
