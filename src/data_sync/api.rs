use crate::data_sync::cache::CachedClient;
use crate::data_sync::transport::{HttpMethod, RequestOptions};
use crate::error::{RefreshError, RefreshResult};
use crate::logic::filters::{FilterState, build_insights_url};
use crate::utils::constants::Endpoint;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::{info, warn};

/// `{ success, message?, ...extra }` body returned by action endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Task/queue counters shared by every widget in one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskCounters {
    pub pending: u64,
    pub running: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskCounters {
    pub fn active(&self) -> u64 {
        self.pending + self.running
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusReport {
    pub status: String,
    pub message: Option<String>,
}

/// Thin wrappers over the backend endpoints the dashboard calls.
///
/// Reads go through the response cache. Successful actions clear it, so the
/// next poll observes their effect.
#[derive(Clone)]
pub struct InsightsApi {
    client: CachedClient,
}

impl InsightsApi {
    pub fn new(client: CachedClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &CachedClient {
        &self.client
    }

    /// Insights for a filter. The payload must be a JSON array.
    pub async fn list_insights(&self, filters: &FilterState) -> RefreshResult<Vec<Value>> {
        let endpoint = build_insights_url(filters);
        match self.client.cached_request(&endpoint, RequestOptions::get()).await? {
            Value::Array(items) => Ok(items),
            _ => Err(RefreshError::Shape { endpoint, expected: "array of insights" }),
        }
    }

    /// Drop the cached listing for a filter so the next read hits the backend.
    pub fn invalidate_insights(&self, filters: &FilterState) -> bool {
        self.client.invalidate(&build_insights_url(filters), &RequestOptions::get())
    }

    pub async fn task_counters(&self) -> RefreshResult<TaskCounters> {
        self.read(Endpoint::TASK_STATS).await
    }

    /// Counters straight from the backend, skipping any cached snapshot.
    /// Concurrent callers still share one request.
    pub async fn fresh_task_counters(&self) -> RefreshResult<TaskCounters> {
        self.client.invalidate(Endpoint::TASK_STATS, &RequestOptions::get());
        self.task_counters().await
    }

    pub async fn status(&self) -> RefreshResult<StatusReport> {
        self.read(Endpoint::STATUS).await
    }

    /// Ask the backend to pull fresh insights for a symbol.
    pub async fn fetch_insights(&self, symbol: &str) -> RefreshResult<ActionResponse> {
        let options = RequestOptions::with_method(HttpMethod::Post).body(json!({ "symbol": symbol }));
        self.action(Endpoint::FETCH, options).await
    }

    pub async fn analyze_insight(&self, insight_id: i64) -> RefreshResult<ActionResponse> {
        let options = RequestOptions::with_method(HttpMethod::Post).body(json!({ "id": insight_id }));
        self.action(Endpoint::ANALYZE, options).await
    }

    pub async fn delete_insight(&self, insight_id: i64) -> RefreshResult<ActionResponse> {
        let options = RequestOptions::with_method(HttpMethod::Delete).param("id", insight_id);
        self.action(Endpoint::DELETE, options).await
    }

    async fn read<T: DeserializeOwned>(&self, endpoint: &str) -> RefreshResult<T> {
        let payload = self.client.cached_request(endpoint, RequestOptions::get()).await?;
        decode(endpoint, payload)
    }

    async fn action(&self, endpoint: &str, options: RequestOptions) -> RefreshResult<ActionResponse> {
        let method = options.method;
        let payload = self.client.cached_request(endpoint, options).await?;
        let response: ActionResponse = decode(endpoint, payload)?;

        if response.success {
            info!("{} {} succeeded", method, endpoint);
            self.client.clear_cache();
        } else {
            warn!(
                "{} {} rejected: {}",
                method,
                endpoint,
                response.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(response)
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, payload: Value) -> RefreshResult<T> {
    serde_json::from_value(payload)
        .map_err(|e| RefreshError::Decode { endpoint: endpoint.to_string(), reason: e.to_string() })
}
