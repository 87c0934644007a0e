/// Data Layer
///
/// Everything between the orchestration logic and the insights backend:
///
/// - Transport abstraction with a reqwest-backed HTTP implementation
/// - Response cache with TTL expiry and in-flight request deduplication
/// - Typed wrappers over the backend endpoints
/// - Refresh configuration (TOML section and environment overrides)

pub mod api;
pub mod cache;
pub mod config;
pub mod transport;

// Tests
#[cfg(test)]
mod tests;

pub use api::{ActionResponse, InsightsApi, StatusReport, TaskCounters};
pub use cache::{CacheEntry, CacheStats, CachedClient};
pub use config::RefreshConfig;
pub use transport::{HttpMethod, HttpTransport, RequestOptions, Transport};
