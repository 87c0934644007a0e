// Two-Layer Architecture
pub mod data_sync; // Data Layer: transport, response cache, endpoint wrappers
pub mod logic; // Logic Layer: scheduling, filters, fan-out, unified tick

pub mod context;
pub mod error;

// Common utilities and constants
pub mod utils;

// Re-export key components from each layer
pub use context::{RefreshContext, RefreshContextBuilder};
pub use data_sync::{
    ActionResponse, CacheStats, CachedClient, HttpMethod, HttpTransport, InsightsApi, RefreshConfig,
    RequestOptions, TaskCounters, Transport,
};
pub use error::{RefreshError, RefreshResult, SchedulerError};
pub use logic::{
    AgeDisplay, ClockDisplay, Component, CounterDisplay, FilterState, Navigator, RefreshManager,
    RefreshOptions, Refreshable, Scheduler, StatusSource, SymbolPanel, UnifiedTicker,
    build_insights_url, parse_current_filters, task_fn,
};
pub use utils::{Endpoint, INSIGHTS_ROOT, TaskName};
