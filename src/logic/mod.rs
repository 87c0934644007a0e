/// Logic Layer - Refresh Orchestration
///
/// This layer is responsible for:
/// - Resolving the insights filter from the navigation path
/// - Running named repeating tasks with a global pause gate
/// - Fanning refreshed data out to registered components
/// - Driving clocks, counters, age labels and status polls from one tick

pub mod capabilities;
pub mod coordinator;
pub mod filters;
pub mod registry;
pub mod scheduler;

// Re-export key components from the logic layer
pub use capabilities::{
    AgeDisplay, ClockDisplay, Component, CounterDisplay, Refreshable, StatusSource, SymbolPanel,
};
pub use coordinator::{TickReport, UnifiedTicker};
pub use filters::{FilterState, Navigator, build_insights_url, parse_current_filters};
pub use registry::{RefreshManager, RefreshOptions, RefreshStatus};
pub use scheduler::{Scheduler, TaskCallback, TaskStatus, task_fn};
