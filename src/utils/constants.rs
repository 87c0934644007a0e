/// Root of the filtered-insights path space.
pub const INSIGHTS_ROOT: &str = "/api/insights";

#[non_exhaustive]
pub struct Endpoint;

impl Endpoint {
    pub const TASK_STATS: &'static str = "/api/tasks/stats";
    pub const STATUS: &'static str = "/api/status";
    pub const FETCH: &'static str = "/api/insights/fetch";
    pub const ANALYZE: &'static str = "/api/insights/analyze";
    pub const DELETE: &'static str = "/api/insights/delete";
}

/// Well-known scheduler task names. Each has a default interval in
/// `RefreshConfig::default_interval`.
#[non_exhaustive]
pub struct TaskName;

impl TaskName {
    pub const AGES: &'static str = "ages";
    pub const TABLE: &'static str = "table";
    pub const STATUS: &'static str = "status";
    pub const TASKS: &'static str = "tasks";
    pub const DEBUGGER: &'static str = "debugger";
    pub const UNIFIED: &'static str = "unified";
}
