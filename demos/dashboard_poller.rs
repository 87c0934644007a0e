/// Dashboard Poller Example
///
/// Runs the refresh orchestration against a live insights backend and logs
/// what each widget would render. Point it at a backend with
/// `INSIGHTS_BASE_URL` (a `.env` file works too).
use async_trait::async_trait;
use eyre::Result;
use insights_refresh::{
    ClockDisplay, Component, CounterDisplay, RefreshConfig, RefreshContextBuilder, Refreshable, TaskCounters,
};
use serde_json::Value;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

struct InsightsTable;

#[async_trait]
impl Refreshable for InsightsTable {
    async fn refresh(&self, data: &[Value]) -> Result<()> {
        info!("Table: {} insights", data.len());
        for insight in data.iter().take(5) {
            info!("  {}", insight);
        }
        Ok(())
    }
}

impl Component for InsightsTable {
    fn name(&self) -> &str {
        "insights-table"
    }

    fn as_refreshable(&self) -> Option<&dyn Refreshable> {
        Some(self)
    }
}

struct StatusBar;

impl ClockDisplay for StatusBar {
    fn update_time(&self, now: SystemTime) {
        let secs = now.duration_since(SystemTime::UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default();
        info!("Clock: {}", secs);
    }
}

impl CounterDisplay for StatusBar {
    fn set_counters(&self, counters: &TaskCounters) {
        info!(
            "Tasks: {} pending, {} running, {} completed, {} failed",
            counters.pending, counters.running, counters.completed, counters.failed
        );
    }
}

impl Component for StatusBar {
    fn name(&self) -> &str {
        "status-bar"
    }

    fn as_clock_display(&self) -> Option<&dyn ClockDisplay> {
        Some(self)
    }

    fn as_counter_display(&self) -> Option<&dyn CounterDisplay> {
        Some(self)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RefreshConfig::from_env().unwrap_or_else(|e| {
        warn!("Failed to load config from environment, using defaults: {}", e);
        RefreshConfig::default()
    });
    let symbol_path = std::env::args().nth(1);

    let context = RefreshContextBuilder::new().with_config(config).build()?;
    context.register_component(Arc::new(InsightsTable));
    context.register_component(Arc::new(StatusBar));
    context.start();

    if let Some(path) = symbol_path {
        info!("Navigating to {}", path);
        context.navigate(path).await;
    }

    let run_for = Duration::from_secs(30);
    info!("Polling for {:?}", run_for);
    sleep(run_for).await;

    let stats = context.client().stats();
    info!("Cache hit rate: {:.1}%", stats.hit_rate() * 100.0);
    context.cleanup();
    Ok(())
}
