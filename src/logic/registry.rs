use crate::data_sync::api::InsightsApi;
use crate::logic::capabilities::Component;
use crate::logic::filters::Navigator;
use crate::logic::scheduler::{Scheduler, task_fn};
use crate::utils::constants::TaskName;
use futures::FutureExt;
use futures::future::join_all;
use serde_json::Value;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct RefreshOptions {
    /// Skip the response cache for this cycle
    pub force: bool,
}

impl RefreshOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

/// Diagnostics snapshot of the fan-out
#[derive(Debug, Clone)]
pub struct RefreshStatus {
    pub is_refreshing: bool,
    pub component_count: usize,
    pub last_refresh: Option<Instant>,
}

struct ManagerInner {
    api: InsightsApi,
    navigator: Navigator,
    scheduler: Scheduler,
    components: RwLock<Vec<Arc<dyn Component>>>,
    is_refreshing: AtomicBool,
    last_refresh: Mutex<Option<Instant>>,
    // interval requested by start_auto_refresh, kept while the task is
    // parked for lack of subscribers
    auto_refresh: Mutex<Option<Duration>>,
}

/// Clears the reentrancy flag on every exit path, cancellation included.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Component registry that fans each refreshed insights batch out to every
/// refreshable subscriber.
///
/// Overlapping refresh cycles are dropped rather than queued, malformed or
/// missing data never reaches subscribers, and one subscriber failing does
/// not keep the others from their update.
#[derive(Clone)]
pub struct RefreshManager {
    inner: Arc<ManagerInner>,
}

impl RefreshManager {
    pub fn new(api: InsightsApi, navigator: Navigator, scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                api,
                navigator,
                scheduler,
                components: RwLock::new(Vec::new()),
                is_refreshing: AtomicBool::new(false),
                last_refresh: Mutex::new(None),
                auto_refresh: Mutex::new(None),
            }),
        }
    }

    /// Add a subscriber. Components without a refresh capability are ignored.
    /// The first subscriber after the set emptied resumes a parked
    /// auto-refresh.
    pub fn register_component(&self, component: Arc<dyn Component>) -> bool {
        if component.as_refreshable().is_none() {
            debug!("Ignoring component {}: not refreshable", component.name());
            return false;
        }

        let was_empty = {
            let mut components = self.inner.components.write().unwrap_or_else(|e| e.into_inner());
            if components.iter().any(|c| Arc::ptr_eq(c, &component)) {
                return false;
            }
            debug!("Registered component {}", component.name());
            let was_empty = components.is_empty();
            components.push(component);
            was_empty
        };

        if was_empty && !self.is_auto_refreshing() {
            let wanted = *self.inner.auto_refresh.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(interval) = wanted {
                info!("Subscriber registered, resuming auto-refresh");
                self.schedule(interval);
            }
        }
        true
    }

    /// Remove a subscriber. The auto-refresh task stops once nobody is left.
    pub fn unregister_component(&self, component: &Arc<dyn Component>) -> bool {
        let now_empty = {
            let mut components = self.inner.components.write().unwrap_or_else(|e| e.into_inner());
            let before = components.len();
            components.retain(|c| !Arc::ptr_eq(c, component));
            if components.len() == before {
                return false;
            }
            components.is_empty()
        };

        debug!("Unregistered component {}", component.name());
        if now_empty && self.inner.scheduler.stop(TaskName::TABLE) {
            info!("No subscribers left, auto-refresh stopped");
        }
        true
    }

    pub fn component_count(&self) -> usize {
        self.inner.components.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Fetch insights for the current filters and push them to every
    /// subscriber. Returns false when the cycle was dropped or no usable data
    /// arrived.
    pub async fn refresh_data(&self, options: RefreshOptions) -> bool {
        if self
            .inner
            .is_refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Refresh already in progress, dropping request");
            return false;
        }
        let _guard = RefreshingGuard(&self.inner.is_refreshing);

        let filters = self.inner.navigator.current_filters();
        if options.force {
            self.inner.api.invalidate_insights(&filters);
        }

        let items = match self.inner.api.list_insights(&filters).await {
            Ok(items) => items,
            Err(e) if e.is_shape() => {
                warn!("Discarding malformed insights payload: {}", e);
                return false;
            }
            Err(e) => {
                warn!("Insights refresh failed, keeping last render: {}", e);
                return false;
            }
        };

        let data: Arc<[Value]> = items.into();
        let components = self.inner.components.read().unwrap_or_else(|e| e.into_inner()).clone();
        let failed = fan_out(&components, &data).await;

        *self.inner.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        debug!(
            "Refreshed {} insights for {:?} to {} components ({} failed)",
            data.len(),
            filters.symbol,
            components.len(),
            failed
        );
        true
    }

    pub fn status(&self) -> RefreshStatus {
        RefreshStatus {
            is_refreshing: self.inner.is_refreshing.load(Ordering::Acquire),
            component_count: self.component_count(),
            last_refresh: *self.inner.last_refresh.lock().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Poll `refresh_data` on the scheduler under the `table` task name.
    pub fn start_auto_refresh(&self, interval: Option<Duration>) {
        let interval =
            interval.unwrap_or_else(|| self.inner.scheduler.config().default_interval(TaskName::TABLE));
        *self.inner.auto_refresh.lock().unwrap_or_else(|e| e.into_inner()) = Some(interval);
        self.schedule(interval);
    }

    fn schedule(&self, interval: Duration) {
        let weak = Arc::downgrade(&self.inner);
        let callback = task_fn(move || {
            let weak: Weak<ManagerInner> = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    RefreshManager { inner }.refresh_data(RefreshOptions::default()).await;
                }
                Ok(())
            }
        });
        self.inner.scheduler.register(TaskName::TABLE, callback, Some(interval));
    }

    /// Stop polling for good, unlike the parking that happens when the last
    /// subscriber leaves.
    pub fn stop_auto_refresh(&self) -> bool {
        *self.inner.auto_refresh.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.scheduler.stop(TaskName::TABLE)
    }

    pub fn is_auto_refreshing(&self) -> bool {
        self.inner.scheduler.is_registered(TaskName::TABLE)
    }

    /// Forget subscribers, timestamps and any requested auto-refresh.
    pub fn reset(&self) {
        *self.inner.auto_refresh.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.components.write().unwrap_or_else(|e| e.into_inner()).clear();
        *self.inner.last_refresh.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }
}

/// Settle-all delivery. Returns how many subscribers failed.
async fn fan_out(components: &[Arc<dyn Component>], data: &[Value]) -> usize {
    let deliveries = components.iter().filter_map(|component| {
        let refreshable = component.as_refreshable()?;
        Some(async move {
            let outcome = AssertUnwindSafe(refreshable.refresh(data)).catch_unwind().await;
            (component.name(), outcome)
        })
    });

    let mut failed = 0;
    for (name, outcome) in join_all(deliveries).await {
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failed += 1;
                warn!("Component {} failed to refresh: {:#}", name, e);
            }
            Err(_) => {
                failed += 1;
                warn!("Component {} panicked during refresh", name);
            }
        }
    }
    failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_sync::cache::CachedClient;
    use crate::data_sync::transport::mock::MockTransport;
    use crate::logic::capabilities::testing::{Failure, RecordingWidget};
    use crate::utils::constants::INSIGHTS_ROOT;
    use serde_json::json;

    fn manager_with(transport: &Arc<MockTransport>) -> RefreshManager {
        let client = CachedClient::new(transport.clone(), Duration::from_secs(5));
        RefreshManager::new(InsightsApi::new(client), Navigator::default(), Scheduler::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_failing_subscriber_does_not_block_others() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!([{"id": 1}, {"id": 2}]));
        let manager = manager_with(&transport);

        let broken = Arc::new(RecordingWidget::table("broken").failing(Failure::Error));
        let panicky = Arc::new(RecordingWidget::table("panicky").failing(Failure::Panic));
        let healthy = Arc::new(RecordingWidget::table("healthy"));
        assert!(manager.register_component(broken.clone()));
        assert!(manager.register_component(panicky.clone()));
        assert!(manager.register_component(healthy.clone()));

        assert!(manager.refresh_data(RefreshOptions::default()).await);
        assert_eq!(healthy.refresh_calls(), 1);
        assert_eq!(healthy.last_batch_len.load(Ordering::SeqCst), 2);
        assert_eq!(broken.refresh_calls(), 1);
        assert_eq!(panicky.refresh_calls(), 1);

        let status = manager.status();
        assert!(!status.is_refreshing);
        assert!(status.last_refresh.is_some());
        assert_eq!(status.component_count, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overlapping_refresh_is_dropped() {
        let transport = Arc::new(MockTransport::with_delay(Duration::from_millis(100)));
        transport.respond(INSIGHTS_ROOT, json!([]));
        let manager = manager_with(&transport);
        let widget = Arc::new(RecordingWidget::table("table"));
        manager.register_component(widget.clone());

        let first = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.refresh_data(RefreshOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(manager.status().is_refreshing);

        assert!(!manager.refresh_data(RefreshOptions::forced()).await);
        assert_eq!(transport.calls(), 1);

        assert!(first.await.unwrap());
        assert_eq!(widget.refresh_calls(), 1);
        assert!(!manager.status().is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_never_reaches_subscribers() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!({"unexpected": true}));
        let manager = manager_with(&transport);
        let widget = Arc::new(RecordingWidget::table("table"));
        manager.register_component(widget.clone());

        assert!(!manager.refresh_data(RefreshOptions::default()).await);
        assert_eq!(widget.refresh_calls(), 0);
        assert!(manager.status().last_refresh.is_none());
        assert!(!manager.status().is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failure_keeps_last_render() {
        let transport = Arc::new(MockTransport::new());
        transport.fail(INSIGHTS_ROOT, 502);
        let manager = manager_with(&transport);
        let widget = Arc::new(RecordingWidget::table("table"));
        manager.register_component(widget.clone());

        assert!(!manager.refresh_data(RefreshOptions::default()).await);
        assert_eq!(widget.refresh_calls(), 0);
        assert!(!manager.status().is_refreshing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_uses_current_filters_and_force() {
        let transport = Arc::new(MockTransport::new());
        transport.respond("/api/insights/NASDAQ:AAPL", json!([{"id": 9}]));
        let manager = manager_with(&transport);
        manager.register_component(Arc::new(RecordingWidget::table("table")));
        manager.inner.navigator.navigate("/api/insights/NASDAQ:AAPL");

        assert!(manager.refresh_data(RefreshOptions::default()).await);
        assert!(manager.refresh_data(RefreshOptions::default()).await);
        assert_eq!(transport.calls_to("/api/insights/NASDAQ:AAPL"), 1);

        assert!(manager.refresh_data(RefreshOptions::forced()).await);
        assert_eq!(transport.calls_to("/api/insights/NASDAQ:AAPL"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_rules() {
        let transport = Arc::new(MockTransport::new());
        let manager = manager_with(&transport);

        let clock_only: Arc<dyn Component> = Arc::new(RecordingWidget { clock: true, ..RecordingWidget::new("clock") });
        assert!(!manager.register_component(clock_only));

        let table: Arc<dyn Component> = Arc::new(RecordingWidget::table("table"));
        assert!(manager.register_component(table.clone()));
        assert!(!manager.register_component(table.clone()));
        assert_eq!(manager.component_count(), 1);

        assert!(manager.unregister_component(&table));
        assert!(!manager.unregister_component(&table));
        assert_eq!(manager.component_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_unregister_stops_auto_refresh() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!([]));
        let manager = manager_with(&transport);
        let a: Arc<dyn Component> = Arc::new(RecordingWidget::table("a"));
        let b: Arc<dyn Component> = Arc::new(RecordingWidget::table("b"));
        manager.register_component(a.clone());
        manager.register_component(b.clone());

        manager.start_auto_refresh(Some(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(manager.is_auto_refreshing());

        manager.unregister_component(&a);
        assert!(manager.is_auto_refreshing());
        manager.unregister_component(&b);
        assert!(!manager.is_auto_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_subscriber_resumes_parked_auto_refresh() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!([]));
        let manager = manager_with(&transport);
        let first: Arc<dyn Component> = Arc::new(RecordingWidget::table("first"));
        manager.register_component(first.clone());
        manager.start_auto_refresh(Some(Duration::from_millis(100)));

        manager.unregister_component(&first);
        assert!(!manager.is_auto_refreshing());

        let replacement = Arc::new(RecordingWidget::table("replacement"));
        manager.register_component(replacement.clone());
        assert!(manager.is_auto_refreshing());
        assert_eq!(manager.inner.scheduler.task_status(TaskName::TABLE).unwrap().interval, Duration::from_millis(100));

        tokio::time::sleep(Duration::from_millis(1_000)).await;
        assert!(replacement.refresh_calls() >= 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_is_not_resumed() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!([]));
        let manager = manager_with(&transport);
        let first: Arc<dyn Component> = Arc::new(RecordingWidget::table("first"));
        manager.register_component(first.clone());
        manager.start_auto_refresh(Some(Duration::from_millis(100)));

        assert!(manager.stop_auto_refresh());
        manager.unregister_component(&first);
        manager.register_component(Arc::new(RecordingWidget::table("second")));
        assert!(!manager.is_auto_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_polls() {
        let transport = Arc::new(MockTransport::new());
        transport.respond(INSIGHTS_ROOT, json!([]));
        let manager = manager_with(&transport);
        let widget = Arc::new(RecordingWidget::table("table"));
        manager.register_component(widget.clone());

        manager.start_auto_refresh(Some(Duration::from_millis(100)));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(widget.refresh_calls(), 3);

        assert!(manager.stop_auto_refresh());
        manager.reset();
        assert_eq!(manager.component_count(), 0);
        assert!(manager.status().last_refresh.is_none());
    }
}
