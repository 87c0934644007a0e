use crate::data_sync::api::{InsightsApi, TaskCounters};
use crate::logic::capabilities::Component;
use crate::logic::filters::Navigator;
use crate::logic::scheduler::{Scheduler, task_fn};
use crate::utils::constants::TaskName;
use futures::FutureExt;
use futures::future::join_all;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};

/// What a single tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Counters fetched this tick, if any counter display asked for them
    pub counters: Option<TaskCounters>,
    /// Capability pushes attempted
    pub dispatched: usize,
    pub failures: usize,
    /// Symbol pushed to auxiliary panels, when it changed this tick
    pub symbol_visible: Option<Option<String>>,
}

struct TickerInner {
    api: InsightsApi,
    navigator: Navigator,
    scheduler: Scheduler,
    components: RwLock<Vec<Arc<dyn Component>>>,
    last_symbol: Mutex<Option<Option<String>>>,
}

/// One timer that replaces the per-widget clocks, counters, age labels and
/// status polls.
///
/// Task counters are fetched once per tick and shared by every counter
/// display. Each push is isolated, so a broken widget only loses its own
/// update.
#[derive(Clone)]
pub struct UnifiedTicker {
    inner: Arc<TickerInner>,
}

impl UnifiedTicker {
    pub fn new(api: InsightsApi, navigator: Navigator, scheduler: Scheduler) -> Self {
        Self {
            inner: Arc::new(TickerInner {
                api,
                navigator,
                scheduler,
                components: RwLock::new(Vec::new()),
                last_symbol: Mutex::new(None),
            }),
        }
    }

    /// Returns false when the component has nothing the ticker drives, or is
    /// already registered.
    pub fn register(&self, component: Arc<dyn Component>) -> bool {
        if !component.has_tick_capability() {
            debug!("Ignoring component {}: no tick capability", component.name());
            return false;
        }

        let mut components = self.inner.components.write().unwrap_or_else(|e| e.into_inner());
        if components.iter().any(|c| Arc::ptr_eq(c, &component)) {
            return false;
        }
        // a new panel needs the current visibility on the next tick
        if component.as_symbol_panel().is_some() {
            *self.inner.last_symbol.lock().unwrap_or_else(|e| e.into_inner()) = None;
        }
        components.push(component);
        true
    }

    pub fn unregister(&self, component: &Arc<dyn Component>) -> bool {
        let mut components = self.inner.components.write().unwrap_or_else(|e| e.into_inner());
        let before = components.len();
        components.retain(|c| !Arc::ptr_eq(c, component));
        components.len() != before
    }

    pub fn component_count(&self) -> usize {
        self.inner.components.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Register the `unified` scheduler task.
    pub fn start(&self, interval: Option<Duration>) {
        let weak = Arc::downgrade(&self.inner);
        let callback = task_fn(move || {
            let weak: Weak<TickerInner> = weak.clone();
            async move {
                if let Some(inner) = weak.upgrade() {
                    UnifiedTicker { inner }.tick().await;
                }
                Ok(())
            }
        });
        self.inner.scheduler.register(TaskName::UNIFIED, callback, interval);
    }

    pub fn stop(&self) -> bool {
        self.inner.scheduler.stop(TaskName::UNIFIED)
    }

    pub fn is_running(&self) -> bool {
        self.inner.scheduler.is_registered(TaskName::UNIFIED)
    }

    /// Drop every component and forget the last pushed visibility.
    pub fn reset(&self) {
        self.inner.components.write().unwrap_or_else(|e| e.into_inner()).clear();
        *self.inner.last_symbol.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    pub async fn tick(&self) -> TickReport {
        let components = self.inner.components.read().unwrap_or_else(|e| e.into_inner()).clone();
        let mut report = TickReport::default();

        if components.iter().any(|c| c.as_counter_display().is_some()) {
            match self.inner.api.fresh_task_counters().await {
                Ok(counters) => report.counters = Some(counters),
                Err(e) => warn!("Task counters unavailable this tick: {}", e),
            }
        }

        let counters = report.counters;
        let symbol = self.symbol_change();
        report.symbol_visible = symbol.clone();
        let mut visibility_delivered = true;
        let now = SystemTime::now();

        for component in &components {
            if let Some(clock) = component.as_clock_display() {
                record(&mut report, component.name(), "clock", || clock.update_time(now));
            }
            if let (Some(display), Some(counters)) = (component.as_counter_display(), counters.as_ref()) {
                record(&mut report, component.name(), "counters", || display.set_counters(counters));
            }
            if let Some(ages) = component.as_age_display() {
                record(&mut report, component.name(), "ages", || ages.update_all_ages());
            }
            if let (Some(panel), Some(symbol)) = (component.as_symbol_panel(), symbol.as_ref()) {
                visibility_delivered &= record(&mut report, component.name(), "visibility", || {
                    panel.set_symbol_visibility(symbol.as_deref())
                });
            }
        }

        // a panel that missed the push gets it again next tick
        if let Some(symbol) = symbol.filter(|_| visibility_delivered) {
            *self.inner.last_symbol.lock().unwrap_or_else(|e| e.into_inner()) = Some(symbol);
        }

        let polls = components.iter().filter_map(|component| {
            let source = component.as_status_source()?;
            Some(async move {
                let outcome = AssertUnwindSafe(source.fetch_status()).catch_unwind().await;
                (component.name(), outcome)
            })
        });
        for (name, outcome) in join_all(polls).await {
            report.dispatched += 1;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    report.failures += 1;
                    warn!("Status poll for {} failed: {:#}", name, e);
                }
                Err(_) => {
                    report.failures += 1;
                    warn!("Status poll for {} panicked", name);
                }
            }
        }

        debug!("Unified tick: {} pushes, {} failed", report.dispatched, report.failures);
        report
    }

    /// The symbol to push to panels, or None when every panel already has
    /// it. The caller records the push once it went through.
    fn symbol_change(&self) -> Option<Option<String>> {
        let filters = self.inner.navigator.current_filters();
        let current = filters.has_symbol().then_some(filters.symbol);

        let last = self.inner.last_symbol.lock().unwrap_or_else(|e| e.into_inner());
        (last.as_ref() != Some(&current)).then_some(current)
    }
}

/// Returns false when the push panicked.
fn record(report: &mut TickReport, name: &str, what: &str, push: impl FnOnce()) -> bool {
    report.dispatched += 1;
    if catch_unwind(AssertUnwindSafe(push)).is_err() {
        report.failures += 1;
        warn!("Component {} panicked during {} update", name, what);
        return false;
    }
    true
}
