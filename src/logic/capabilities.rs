use crate::data_sync::api::TaskCounters;
use async_trait::async_trait;
use serde_json::Value;
use std::time::SystemTime;

/// Receives every freshly fetched insights batch.
#[async_trait]
pub trait Refreshable: Send + Sync {
    async fn refresh(&self, data: &[Value]) -> eyre::Result<()>;
}

pub trait ClockDisplay: Send + Sync {
    fn update_time(&self, now: SystemTime);
}

pub trait CounterDisplay: Send + Sync {
    fn set_counters(&self, counters: &TaskCounters);
}

/// Widgets showing "n seconds ago" labels.
pub trait AgeDisplay: Send + Sync {
    fn update_all_ages(&self);
}

#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self) -> eyre::Result<()>;
}

/// Auxiliary panels that only make sense while a symbol is selected.
pub trait SymbolPanel: Send + Sync {
    /// `None` hides the panel.
    fn set_symbol_visibility(&self, symbol: Option<&str>);
}

/// Anything the registry or the unified ticker can hold.
///
/// Capabilities are discovered at runtime: a component opts in by returning
/// `Some(self)` from the matching accessor.
pub trait Component: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn as_refreshable(&self) -> Option<&dyn Refreshable> {
        None
    }

    fn as_clock_display(&self) -> Option<&dyn ClockDisplay> {
        None
    }

    fn as_counter_display(&self) -> Option<&dyn CounterDisplay> {
        None
    }

    fn as_age_display(&self) -> Option<&dyn AgeDisplay> {
        None
    }

    fn as_status_source(&self) -> Option<&dyn StatusSource> {
        None
    }

    fn as_symbol_panel(&self) -> Option<&dyn SymbolPanel> {
        None
    }

    /// True when the unified ticker has something to push to this component.
    fn has_tick_capability(&self) -> bool {
        self.as_clock_display().is_some()
            || self.as_counter_display().is_some()
            || self.as_age_display().is_some()
            || self.as_status_source().is_some()
            || self.as_symbol_panel().is_some()
    }
}
