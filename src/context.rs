/// Orchestration Context
///
/// Owns one instance of every orchestration piece and wires them together:
/// - Response cache and API wrappers over a single transport
/// - Scheduler shared by the table poll and the unified tick
/// - Navigator holding the current insights filter
use crate::data_sync::api::InsightsApi;
use crate::data_sync::cache::CachedClient;
use crate::data_sync::config::RefreshConfig;
use crate::data_sync::transport::{HttpTransport, Transport};
use crate::logic::capabilities::Component;
use crate::logic::coordinator::UnifiedTicker;
use crate::logic::filters::Navigator;
use crate::logic::registry::{RefreshManager, RefreshOptions};
use crate::logic::scheduler::Scheduler;
use eyre::Result;
use std::sync::Arc;
use tracing::{info, warn};

pub struct RefreshContext {
    config: RefreshConfig,
    client: CachedClient,
    api: InsightsApi,
    scheduler: Scheduler,
    navigator: Navigator,
    manager: RefreshManager,
    ticker: UnifiedTicker,
}

impl RefreshContext {
    pub fn new(config: RefreshConfig, transport: Arc<dyn Transport>, navigator: Navigator) -> Self {
        let client = CachedClient::new(transport, config.cache_ttl());
        let api = InsightsApi::new(client.clone());
        let scheduler = Scheduler::new(config.clone());
        let manager = RefreshManager::new(api.clone(), navigator.clone(), scheduler.clone());
        let ticker = UnifiedTicker::new(api.clone(), navigator.clone(), scheduler.clone());

        Self { config, client, api, scheduler, navigator, manager, ticker }
    }

    /// Start the unified tick and, when enabled, the table poll.
    /// Must be called from inside a tokio runtime.
    pub fn start(&self) {
        info!("Starting refresh context against {}", self.config.base_url);
        self.ticker.start(Some(self.config.unified_interval()));

        if self.config.auto_refresh_enabled {
            self.manager.start_auto_refresh(Some(self.config.table_interval()));
        } else {
            info!("Auto-refresh disabled, table updates only on demand");
        }
    }

    /// Hand a component to whichever of the registry and the ticker can use
    /// it. Returns false when neither accepted it.
    pub fn register_component(&self, component: Arc<dyn Component>) -> bool {
        let refreshed = self.manager.register_component(Arc::clone(&component));
        let ticked = self.ticker.register(Arc::clone(&component));
        if !refreshed && !ticked {
            warn!("Component {} has no capability to drive", component.name());
        }
        refreshed || ticked
    }

    pub fn unregister_component(&self, component: &Arc<dyn Component>) {
        self.manager.unregister_component(component);
        self.ticker.unregister(component);
    }

    /// Move to a new path and refresh straight away. Returns false when the
    /// path did not change or the refresh produced no data.
    pub async fn navigate(&self, path: impl Into<String>) -> bool {
        if !self.navigator.navigate(path) {
            return false;
        }
        self.manager.refresh_data(RefreshOptions::default()).await
    }

    pub async fn refresh_now(&self, options: RefreshOptions) -> bool {
        self.manager.refresh_data(options).await
    }

    /// Stop every task, empty the cache and forget subscribers.
    pub fn cleanup(&self) {
        self.scheduler.stop_all();
        if self.scheduler.is_paused() {
            self.scheduler.resume();
        }
        self.client.clear_cache();
        self.manager.reset();
        self.ticker.reset();
        info!("Refresh context cleaned up");
    }

    pub fn config(&self) -> &RefreshConfig {
        &self.config
    }

    pub fn client(&self) -> &CachedClient {
        &self.client
    }

    pub fn api(&self) -> &InsightsApi {
        &self.api
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn navigator(&self) -> &Navigator {
        &self.navigator
    }

    pub fn manager(&self) -> &RefreshManager {
        &self.manager
    }

    pub fn ticker(&self) -> &UnifiedTicker {
        &self.ticker
    }
}

impl Drop for RefreshContext {
    fn drop(&mut self) {
        if self.scheduler.task_count() > 0 {
            warn!("RefreshContext dropped with {} tasks still registered", self.scheduler.task_count());
        }
    }
}

/// Builder for RefreshContext
pub struct RefreshContextBuilder {
    config: Option<RefreshConfig>,
    transport: Option<Arc<dyn Transport>>,
    navigator: Option<Navigator>,
}

impl RefreshContextBuilder {
    pub fn new() -> Self {
        Self { config: None, transport: None, navigator: None }
    }

    pub fn with_config(mut self, config: RefreshConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn with_navigator(mut self, navigator: Navigator) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Missing config is read from the environment; a missing transport is
    /// an HTTP client against the configured base URL.
    pub fn build(self) -> Result<RefreshContext> {
        let config = match self.config {
            Some(config) => config,
            None => RefreshConfig::from_env().unwrap_or_else(|e| {
                warn!("Falling back to default refresh config: {}", e);
                RefreshConfig::default()
            }),
        };
        config.validate()?;

        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config.base_url, config.http_timeout())?),
        };

        Ok(RefreshContext::new(config, transport, self.navigator.unwrap_or_default()))
    }
}

impl Default for RefreshContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
