use crate::utils::constants::INSIGHTS_ROOT;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, LazyLock};
use tokio::sync::watch;

static INSIGHTS_PATH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^/api/insights(?:/(?P<target>[^/]+)(?:/(?P<kind>[^/]+))?)?/?$")
        .expect("insights path pattern is valid")
});

/// Structured view of the insights filter encoded in a navigation path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FilterState {
    pub symbol: String,
    pub exchange: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl FilterState {
    pub fn for_symbol(symbol: impl Into<String>) -> Self {
        Self { symbol: symbol.into(), ..Self::default() }
    }

    pub fn on_exchange(mut self, exchange: impl Into<String>) -> Self {
        self.exchange = exchange.into();
        self
    }

    pub fn of_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = kind.into();
        self
    }

    pub fn has_symbol(&self) -> bool {
        !self.symbol.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.symbol.is_empty() && self.exchange.is_empty() && self.kind.is_empty()
    }
}

/// Parse `/api/insights/{EXCHANGE:SYMBOL|SYMBOL}/{TYPE?}` into a filter.
///
/// Query strings and fragments are ignored. Anything outside the insights
/// path space yields the empty filter.
pub fn parse_current_filters(path: &str) -> FilterState {
    let path = path.split(['?', '#']).next().unwrap_or_default();

    let Some(caps) = INSIGHTS_PATH.captures(path) else {
        return FilterState::default();
    };

    let (exchange, symbol) = match caps.name("target").map(|m| m.as_str()) {
        Some(target) => match target.split_once(':') {
            Some((exchange, symbol)) => (exchange.to_string(), symbol.to_string()),
            None => (String::new(), target.to_string()),
        },
        None => (String::new(), String::new()),
    };
    let kind = caps.name("kind").map(|m| m.as_str().replace('_', " ")).unwrap_or_default();

    FilterState { symbol, exchange, kind }
}

/// Inverse of [`parse_current_filters`]. Without a symbol the result is the
/// insights root, whatever the other fields hold.
pub fn build_insights_url(filters: &FilterState) -> String {
    if filters.symbol.is_empty() {
        return INSIGHTS_ROOT.to_string();
    }

    let mut path = String::from(INSIGHTS_ROOT);
    path.push('/');
    if !filters.exchange.is_empty() {
        path.push_str(&filters.exchange);
        path.push(':');
    }
    path.push_str(&filters.symbol);
    if !filters.kind.is_empty() {
        path.push('/');
        path.push_str(&filters.kind.replace(' ', "_"));
    }
    path
}

/// Current navigation path, shared between the orchestration pieces.
#[derive(Debug, Clone)]
pub struct Navigator {
    path: Arc<watch::Sender<String>>,
}

impl Navigator {
    pub fn new(initial_path: impl Into<String>) -> Self {
        let (tx, _) = watch::channel(initial_path.into());
        Self { path: Arc::new(tx) }
    }

    pub fn current_path(&self) -> String {
        self.path.borrow().clone()
    }

    pub fn current_filters(&self) -> FilterState {
        parse_current_filters(&self.path.borrow())
    }

    /// Returns true when the path actually changed.
    pub fn navigate(&self, path: impl Into<String>) -> bool {
        let path = path.into();
        self.path.send_if_modified(|current| {
            if *current == path {
                false
            } else {
                *current = path;
                true
            }
        })
    }

    pub fn apply_filters(&self, filters: &FilterState) -> String {
        let path = build_insights_url(filters);
        self.navigate(path.clone());
        path
    }

    /// Receiver that wakes on every path change.
    pub fn subscribe(&self) -> watch::Receiver<String> {
        self.path.subscribe()
    }
}

impl Default for Navigator {
    fn default() -> Self {
        Self::new(INSIGHTS_ROOT)
    }
}
