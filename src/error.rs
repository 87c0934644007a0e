use std::sync::Arc;

/// Failures surfaced by the data layer.
///
/// `Clone` because one deduplicated request may have many waiters, and every
/// one of them observes the same settlement.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RefreshError {
    // NetworkError
    #[error("request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },
    #[error("request to {endpoint} returned HTTP {status}")]
    HttpStatus { endpoint: String, status: u16 },

    // ShapeError
    #[error("unexpected payload from {endpoint}: expected {expected}")]
    Shape { endpoint: String, expected: &'static str },
    #[error("failed to decode payload from {endpoint}: {reason}")]
    Decode { endpoint: String, reason: String },

    #[error("{0:#}")]
    Internal(Arc<eyre::Report>),
}

impl RefreshError {
    pub fn network(endpoint: impl Into<String>, reason: impl ToString) -> Self {
        Self::Network { endpoint: endpoint.into(), reason: reason.to_string() }
    }

    /// True for transport and status failures, the "no fresh data" class.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::HttpStatus { .. })
    }

    /// True when the backend answered but the payload was not usable.
    pub fn is_shape(&self) -> bool {
        matches!(self, Self::Shape { .. } | Self::Decode { .. })
    }
}

impl From<eyre::Report> for RefreshError {
    fn from(error: eyre::Report) -> Self {
        Self::Internal(Arc::new(error))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("no refresh task registered under {0:?}")]
    UnknownTask(String),
    #[error("refresh task {name:?} failed: {source}")]
    TaskFailed {
        name: String,
        #[source]
        source: eyre::Report,
    },
}

pub type RefreshResult<T> = Result<T, RefreshError>;
