//! The error taxonomy shared by every agent and policy.
//!
//! Provider clients return these errors directly; the retry policy inspects
//! [`AgentError::class`] instead of downcasting exception types. Unknown
//! failures should be constructed as [`AgentError::Transient`] so the system
//! errs on the side of retrying.

use crate::provider::Provider;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    /// Malformed task input or a missing required field. Never retried, never
    /// falls back.
    #[error("invalid task input: {0}")]
    InvalidInput(String),

    /// Network fault, timeout, or 5xx attributable to the provider.
    #[error("{provider} transient failure: {message}")]
    Transient { provider: Provider, message: String },

    /// The provider rejected the request over quota (429).
    #[error("{provider} rate limited")]
    RateLimited { provider: Provider, retry_after: Option<Duration> },

    /// Our own circuit breaker refused admission.
    #[error("{provider} circuit breaker is open")]
    BreakerOpen { provider: Provider },

    /// The breaker stayed open across repeated probe attempts; the provider is
    /// treated as down for this invocation.
    #[error("{provider} is down (breaker open, probes failing)")]
    ProviderDown { provider: Provider },

    /// The provider answered but the answer could not be parsed.
    #[error("unparseable provider response: {0}")]
    Parse(String),

    /// A repository write failed. Callers log this and carry on; it never
    /// changes the outcome of the AI work (see the dispatch layer).
    #[error("persistence failed: {0}")]
    Persistence(String),

    /// The caller's deadline passed. No retry, no fallback.
    #[error("deadline exceeded after {elapsed:?}")]
    DeadlineExceeded { elapsed: Duration },
}

/// Classification consumed by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    NonRetryable,
    Transient,
    RateLimited,
    ProviderDown,
    Timeout,
}

impl AgentError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AgentError::InvalidInput(_) | AgentError::Parse(_) | AgentError::Persistence(_) => {
                ErrorClass::NonRetryable
            }
            AgentError::Transient { .. } => ErrorClass::Transient,
            // Breaker denials back off like quota rejections; the retry loop
            // upgrades them to ProviderDown when probes keep failing.
            AgentError::RateLimited { .. } | AgentError::BreakerOpen { .. } => {
                ErrorClass::RateLimited
            }
            AgentError::ProviderDown { .. } => ErrorClass::ProviderDown,
            AgentError::DeadlineExceeded { .. } => ErrorClass::Timeout,
        }
    }

    /// Whether this failure counts toward opening the provider's breaker.
    ///
    /// Only faults attributable to the provider qualify: 5xx, connection
    /// failures, call timeouts, quota rejections. Client-side logic errors
    /// must not trip the breaker.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(self, AgentError::Transient { .. } | AgentError::RateLimited { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Transient | ErrorClass::RateLimited)
    }

    pub fn is_invalid_input(&self) -> bool {
        matches!(self, AgentError::InvalidInput(_))
    }

    pub fn is_deadline(&self) -> bool {
        matches!(self, AgentError::DeadlineExceeded { .. })
    }

    pub fn is_breaker_open(&self) -> bool {
        matches!(self, AgentError::BreakerOpen { .. })
    }

    /// The provider this error is attributed to, if any.
    pub fn provider(&self) -> Option<Provider> {
        match self {
            AgentError::Transient { provider, .. }
            | AgentError::RateLimited { provider, .. }
            | AgentError::BreakerOpen { provider }
            | AgentError::ProviderDown { provider } => Some(*provider),
            _ => None,
        }
    }

    /// Map an HTTP status onto the taxonomy, preserving retryability.
    pub fn from_status(provider: Provider, status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status {
            429 => AgentError::RateLimited { provider, retry_after: None },
            s if s >= 500 => AgentError::Transient { provider, message },
            401 | 403 => AgentError::InvalidInput(format!("{provider} refused credentials: {message}")),
            s if s >= 400 => AgentError::InvalidInput(format!("{provider} rejected request ({s}): {message}")),
            _ => AgentError::Transient { provider, message },
        }
    }
}
