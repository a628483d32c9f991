//! Router error taxonomy
//!
//! Configuration errors are raised while building or reconfiguring a router.
//! Pre-flight errors (`NoRoutesAvailable`, `UnrepeatableMessage`) are raised
//! before any route runs. Route failures never surface on their own: they are
//! bundled into an [`AggregateFailure`] once every route has finished.

use std::fmt;

use sg_common::RouteError;

use crate::pair::RouteOutcome;

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No routes available for router '{router}'")]
    NoRoutesAvailable { router: String },

    #[error("Message {message_id} has an unrepeatable stream payload and cannot be copied to each route")]
    UnrepeatableMessage { message_id: String },

    #[error(transparent)]
    Aggregate(#[from] AggregateFailure),

    #[error("Routing cancelled: {reason}")]
    Cancelled { reason: CancelReason },
}

impl RouterError {
    /// Whether sending the same message again could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            RouterError::Config(_) | RouterError::UnrepeatableMessage { .. } => false,
            RouterError::NoRoutesAvailable { .. } => true,
            RouterError::Aggregate(failure) => failure.failures().iter().any(|f| f.cause.is_retryable()),
            RouterError::Cancelled { reason } => matches!(reason, CancelReason::Timeout { .. }),
        }
    }

    pub fn as_aggregate(&self) -> Option<&AggregateFailure> {
        match self {
            RouterError::Aggregate(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RouterError::Cancelled { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The caller's cancellation token fired
    Caller,
    /// The invocation deadline elapsed
    Timeout { timeout_ms: u64 },
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => f.write_str("cancelled by caller"),
            CancelReason::Timeout { timeout_ms } => write!(f, "timed out after {}ms", timeout_ms),
        }
    }
}

/// A failed route as reported to the caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteFailure {
    pub route_index: usize,
    pub route_name: String,
    pub cause: RouteError,
}

/// Every per-route failure of one invocation, ordered by route configuration index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateFailure {
    failures: Vec<RouteFailure>,
    succeeded: Vec<usize>,
}

impl AggregateFailure {
    pub fn new(mut failures: Vec<RouteFailure>, mut succeeded: Vec<usize>) -> Self {
        failures.sort_by_key(|f| f.route_index);
        succeeded.sort_unstable();
        Self { failures, succeeded }
    }

    pub fn from_outcomes(outcomes: &[RouteOutcome]) -> Self {
        let mut failures = Vec::new();
        let mut succeeded = Vec::new();

        for outcome in outcomes {
            match &outcome.result {
                Ok(_) => succeeded.push(outcome.route_index),
                Err(cause) => failures.push(RouteFailure {
                    route_index: outcome.route_index,
                    route_name: outcome.route_name.clone(),
                    cause: cause.clone(),
                }),
            }
        }

        Self::new(failures, succeeded)
    }

    pub fn failures(&self) -> &[RouteFailure] {
        &self.failures
    }

    /// Indexes of the routes that did succeed, for diagnostics
    pub fn succeeded(&self) -> &[usize] {
        &self.succeeded
    }

    pub fn failed_indices(&self) -> Vec<usize> {
        self.failures.iter().map(|f| f.route_index).collect()
    }
}

impl fmt::Display for AggregateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.failures.len() + self.succeeded.len();
        write!(f, "{} of {} routes failed", self.failures.len(), total)?;
        for failure in &self.failures {
            write!(
                f,
                "; route {} '{}': {}",
                failure.route_index, failure.route_name, failure.cause
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for AggregateFailure {}
