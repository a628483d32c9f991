//! Fork-join strategies
//!
//! A strategy turns the outcomes of one invocation into the message returned
//! to the caller, or into an [`AggregateFailure`](crate::AggregateFailure).

mod collect_list;
mod collect_map;
mod first_successful;

use std::sync::Arc;

use sg_common::{FailurePolicy, Message, StrategyKind};

use crate::pair::RouteOutcome;
use crate::Result;

pub use collect_list::CollectListStrategy;
pub use collect_map::{CollectMapStrategy, FAILED_ROUTES_ATTRIBUTE};
pub use first_successful::FirstSuccessfulStrategy;

pub trait ForkJoinStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Wait for every route before reducing, even after failures.
    ///
    /// When false the router asks [`is_terminal`](Self::is_terminal) about each
    /// outcome as it completes and cancels the remaining routes on the first
    /// terminal one.
    fn delay_errors(&self) -> bool {
        true
    }

    fn is_terminal(&self, _outcome: &RouteOutcome) -> bool {
        false
    }

    /// Reduce the outcomes into one message.
    ///
    /// `outcomes` is sorted by route index. Under delay-errors it holds one
    /// outcome per route; otherwise only the routes that finished before the
    /// join stopped.
    fn reduce(&self, original: &Message, outcomes: Vec<RouteOutcome>) -> Result<Message>;
}

/// Build the strategy named in configuration
pub fn from_kind(kind: StrategyKind, failure_policy: FailurePolicy) -> Arc<dyn ForkJoinStrategy> {
    match kind {
        StrategyKind::CollectMap => Arc::new(CollectMapStrategy::new(failure_policy)),
        StrategyKind::CollectList => Arc::new(CollectListStrategy),
        StrategyKind::FirstSuccessful => Arc::new(FirstSuccessfulStrategy),
    }
}

/// Copy variables set by successful routes onto the aggregate, in route order
fn merge_variables(target: &mut Message, outcomes: &[RouteOutcome]) {
    for message in outcomes.iter().filter_map(RouteOutcome::message) {
        for (key, value) in &message.variables {
            target.variables.insert(key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_kind() {
        assert_eq!(from_kind(StrategyKind::CollectMap, FailurePolicy::Marker).name(), "collect_map");
        assert_eq!(from_kind(StrategyKind::CollectList, FailurePolicy::Marker).name(), "collect_list");

        let first = from_kind(StrategyKind::FirstSuccessful, FailurePolicy::Marker);
        assert_eq!(first.name(), "first_successful");
        assert!(!first.delay_errors());
    }

    #[test]
    fn test_merge_variables_later_routes_win() {
        let outcomes = vec![
            RouteOutcome::new(0, "a", 1, Ok(Message::new("a").with_variable("shared", "from-a").with_variable("a", "1"))),
            RouteOutcome::new(1, "b", 0, Err(sg_common::RouteError::Cancelled)),
            RouteOutcome::new(2, "c", 2, Ok(Message::new("c").with_variable("shared", "from-c"))),
        ];

        let mut target = Message::new("original");
        merge_variables(&mut target, &outcomes);

        let keys: Vec<&str> = target.variables.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["shared", "a"]);
        assert!(matches!(target.variables["shared"], sg_common::Payload::Text(ref t) if t == "from-c"));
    }
}
