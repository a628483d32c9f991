use indexmap::IndexMap;
use serde_json::json;
use sg_common::{FailureMarker, FailurePolicy, Message, Payload, RouteEntry};

use super::{merge_variables, ForkJoinStrategy};
use crate::error::AggregateFailure;
use crate::pair::RouteOutcome;
use crate::Result;

/// Attribute listing the indexes of failed routes on a collected map
pub const FAILED_ROUTES_ATTRIBUTE: &str = "failedRoutes";

/// Collects every route result into a map keyed by route index.
///
/// The map is in route configuration order whatever order the routes finished
/// in. Fails only when every route failed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectMapStrategy {
    failure_policy: FailurePolicy,
}

impl CollectMapStrategy {
    pub fn new(failure_policy: FailurePolicy) -> Self {
        Self { failure_policy }
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}

impl ForkJoinStrategy for CollectMapStrategy {
    fn name(&self) -> &'static str {
        "collect_map"
    }

    fn reduce(&self, original: &Message, mut outcomes: Vec<RouteOutcome>) -> Result<Message> {
        if !outcomes.iter().any(RouteOutcome::is_success) {
            return Err(AggregateFailure::from_outcomes(&outcomes).into());
        }
        outcomes.sort_by_key(|o| o.route_index);

        let mut aggregate = original.clone();
        merge_variables(&mut aggregate, &outcomes);

        let mut entries = IndexMap::with_capacity(outcomes.len());
        let mut failed = Vec::new();

        for outcome in outcomes {
            let key = outcome.route_index.to_string();
            match outcome.result {
                Ok(message) => {
                    entries.insert(key, RouteEntry::Success(message));
                }
                Err(cause) => {
                    failed.push(outcome.route_index);
                    if self.failure_policy == FailurePolicy::Marker {
                        entries.insert(
                            key,
                            RouteEntry::Failed(FailureMarker {
                                route_index: outcome.route_index,
                                route_name: outcome.route_name,
                                cause,
                            }),
                        );
                    }
                }
            }
        }

        if !failed.is_empty() {
            aggregate
                .attributes
                .insert(FAILED_ROUTES_ATTRIBUTE.to_string(), json!(failed));
        }
        aggregate.payload = Payload::RouteMap(entries);
        Ok(aggregate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RouterError;
    use sg_common::RouteError;

    fn outcomes() -> Vec<RouteOutcome> {
        vec![
            RouteOutcome::new(2, "c", 0, Ok(Message::new("c-out").with_id("c"))),
            RouteOutcome::new(0, "a", 2, Ok(Message::new("a-out").with_id("a"))),
            RouteOutcome::new(1, "b", 1, Err(RouteError::execution("b broke"))),
            RouteOutcome::new(3, "d", 3, Err(RouteError::Timeout(100))),
        ]
    }

    #[test]
    fn test_map_in_configuration_order_with_markers() {
        let original = Message::new("in").with_id("orig");
        let aggregate = CollectMapStrategy::default().reduce(&original, outcomes()).unwrap();

        assert_eq!(aggregate.id, "orig");
        let map = aggregate.payload.as_route_map().unwrap();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["0", "1", "2", "3"]);

        assert_eq!(map["0"].message().unwrap().id, "a");
        assert_eq!(map["2"].message().unwrap().id, "c");

        let marker = map["1"].failure().unwrap();
        assert_eq!(marker.route_name, "b");
        assert_eq!(marker.cause, RouteError::execution("b broke"));
        assert_eq!(map["3"].failure().unwrap().cause, RouteError::Timeout(100));

        assert_eq!(aggregate.attributes[FAILED_ROUTES_ATTRIBUTE], json!([1, 3]));
    }

    #[test]
    fn test_omit_policy_still_reports_failures() {
        let original = Message::new("in");
        let aggregate = CollectMapStrategy::new(FailurePolicy::Omit)
            .reduce(&original, outcomes())
            .unwrap();

        let map = aggregate.payload.as_route_map().unwrap();
        let keys: Vec<&str> = map.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["0", "2"]);
        assert_eq!(aggregate.attributes[FAILED_ROUTES_ATTRIBUTE], json!([1, 3]));
    }

    #[test]
    fn test_no_failed_attribute_when_all_succeed() {
        let outcomes = vec![
            RouteOutcome::new(0, "a", 0, Ok(Message::new("a"))),
            RouteOutcome::new(1, "b", 1, Ok(Message::new("b"))),
        ];
        let aggregate = CollectMapStrategy::default().reduce(&Message::new("in"), outcomes).unwrap();
        assert!(!aggregate.attributes.contains_key(FAILED_ROUTES_ATTRIBUTE));
    }

    #[test]
    fn test_all_failed_is_aggregate_failure() {
        let outcomes = vec![
            RouteOutcome::new(1, "b", 0, Err(RouteError::execution("b"))),
            RouteOutcome::new(0, "a", 1, Err(RouteError::execution("a"))),
        ];

        let err = CollectMapStrategy::default()
            .reduce(&Message::new("in"), outcomes)
            .unwrap_err();

        match err {
            RouterError::Aggregate(failure) => {
                assert_eq!(failure.failed_indices(), vec![0, 1]);
                assert!(failure.succeeded().is_empty());
            }
            other => panic!("expected aggregate failure, got {other:?}"),
        }
    }

    #[test]
    fn test_original_is_untouched() {
        let original = Message::new("in").with_id("orig");
        let before = original.to_json_string().unwrap();

        let _ = CollectMapStrategy::default().reduce(&original, outcomes()).unwrap();

        assert_eq!(original.to_json_string().unwrap(), before);
    }
}
