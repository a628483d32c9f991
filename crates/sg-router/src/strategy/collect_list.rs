use sg_common::{Message, Payload};

use super::{merge_variables, ForkJoinStrategy};
use crate::error::AggregateFailure;
use crate::pair::RouteOutcome;
use crate::Result;

/// Collects route results into a list in configuration order.
///
/// Strict: a single failed route fails the whole invocation.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectListStrategy;

impl ForkJoinStrategy for CollectListStrategy {
    fn name(&self) -> &'static str {
        "collect_list"
    }

    fn reduce(&self, original: &Message, mut outcomes: Vec<RouteOutcome>) -> Result<Message> {
        if outcomes.iter().any(|o| !o.is_success()) {
            return Err(AggregateFailure::from_outcomes(&outcomes).into());
        }
        outcomes.sort_by_key(|o| o.route_index);

        let mut aggregate = original.clone();
        merge_variables(&mut aggregate, &outcomes);

        let messages = outcomes
            .into_iter()
            .filter_map(|o| o.result.ok())
            .collect();
        aggregate.payload = Payload::Collection(messages);
        Ok(aggregate)
    }
}
