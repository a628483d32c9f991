use sg_common::Message;

use super::ForkJoinStrategy;
use crate::error::AggregateFailure;
use crate::pair::RouteOutcome;
use crate::Result;

/// Returns the first route to succeed and cancels the rest.
///
/// Does not delay errors: the join stops at the first success.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirstSuccessfulStrategy;

impl ForkJoinStrategy for FirstSuccessfulStrategy {
    fn name(&self) -> &'static str {
        "first_successful"
    }

    fn delay_errors(&self) -> bool {
        false
    }

    fn is_terminal(&self, outcome: &RouteOutcome) -> bool {
        outcome.is_success()
    }

    fn reduce(&self, _original: &Message, outcomes: Vec<RouteOutcome>) -> Result<Message> {
        let first = outcomes
            .iter()
            .filter_map(|o| o.message().map(|message| (o.completion_index, message)))
            .min_by_key(|(completion_index, _)| *completion_index)
            .map(|(_, message)| message.clone());

        match first {
            Some(message) => Ok(message),
            None => Err(AggregateFailure::from_outcomes(&outcomes).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sg_common::RouteError;

    #[test]
    fn test_earliest_completed_success_wins() {
        let outcomes = vec![
            RouteOutcome::new(0, "a", 2, Ok(Message::new("a").with_id("a"))),
            RouteOutcome::new(1, "b", 0, Err(RouteError::execution("b"))),
            RouteOutcome::new(2, "c", 1, Ok(Message::new("c").with_id("c"))),
        ];

        let result = FirstSuccessfulStrategy.reduce(&Message::new("in"), outcomes).unwrap();
        assert_eq!(result.id, "c");
    }

    #[test]
    fn test_all_failed() {
        let outcomes = vec![
            RouteOutcome::new(0, "a", 1, Err(RouteError::execution("a"))),
            RouteOutcome::new(1, "b", 0, Err(RouteError::Transport("down".into()))),
        ];

        let err = FirstSuccessfulStrategy.reduce(&Message::new("in"), outcomes).unwrap_err();
        let failure = err.as_aggregate().unwrap();
        assert_eq!(failure.failed_indices(), vec![0, 1]);
        assert_eq!(failure.failures()[1].cause, RouteError::Transport("down".into()));
        assert_eq!(failure.to_string().split("; ").count(), 3);
    }

    #[test]
    fn test_terminal_on_success_only() {
        assert!(FirstSuccessfulStrategy.is_terminal(&RouteOutcome::new(0, "a", 0, Ok(Message::new("a")))));
        assert!(!FirstSuccessfulStrategy.is_terminal(&RouteOutcome::new(0, "a", 0, Err(RouteError::Cancelled))));
    }
}
