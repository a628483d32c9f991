//! Router metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! application installs a recorder.

use std::time::Duration;

use ::metrics::{counter, describe_counter, describe_histogram, histogram, Unit};

use crate::pair::RouteOutcome;

pub const INVOCATIONS_TOTAL: &str = "sg_router_invocations_total";
pub const INVOCATION_DURATION: &str = "sg_router_invocation_duration_seconds";
pub const ROUTE_OUTCOMES_TOTAL: &str = "sg_router_route_outcomes_total";
pub const ROUTE_DURATION: &str = "sg_router_route_duration_seconds";

/// Register metric descriptions with the installed recorder
pub fn describe_metrics() {
    describe_counter!(INVOCATIONS_TOTAL, "Fork-join invocations by outcome");
    describe_histogram!(INVOCATION_DURATION, Unit::Seconds, "Fork-join invocation duration");
    describe_counter!(ROUTE_OUTCOMES_TOTAL, "Route executions by outcome");
    describe_histogram!(ROUTE_DURATION, Unit::Seconds, "Route execution duration");
}

pub(crate) fn record_invocation(router: &str, outcome: &'static str, duration: Duration) {
    counter!(INVOCATIONS_TOTAL, "router" => router.to_string(), "outcome" => outcome).increment(1);
    histogram!(INVOCATION_DURATION, "router" => router.to_string()).record(duration.as_secs_f64());
}

pub(crate) fn record_route(router: &str, outcome: &RouteOutcome) {
    let result = if outcome.is_success() { "success" } else { "failure" };
    counter!(
        ROUTE_OUTCOMES_TOTAL,
        "router" => router.to_string(),
        "route" => outcome.route_name.clone(),
        "outcome" => result
    )
    .increment(1);
    histogram!(
        ROUTE_DURATION,
        "router" => router.to_string(),
        "route" => outcome.route_name.clone()
    )
    .record(outcome.duration.as_secs_f64());
}
