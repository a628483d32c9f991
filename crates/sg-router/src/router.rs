//! ScatterGatherRouter - Fork-join orchestrator
//!
//! Broadcasts a copy of the inbound message to every configured route, runs
//! them through a [`ConcurrencyGate`], waits for all of them (delay errors) and
//! hands the outcomes to the configured [`ForkJoinStrategy`].

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use sg_common::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{AggregateFailure, CancelReason, RouterError};
use crate::gate::ConcurrencyGate;
use crate::metrics;
use crate::pair::{RouteOutcome, RoutingPair};
use crate::route::Route;
use crate::strategy::{CollectMapStrategy, ForkJoinStrategy};
use crate::Result;

const MIN_ROUTES: usize = 2;

/// Builder for [`ScatterGatherRouter`]
pub struct RouterBuilder {
    name: String,
    routes: Vec<Arc<dyn Route>>,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
    strategy: Option<Arc<dyn ForkJoinStrategy>>,
    target: Option<String>,
}

impl RouterBuilder {
    pub fn route(mut self, route: Arc<dyn Route>) -> Self {
        self.routes.push(route);
        self
    }

    pub fn routes(mut self, routes: impl IntoIterator<Item = Arc<dyn Route>>) -> Self {
        self.routes.extend(routes);
        self
    }

    /// Defaults to the number of routes
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Deadline for the whole fork-join, not per route
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Defaults to [`CollectMapStrategy`]
    pub fn strategy(mut self, strategy: Arc<dyn ForkJoinStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Keep the inbound payload and store the aggregate in this variable
    pub fn target(mut self, variable: impl Into<String>) -> Self {
        self.target = Some(variable.into());
        self
    }

    pub fn build(self) -> Result<ScatterGatherRouter> {
        validate_routes(&self.routes)?;

        if self.max_concurrency == Some(0) {
            return Err(RouterError::Config("max concurrency must be at least 1".to_string()));
        }
        if self.timeout == Some(Duration::ZERO) {
            return Err(RouterError::Config("timeout must be greater than zero".to_string()));
        }
        if matches!(self.target.as_deref(), Some(t) if t.is_empty()) {
            return Err(RouterError::Config("target variable name must not be empty".to_string()));
        }

        let strategy = self
            .strategy
            .unwrap_or_else(|| Arc::new(CollectMapStrategy::default()));

        info!(
            router = %self.name,
            routes = self.routes.len(),
            max_concurrency = ?self.max_concurrency,
            timeout_ms = ?self.timeout.map(|t| t.as_millis()),
            strategy = strategy.name(),
            "Configured scatter-gather router"
        );

        Ok(ScatterGatherRouter {
            name: self.name,
            routes: RwLock::new(Arc::new(self.routes)),
            max_concurrency: self.max_concurrency,
            timeout: self.timeout,
            strategy,
            target: self.target,
        })
    }
}

fn validate_routes(routes: &[Arc<dyn Route>]) -> Result<()> {
    if routes.len() < MIN_ROUTES {
        return Err(RouterError::Config(format!(
            "At least {} routes are required for scatter-gather, got {}",
            MIN_ROUTES,
            routes.len()
        )));
    }
    Ok(())
}

/// Broadcasts one message to every route and aggregates the results
pub struct ScatterGatherRouter {
    name: String,
    /// Swapped as a whole so in-flight invocations keep their snapshot
    routes: RwLock<Arc<Vec<Arc<dyn Route>>>>,
    max_concurrency: Option<usize>,
    timeout: Option<Duration>,
    strategy: Arc<dyn ForkJoinStrategy>,
    target: Option<String>,
}

impl fmt::Debug for ScatterGatherRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScatterGatherRouter")
            .field("name", &self.name)
            .field("routes", &self.route_names())
            .field("max_concurrency", &self.max_concurrency)
            .field("timeout", &self.timeout)
            .field("strategy", &self.strategy.name())
            .field("target", &self.target)
            .finish()
    }
}

impl ScatterGatherRouter {
    pub fn builder(name: impl Into<String>) -> RouterBuilder {
        RouterBuilder {
            name: name.into(),
            routes: Vec::new(),
            max_concurrency: None,
            timeout: None,
            strategy: None,
            target: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> &Arc<dyn ForkJoinStrategy> {
        &self.strategy
    }

    pub fn delay_errors(&self) -> bool {
        self.strategy.delay_errors()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Concurrency bound the next invocation will use
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency.unwrap_or_else(|| self.route_count())
    }

    pub fn route_count(&self) -> usize {
        self.routes.read().len()
    }

    pub fn route_names(&self) -> Vec<String> {
        self.routes.read().iter().map(|r| r.name().to_string()).collect()
    }

    /// Replace the configured routes. Needs at least two.
    pub fn set_routes(&self, routes: Vec<Arc<dyn Route>>) -> Result<()> {
        validate_routes(&routes)?;
        let count = routes.len();
        *self.routes.write() = Arc::new(routes);
        info!(router = %self.name, routes = count, "Routes reconfigured");
        Ok(())
    }

    /// Add a route at runtime
    pub fn enroll_route(&self, route: Arc<dyn Route>) {
        let mut routes = self.routes.write();
        let mut next = routes.as_ref().clone();
        info!(router = %self.name, route = %route.name(), "Route enrolled");
        next.push(route);
        *routes = Arc::new(next);
    }

    /// Remove a route at runtime. May leave the router with no routes at all.
    pub fn remove_route(&self, name: &str) -> bool {
        let mut routes = self.routes.write();
        let before = routes.len();
        let next: Vec<Arc<dyn Route>> = routes.iter().filter(|r| r.name() != name).cloned().collect();
        let removed = next.len() != before;
        if removed {
            info!(router = %self.name, route = %name, remaining = next.len(), "Route removed");
            *routes = Arc::new(next);
        }
        removed
    }

    /// Route a message through every route
    pub async fn route(&self, message: &Message) -> Result<Message> {
        self.route_with_cancellation(message, &CancellationToken::new()).await
    }

    /// Route a message, giving up with [`RouterError::Cancelled`] when `cancel` fires.
    ///
    /// Dropping the returned future also cancels every route still running.
    pub async fn route_with_cancellation(&self, message: &Message, cancel: &CancellationToken) -> Result<Message> {
        let start = Instant::now();
        let result = self.fork_join(message, cancel).await;
        let elapsed = start.elapsed();

        let outcome = match &result {
            Ok(_) => "success",
            Err(RouterError::Aggregate(_)) => "failed",
            Err(RouterError::Cancelled { .. }) => "cancelled",
            Err(_) => "rejected",
        };
        metrics::record_invocation(&self.name, outcome, elapsed);

        match &result {
            Ok(_) => info!(
                router = %self.name,
                message_id = %message.id,
                duration_ms = elapsed.as_millis() as u64,
                "Scatter-gather completed"
            ),
            Err(e) => warn!(
                router = %self.name,
                message_id = %message.id,
                outcome = outcome,
                duration_ms = elapsed.as_millis() as u64,
                error = %e,
                "Scatter-gather did not produce a result"
            ),
        }

        result
    }

    async fn fork_join(&self, message: &Message, cancel: &CancellationToken) -> Result<Message> {
        if !message.is_repeatable() {
            return Err(RouterError::UnrepeatableMessage {
                message_id: message.id.clone(),
            });
        }

        let routes = self.routes.read().clone();
        if routes.is_empty() {
            return Err(RouterError::NoRoutesAvailable {
                router: self.name.clone(),
            });
        }

        let max_concurrency = self.max_concurrency.unwrap_or(routes.len());
        let delay_errors = self.strategy.delay_errors();

        // Fires for every route when the caller cancels or this future is dropped
        let invocation = cancel.child_token();
        let _cancel_on_drop = invocation.clone().drop_guard();

        debug!(
            router = %self.name,
            message_id = %message.id,
            routes = routes.len(),
            max_concurrency = max_concurrency,
            delay_errors = delay_errors,
            "Forking message"
        );

        let mut gate = ConcurrencyGate::new(max_concurrency)?;
        for (index, route) in routes.iter().enumerate() {
            gate.submit(RoutingPair::of(
                index,
                message.clone(),
                route.clone(),
                invocation.child_token(),
            ));
        }

        let deadline = self.timeout.map(|t| tokio::time::Instant::now() + t);
        let mut outcomes: Vec<RouteOutcome> = Vec::with_capacity(routes.len());

        loop {
            let next = tokio::select! {
                biased;
                _ = invocation.cancelled() => {
                    gate.close();
                    debug!(router = %self.name, completed = outcomes.len(), "Discarding outcomes of cancelled invocation");
                    return Err(RouterError::Cancelled { reason: CancelReason::Caller });
                }
                _ = wait_for_deadline(deadline) => {
                    invocation.cancel();
                    gate.close();
                    let timeout_ms = self.timeout.map(|t| t.as_millis() as u64).unwrap_or_default();
                    return Err(RouterError::Cancelled { reason: CancelReason::Timeout { timeout_ms } });
                }
                next = gate.next_outcome() => next,
            };

            let Some(outcome) = next else {
                break;
            };

            metrics::record_route(&self.name, &outcome);
            match &outcome.result {
                Ok(_) => debug!(
                    router = %self.name,
                    route_index = outcome.route_index,
                    route = %outcome.route_name,
                    completion_index = outcome.completion_index,
                    duration_ms = outcome.duration.as_millis() as u64,
                    "Route succeeded"
                ),
                Err(e) => debug!(
                    router = %self.name,
                    route_index = outcome.route_index,
                    route = %outcome.route_name,
                    completion_index = outcome.completion_index,
                    error = %e,
                    "Route failed"
                ),
            }

            let terminal = !delay_errors && self.strategy.is_terminal(&outcome);
            outcomes.push(outcome);
            if terminal {
                invocation.cancel();
                gate.close();
                break;
            }
        }

        outcomes.sort_by_key(|o| o.route_index);

        if delay_errors && !outcomes.iter().any(RouteOutcome::is_success) {
            return Err(AggregateFailure::from_outcomes(&outcomes).into());
        }

        let aggregate = self.strategy.reduce(message, outcomes)?;

        Ok(match &self.target {
            Some(variable) => {
                let mut result = aggregate;
                let collected = std::mem::replace(&mut result.payload, message.payload.clone());
                result.variables.insert(variable.clone(), collected);
                result
            }
            None => aggregate,
        })
    }
}

async fn wait_for_deadline(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::route_fn;
    use crate::strategy::CollectListStrategy;
    use sg_common::Payload;

    fn echo(name: &str) -> Arc<dyn Route> {
        route_fn(name.to_string(), |message, _cancel| async move { Ok(message) })
    }

    #[test]
    fn test_single_route_is_configuration_error() {
        let err = ScatterGatherRouter::builder("one").route(echo("a")).build().unwrap_err();
        assert!(matches!(err, RouterError::Config(ref msg) if msg.contains("At least 2 routes")));
    }

    #[test]
    fn test_zero_concurrency_is_configuration_error() {
        let err = ScatterGatherRouter::builder("zero")
            .routes([echo("a"), echo("b")])
            .max_concurrency(0)
            .build()
            .unwrap_err();
        assert!(matches!(err, RouterError::Config(_)));
    }

    #[test]
    fn test_defaults() {
        let router = ScatterGatherRouter::builder("defaults")
            .routes([echo("a"), echo("b"), echo("c")])
            .build()
            .unwrap();

        assert_eq!(router.max_concurrency(), 3);
        assert_eq!(router.strategy().name(), "collect_map");
        assert!(router.delay_errors());
        assert_eq!(router.route_names(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_debug_lists_routes_and_strategy() {
        let router = ScatterGatherRouter::builder("debuggable")
            .routes([echo("a"), echo("b")])
            .max_concurrency(1)
            .build()
            .unwrap();

        let rendered = format!("{:?}", router);
        assert!(rendered.contains("debuggable"));
        assert!(rendered.contains("[\"a\", \"b\"]"));
        assert!(rendered.contains("collect_map"));
    }

    #[test]
    fn test_set_routes_revalidates() {
        let router = ScatterGatherRouter::builder("reconfig")
            .routes([echo("a"), echo("b")])
            .build()
            .unwrap();

        assert!(router.set_routes(vec![echo("x")]).is_err());
        assert_eq!(router.route_count(), 2);

        router.set_routes(vec![echo("x"), echo("y"), echo("z")]).unwrap();
        assert_eq!(router.route_names(), vec!["x", "y", "z"]);
    }

    #[test]
    fn test_enroll_and_remove() {
        let router = ScatterGatherRouter::builder("dynamic")
            .routes([echo("a"), echo("b")])
            .build()
            .unwrap();

        router.enroll_route(echo("c"));
        assert_eq!(router.max_concurrency(), 3);

        assert!(router.remove_route("a"));
        assert!(!router.remove_route("missing"));
        assert_eq!(router.route_names(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_target_keeps_original_payload() {
        let router = ScatterGatherRouter::builder("target")
            .routes([echo("a"), echo("b")])
            .strategy(Arc::new(CollectListStrategy))
            .target("results")
            .build()
            .unwrap();

        let message = Message::new("original");
        let result = router.route(&message).await.unwrap();

        assert!(matches!(result.payload, Payload::Text(ref t) if t == "original"));
        let collected = result.variables["results"].as_collection().unwrap();
        assert_eq!(collected.len(), 2);
    }
}
