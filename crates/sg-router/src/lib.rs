//! Scatter-Gather Router
//!
//! This crate provides fork-join message routing with:
//! - ScatterGatherRouter: Orchestrator broadcasting one message to every route
//! - ConcurrencyGate: Semaphore-bounded, FIFO admission of routes
//! - ForkJoinStrategy: Pluggable aggregation (collect map, collect list, first successful)
//! - Route: Async unit-of-work contract, with closure and HTTP implementations
//! - Error aggregation: Per-route failures reported together, in route order

pub mod error;
pub mod gate;
pub mod metrics;
pub mod pair;
pub mod route;
pub mod router;
pub mod strategy;

pub use error::{AggregateFailure, CancelReason, RouteFailure, RouterError};
pub use gate::{ConcurrencyGate, GateStats};
pub use pair::{RouteOutcome, RoutingPair};
pub use route::{route_fn, FnRoute, HttpRoute, HttpRouteConfig, Route};
pub use router::{RouterBuilder, ScatterGatherRouter};
pub use strategy::{
    from_kind, CollectListStrategy, CollectMapStrategy, FirstSuccessfulStrategy, ForkJoinStrategy,
    FAILED_ROUTES_ATTRIBUTE,
};

// Re-export the shared message types for route implementors
pub use sg_common::{
    ConsumableStream, FailureMarker, FailurePolicy, Message, Payload, RouteEntry, RouteError, StrategyKind,
};
pub use tokio_util::sync::CancellationToken;

pub type Result<T> = std::result::Result<T, RouterError>;
