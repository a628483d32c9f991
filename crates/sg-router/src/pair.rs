//! Routing pairs and route outcomes
//!
//! A `RoutingPair` is built for every route on every invocation and consumed
//! when the route runs. Its `RouteOutcome` carries the result back to the
//! strategy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use sg_common::{Message, RouteError};
use tokio_util::sync::CancellationToken;

use crate::route::Route;

/// One message copy bound to the route that will process it
pub struct RoutingPair {
    route_index: usize,
    message: Message,
    route: Arc<dyn Route>,
    cancel: CancellationToken,
}

impl RoutingPair {
    pub fn of(route_index: usize, message: Message, route: Arc<dyn Route>, cancel: CancellationToken) -> Self {
        Self {
            route_index,
            message,
            route,
            cancel,
        }
    }

    /// Position of the route in the router configuration
    pub fn route_index(&self) -> usize {
        self.route_index
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn route(&self) -> &Arc<dyn Route> {
        &self.route
    }

    pub fn route_name(&self) -> &str {
        self.route.name()
    }

    pub(crate) fn into_parts(self) -> (usize, Message, Arc<dyn Route>, CancellationToken) {
        (self.route_index, self.message, self.route, self.cancel)
    }
}

impl fmt::Debug for RoutingPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingPair")
            .field("route_index", &self.route_index)
            .field("route", &self.route.name())
            .field("message_id", &self.message.id)
            .finish()
    }
}

/// Result of running one routing pair
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub route_index: usize,
    pub route_name: String,
    /// 0 for the first route to finish, 1 for the second, and so on
    pub completion_index: usize,
    pub duration: Duration,
    pub result: Result<Message, RouteError>,
}

impl RouteOutcome {
    pub fn new(
        route_index: usize,
        route_name: impl Into<String>,
        completion_index: usize,
        result: Result<Message, RouteError>,
    ) -> Self {
        Self {
            route_index,
            route_name: route_name.into(),
            completion_index,
            duration: Duration::ZERO,
            result,
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn message(&self) -> Option<&Message> {
        self.result.as_ref().ok()
    }

    pub fn error(&self) -> Option<&RouteError> {
        self.result.as_ref().err()
    }
}
