//! Route contract
//!
//! A route is whatever processes one copy of the inbound message. The router
//! only sees this trait; how a route is built or discovered is up to the caller.

pub mod http;

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use sg_common::{Message, RouteError};
use tokio_util::sync::CancellationToken;

pub use http::{HttpRoute, HttpRouteConfig};

/// An addressable unit of message processing
#[async_trait]
pub trait Route: Send + Sync {
    /// Name used in logs, metrics and failure reports
    fn name(&self) -> &str;

    /// Process an exclusively owned copy of the message.
    ///
    /// `cancel` fires when the invocation is cancelled or times out; the router
    /// stops waiting on the route at that point either way.
    async fn execute(&self, message: Message, cancel: CancellationToken) -> Result<Message, RouteError>;
}

type RouteFn = dyn Fn(Message, CancellationToken) -> BoxFuture<'static, Result<Message, RouteError>> + Send + Sync;

/// Route backed by an async closure
pub struct FnRoute {
    name: String,
    handler: Box<RouteFn>,
}

impl FnRoute {
    pub fn new<F, Fut>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Message, RouteError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            handler: Box::new(move |message, cancel| Box::pin(handler(message, cancel))),
        }
    }
}

#[async_trait]
impl Route for FnRoute {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, message: Message, cancel: CancellationToken) -> Result<Message, RouteError> {
        (self.handler)(message, cancel).await
    }
}

/// Shorthand for an `Arc<dyn Route>` built from a closure
pub fn route_fn<F, Fut>(name: impl Into<String>, handler: F) -> Arc<dyn Route>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Message, RouteError>> + Send + 'static,
{
    Arc::new(FnRoute::new(name, handler))
}
