//! ConcurrencyGate - Bounded admission of routing pairs
//!
//! - Semaphore-based concurrency control
//! - FIFO admission of queued pairs
//! - Permits released when a route finishes, panics or is aborted
//! - One tokio task per admitted pair

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use sg_common::RouteError;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::pair::{RouteOutcome, RoutingPair};
use crate::{Result, RouterError};

/// Snapshot of gate activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateStats {
    pub max_concurrency: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: usize,
    /// Highest number of routes that were running at once
    pub peak_active: usize,
}

/// Runs routing pairs with at most `max_concurrency` executing at a time.
///
/// Pairs are queued by [`submit`](Self::submit) and started in submission
/// order whenever a permit is free. Outcomes are collected with
/// [`next_outcome`](Self::next_outcome) in completion order.
pub struct ConcurrencyGate {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    queue: VecDeque<RoutingPair>,
    in_flight: JoinSet<RouteOutcome>,
    completed: usize,
    peak_active: usize,
}

impl ConcurrencyGate {
    pub fn new(max_concurrency: usize) -> Result<Self> {
        if max_concurrency == 0 {
            return Err(RouterError::Config("max concurrency must be at least 1".to_string()));
        }

        Ok(Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            queue: VecDeque::new(),
            in_flight: JoinSet::new(),
            completed: 0,
            peak_active: 0,
        })
    }

    /// Queue a pair and start it right away if a permit is free
    pub fn submit(&mut self, pair: RoutingPair) {
        self.queue.push_back(pair);
        self.pump();
    }

    /// Wait for the next route to finish.
    ///
    /// Returns `None` once nothing is queued or running. Cancel safe.
    pub async fn next_outcome(&mut self) -> Option<RouteOutcome> {
        loop {
            self.pump();

            match self.in_flight.join_next().await? {
                Ok(mut outcome) => {
                    outcome.completion_index = self.completed;
                    self.completed += 1;
                    // The finished task dropped its permit, start whoever is next
                    self.pump();
                    return Some(outcome);
                }
                Err(e) => {
                    // Panics are caught inside the task, so this is an abort
                    warn!(error = %e, "Route task ended without an outcome");
                }
            }
        }
    }

    /// Abort running routes and drop queued ones. Every permit is released.
    pub fn close(&mut self) {
        let dropped = self.queue.len();
        self.queue.clear();
        self.in_flight.abort_all();
        self.semaphore.close();

        if dropped > 0 || !self.in_flight.is_empty() {
            debug!(
                queued_dropped = dropped,
                in_flight = self.in_flight.len(),
                "Concurrency gate closed"
            );
        }
    }

    pub fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight.is_empty()
    }

    pub fn active(&self) -> usize {
        if self.semaphore.is_closed() {
            return 0;
        }
        self.max_concurrency - self.semaphore.available_permits()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    pub fn stats(&self) -> GateStats {
        GateStats {
            max_concurrency: self.max_concurrency,
            active: self.active(),
            queued: self.queued(),
            completed: self.completed,
            peak_active: self.peak_active,
        }
    }

    /// Start queued pairs while permits are available
    fn pump(&mut self) {
        while !self.queue.is_empty() {
            let Ok(permit) = self.semaphore.clone().try_acquire_owned() else {
                break;
            };
            let Some(pair) = self.queue.pop_front() else {
                break;
            };

            self.peak_active = self.peak_active.max(self.active());
            debug!(
                route_index = pair.route_index(),
                route = %pair.route_name(),
                active = self.active(),
                queued = self.queue.len(),
                "Admitting route"
            );
            self.in_flight.spawn(execute_pair(pair, permit));
        }
    }
}

impl Drop for ConcurrencyGate {
    fn drop(&mut self) {
        self.in_flight.abort_all();
    }
}

async fn execute_pair(pair: RoutingPair, permit: OwnedSemaphorePermit) -> RouteOutcome {
    let _permit = permit;
    let (route_index, message, route, cancel) = pair.into_parts();
    let route_name = route.name().to_string();
    let start = Instant::now();

    let result = if cancel.is_cancelled() {
        Err(RouteError::Cancelled)
    } else {
        let execution = AssertUnwindSafe(route.execute(message, cancel.clone())).catch_unwind();
        tokio::select! {
            caught = execution => match caught {
                Ok(result) => result,
                Err(panic) => Err(RouteError::Panicked(panic_message(panic.as_ref()))),
            },
            _ = cancel.cancelled() => Err(RouteError::Cancelled),
        }
    };

    RouteOutcome {
        route_index,
        route_name,
        completion_index: 0,
        duration: start.elapsed(),
        result,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
