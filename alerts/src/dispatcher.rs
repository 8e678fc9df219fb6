//! Fire-and-forget delivery of alert events.
//!
//! Evaluation units hand events to a bounded queue and return immediately.
//! A single background worker drains it in FIFO order through a [`Notifier`].
//! Nothing is retried: a full queue drops the event, a failed delivery is
//! logged and counted.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{self, Receiver, Sender, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::evaluator::AlertEvent;
use crate::metrics::counters::Counters;
use crate::notifier::Notifier;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DispatchError {
    #[error("dispatch queue full")]
    QueueFull,

    #[error("dispatch worker stopped")]
    Closed,
}

#[derive(Clone)]
pub struct Dispatcher {
    tx: Sender<AlertEvent>,
    counters: Counters,
}

impl Dispatcher {
    /// Creates the queue without a worker. The receiver goes to [`run_worker`].
    pub fn channel(capacity: usize, counters: Counters) -> (Self, Receiver<AlertEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx, counters }, rx)
    }

    /// Creates the queue and spawns its worker.
    pub fn start(
        notifier: Arc<dyn Notifier>,
        capacity: usize,
        counters: Counters,
    ) -> (Self, JoinHandle<()>) {
        let (dispatcher, rx) = Self::channel(capacity, counters.clone());
        let handle = tokio::spawn(run_worker(rx, notifier, counters));
        (dispatcher, handle)
    }

    /// Enqueues `event` without waiting.
    pub fn send(&self, event: AlertEvent) -> Result<(), DispatchError> {
        let condition_id = event.condition_id;
        match self.tx.try_send(event) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                Counters::incr(&self.counters.dispatch_failed);
                warn!(target: "dispatcher", %condition_id, "dispatch queue full; event dropped");
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => {
                Counters::incr(&self.counters.dispatch_failed);
                warn!(target: "dispatcher", %condition_id, "dispatch worker gone; event dropped");
                Err(DispatchError::Closed)
            }
        }
    }
}

/// Drains the queue until every [`Dispatcher`] handle has been dropped.
pub async fn run_worker(
    mut rx: Receiver<AlertEvent>,
    notifier: Arc<dyn Notifier>,
    counters: Counters,
) {
    info!(target: "dispatcher", "dispatch worker started");

    while let Some(ev) = rx.recv().await {
        match notifier.send(&ev.owner, &ev.message).await {
            Ok(()) => {
                Counters::incr(&counters.dispatched);
                debug!(
                    target: "dispatcher",
                    condition_id = %ev.condition_id,
                    kind = %ev.kind,
                    "event delivered"
                );
            }
            Err(e) => {
                Counters::incr(&counters.dispatch_failed);
                warn!(
                    target: "dispatcher",
                    condition_id = %ev.condition_id,
                    owner = %ev.owner,
                    error = %e,
                    "event delivery failed"
                );
            }
        }
    }

    info!(target: "dispatcher", "dispatch worker stopped");
}

/// Waits up to `grace` for the worker to deliver what is still queued. The
/// worker only finishes once every [`Dispatcher`] handle has been dropped.
/// Returns `false` when the grace period ran out first.
pub async fn drain(worker: JoinHandle<()>, grace: Duration) -> bool {
    match tokio::time::timeout(grace, worker).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            warn!(target: "dispatcher", error = %e, "dispatch worker ended abnormally");
            true
        }
        Err(_) => false,
    }
}
