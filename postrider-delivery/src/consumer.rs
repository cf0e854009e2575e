//! Queue consumers.
//!
//! A consumer runs a bounded pool of workers against one queue. Each worker
//! dequeues a payload, decodes it into a dispatch unit, runs the delivery
//! through the sender-domain circuit breaker, and settles the delivery:
//!
//! - delivered → ack
//! - connection failure or open circuit → re-publish the original payload,
//!   then settle the consumed one
//! - send failure or undecodable payload → settle without re-publishing
//!
//! Requeues are unbounded by design; each one is logged with the sender
//! domain so a permanently unreachable destination shows up in the logs
//! rather than in lost mail.

use std::sync::Arc;

use async_trait::async_trait;
use postrider_common::{DispatchUnit, MailItem, Signal};
use postrider_queue::{Delivery, QueueTransport};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::{
    circuit_breaker::CircuitBreaker,
    engine::DeliveryEngine,
    error::{DeliveryError, DispatchError},
};

/// Delivers one unit; the seam between consumers and the engine.
#[async_trait]
pub trait UnitDeliverer: Send + Sync {
    async fn deliver(&self, unit: &DispatchUnit) -> Result<(), DeliveryError>;
}

#[async_trait]
impl UnitDeliverer for DeliveryEngine {
    async fn deliver(&self, unit: &DispatchUnit) -> Result<(), DeliveryError> {
        Self::deliver(self, unit).await
    }
}

/// How payloads on a queue are decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    /// Serialized `MailItem`s (the single-send queue); wrapped into
    /// one-item units at consumption time.
    Single,
    /// Serialized `DispatchUnit`s (the bulk queue).
    Bulk,
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ConsumerConfig {
    /// Workers per queue.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

const fn default_concurrency() -> usize {
    10
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Error)]
enum DecodeError {
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Address(#[from] postrider_common::AddressError),
}

/// A worker pool bound to one queue.
pub struct Consumer {
    queue: &'static str,
    kind: PayloadKind,
    transport: Arc<dyn QueueTransport>,
    breakers: Arc<CircuitBreaker>,
    deliverer: Arc<dyn UnitDeliverer>,
    config: ConsumerConfig,
}

impl Consumer {
    #[must_use]
    pub fn new(
        queue: &'static str,
        kind: PayloadKind,
        transport: Arc<dyn QueueTransport>,
        breakers: Arc<CircuitBreaker>,
        deliverer: Arc<dyn UnitDeliverer>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            queue,
            kind,
            transport,
            breakers,
            deliverer,
            config,
        }
    }

    /// Run the worker pool until a shutdown signal arrives or the transport
    /// closes, then drain.
    pub async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<Signal>) {
        let mut workers = tokio::task::JoinSet::new();

        for worker in 0..self.config.concurrency.max(1) {
            let consumer = Arc::clone(&self);
            let mut shutdown = shutdown.resubscribe();
            workers.spawn(async move { consumer.worker(worker, &mut shutdown).await });
        }
        drop(shutdown);

        while workers.join_next().await.is_some() {}
        tracing::info!(queue = self.queue, "consumer stopped");
    }

    async fn worker(&self, worker: usize, shutdown: &mut broadcast::Receiver<Signal>) {
        loop {
            let delivery = tokio::select! {
                delivery = self.transport.dequeue(self.queue) => match delivery {
                    Ok(delivery) => delivery,
                    Err(err) if err.is_closed() => break,
                    Err(err) => {
                        tracing::error!(queue = self.queue, %err, "dequeue failed");
                        break;
                    }
                },
                _ = shutdown.recv() => break,
            };

            self.process(delivery).await;
        }

        tracing::debug!(queue = self.queue, worker, "worker stopped");
    }

    async fn process(&self, delivery: Delivery) {
        let unit = match self.decode(&delivery.payload) {
            Ok(unit) => unit,
            Err(err) => {
                tracing::warn!(queue = self.queue, %err, "dropping undecodable payload");
                self.settle(&delivery, false).await;
                return;
            }
        };

        let domain = unit.from_host.clone();
        let outcome = self
            .breakers
            .execute(&domain, || self.deliverer.deliver(&unit))
            .await;

        match outcome {
            Ok(()) => {
                tracing::info!(
                    queue = self.queue,
                    sender_domain = %domain,
                    items = unit.mail.len(),
                    "unit delivered"
                );
                self.settle(&delivery, true).await;
            }
            Err(DispatchError::CircuitOpen(domain)) => {
                tracing::warn!(
                    queue = self.queue,
                    sender_domain = %domain,
                    "circuit open, requeueing unit"
                );
                self.requeue(&delivery).await;
            }
            Err(DispatchError::Delivery(err)) if err.is_retryable() => {
                tracing::warn!(
                    queue = self.queue,
                    sender_domain = %domain,
                    %err,
                    "connection failure, requeueing unit"
                );
                self.requeue(&delivery).await;
            }
            Err(DispatchError::Delivery(err)) => {
                tracing::warn!(
                    queue = self.queue,
                    sender_domain = %domain,
                    %err,
                    "send failure, dropping unit"
                );
                self.settle(&delivery, false).await;
            }
        }
    }

    fn decode(&self, payload: &[u8]) -> Result<DispatchUnit, DecodeError> {
        match self.kind {
            PayloadKind::Single => {
                let item: MailItem = serde_json::from_slice(payload)?;
                Ok(DispatchUnit::from_single(item)?)
            }
            PayloadKind::Bulk => Ok(serde_json::from_slice(payload)?),
        }
    }

    /// Re-publish the consumed payload byte-for-byte, then settle the
    /// original so it leaves the in-flight set.
    async fn requeue(&self, delivery: &Delivery) {
        if let Err(err) = self
            .transport
            .publish(self.queue, delivery.payload.clone())
            .await
        {
            tracing::error!(queue = self.queue, %err, "requeue publish failed, unit lost");
        }
        self.settle(delivery, false).await;
    }

    async fn settle(&self, delivery: &Delivery, acked: bool) {
        let result = if acked {
            self.transport.ack(self.queue, delivery.tag).await
        } else {
            self.transport.reject(self.queue, delivery.tag).await
        };

        if let Err(err) = result {
            tracing::error!(queue = self.queue, %err, "failed to settle delivery");
        }
    }
}
