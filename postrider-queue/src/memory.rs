//! In-memory queue transport.
//!
//! Backs development and tests; production deployments point the transport
//! trait at a real broker. Queues are created lazily on first use. Each queue
//! is a FIFO of pending deliveries plus a map of in-flight (dequeued but
//! unsettled) ones.

use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::{
    Result,
    error::QueueError,
    transport::{Delivery, DeliveryTag, QueueTransport},
};

#[derive(Default)]
struct QueueState {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Default)]
struct Inner {
    ready: VecDeque<Delivery>,
    unacked: HashMap<DeliveryTag, Delivery>,
}

/// In-process [`QueueTransport`] implementation.
#[derive(Default)]
pub struct MemoryQueue {
    queues: DashMap<String, Arc<QueueState>>,
    closed: AtomicBool,
}

impl MemoryQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads waiting to be dequeued.
    #[must_use]
    pub fn depth(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map_or(0, |state| state.inner.lock().ready.len())
    }

    /// Number of dequeued-but-unsettled payloads.
    #[must_use]
    pub fn in_flight(&self, queue: &str) -> usize {
        self.queues
            .get(queue)
            .map_or(0, |state| state.inner.lock().unacked.len())
    }

    /// Close the transport: pending `dequeue` calls wake with
    /// [`QueueError::Closed`] once their queues drain.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        for state in &self.queues {
            state.notify.notify_waiters();
        }
        tracing::debug!("memory transport closed");
    }

    fn state(&self, queue: &str) -> Arc<QueueState> {
        self.queues
            .entry(queue.to_string())
            .or_default()
            .clone()
    }
}

#[async_trait]
impl QueueTransport for MemoryQueue {
    async fn publish(&self, queue: &str, payload: Vec<u8>) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(QueueError::Closed(queue.to_string()));
        }

        let state = self.state(queue);
        state.inner.lock().ready.push_back(Delivery {
            tag: DeliveryTag::generate(),
            payload,
        });
        state.notify.notify_one();
        Ok(())
    }

    async fn dequeue(&self, queue: &str) -> Result<Delivery> {
        let state = self.state(queue);

        loop {
            let notified = state.notify.notified();
            tokio::pin!(notified);
            // Register before the ready check so a publish or close between
            // the check and the await still wakes us.
            notified.as_mut().enable();

            {
                let mut inner = state.inner.lock();
                if let Some(delivery) = inner.ready.pop_front() {
                    inner.unacked.insert(delivery.tag, delivery.clone());
                    return Ok(delivery);
                }
            }

            if self.closed.load(Ordering::Acquire) {
                return Err(QueueError::Closed(queue.to_string()));
            }

            notified.await;
        }
    }

    async fn ack(&self, queue: &str, tag: DeliveryTag) -> Result<()> {
        let state = self.state(queue);
        state
            .inner
            .lock()
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery {
                queue: queue.to_string(),
                tag: tag.to_string(),
            })
    }

    async fn reject(&self, queue: &str, tag: DeliveryTag) -> Result<()> {
        let state = self.state(queue);
        state
            .inner
            .lock()
            .unacked
            .remove(&tag)
            .map(|_| ())
            .ok_or_else(|| QueueError::UnknownDelivery {
                queue: queue.to_string(),
                tag: tag.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn fifo_order_is_preserved() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"one".to_vec()).await.unwrap();
        queue.publish("q", b"two".to_vec()).await.unwrap();
        queue.publish("q", b"three".to_vec()).await.unwrap();

        assert_eq!(queue.dequeue("q").await.unwrap().payload, b"one");
        assert_eq!(queue.dequeue("q").await.unwrap().payload, b"two");
        assert_eq!(queue.dequeue("q").await.unwrap().payload, b"three");
    }

    #[tokio::test]
    async fn ack_settles_in_flight_delivery() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"payload".to_vec()).await.unwrap();

        let delivery = queue.dequeue("q").await.unwrap();
        assert_eq!(queue.depth("q"), 0);
        assert_eq!(queue.in_flight("q"), 1);

        queue.ack("q", delivery.tag).await.unwrap();
        assert_eq!(queue.in_flight("q"), 0);
    }

    #[tokio::test]
    async fn reject_discards_without_requeue() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"payload".to_vec()).await.unwrap();

        let delivery = queue.dequeue("q").await.unwrap();
        queue.reject("q", delivery.tag).await.unwrap();

        assert_eq!(queue.depth("q"), 0);
        assert_eq!(queue.in_flight("q"), 0);
    }

    #[tokio::test]
    async fn settling_twice_is_an_error() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"payload".to_vec()).await.unwrap();

        let delivery = queue.dequeue("q").await.unwrap();
        queue.ack("q", delivery.tag).await.unwrap();

        let err = queue.ack("q", delivery.tag).await.unwrap_err();
        assert!(matches!(err, QueueError::UnknownDelivery { .. }));
    }

    #[tokio::test]
    async fn republished_payload_goes_to_the_back() {
        let queue = MemoryQueue::new();
        queue.publish("q", b"first".to_vec()).await.unwrap();
        queue.publish("q", b"second".to_vec()).await.unwrap();

        let delivery = queue.dequeue("q").await.unwrap();
        queue.publish("q", delivery.payload.clone()).await.unwrap();
        queue.reject("q", delivery.tag).await.unwrap();

        assert_eq!(queue.dequeue("q").await.unwrap().payload, b"second");
        assert_eq!(queue.dequeue("q").await.unwrap().payload, b"first");
    }

    #[tokio::test]
    async fn dequeue_waits_for_publish() {
        let queue = Arc::new(MemoryQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue("q").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.publish("q", b"late".to_vec()).await.unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, b"late");
    }

    #[tokio::test]
    async fn close_wakes_pending_dequeues() {
        let queue = Arc::new(MemoryQueue::new());

        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.dequeue("q").await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(QueueError::Closed(_))));
    }

    #[tokio::test]
    async fn queues_are_independent() {
        let queue = MemoryQueue::new();
        queue.publish("a", b"for-a".to_vec()).await.unwrap();
        queue.publish("b", b"for-b".to_vec()).await.unwrap();

        assert_eq!(queue.depth("a"), 1);
        assert_eq!(queue.depth("b"), 1);
        assert_eq!(queue.dequeue("b").await.unwrap().payload, b"for-b");
        assert_eq!(queue.depth("a"), 1);
    }
}
