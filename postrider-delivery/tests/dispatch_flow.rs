//! End-to-end dispatch flow: queue → consumer pool → deliverer, with
//! shutdown draining the workers.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;

use async_trait::async_trait;
use postrider_common::{BulkItem, DispatchUnit, Domain, Signal};
use postrider_delivery::{
    BreakerConfig, CircuitBreaker, Consumer, ConsumerConfig, DeliveryError, PayloadKind,
    UnitDeliverer,
};
use postrider_queue::{BULK_QUEUE, MemoryQueue, QueueTransport};
use tokio::sync::broadcast;

struct CountingDeliverer {
    delivered: AtomicUsize,
}

#[async_trait]
impl UnitDeliverer for CountingDeliverer {
    async fn deliver(&self, _unit: &DispatchUnit) -> Result<(), DeliveryError> {
        self.delivered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn unit(n: usize) -> Vec<u8> {
    let unit = DispatchUnit {
        from: "alice@example.com".to_string(),
        from_name: "Alice".to_string(),
        private_key: None,
        from_host: Domain::new("example.com"),
        to_host: Domain::new("example.org"),
        mail: vec![BulkItem {
            to: format!("user{n}@example.org"),
            subject: "hi".to_string(),
            body: "<p>hi</p>".to_string(),
        }],
    };
    serde_json::to_vec(&unit).unwrap()
}

#[tokio::test]
async fn consumer_pool_drains_queue_and_stops_on_shutdown() {
    let transport = Arc::new(MemoryQueue::new());
    let breakers = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let deliverer = Arc::new(CountingDeliverer {
        delivered: AtomicUsize::new(0),
    });

    for n in 0..20 {
        transport.publish(BULK_QUEUE, unit(n)).await.unwrap();
    }

    let consumer = Arc::new(Consumer::new(
        BULK_QUEUE,
        PayloadKind::Bulk,
        Arc::clone(&transport) as Arc<dyn QueueTransport>,
        Arc::clone(&breakers),
        Arc::clone(&deliverer) as Arc<dyn UnitDeliverer>,
        ConsumerConfig { concurrency: 4 },
    ));

    let (shutdown, _) = broadcast::channel(4);
    let running = tokio::spawn(Arc::clone(&consumer).run(shutdown.subscribe()));

    // Wait for the pool to drain the queue.
    for _ in 0..100 {
        if deliverer.delivered.load(Ordering::SeqCst) == 20 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(deliverer.delivered.load(Ordering::SeqCst), 20);
    assert_eq!(transport.depth(BULK_QUEUE), 0);
    assert_eq!(transport.in_flight(BULK_QUEUE), 0);

    shutdown.send(Signal::Shutdown).unwrap();
    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("consumer should stop after shutdown")
        .unwrap();
}

#[tokio::test]
async fn transport_close_stops_the_pool() {
    let transport = Arc::new(MemoryQueue::new());
    let breakers = Arc::new(CircuitBreaker::new(BreakerConfig::default()));
    let deliverer = Arc::new(CountingDeliverer {
        delivered: AtomicUsize::new(0),
    });

    let consumer = Arc::new(Consumer::new(
        BULK_QUEUE,
        PayloadKind::Bulk,
        Arc::clone(&transport) as Arc<dyn QueueTransport>,
        Arc::clone(&breakers),
        Arc::clone(&deliverer) as Arc<dyn UnitDeliverer>,
        ConsumerConfig { concurrency: 2 },
    ));

    let (shutdown, _) = broadcast::channel(4);
    let running = tokio::spawn(Arc::clone(&consumer).run(shutdown.subscribe()));

    tokio::time::sleep(Duration::from_millis(20)).await;
    transport.close();

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("consumer should stop when the transport closes")
        .unwrap();
}
