//! Top-level wiring: build every component from configuration, run the
//! ingestion server and both consumers, and coordinate shutdown.

use std::sync::{Arc, LazyLock};

use postrider_common::{Signal, logging};
use postrider_delivery::{
    BreakerConfig, CircuitBreaker, Consumer, ConsumerConfig, DeliveryEngine, DnsConfig, MxResolver,
    PayloadKind, SmtpConfig, SmtpSessionFactory, UnitDeliverer,
};
use postrider_http::{AppState, HttpConfig, HttpServer};
use postrider_queue::{BULK_QUEUE, QueueConfig, SINGLE_QUEUE};
use serde::Deserialize;
use tokio::sync::broadcast;

/// Process-wide shutdown channel. Every long-running component holds a
/// receiver; one send stops them all.
pub static SHUTDOWN_BROADCAST: LazyLock<broadcast::Sender<Signal>> =
    LazyLock::new(|| broadcast::channel(64).0);

/// The whole dispatcher configuration. Every section has defaults, so an
/// empty config file (or none at all) produces a working instance.
#[derive(Debug, Default, Deserialize)]
pub struct Postrider {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub dns: DnsConfig,
    #[serde(default)]
    pub smtp: SmtpConfig,
}

impl Postrider {
    /// Build every component and run until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the resolver cannot be initialised, the listener
    /// cannot bind, or the server fails while running.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let transport = self.queue.build();
        let breakers = Arc::new(CircuitBreaker::new(self.breaker));
        let resolver = Arc::new(MxResolver::new(&self.dns)?);
        let sessions = Arc::new(SmtpSessionFactory::new(self.smtp));
        let engine = Arc::new(DeliveryEngine::new(resolver, sessions));

        let single = Arc::new(Consumer::new(
            SINGLE_QUEUE,
            PayloadKind::Single,
            Arc::clone(&transport),
            Arc::clone(&breakers),
            Arc::clone(&engine) as Arc<dyn UnitDeliverer>,
            self.consumer.clone(),
        ));
        let bulk = Arc::new(Consumer::new(
            BULK_QUEUE,
            PayloadKind::Bulk,
            Arc::clone(&transport),
            Arc::clone(&breakers),
            engine,
            self.consumer,
        ));

        let state = Arc::new(AppState {
            transport: Arc::clone(&transport),
        });
        let server = HttpServer::new(self.http, state).await?;

        tokio::spawn(watch_signals());

        let single = tokio::spawn(single.run(SHUTDOWN_BROADCAST.subscribe()));
        let bulk = tokio::spawn(bulk.run(SHUTDOWN_BROADCAST.subscribe()));

        server.serve(SHUTDOWN_BROADCAST.subscribe()).await?;

        // The server is down; let the consumers finish their in-flight work.
        let _ = tokio::join!(single, bulk);
        tracing::info!("dispatcher stopped");

        Ok(())
    }
}

/// Wait for SIGINT or SIGTERM, then broadcast shutdown.
async fn watch_signals() {
    let interrupt = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(%err, "failed to install interrupt handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(%err, "failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => {},
        () = terminate => {},
    }

    tracing::info!("shutdown requested");
    let _ = SHUTDOWN_BROADCAST.send(Signal::Shutdown);
}
