//! The ingestion HTTP server and its handlers.

use std::{sync::Arc, time::Duration};

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use postrider_common::{BulkRequest, MailItem, Mailbox, Signal};
use postrider_delivery::shard;
use postrider_queue::{BULK_QUEUE, QueueTransport, SINGLE_QUEUE};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    config::HttpConfig,
    error::{ApiError, ServerError},
};

/// Shared handler state: the queue transport is all ingestion needs.
pub struct AppState {
    pub transport: Arc<dyn QueueTransport>,
}

/// Build the ingestion routes.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/send/single", post(send_single))
        .route("/send/bulk", post(send_bulk))
        .with_state(state)
}

/// The bound-and-ready ingestion server.
pub struct HttpServer {
    listener: TcpListener,
    router: Router,
}

impl HttpServer {
    /// Bind the listener and assemble the middleware stack.
    ///
    /// # Errors
    ///
    /// Returns an error if binding to the configured address fails.
    pub async fn new(config: HttpConfig, state: Arc<AppState>) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(&config.listen_address)
            .await
            .map_err(|e| ServerError::Bind {
                address: config.listen_address.clone(),
                source: e,
            })?;

        tracing::info!(address = %config.listen_address, "ingestion server bound");

        let router = router(state)
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(Duration::from_secs(
                config.request_timeout_secs,
            )))
            .layer(TraceLayer::new_for_http());

        Ok(Self { listener, router })
    }

    /// Serve until a shutdown signal arrives.
    ///
    /// # Errors
    ///
    /// Returns an error if the server encounters a runtime error.
    pub async fn serve(
        self,
        mut shutdown: tokio::sync::broadcast::Receiver<Signal>,
    ) -> Result<(), ServerError> {
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("ingestion server received shutdown signal");
            })
            .await
            .map_err(|e| ServerError::Serve(e.to_string()))?;

        tracing::info!("ingestion server stopped");
        Ok(())
    }
}

async fn index() -> &'static str {
    "OK"
}

/// Accept one message: validate both addresses, default the display name to
/// the sender's local part, and enqueue.
async fn send_single(
    State(state): State<Arc<AppState>>,
    Json(mut item): Json<MailItem>,
) -> Result<StatusCode, ApiError> {
    let sender = Mailbox::parse(&item.from)?;
    Mailbox::parse(&item.to)?;

    if item.sender_name.as_deref().is_none_or(str::is_empty) {
        item.sender_name = Some(sender.local_part);
    }

    let payload = serde_json::to_vec(&item)?;
    state.transport.publish(SINGLE_QUEUE, payload).await?;

    tracing::debug!(to = %item.to, "single message enqueued");
    Ok(StatusCode::OK)
}

/// Accept a bulk request: shard into per-domain units, then publish each.
/// A failed publish aborts the loop; already-published units stand.
async fn send_bulk(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BulkRequest>,
) -> Result<StatusCode, ApiError> {
    let units = shard(&request)?;

    for unit in &units {
        let payload = serde_json::to_vec(unit)?;
        state.transport.publish(BULK_QUEUE, payload).await?;
    }

    tracing::info!(units = units.len(), messages = request.mail.len(), "bulk request enqueued");
    Ok(StatusCode::OK)
}
