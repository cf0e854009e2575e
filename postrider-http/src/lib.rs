//! HTTP ingestion layer.
//!
//! Thin glue between callers and the queues: bind JSON, validate addresses,
//! serialize, publish. No delivery logic lives here.

pub mod config;
pub mod error;
pub mod server;

pub use config::HttpConfig;
pub use error::{ApiError, ServerError};
pub use server::{AppState, HttpServer, router};
