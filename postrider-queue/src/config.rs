use std::sync::Arc;

use serde::Deserialize;

use crate::{MemoryQueue, QueueTransport};

/// Selects the queue backend at startup.
///
/// Only the in-process backend ships today; broker-backed variants slot in
/// here without touching consumers.
#[derive(Debug, Clone, Default, Deserialize)]
pub enum QueueConfig {
    #[default]
    Memory,
}

impl QueueConfig {
    #[must_use]
    pub fn build(&self) -> Arc<dyn QueueTransport> {
        match self {
            Self::Memory => Arc::new(MemoryQueue::new()),
        }
    }
}
