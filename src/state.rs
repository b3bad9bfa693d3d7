use std::sync::Arc;

use crate::config::settings::AppConfig;
use crate::infrastructure::queue::MessageQueue;
use crate::infrastructure::storage::ObjectStore;

/// Clients built once at startup and handed to the worker.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub queue: Arc<dyn MessageQueue>,
    pub storage: Arc<dyn ObjectStore>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        queue: Arc<dyn MessageQueue>,
        storage: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            config,
            queue,
            storage,
        }
    }
}
