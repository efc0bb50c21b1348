pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::messaging::QueueClient;
use crate::notifications::{Drainer, Producer};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn QueueClient>,
    pub producer: Producer,
    pub drainer: Option<Arc<Drainer>>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(client: Arc<dyn QueueClient>, producer: Producer) -> Self {
        Self {
            client,
            producer,
            drainer: None,
            started_at: Instant::now(),
        }
    }

    /// Enable on-demand drains through the API
    pub fn with_drainer(mut self, drainer: Arc<Drainer>) -> Self {
        self.drainer = Some(drainer);
        self
    }
}
