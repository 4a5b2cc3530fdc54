use std::sync::Arc;

use crate::box_client::DocumentAi;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Box in production; a scripted fake in tests.
    pub ai: Arc<dyn DocumentAi>,
    pub config: Config,
}
