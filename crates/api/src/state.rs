use std::sync::Arc;

use gatehouse_dispatch::Services;

use crate::config::ServerConfig;

/// Shared application state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Dispatch components (pool, dispatcher, callback processor, ...).
    pub services: Services,
    pub config: Arc<ServerConfig>,
}
