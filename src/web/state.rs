// Shared application state for the HTTP transport.

use crate::config::EnvConfig;
use crate::db::DatabasePool;
use crate::jobs::JobTracker;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: DatabasePool,
    pub jobs: JobTracker,
    pub config: Arc<EnvConfig>,
}
