use crate::config::StoryConfig;
use std::sync::Arc;

/// Shared state available to all handlers via `State<AppState>`.
#[derive(Clone)]
pub struct AppState {
    /// Generation, storage and rate-limit settings for every request.
    pub config: Arc<StoryConfig>,
}

impl AppState {
    pub fn new(config: StoryConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }
}
