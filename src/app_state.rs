use std::sync::Arc;

use crate::services::jobs::JobService;
use crate::services::provider::VisionProvider;
use crate::store::JobStore;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub jobs: JobService,
    pub vision: Arc<dyn VisionProvider>,
}

impl AppState {
    pub fn new(jobs: JobService, vision: Arc<dyn VisionProvider>) -> Self {
        Self { jobs, vision }
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        self.jobs.store()
    }
}
