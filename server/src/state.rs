use std::sync::Arc;

use engine::coordinator::ExecutionCoordinator;
use engine::dispatcher::EventDispatcher;
use engine::store::JobStore;

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub coordinator: ExecutionCoordinator,
    pub dispatcher: Arc<EventDispatcher>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn JobStore>,
        coordinator: ExecutionCoordinator,
        dispatcher: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            store,
            coordinator,
            dispatcher,
        }
    }
}
