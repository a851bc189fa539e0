use crate::responder::ChatResponder;
use crate::store::ConversationStore;
use std::sync::Arc;
use tokio::sync::Mutex;

// Application state shared by every command
#[derive(Clone)] // Cheap to clone into background tasks
pub struct AppState {
    // The store is the only mutator; the lock is held per operation and
    // never across a responder call.
    pub store: Arc<Mutex<ConversationStore>>,
    pub responder: Arc<dyn ChatResponder>,
}

impl AppState {
    pub fn new(store: ConversationStore, responder: Arc<dyn ChatResponder>) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            responder,
        }
    }
}
