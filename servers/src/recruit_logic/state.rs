use std::sync::Arc;

use lib_recruit::{NsClient, QueueManager, RecruitmentDesk, StreamState};
use tokio::sync::RwLock;

/// Handles shared by the HTTP surface and the monitor.
#[derive(Clone)]
pub struct AppState {
    pub queues: Arc<QueueManager>,
    pub desk: Arc<RecruitmentDesk>,
    pub client: Arc<NsClient>,
    pub stream_state: Arc<RwLock<StreamState>>,
}

impl AppState {
    pub fn new(
        queues: Arc<QueueManager>,
        desk: Arc<RecruitmentDesk>,
        client: Arc<NsClient>,
        stream_state: Arc<RwLock<StreamState>>,
    ) -> Self {
        Self {
            queues,
            desk,
            client,
            stream_state,
        }
    }

    pub async fn stream_state(&self) -> StreamState {
        *self.stream_state.read().await
    }
}
