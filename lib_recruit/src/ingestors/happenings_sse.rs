//! # Happenings Stream Ingestor
//!
//! Long-lived consumer of the server-sent happenings feed. Each record carries
//! a JSON payload (`{"str": "...", "time": 1700000000}`); the text is
//! classified and the resulting event handed to the [`QueueManager`].
//!
//! ## Lifecycle
//!
//! `Connecting -> Streaming -> (Disconnected -> Connecting)* -> Stopped`
//!
//! The loop never gives up on its own. After a disconnect it waits for the
//! server's last `retry:` hint if one was sent, otherwise for an exponential
//! backoff that starts over once a connection has delivered records. The last
//! event id is sent back as `Last-Event-ID` so the server can resume where we
//! left off. Only the shutdown token ends the loop; it is checked between
//! attempts, during the backoff sleep and against every read.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::core::classifier::classify;
use crate::core::queue_manager::QueueManager;
use crate::error::RequestError;
use crate::ingestors::sse::{SseDecoder, SseRecord};

pub const DEFAULT_HAPPENINGS_URL: &str = "https://www.nationstates.net/api/founding+move";

/// Floor for every reconnect delay, whatever the configuration or server say.
pub const MIN_RECONNECT_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Connecting,
    Streaming,
    Disconnected,
    Stopped,
}

/// Configuration for the happenings stream.
#[derive(Debug, Clone)]
pub struct HappeningsConfig {
    pub url: Url,
    pub user_agent: String,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    /// A connection silent for this long is treated as dead.
    pub idle_timeout: Duration,
}

impl HappeningsConfig {
    pub fn new(url: Url, operator: &str) -> Self {
        Self {
            url,
            user_agent: format!("Recruitment feed, run by {}", operator),
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Deserialize)]
struct HappeningPayload {
    #[serde(rename = "str")]
    text: String,
    #[serde(default)]
    time: Option<i64>,
}

pub struct HappeningsIngestor {
    config: HappeningsConfig,
    manager: Arc<QueueManager>,
    client: reqwest::Client,
    state: Arc<RwLock<StreamState>>,
    last_event_id: Mutex<Option<String>>,
}

impl HappeningsIngestor {
    pub fn new(config: HappeningsConfig, manager: Arc<QueueManager>) -> Result<Self, RequestError> {
        // no overall timeout: the response body is the stream
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        Ok(Self {
            config,
            manager,
            client,
            state: Arc::new(RwLock::new(StreamState::Connecting)),
            last_event_id: Mutex::new(None),
        })
    }

    pub async fn current_state(&self) -> StreamState {
        *self.state.read().await
    }

    /// Shared handle for observers such as the monitor.
    pub fn state_handle(&self) -> Arc<RwLock<StreamState>> {
        Arc::clone(&self.state)
    }

    pub fn last_event_id(&self) -> Option<String> {
        self.lock_id().clone()
    }

    /// Primary execution loop with reconnection logic.
    pub async fn run(&self, shutdown: CancellationToken) {
        let base_backoff = self.config.base_backoff.max(MIN_RECONNECT_DELAY);
        let mut backoff = base_backoff;
        let mut retry_hint = None;

        while !shutdown.is_cancelled() {
            self.set_state(StreamState::Connecting).await;
            log::info!("Connecting to happenings stream: {}", self.config.url);

            let mut decoder = SseDecoder::new();
            let delivered = match self.stream_once(&mut decoder, &shutdown).await {
                Ok(n) => {
                    log::warn!("Happenings stream closed after {} records.", n);
                    n
                }
                Err((n, e)) => {
                    log::error!("Happenings stream failed after {} records: {}", n, e);
                    n
                }
            };
            self.set_state(StreamState::Disconnected).await;

            if shutdown.is_cancelled() {
                break;
            }

            if delivered > 0 {
                backoff = base_backoff;
            }
            if decoder.retry().is_some() {
                retry_hint = decoder.retry();
            }
            let delay = next_delay(retry_hint, &mut backoff, self.config.max_backoff);

            log::info!("Reconnecting in {}ms", delay.as_millis());
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(StreamState::Stopped).await;
        log::info!("Happenings ingestor stopped.");
    }

    /// One connection. Returns how many records were processed, alongside
    /// the error if the connection ended abnormally.
    async fn stream_once(
        &self,
        decoder: &mut SseDecoder,
        shutdown: &CancellationToken,
    ) -> Result<usize, (usize, RequestError)> {
        let mut request = self
            .client
            .get(self.config.url.clone())
            .header(reqwest::header::ACCEPT, "text/event-stream");
        if let Some(id) = self.last_event_id() {
            request = request.header("Last-Event-ID", id);
        }

        let response = tokio::select! {
            _ = shutdown.cancelled() => return Ok(0),
            res = request.send() => res.map_err(|e| (0, RequestError::from(e)))?,
        };
        if !response.status().is_success() {
            return Err((
                0,
                RequestError::Status {
                    status: response.status().as_u16(),
                    url: self.config.url.to_string(),
                },
            ));
        }

        self.set_state(StreamState::Streaming).await;
        log::info!("Happenings stream connected.");

        let mut body = Box::pin(response.bytes_stream());
        let mut delivered = 0;
        loop {
            let chunk = tokio::select! {
                _ = shutdown.cancelled() => return Ok(delivered),
                next = tokio::time::timeout(self.config.idle_timeout, body.next()) => next,
            };
            match chunk {
                Ok(Some(Ok(bytes))) => {
                    for record in decoder.push(&bytes) {
                        self.process_record(&record);
                        delivered += 1;
                    }
                    if let Some(id) = decoder.last_event_id() {
                        *self.lock_id() = Some(id.to_string());
                    }
                }
                Ok(Some(Err(e))) => return Err((delivered, e.into())),
                Ok(None) => return Ok(delivered),
                Err(_) => {
                    log::warn!(
                        "Inactivity timeout ({}s). Reconnecting...",
                        self.config.idle_timeout.as_secs()
                    );
                    return Ok(delivered);
                }
            }
        }
    }

    /// Decodes, classifies and dispatches one record. Returns how many queues
    /// changed, or `None` if the record was skipped.
    pub fn process_record(&self, record: &SseRecord) -> Option<usize> {
        let payload: HappeningPayload = match serde_json::from_str(&record.data) {
            Ok(p) => p,
            Err(e) => {
                log::warn!("Skipping undecodable record {:?}: {}", record.id, e);
                return None;
            }
        };

        let event = match classify(&payload.text) {
            Some(event) => event,
            None => {
                log::debug!("Ignoring happening: {}", payload.text);
                return None;
            }
        };
        let event = match payload.time.and_then(|t| DateTime::<Utc>::from_timestamp(t, 0)) {
            Some(at) => event.with_time(at),
            None => event,
        };

        let changed = self.manager.dispatch(&event);
        log::debug!("{:?} touched {} queues", event, changed);
        Some(changed)
    }

    async fn set_state(&self, state: StreamState) {
        *self.state.write().await = state;
    }

    fn lock_id(&self) -> MutexGuard<'_, Option<String>> {
        self.last_event_id.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The server's `retry:` hint wins; otherwise the exponential backoff is
/// used and doubled for next time.
fn next_delay(retry_hint: Option<Duration>, backoff: &mut Duration, max_backoff: Duration) -> Duration {
    let delay = match retry_hint {
        Some(hint) => hint,
        None => {
            let delay = *backoff;
            *backoff = (*backoff * 2).min(max_backoff);
            delay
        }
    };
    delay.max(MIN_RECONNECT_DELAY)
}
