//! # Integration Test Fixtures
//!
//! Shared builders for the integration tests under `tests/`: a queue manager
//! over the in-memory store, an API client pointed at a mock server, and the
//! upstream payloads (event-stream records and XML shards) the mocks serve.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use lib_recruit::connections::MemoryStore;
use lib_recruit::retrieve::NsClientConfig;
use lib_recruit::{ConsumerId, NsClient, QueueManager};
use url::Url;
use wiremock::MockServer;

/// Path the mock API is served under.
pub const API_PATH: &str = "/cgi-bin/api.cgi";

/// A loaded manager with one queue per id, none of them whitelisting anything.
pub async fn manager_with(ids: &[ConsumerId]) -> (Arc<QueueManager>, Arc<MemoryStore>) {
    let mut store = MemoryStore::new();
    for id in ids {
        store = store.with_consumer(*id, Vec::<String>::new());
    }
    let store = Arc::new(store);
    let manager = Arc::new(QueueManager::new(store.clone()));
    manager.load().await.expect("memory store loads");
    (manager, store)
}

/// A client for `server` allowing `period_max` requests per window.
pub fn api_client(server: &MockServer, period_max: usize) -> Arc<NsClient> {
    let base = Url::parse(&format!("{}{}", server.uri(), API_PATH)).expect("mock uri is a valid url");
    let mut config = NsClientConfig::new(base, "integration_tests");
    config.period_max = period_max;
    config.timeout = Duration::from_secs(5);
    Arc::new(NsClient::new(config).expect("client builds"))
}

/// One `text/event-stream` record carrying a happening.
pub fn sse_record(id: &str, text: &str, at: DateTime<Utc>) -> String {
    let payload = serde_json::json!({ "str": text, "time": at.timestamp() });
    format!("id: {}\ndata: {}\n\n", id, payload)
}

/// A `newnationdetails` document, entries given newest first as upstream does.
pub fn new_nations_xml(nations: &[(&str, &str, DateTime<Utc>)]) -> String {
    let mut body = String::from("<WORLD>\n<NEWNATIONDETAILS>\n");
    for (name, region, founded) in nations {
        body.push_str(&format!(
            "<NEWNATION name=\"{}\"><FOUNDEDTIME>{}</FOUNDEDTIME><REGION>{}</REGION></NEWNATION>\n",
            name,
            founded.timestamp(),
            region
        ));
    }
    body.push_str("</NEWNATIONDETAILS>\n</WORLD>\n");
    body
}

/// A `foundedtime` document for one nation.
pub fn founded_time_xml(nation: &str, founded: DateTime<Utc>) -> String {
    format!(
        "<NATION id=\"{}\">\n<FOUNDEDTIME>{}</FOUNDEDTIME>\n</NATION>\n",
        nation,
        founded.timestamp()
    )
}

/// Polls `check` every 10ms until it holds or `limit` passes.
pub async fn eventually<F, Fut>(limit: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check().await
}
