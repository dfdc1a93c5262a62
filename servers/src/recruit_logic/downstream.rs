//! # HTTP Surface
//!
//! JSON endpoints for channel registration, whitelists, queue inspection and
//! the recruitment flow. Every failure is a `RecruitError` rendered by
//! [`ApiError`]; an empty queue is answered with `204 No Content` and
//! throttling with `429` plus a `Retry-After` header.

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use chrono::{DateTime, Utc};
use lib_recruit::core::recruitment::DEFAULT_BATCH;
use lib_recruit::{ConsumerId, Entry, RecruitError, RequestError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::recruit_logic::state::AppState;

/// A `RecruitError` on its way to the client.
#[derive(Debug)]
pub struct ApiError(RecruitError);

impl From<RecruitError> for ApiError {
    fn from(e: RecruitError) -> Self {
        ApiError(e)
    }
}

fn ceil_secs(d: Duration) -> u64 {
    d.as_secs() + u64::from(d.subsec_nanos() > 0)
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let (status, error_type) = match &err {
            RecruitError::EmptyQueue => return StatusCode::NO_CONTENT.into_response(),
            RecruitError::TooSoon { .. } => (StatusCode::TOO_MANY_REQUESTS, "too_soon"),
            RecruitError::Request(RequestError::RateLimited { .. }) => (StatusCode::TOO_MANY_REQUESTS, "rate_limited"),
            RecruitError::UnknownConsumer(_) => (StatusCode::NOT_FOUND, "unknown_consumer"),
            RecruitError::NationNotFound(_) => (StatusCode::NOT_FOUND, "nation_not_found"),
            RecruitError::ConsumerExists(_) => (StatusCode::CONFLICT, "consumer_exists"),
            RecruitError::NotRegistered { .. } => (StatusCode::FORBIDDEN, "not_registered"),
            RecruitError::EmptyRegion => (StatusCode::BAD_REQUEST, "empty_region"),
            RecruitError::Request(_) => {
                log::error!("Upstream error: {}", err);
                (StatusCode::BAD_GATEWAY, "upstream_error")
            }
            RecruitError::Storage(_) => {
                log::error!("Storage error: {}", err);
                (StatusCode::BAD_GATEWAY, "storage_error")
            }
        };

        let body = Json(json!({
            "error_type": error_type,
            "message": err.to_string(),
        }));

        match err.retry_after() {
            Some(wait) => (status, [(header::RETRY_AFTER, ceil_secs(wait).to_string())], body).into_response(),
            None => (status, body).into_response(),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
pub struct NewConsumer {
    pub id: ConsumerId,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct CountParams {
    pub count: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct RegisterRecruiter {
    pub user_id: u64,
    pub nation: String,
}

#[derive(Debug, Deserialize)]
pub struct RecruitRequest {
    pub user_id: u64,
    pub count: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct QueueView {
    pub id: ConsumerId,
    pub size: usize,
    pub last_updated: DateTime<Utc>,
    pub whitelist: Vec<String>,
    pub nations: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct RecruitView {
    pub nations: Vec<String>,
    pub entries: Vec<Entry>,
    pub cooldown_secs: u64,
    pub next_recruitment_at: DateTime<Utc>,
}

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/consumers", get(list_consumers).post(create_consumer))
        .route("/consumers/{id}", delete(remove_consumer))
        .route("/consumers/{id}/queue", get(queue_view).delete(purge_queue))
        .route("/consumers/{id}/dequeue", post(dequeue))
        .route(
            "/consumers/{id}/whitelist/{region}",
            post(add_consumer_region).delete(remove_consumer_region),
        )
        .route("/consumers/{id}/recruiters", post(register_recruiter))
        .route("/consumers/{id}/recruit", post(recruit))
        .route("/whitelist", get(global_whitelist))
        .route("/whitelist/{region}", post(add_global_region).delete(remove_global_region))
        .with_state(app_state)
}

pub async fn run(port: u16, app_state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    log::info!("Listening on http://{}", listener.local_addr()?);
    serve(listener, app_state, shutdown).await
}

pub async fn serve(listener: TcpListener, app_state: AppState, shutdown: CancellationToken) -> anyhow::Result<()> {
    axum::serve(listener, router(app_state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    log::info!("HTTP server stopped.");
    Ok(())
}

async fn health_handler(State(app_state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "stream": app_state.stream_state().await,
            "consumers": app_state.queues.consumer_ids().len(),
            "rate": app_state.client.rate_snapshot(),
        })),
    )
}

async fn list_consumers(State(app_state): State<AppState>) -> impl IntoResponse {
    let consumers: Vec<_> = app_state
        .queues
        .sizes()
        .into_iter()
        .map(|(id, size)| json!({ "id": id, "size": size }))
        .collect();
    Json(consumers)
}

async fn create_consumer(
    State(app_state): State<AppState>,
    Json(body): Json<NewConsumer>,
) -> ApiResult<impl IntoResponse> {
    app_state.queues.add_consumer(body.id, body.whitelist).await?;
    log::info!("Registered channel {}", body.id);
    let whitelist = app_state.queues.consumer_whitelist(body.id)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": body.id, "whitelist": whitelist }))))
}

async fn remove_consumer(State(app_state): State<AppState>, Path(id): Path<ConsumerId>) -> ApiResult<StatusCode> {
    app_state.queues.remove_consumer(id).await?;
    log::info!("Removed channel {}", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn queue_view(State(app_state): State<AppState>, Path(id): Path<ConsumerId>) -> ApiResult<Json<QueueView>> {
    let queues = &app_state.queues;
    Ok(Json(QueueView {
        id,
        size: queues.queue_size(id)?,
        last_updated: queues.last_updated(id)?,
        whitelist: queues.consumer_whitelist(id)?,
        nations: queues.queued_names(id)?,
    }))
}

async fn purge_queue(State(app_state): State<AppState>, Path(id): Path<ConsumerId>) -> ApiResult<impl IntoResponse> {
    let purged = app_state.queues.purge(id)?;
    Ok(Json(json!({ "purged": purged })))
}

async fn dequeue(
    State(app_state): State<AppState>,
    Path(id): Path<ConsumerId>,
    Query(params): Query<CountParams>,
) -> ApiResult<Json<Vec<Entry>>> {
    let entries = app_state.queues.dequeue_for(id, params.count.unwrap_or(DEFAULT_BATCH))?;
    Ok(Json(entries))
}

async fn add_consumer_region(
    State(app_state): State<AppState>,
    Path((id, region)): Path<(ConsumerId, String)>,
) -> ApiResult<impl IntoResponse> {
    let changed = app_state.queues.add_to_consumer_whitelist(id, &region).await?;
    Ok(Json(json!({ "changed": changed })))
}

async fn remove_consumer_region(
    State(app_state): State<AppState>,
    Path((id, region)): Path<(ConsumerId, String)>,
) -> ApiResult<impl IntoResponse> {
    let changed = app_state.queues.remove_from_consumer_whitelist(id, &region).await?;
    Ok(Json(json!({ "changed": changed })))
}

async fn global_whitelist(State(app_state): State<AppState>) -> impl IntoResponse {
    Json(app_state.queues.global_whitelist())
}

async fn add_global_region(
    State(app_state): State<AppState>,
    Path(region): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let changed = app_state.queues.add_global_whitelist(&region).await?;
    Ok(Json(json!({ "changed": changed })))
}

async fn remove_global_region(
    State(app_state): State<AppState>,
    Path(region): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let changed = app_state.queues.remove_global_whitelist(&region).await?;
    Ok(Json(json!({ "changed": changed })))
}

async fn register_recruiter(
    State(app_state): State<AppState>,
    Path(id): Path<ConsumerId>,
    Json(body): Json<RegisterRecruiter>,
) -> ApiResult<impl IntoResponse> {
    let recruiter = app_state.desk.register_recruiter(body.user_id, id, &body.nation).await?;
    log::info!("User {} recruits as {} in channel {}", recruiter.user_id, recruiter.nation, id);
    Ok((StatusCode::CREATED, Json(recruiter)))
}

async fn recruit(
    State(app_state): State<AppState>,
    Path(id): Path<ConsumerId>,
    Json(body): Json<RecruitRequest>,
) -> ApiResult<Json<RecruitView>> {
    let outcome = app_state
        .desk
        .recruit(body.user_id, id, body.count.unwrap_or(DEFAULT_BATCH))
        .await?;
    Ok(Json(RecruitView {
        nations: outcome.entries.iter().map(|e| e.name.clone()).collect(),
        entries: outcome.entries,
        cooldown_secs: outcome.cooldown.as_secs(),
        next_recruitment_at: outcome.next_recruitment_at,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lib_recruit::connections::{MemoryStore, RecruiterStore};
    use lib_recruit::retrieve::NsClientConfig;
    use lib_recruit::{CooldownPolicy, NationEvent, NsClient, QueueManager, Recruiter, RecruitmentDesk, StreamState};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use std::sync::Arc;
    use tokio::sync::RwLock;
    use url::Url;

    struct TestServer {
        base: String,
        http: reqwest::Client,
        queues: Arc<QueueManager>,
        store: Arc<MemoryStore>,
        shutdown: CancellationToken,
    }

    impl TestServer {
        fn url(&self, path: &str) -> String {
            format!("{}{}", self.base, path)
        }
    }

    async fn start() -> TestServer {
        let store = Arc::new(MemoryStore::new().with_consumer(7, ["home"]));
        let queues = Arc::new(QueueManager::new(store.clone()));
        queues.load().await.unwrap();
        let client =
            Arc::new(NsClient::new(NsClientConfig::new(Url::parse("http://127.0.0.1:9/").unwrap(), "tests")).unwrap());
        let desk = Arc::new(RecruitmentDesk::new(
            queues.clone(),
            store.clone(),
            client.clone(),
            CooldownPolicy::default(),
        ));
        let state = AppState::new(
            queues.clone(),
            desk,
            client,
            Arc::new(RwLock::new(StreamState::Streaming)),
        );

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let shutdown = CancellationToken::new();
        tokio::spawn(serve(listener, state, shutdown.clone()));

        TestServer {
            base,
            http: reqwest::Client::new(),
            queues,
            store,
            shutdown,
        }
    }

    fn found(queues: &QueueManager, nation: &str, region: &str) {
        queues.dispatch(&NationEvent::Founding {
            nation: nation.into(),
            region: region.into(),
            at: Utc::now(),
        });
    }

    #[tokio::test]
    async fn health_reports_stream_state() {
        let srv = start().await;
        let res = srv.http.get(srv.url("/health")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["stream"], "streaming");
        assert_eq!(body["consumers"], 1);
        srv.shutdown.cancel();
    }

    #[tokio::test]
    async fn consumer_registration_and_conflict() {
        let srv = start().await;
        let res = srv
            .http
            .post(srv.url("/consumers"))
            .json(&json!({ "id": 42, "whitelist": ["The South Pacific"] }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["whitelist"], json!(["the_south_pacific"]));

        let again = srv
            .http
            .post(srv.url("/consumers"))
            .json(&json!({ "id": 42 }))
            .send()
            .await
            .unwrap();
        assert_eq!(again.status(), 409);
        let body: Value = again.json().await.unwrap();
        assert_eq!(body["error_type"], "consumer_exists");

        let gone = srv.http.delete(srv.url("/consumers/42")).send().await.unwrap();
        assert_eq!(gone.status(), 204);
        let missing = srv.http.get(srv.url("/consumers/42/queue")).send().await.unwrap();
        assert_eq!(missing.status(), 404);
        srv.shutdown.cancel();
    }

    #[tokio::test]
    async fn dequeue_empty_then_filled() {
        let srv = start().await;
        let empty = srv.http.post(srv.url("/consumers/7/dequeue")).send().await.unwrap();
        assert_eq!(empty.status(), 204);

        found(&srv.queues, "first_land", "balder");
        found(&srv.queues, "second_land", "balder");
        found(&srv.queues, "homebody", "home");

        let view: Value = srv
            .http
            .get(srv.url("/consumers/7/queue"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(view["size"], 2);
        assert_eq!(view["nations"], json!(["second_land", "first_land"]));

        let res = srv.http.post(srv.url("/consumers/7/dequeue?count=1")).send().await.unwrap();
        assert_eq!(res.status(), 200);
        let entries: Vec<Entry> = res.json().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "second_land");
        srv.shutdown.cancel();
    }

    #[tokio::test]
    async fn whitelist_endpoints_update_store() {
        let srv = start().await;
        let res: Value = srv
            .http
            .post(srv.url("/consumers/7/whitelist/Lazarus"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(res["changed"], true);
        assert!(srv.store.consumer_regions(7).unwrap().contains("lazarus"));

        found(&srv.queues, "fresh_land", "balder");
        let res: Value = srv
            .http
            .post(srv.url("/whitelist/balder"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(res["changed"], true);
        assert_eq!(srv.queues.queue_size(7).unwrap(), 0);

        let list: Vec<String> = srv
            .http
            .get(srv.url("/whitelist"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(list, vec!["balder".to_string()]);

        let blank = srv.http.post(srv.url("/whitelist/%20")).send().await.unwrap();
        assert_eq!(blank.status(), 400);
        srv.shutdown.cancel();
    }

    #[tokio::test]
    async fn recruit_requires_registration_and_honours_cooldown() {
        let srv = start().await;
        let res = srv
            .http
            .post(srv.url("/consumers/7/recruit"))
            .json(&json!({ "user_id": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 403);

        srv.store
            .upsert_recruiter(&Recruiter {
                user_id: 1,
                consumer: 7,
                nation: "veteran".into(),
                founded_at: Utc::now() - chrono::Duration::days(400),
                next_recruitment_at: Utc::now() - chrono::Duration::seconds(1),
            })
            .await
            .unwrap();
        found(&srv.queues, "fresh_land", "balder");

        let res = srv
            .http
            .post(srv.url("/consumers/7/recruit"))
            .json(&json!({ "user_id": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["nations"], json!(["fresh_land"]));
        assert_eq!(body["cooldown_secs"], 5);

        let throttled = srv
            .http
            .post(srv.url("/consumers/7/recruit"))
            .json(&json!({ "user_id": 1 }))
            .send()
            .await
            .unwrap();
        assert_eq!(throttled.status(), 429);
        let wait: u64 = throttled.headers()[header::RETRY_AFTER]
            .to_str()
            .unwrap()
            .parse()
            .unwrap();
        assert!((1..=5).contains(&wait));
        srv.shutdown.cancel();
    }

    #[test]
    fn retry_after_rounds_up() {
        assert_eq!(ceil_secs(Duration::from_millis(1500)), 2);
        assert_eq!(ceil_secs(Duration::from_secs(3)), 3);
    }
}
