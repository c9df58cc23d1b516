use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, oneshot};
use tokio::time::{Duration, sleep};

pub const PATH_HEALTH: &str = "/api/health";
pub const PATH_TRAVEL_PLANS: &str = "/api/travel-plans";
pub const PATH_TRAVEL_PLAN: &str = "/api/travel-plans/{id}";
pub const PATH_PLAN_LOCATIONS: &str = "/api/travel-plans/{id}/locations";
pub const PATH_SLOW: &str = "/api/slow";
pub const PATH_STATUS: &str = "/api/status/{code}";

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    requests_total: Arc<AtomicU64>,
    plans_created: Arc<AtomicU64>,
    conflicts: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_requests_total(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn requests_total(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn plans_created(&self) -> u64 {
        self.plans_created.load(Ordering::Relaxed)
    }

    pub fn conflicts(&self) -> u64 {
        self.conflicts.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TravelPlan {
    #[serde(default)]
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub start_date: String,
    pub end_date: String,
    #[serde(default)]
    pub budget: f64,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub version: u64,
}

impl TravelPlan {
    fn is_valid(&self) -> bool {
        !self.title.trim().is_empty() && self.start_date <= self.end_date
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub id: u64,
    #[serde(default)]
    pub travel_plan_id: u64,
    pub name: String,
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub budget: f64,
}

#[derive(Debug, Default)]
struct Store {
    plans: HashMap<u64, TravelPlan>,
    locations: HashMap<u64, Vec<Location>>,
}

#[derive(Debug, Clone, Default)]
struct AppState {
    stats: TestServerStats,
    store: Arc<Mutex<Store>>,
    next_id: Arc<AtomicU64>,
}

impl AppState {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

fn error(status: StatusCode, message: &str) -> Response {
    (status, Json(serde_json::json!({ "error": message }))).into_response()
}

async fn handle_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.stats.inc_requests_total();
    Json(serde_json::json!({ "status": "ok" }))
}

async fn handle_create_plan(State(state): State<AppState>, body: Bytes) -> Response {
    state.stats.inc_requests_total();

    let mut plan: TravelPlan = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return error(StatusCode::BAD_REQUEST, "invalid json"),
    };
    if !plan.is_valid() {
        return error(StatusCode::BAD_REQUEST, "invalid travel plan");
    }

    plan.id = state.next_id();
    plan.version = 1;
    state.store.lock().await.plans.insert(plan.id, plan.clone());
    state.stats.plans_created.fetch_add(1, Ordering::Relaxed);

    (StatusCode::CREATED, Json(plan)).into_response()
}

async fn handle_list_plans(State(state): State<AppState>) -> Json<Vec<TravelPlan>> {
    state.stats.inc_requests_total();
    let store = state.store.lock().await;
    let mut plans: Vec<TravelPlan> = store.plans.values().cloned().collect();
    plans.sort_by_key(|p| p.id);
    Json(plans)
}

async fn handle_get_plan(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    state.stats.inc_requests_total();
    match state.store.lock().await.plans.get(&id) {
        Some(plan) => Json(plan.clone()).into_response(),
        None => error(StatusCode::NOT_FOUND, "travel plan not found"),
    }
}

async fn handle_update_plan(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Response {
    state.stats.inc_requests_total();

    let update: TravelPlan = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return error(StatusCode::BAD_REQUEST, "invalid json"),
    };
    if !update.is_valid() {
        return error(StatusCode::BAD_REQUEST, "invalid travel plan");
    }

    let mut store = state.store.lock().await;
    let Some(current) = store.plans.get_mut(&id) else {
        return error(StatusCode::NOT_FOUND, "travel plan not found");
    };
    // Optimistic locking: the client must send the version it read.
    if update.version != current.version {
        state.stats.conflicts.fetch_add(1, Ordering::Relaxed);
        return error(StatusCode::CONFLICT, "version conflict");
    }

    *current = TravelPlan {
        id,
        version: current.version + 1,
        ..update
    };
    Json(current.clone()).into_response()
}

async fn handle_delete_plan(State(state): State<AppState>, Path(id): Path<u64>) -> StatusCode {
    state.stats.inc_requests_total();
    let mut store = state.store.lock().await;
    if store.plans.remove(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    store.locations.remove(&id);
    StatusCode::NO_CONTENT
}

async fn handle_add_location(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    body: Bytes,
) -> Response {
    state.stats.inc_requests_total();

    let mut location: Location = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(_) => return error(StatusCode::BAD_REQUEST, "invalid json"),
    };

    let mut store = state.store.lock().await;
    if !store.plans.contains_key(&id) {
        return error(StatusCode::NOT_FOUND, "travel plan not found");
    }
    location.id = state.next_id();
    location.travel_plan_id = id;
    store.locations.entry(id).or_default().push(location.clone());

    (StatusCode::CREATED, Json(location)).into_response()
}

async fn handle_list_locations(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    state.stats.inc_requests_total();
    let store = state.store.lock().await;
    if !store.plans.contains_key(&id) {
        return error(StatusCode::NOT_FOUND, "travel plan not found");
    }
    Json(store.locations.get(&id).cloned().unwrap_or_default()).into_response()
}

#[derive(Debug, Deserialize)]
struct SlowQuery {
    ms: Option<u64>,
}

async fn handle_slow(State(state): State<AppState>, Query(q): Query<SlowQuery>) -> &'static str {
    state.stats.inc_requests_total();
    sleep(Duration::from_millis(q.ms.unwrap_or(50))).await;
    "slow"
}

async fn handle_status(State(state): State<AppState>, Path(code): Path<u16>) -> StatusCode {
    state.stats.inc_requests_total();
    StatusCode::from_u16(code).unwrap_or(StatusCode::BAD_REQUEST)
}

pub fn router(stats: TestServerStats) -> Router {
    let state = AppState {
        stats,
        ..AppState::default()
    };
    Router::new()
        .route(PATH_HEALTH, get(handle_health))
        .route(
            PATH_TRAVEL_PLANS,
            get(handle_list_plans).post(handle_create_plan),
        )
        .route(
            PATH_TRAVEL_PLAN,
            get(handle_get_plan)
                .put(handle_update_plan)
                .delete(handle_delete_plan),
        )
        .route(
            PATH_PLAN_LOCATIONS,
            get(handle_list_locations).post(handle_add_location),
        )
        .route(PATH_SLOW, get(handle_slow))
        .route(PATH_STATUS, get(handle_status))
        .with_state(state)
}

/// Travel-plans API on an ephemeral local port, for end-to-end tests.
pub struct TestServer {
    addr: SocketAddr,
    base_url: String,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let stats = TestServerStats::default();
        let app = router(stats.clone());

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let serve = axum::serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            });
            let _ = serve.await;
        });

        Ok(Self {
            addr,
            base_url: format!("http://{addr}"),
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// `base_url` plus the `/api` prefix every route lives under.
    pub fn api_url(&self) -> String {
        format!("{}/api", self.base_url)
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}
