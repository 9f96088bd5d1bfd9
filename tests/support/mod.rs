use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use axum::{
    extract::{Query, Request, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use uuid::Uuid;

const FILTER_COLUMNS: [&str; 2] = ["id", "user_id"];

/// Password every fake account accepts.
pub const PASSWORD: &str = "secret";
const TOKEN_PREFIX: &str = "token-";

/// In-process stand-in for the hosted `drafts` table, speaking just enough of
/// the PostgREST dialect for the remote draft service. It also signs users in:
/// `alice@example.com` gets the token `token-alice` and the user id `alice`.
#[derive(Clone, Default)]
pub struct FakeDraftsTable {
    rows: Arc<Mutex<Vec<Value>>>,
    failing: Arc<AtomicBool>,
}

impl FakeDraftsTable {
    pub async fn spawn() -> (Self, SocketAddr) {
        let table = Self::default();
        let app = Router::new()
            .route(
                "/rest/v1/drafts",
                get(select).post(insert).patch(update).delete(remove),
            )
            .route("/auth/v1/token", post(sign_in))
            .route("/auth/v1/user", get(current_user))
            .layer(middleware::from_fn_with_state(table.clone(), refuse_when_failing))
            .with_state(table.clone());
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fake backend");
        let addr = listener.local_addr().expect("fake backend addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("serve fake backend");
        });
        (table, addr)
    }

    pub fn row_count(&self) -> usize {
        self.rows.lock().expect("rows lock").len()
    }

    /// From now on every request is answered with a 500.
    pub fn fail_every_request(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

/// An address nothing listens on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind throwaway port");
    listener.local_addr().expect("throwaway addr")
}

async fn refuse_when_failing(
    State(table): State<FakeDraftsTable>,
    request: Request,
    next: Next,
) -> Response {
    if table.failing.load(Ordering::SeqCst) {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "upstream unavailable" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn sign_in(Json(grant): Json<Value>) -> Response {
    let email = grant["email"].as_str().unwrap_or_default();
    let user = email.split('@').next().unwrap_or_default();
    if user.is_empty() || grant["password"].as_str() != Some(PASSWORD) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "invalid_grant" })),
        )
            .into_response();
    }
    Json(json!({
        "access_token": format!("{TOKEN_PREFIX}{user}"),
        "token_type": "bearer",
        "user": { "id": user, "email": email },
    }))
    .into_response()
}

async fn current_user(headers: HeaderMap) -> Response {
    let user = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .and_then(|token| token.strip_prefix(TOKEN_PREFIX));
    match user {
        Some(user) => Json(json!({ "id": user, "email": format!("{user}@example.com") })).into_response(),
        None => StatusCode::UNAUTHORIZED.into_response(),
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn matches(row: &Value, params: &HashMap<String, String>) -> bool {
    FILTER_COLUMNS.iter().all(|column| match params.get(*column) {
        Some(filter) => {
            let expected = filter.strip_prefix("eq.").unwrap_or(filter);
            row[*column].as_str() == Some(expected)
        }
        None => true,
    })
}

async fn select(
    State(table): State<FakeDraftsTable>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let rows = table.rows.lock().expect("rows lock");
    let mut found: Vec<Value> = rows
        .iter()
        .filter(|row| matches(row, &params))
        .cloned()
        .collect();
    if params.get("order").map(String::as_str) == Some("updated_at.desc") {
        found.sort_by(|a, b| b["updated_at"].as_str().cmp(&a["updated_at"].as_str()));
    }
    Json(found)
}

async fn insert(
    State(table): State<FakeDraftsTable>,
    Json(mut row): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let named = row
        .get("name")
        .and_then(Value::as_str)
        .map_or(false, |name| !name.trim().is_empty());
    if !named || row.get("user_id").is_none() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "code": "23502",
                "message": "null value in column \"name\" violates not-null constraint"
            })),
        );
    }
    let stamp = now();
    row["id"] = json!(Uuid::new_v4().to_string());
    row["created_at"] = json!(stamp);
    row["updated_at"] = json!(stamp);
    table.rows.lock().expect("rows lock").push(row.clone());
    (StatusCode::CREATED, Json(json!([row])))
}

async fn update(
    State(table): State<FakeDraftsTable>,
    Query(params): Query<HashMap<String, String>>,
    Json(patch): Json<Value>,
) -> Json<Vec<Value>> {
    let mut rows = table.rows.lock().expect("rows lock");
    let mut updated = Vec::new();
    for row in rows.iter_mut().filter(|row| matches(row, &params)) {
        if let Some(fields) = patch.as_object() {
            for (key, value) in fields {
                row[key.as_str()] = value.clone();
            }
        }
        if patch.get("updated_at").is_none() {
            row["updated_at"] = json!(now());
        }
        updated.push(row.clone());
    }
    Json(updated)
}

async fn remove(
    State(table): State<FakeDraftsTable>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Vec<Value>> {
    let mut rows = table.rows.lock().expect("rows lock");
    let (removed, kept): (Vec<Value>, Vec<Value>) =
        rows.drain(..).partition(|row| matches(row, &params));
    *rows = kept;
    Json(removed)
}
