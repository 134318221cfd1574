use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use uuid::Uuid;

use crate::db::Db;
use crate::error::ReviewError;
use crate::models::{DeckSummary, Grade, NewDeck};
use crate::session::{Direction, ReviewEngine, Session, SessionView, Summary};

/// How long an untouched session is kept around.
#[derive(Debug, Clone, Copy)]
pub struct SessionExpiry {
    pub idle: Duration,
    /// Applies instead of `idle` once every card has been graded.
    pub completed: Duration,
}

impl Default for SessionExpiry {
    fn default() -> Self {
        Self {
            idle: Duration::minutes(120),
            completed: Duration::minutes(10),
        }
    }
}

impl SessionExpiry {
    fn is_expired(&self, entry: &SessionEntry, now: DateTime<Utc>) -> bool {
        let ttl = if entry.session.is_completed() {
            self.completed
        } else {
            self.idle
        };
        now - entry.last_access > ttl
    }
}

pub struct SessionEntry {
    pub session: Session,
    pub last_access: DateTime<Utc>,
}

#[derive(Clone)]
pub struct ApiState {
    pub db: Db,
    pub engine: Arc<ReviewEngine>,
    pub sessions: Arc<Mutex<HashMap<Uuid, SessionEntry>>>,
    pub expiry: SessionExpiry,
}

impl ApiState {
    pub fn new(db: Db, engine: ReviewEngine) -> Self {
        Self {
            db,
            engine: Arc::new(engine),
            sessions: Arc::new(Mutex::new(HashMap::new())),
            expiry: SessionExpiry::default(),
        }
    }

    pub fn with_expiry(mut self, expiry: SessionExpiry) -> Self {
        self.expiry = expiry;
        self
    }
}

/// Drops sessions past their expiry.
fn evict_expired(
    sessions: &mut HashMap<Uuid, SessionEntry>,
    expiry: &SessionExpiry,
    now: DateTime<Utc>,
) {
    let before = sessions.len();
    sessions.retain(|_, entry| !expiry.is_expired(entry, now));
    let evicted = before - sessions.len();
    if evicted > 0 {
        debug!("Evicted {} expired sessions", evicted);
    }
}

pub fn app_router(state: ApiState) -> Router {
    Router::new()
        .route("/api/decks", get(list_decks).post(import_deck))
        .route("/api/sessions", post(start_session))
        .route("/api/sessions/:id", get(get_session).delete(close_session))
        .route("/api/sessions/:id/reveal", post(reveal))
        .route("/api/sessions/:id/grade", post(grade))
        .route("/api/sessions/:id/advance", post(advance))
        .route("/api/sessions/:id/shuffle", post(shuffle))
        .route("/api/sessions/:id/restart", post(restart))
        .route("/api/sessions/:id/summary", get(summary))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug)]
pub enum ApiError {
    Review(ReviewError),
    SessionNotFound(Uuid),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<ReviewError> for ApiError {
    fn from(e: ReviewError) -> Self {
        ApiError::Review(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        ApiError::Internal(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Review(e @ ReviewError::NotFound(_)) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
            ApiError::Review(e) => {
                // Callers should never be able to trigger these.
                error!("Rejected session operation: {}", e);
                (StatusCode::CONFLICT, e.to_string())
            }
            ApiError::SessionNotFound(id) => {
                (StatusCode::NOT_FOUND, format!("session '{}' not found", id))
            }
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(e) => {
                error!("Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

/// Runs `op` against a stored session and marks it as used.
async fn with_session<T>(
    state: &ApiState,
    id: Uuid,
    op: impl FnOnce(&ReviewEngine, &mut Session) -> Result<T, ReviewError>,
) -> Result<T, ApiError> {
    let now = state.engine.now();
    let mut sessions = state.sessions.lock().await;
    evict_expired(&mut sessions, &state.expiry, now);

    let entry = sessions.get_mut(&id).ok_or(ApiError::SessionNotFound(id))?;
    entry.last_access = now;
    Ok(op(&state.engine, &mut entry.session)?)
}

async fn list_decks(State(state): State<ApiState>) -> Result<Json<Vec<DeckSummary>>, ApiError> {
    Ok(Json(state.db.list_decks().await?))
}

#[derive(Serialize)]
struct ImportResponse {
    id: String,
    card_count: usize,
}

async fn import_deck(
    State(state): State<ApiState>,
    Json(payload): Json<NewDeck>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.title.trim().is_empty() {
        return Err(ApiError::BadRequest("deck title must not be empty".to_string()));
    }
    if payload.flashcards.is_empty() {
        return Err(ApiError::BadRequest("deck has no flashcards".to_string()));
    }

    let deck = state.db.import_deck(payload, state.engine.config()).await?;
    Ok((
        StatusCode::CREATED,
        Json(ImportResponse {
            id: deck.id,
            card_count: deck.cards.len(),
        }),
    ))
}

#[derive(Deserialize)]
struct StartRequest {
    deck_id: String,
    order: Option<Vec<String>>,
}

#[derive(Serialize)]
struct StartResponse {
    session_id: Uuid,
    view: SessionView,
}

async fn start_session(
    State(state): State<ApiState>,
    Json(payload): Json<StartRequest>,
) -> Result<Json<StartResponse>, ApiError> {
    let session = state
        .engine
        .start_from_source(&state.db, &payload.deck_id, payload.order.as_deref())
        .await?;

    let session_id = Uuid::new_v4();
    let view = state.engine.view(&session);
    let now = state.engine.now();
    let mut sessions = state.sessions.lock().await;
    evict_expired(&mut sessions, &state.expiry, now);
    sessions.insert(
        session_id,
        SessionEntry {
            session,
            last_access: now,
        },
    );
    drop(sessions);
    info!("Session {} opened on deck {}", session_id, payload.deck_id);

    Ok(Json(StartResponse { session_id, view }))
}

async fn get_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_session(&state, id, |engine, session| Ok(engine.view(session)))
        .await
        .map(Json)
}

async fn close_session(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    let mut sessions = state.sessions.lock().await;
    evict_expired(&mut sessions, &state.expiry, state.engine.now());
    sessions.remove(&id).ok_or(ApiError::SessionNotFound(id))?;
    info!("Session {} closed", id);
    Ok(StatusCode::NO_CONTENT)
}

async fn reveal(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_session(&state, id, |engine, session| {
        engine.reveal(session)?;
        Ok(engine.view(session))
    })
    .await
    .map(Json)
}

#[derive(Deserialize)]
struct GradeRequest {
    grade: Grade,
}

#[derive(Serialize)]
struct GradeResponse {
    view: SessionView,
    card_id: String,
    new_interval: u32,
    next_review: DateTime<Utc>,
    warning: Option<String>,
}

async fn grade(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<GradeRequest>,
) -> Result<Json<GradeResponse>, ApiError> {
    with_session(&state, id, |engine, session| {
        let outcome = engine.grade(session, payload.grade)?;
        Ok(GradeResponse {
            view: engine.view(session),
            card_id: outcome.card.id,
            new_interval: outcome.card.interval,
            next_review: outcome.card.next_review,
            warning: outcome.warning.map(|w| w.to_string()),
        })
    })
    .await
    .map(Json)
}

#[derive(Deserialize)]
struct AdvanceRequest {
    direction: Direction,
}

async fn advance(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdvanceRequest>,
) -> Result<Json<SessionView>, ApiError> {
    with_session(&state, id, |engine, session| {
        engine.advance(session, payload.direction)?;
        Ok(engine.view(session))
    })
    .await
    .map(Json)
}

async fn shuffle(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_session(&state, id, |engine, session| {
        engine.shuffle(session, &mut rand::thread_rng());
        Ok(engine.view(session))
    })
    .await
    .map(Json)
}

async fn restart(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionView>, ApiError> {
    with_session(&state, id, |engine, session| {
        engine.restart(session);
        Ok(engine.view(session))
    })
    .await
    .map(Json)
}

async fn summary(
    State(state): State<ApiState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Summary>, ApiError> {
    with_session(&state, id, |engine, session| Ok(engine.summary(session)))
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::SchedulingConfig;
    use crate::data::{DEMO_CARDS, DEMO_DECK_ID};
    use crate::persistence::RecordingSink;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    struct TestApp {
        router: Router,
        sink: Arc<RecordingSink>,
        clock: Arc<ManualClock>,
    }

    async fn test_app() -> TestApp {
        let db = Db::in_memory().await.unwrap();
        db.seed_database_if_empty().await.unwrap();
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = ReviewEngine::new(SchedulingConfig::default(), clock.clone(), sink.clone());
        TestApp {
            router: app_router(ApiState::new(db, engine)),
            sink,
            clock,
        }
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            })
            .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }

    async fn start(app: &Router) -> String {
        let body = json!({ "deck_id": DEMO_DECK_ID });
        let (status, body) = send(app, "POST", "/api/sessions", Some(body)).await;
        assert_eq!(status, StatusCode::OK);
        body["session_id"].as_str().unwrap().to_string()
    }

    async fn reveal_and_grade(app: &Router, base: &str, grade: &str) -> (StatusCode, Value) {
        let (status, _) = send(app, "POST", &format!("{}/reveal", base), None).await;
        assert_eq!(status, StatusCode::OK);
        let body = json!({ "grade": grade });
        send(app, "POST", &format!("{}/grade", base), Some(body)).await
    }

    #[tokio::test]
    async fn test_list_decks() {
        let app = test_app().await.router;
        let (status, body) = send(&app, "GET", "/api/decks", None).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["id"], DEMO_DECK_ID);
        assert_eq!(body[0]["card_count"], DEMO_CARDS.len());
        assert_eq!(body[0]["due_count"], DEMO_CARDS.len());
    }

    #[tokio::test]
    async fn test_full_review_flow() {
        let TestApp {
            router: app, sink, ..
        } = test_app().await;
        let id = start(&app).await;
        let base = format!("/api/sessions/{}", id);

        let good = json!({ "grade": "good" });
        let (status, body) = send(&app, "POST", &format!("{}/grade", base), Some(good)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().unwrap().contains("not been revealed"));

        for _ in 0..DEMO_CARDS.len() {
            let (status, view) = send(&app, "POST", &format!("{}/reveal", base), None).await;
            assert_eq!(status, StatusCode::OK);
            assert!(view["current_card"]["back"].is_string());

            let medium = json!({ "grade": "medium" });
            let (status, body) =
                send(&app, "POST", &format!("{}/grade", base), Some(medium)).await;
            assert_eq!(status, StatusCode::OK);
            assert!(body["warning"].is_null());
        }

        let (_, view) = send(&app, "GET", &base, None).await;
        assert_eq!(view["completed"], true);
        assert_eq!(view["stats"]["studied"], DEMO_CARDS.len());

        let (status, summary) = send(&app, "GET", &format!("{}/summary", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(summary["accuracy"], 100);
        assert_eq!(summary["cards_studied"], DEMO_CARDS.len());

        assert_eq!(sink.updates().len(), DEMO_CARDS.len());
    }

    #[tokio::test]
    async fn test_navigation_endpoints() {
        let app = test_app().await.router;
        let id = start(&app).await;
        let base = format!("/api/sessions/{}", id);

        let next = json!({ "direction": "next" });
        let (status, view) = send(&app, "POST", &format!("{}/advance", base), Some(next)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["cursor"], 1);

        let (status, view) = send(&app, "POST", &format!("{}/shuffle", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["cursor"], 0);
        assert_eq!(view["total"], DEMO_CARDS.len());

        let (status, view) = send(&app, "POST", &format!("{}/restart", base), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["current_card"]["id"], "f1");
        assert_eq!(view["stats"]["studied"], 0);
    }

    #[tokio::test]
    async fn test_missing_deck_and_session() {
        let app = test_app().await.router;

        let body = json!({ "deck_id": "nope" });
        let (status, body) = send(&app, "POST", "/api/sessions", Some(body)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "deck 'nope' not found");

        let uri = format!("/api/sessions/{}", Uuid::new_v4());
        let (status, _) = send(&app, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_close_session() {
        let app = test_app().await.router;
        let base = format!("/api/sessions/{}", start(&app).await);

        let (status, body) = send(&app, "DELETE", &base, None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert!(body.is_null());

        let (status, _) = send(&app, "GET", &base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &base, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_idle_session_expires() {
        let TestApp {
            router: app, clock, ..
        } = test_app().await;
        let active = format!("/api/sessions/{}", start(&app).await);
        let idle = format!("/api/sessions/{}", start(&app).await);

        clock.advance(Duration::minutes(90));
        let (status, _) = send(&app, "GET", &active, None).await;
        assert_eq!(status, StatusCode::OK);

        // 121 minutes since the idle session was last used, 31 for the other
        clock.advance(Duration::minutes(31));
        let (status, _) = send(&app, "GET", &idle, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "GET", &active, None).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_completed_session_expires_sooner() {
        let TestApp {
            router: app, clock, ..
        } = test_app().await;
        let done = format!("/api/sessions/{}", start(&app).await);
        let open = format!("/api/sessions/{}", start(&app).await);

        for _ in 0..DEMO_CARDS.len() {
            let (status, _) = reveal_and_grade(&app, &done, "good").await;
            assert_eq!(status, StatusCode::OK);
        }
        let (status, _) = reveal_and_grade(&app, &open, "good").await;
        assert_eq!(status, StatusCode::OK);

        clock.advance(Duration::minutes(11));
        let (status, _) = send(&app, "GET", &format!("{}/summary", done), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, view) = send(&app, "GET", &open, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["completed"], false);
    }

    #[tokio::test]
    async fn test_import_deck() {
        let app = test_app().await.router;

        let payload = json!({
            "title": "Chemistry",
            "subject": "Science",
            "flashcards": [
                { "term": "Atom", "definition": "Smallest unit of an element" },
                { "term": "Ion", "definition": "A charged atom or molecule" }
            ]
        });
        let (status, body) = send(&app, "POST", "/api/decks", Some(payload)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["card_count"], 2);

        let start = json!({ "deck_id": body["id"] });
        let (status, started) = send(&app, "POST", "/api/sessions", Some(start)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(started["view"]["deck_title"], "Chemistry");

        let empty = json!({ "title": " ", "flashcards": [] });
        let (status, _) = send(&app, "POST", "/api/decks", Some(empty)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, decks) = send(&app, "GET", "/api/decks", None).await;
        assert_eq!(decks.as_array().unwrap().len(), 2);
    }
}
