use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        Html, IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, RwLock};
use uuid::Uuid;

use crate::handlers::{MealCard, NutritionChatbot, PhotoAnalyzer, SelectedImage, ViewState};
use crate::models::ChatMessage;
use crate::services::{AIService, ImagePayload};

pub const MAX_SESSIONS: usize = 256;
pub const SESSION_IDLE_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

struct SessionEntry {
    bot: Arc<Mutex<NutritionChatbot>>,
    last_used: Instant,
}

impl SessionEntry {
    /// A reply is streaming; the entry must not be evicted.
    fn is_busy(&self) -> bool {
        self.bot.try_lock().is_err()
    }
}

pub struct AppState {
    pub ai: Arc<dyn AIService>,
    sessions: RwLock<HashMap<Uuid, SessionEntry>>,
    max_sessions: usize,
    idle_ttl: Duration,
}

impl AppState {
    pub fn new(ai: Arc<dyn AIService>) -> Self {
        Self::with_limits(ai, MAX_SESSIONS, SESSION_IDLE_TTL)
    }

    pub fn with_limits(ai: Arc<dyn AIService>, max_sessions: usize, idle_ttl: Duration) -> Self {
        Self {
            ai,
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_ttl,
        }
    }

    #[cfg(test)]
    async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn session(&self, id: Uuid) -> Option<Arc<Mutex<NutritionChatbot>>> {
        let mut sessions = self.sessions.write().await;
        let entry = sessions.get_mut(&id)?;
        entry.last_used = Instant::now();
        Some(entry.bot.clone())
    }

    /// Store a new session. Idle sessions past the TTL are swept first, then
    /// the least recently used idle ones go until there is room.
    async fn insert(&self, id: Uuid, bot: NutritionChatbot) {
        let mut sessions = self.sessions.write().await;
        let now = Instant::now();

        let before = sessions.len();
        sessions.retain(|_, entry| entry.is_busy() || now.duration_since(entry.last_used) < self.idle_ttl);
        if sessions.len() < before {
            log::info!("🧹 Swept {} idle chat sessions", before - sessions.len());
        }

        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .filter(|(_, entry)| !entry.is_busy())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| *id);
            match oldest {
                Some(oldest) => {
                    sessions.remove(&oldest);
                    log::info!("🧹 Evicted chat session {}", oldest);
                }
                None => {
                    log::warn!("⚠️ All {} chat sessions are streaming, going over the cap", sessions.len());
                    break;
                }
            }
        }

        sessions.insert(
            id,
            SessionEntry {
                bot: Arc::new(Mutex::new(bot)),
                last_used: now,
            },
        );
    }

    async fn remove(&self, id: Uuid) -> bool {
        self.sessions.write().await.remove(&id).is_some()
    }
}

pub fn create_router(ai: Arc<dyn AIService>) -> Router {
    router(Arc::new(AppState::new(ai)))
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/health", get(health_check))
        .route("/api/analyze", post(analyze_handler))
        .route("/api/analyze/upload", post(upload_handler))
        .route("/api/chat/sessions", post(create_session))
        .route("/api/chat/sessions/:id", get(get_session).delete(delete_session))
        .route("/api/chat/sessions/:id/messages", post(send_message))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeRequest {
    /// Image as a `data:` URL
    pub image: String,
}

#[derive(Debug, Serialize)]
struct AnalyzeResponse {
    #[serde(flatten)]
    state: ViewState,
    #[serde(skip_serializing_if = "Option::is_none")]
    card: Option<MealCard>,
}

#[derive(Debug, Serialize)]
struct SessionSnapshot {
    id: Uuid,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub message: String,
}

async fn index_page() -> Html<&'static str> {
    Html(include_str!("../static/index.html"))
}

async fn health_check() -> &'static str {
    "OK"
}

async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AnalyzeRequest>,
) -> Json<AnalyzeResponse> {
    log::info!("📸 Analysis requested ({} chars of image data)", request.image.len());

    Json(run_analysis(&state, SelectedImage::from_data_url(request.image)).await)
}

/// Raw image bytes in the body, MIME type from `Content-Type`.
async fn upload_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Json<AnalyzeResponse> {
    let mime_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(';').next())
        .unwrap_or_default()
        .trim();
    log::info!("📸 Upload analysis requested ({} bytes, {})", body.len(), mime_type);

    match ImagePayload::from_bytes(&body, mime_type) {
        Ok(payload) => Json(run_analysis(&state, SelectedImage::from_payload(&payload)).await),
        Err(e) => {
            log::warn!("⚠️ Rejected upload: {}", e);
            Json(AnalyzeResponse {
                state: ViewState::Failure { message: e.to_string() },
                card: None,
            })
        }
    }
}

async fn run_analysis(state: &AppState, image: SelectedImage) -> AnalyzeResponse {
    let mut analyzer = PhotoAnalyzer::new(state.ai.clone());
    analyzer.select_image(image);
    let view = analyzer.analyze().await.clone();

    let card = match &view {
        ViewState::Success { result } => Some(MealCard::from_result(result)),
        _ => None,
    };

    AnalyzeResponse { state: view, card }
}

async fn create_session(State(state): State<Arc<AppState>>) -> Json<SessionSnapshot> {
    let id = Uuid::new_v4();
    let bot = NutritionChatbot::new(state.ai.clone());
    let snapshot = SessionSnapshot {
        id,
        messages: bot.messages().to_vec(),
    };

    state.insert(id, bot).await;
    log::info!("✅ Chat session created: {}", id);

    Json(snapshot)
}

/// 409 while a reply is streaming into the transcript.
async fn get_session(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> Result<Json<SessionSnapshot>, StatusCode> {
    let bot = state.session(id).await.ok_or(StatusCode::NOT_FOUND)?;
    let bot = bot.try_lock().map_err(|_| StatusCode::CONFLICT)?;

    Ok(Json(SessionSnapshot {
        id,
        messages: bot.messages().to_vec(),
    }))
}

async fn delete_session(Path(id): Path<Uuid>, State(state): State<Arc<AppState>>) -> StatusCode {
    if state.remove(id).await {
        log::info!("🗑️ Chat session closed: {}", id);
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

async fn send_message(
    Path(id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    let Some(bot) = state.session(id).await else {
        return StatusCode::NOT_FOUND.into_response();
    };

    // one reply at a time per session
    let mut bot = match bot.try_lock_owned() {
        Ok(bot) => bot,
        Err(_) => {
            log::warn!("⚠️ Session {} is still streaming, rejecting message", id);
            return (StatusCode::CONFLICT, "A reply is still streaming").into_response();
        }
    };

    if request.message.trim().is_empty() {
        return StatusCode::NO_CONTENT.into_response();
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        let outcome = bot
            .send_message(&request.message, |msg| {
                match Event::default().event("message").json_data(msg) {
                    Ok(event) => {
                        let _ = tx.send(event);
                    }
                    Err(e) => log::error!("❌ Failed to encode chat event: {}", e),
                }
            })
            .await;
        drop(bot);

        log::debug!("💬 Session {} reply finished: {:?}", id, outcome);
        if let Ok(event) = Event::default().event("done").json_data(outcome) {
            let _ = tx.send(event);
        }
    });

    let stream = futures::stream::poll_fn(move |cx| {
        rx.poll_recv(cx).map(|event| event.map(Ok::<Event, Infallible>))
    });

    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}
