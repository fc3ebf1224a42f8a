use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, patch, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::session::{
        ActionAck, CategoryView, CreateSessionRequest, JoinSessionRequest, PlayerActionRequest,
        ReadyRequest, SessionSnapshot, UpdateSettingsRequest,
    },
    error::AppError,
    services::{member_service, session_service},
    state::SharedState,
};

/// Routes handling the session lifecycle and lobby membership.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions", post(create_session))
        .route("/sessions/join", post(join_session))
        .route("/sessions/code/{code}", get(resolve_code))
        .route("/sessions/{id}", get(session_snapshot))
        .route("/sessions/{id}/leave", post(leave_session))
        .route("/sessions/{id}/ready", post(set_ready))
        .route("/sessions/{id}/settings", patch(update_settings))
        .route("/sessions/{id}/start", post(start_session))
        .route("/sessions/{id}/rematch", post(rematch_session))
        .route("/categories", get(list_categories))
}

/// Open a new session lobby; the caller becomes host and first member.
#[utoipa::path(
    post,
    path = "/sessions",
    tag = "session",
    request_body = CreateSessionRequest,
    responses(
        (status = 200, description = "Session created", body = SessionSnapshot),
        (status = 400, description = "Invalid payload"),
        (status = 503, description = "Storage unavailable")
    )
)]
pub async fn create_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<CreateSessionRequest>>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::create_session(&state, payload).await?;
    Ok(Json(snapshot))
}

/// Join an open lobby by its shareable code.
#[utoipa::path(
    post,
    path = "/sessions/join",
    tag = "session",
    request_body = JoinSessionRequest,
    responses(
        (status = 200, description = "Seated in the lobby", body = SessionSnapshot),
        (status = 404, description = "No open session with this code")
    )
)]
pub async fn join_session(
    State(state): State<SharedState>,
    Valid(Json(payload)): Valid<Json<JoinSessionRequest>>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = member_service::join_by_code(&state, payload).await?;
    Ok(Json(snapshot))
}

/// Resolve a join code to the session it names, without joining.
#[utoipa::path(
    get,
    path = "/sessions/code/{code}",
    tag = "session",
    params(("code" = String, Path, description = "Shareable join code, case-insensitive")),
    responses(
        (status = 200, description = "Session found", body = SessionSnapshot),
        (status = 404, description = "No session with this code")
    )
)]
pub async fn resolve_code(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::resolve_by_code(&state, &code).await?;
    Ok(Json(snapshot))
}

/// Current full view of a session.
#[utoipa::path(
    get,
    path = "/sessions/{id}",
    tag = "session",
    params(("id" = Uuid, Path, description = "Session identifier")),
    responses(
        (status = 200, description = "Session snapshot", body = SessionSnapshot),
        (status = 404, description = "Unknown session")
    )
)]
pub async fn session_snapshot(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::snapshot(&state, id).await?;
    Ok(Json(snapshot))
}

/// Leave a session. When the host leaves the whole session is torn down.
#[utoipa::path(
    post,
    path = "/sessions/{id}/leave",
    tag = "session",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 200, description = "Left the session", body = ActionAck)
    )
)]
pub async fn leave_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlayerActionRequest>,
) -> Result<Json<ActionAck>, AppError> {
    member_service::leave(&state, id, payload.player_id).await?;
    Ok(Json(ActionAck::ok()))
}

/// Toggle the advisory lobby readiness flag.
#[utoipa::path(
    post,
    path = "/sessions/{id}/ready",
    tag = "session",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = ReadyRequest,
    responses(
        (status = 200, description = "Readiness recorded", body = ActionAck),
        (status = 409, description = "Session already left the lobby")
    )
)]
pub async fn set_ready(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ReadyRequest>,
) -> Result<Json<ActionAck>, AppError> {
    member_service::set_ready(&state, id, payload.player_id, payload.is_ready).await?;
    Ok(Json(ActionAck::ok()))
}

/// Replace the session rules; host-only, lobby-only.
#[utoipa::path(
    patch,
    path = "/sessions/{id}/settings",
    tag = "session",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = UpdateSettingsRequest,
    responses(
        (status = 200, description = "Settings replaced", body = SessionSnapshot),
        (status = 409, description = "Not the host, or the lobby already closed")
    )
)]
pub async fn update_settings(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<UpdateSettingsRequest>>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::update_settings(&state, id, payload).await?;
    Ok(Json(snapshot))
}

/// Close the lobby and start the first round; host-only.
#[utoipa::path(
    post,
    path = "/sessions/{id}/start",
    tag = "session",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 200, description = "First round started", body = SessionSnapshot),
        (status = 409, description = "Not the host, or too few players")
    )
)]
pub async fn start_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlayerActionRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::start(&state, id, payload.player_id).await?;
    Ok(Json(snapshot))
}

/// Open a fresh lobby from a finished session; host-only.
#[utoipa::path(
    post,
    path = "/sessions/{id}/rematch",
    tag = "session",
    params(("id" = Uuid, Path, description = "Finished session identifier")),
    request_body = PlayerActionRequest,
    responses(
        (status = 200, description = "Rematch lobby opened", body = SessionSnapshot),
        (status = 409, description = "Session has not finished")
    )
)]
pub async fn rematch_session(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<PlayerActionRequest>,
) -> Result<Json<SessionSnapshot>, AppError> {
    let snapshot = session_service::rematch(&state, id, payload.player_id).await?;
    Ok(Json(snapshot))
}

/// Catalog of categories sessions can play.
#[utoipa::path(
    get,
    path = "/categories",
    tag = "session",
    responses(
        (status = 200, description = "Category catalog", body = [CategoryView])
    )
)]
pub async fn list_categories(
    State(state): State<SharedState>,
) -> Result<Json<Vec<CategoryView>>, AppError> {
    let categories = session_service::list_categories(&state).await?;
    Ok(Json(categories))
}
