use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use axum_valid::Valid;
use uuid::Uuid;

use crate::{
    dto::round::{RoundResultsView, StopRequest, SubmitAnswersRequest},
    dto::session::ActionAck,
    error::AppError,
    services::{round_service, stop_service},
    state::SharedState,
};

/// Routes handling in-round actions and round reads.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sessions/{id}/answers", post(submit_answers))
        .route("/sessions/{id}/stop", post(call_stop))
        .route("/sessions/{id}/rounds/{round}", get(round_results))
}

/// Lock in the caller's answers for the current round, exactly once.
#[utoipa::path(
    post,
    path = "/sessions/{id}/answers",
    tag = "round",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = SubmitAnswersRequest,
    responses(
        (status = 200, description = "Answers locked in", body = ActionAck),
        (status = 409, description = "No round is active")
    )
)]
pub async fn submit_answers(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Valid(Json(payload)): Valid<Json<SubmitAnswersRequest>>,
) -> Result<Json<ActionAck>, AppError> {
    round_service::submit_answers(&state, id, payload.player_id, payload.answers).await?;
    Ok(Json(ActionAck::ok()))
}

/// Arm the shared STOP countdown for the current round.
#[utoipa::path(
    post,
    path = "/sessions/{id}/stop",
    tag = "round",
    params(("id" = Uuid, Path, description = "Session identifier")),
    request_body = StopRequest,
    responses(
        (status = 200, description = "Countdown armed (or already running)", body = ActionAck),
        (status = 409, description = "Caller has unfilled categories, or the countdown would lengthen the round")
    )
)]
pub async fn call_stop(
    State(state): State<SharedState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<StopRequest>,
) -> Result<Json<ActionAck>, AppError> {
    stop_service::call_stop(&state, id, payload.player_id).await?;
    Ok(Json(ActionAck::ok()))
}

/// Scored answers of one round of the session.
#[utoipa::path(
    get,
    path = "/sessions/{id}/rounds/{round}",
    tag = "round",
    params(
        ("id" = Uuid, Path, description = "Session identifier"),
        ("round" = u32, Path, description = "1-based round number")
    ),
    responses(
        (status = 200, description = "Round answers", body = RoundResultsView),
        (status = 404, description = "Round has not been played")
    )
)]
pub async fn round_results(
    State(state): State<SharedState>,
    Path((id, round)): Path<(Uuid, u32)>,
) -> Result<Json<RoundResultsView>, AppError> {
    let results = round_service::round_results(&state, id, round).await?;
    Ok(Json(results))
}
