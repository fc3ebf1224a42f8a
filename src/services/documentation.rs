use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Basta Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::session::create_session,
        crate::routes::session::join_session,
        crate::routes::session::resolve_code,
        crate::routes::session::session_snapshot,
        crate::routes::session::leave_session,
        crate::routes::session::set_ready,
        crate::routes::session::update_settings,
        crate::routes::session::start_session,
        crate::routes::session::rematch_session,
        crate::routes::session::list_categories,
        crate::routes::round::submit_answers,
        crate::routes::round::call_stop,
        crate::routes::round::round_results,
        crate::routes::sse::session_events,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::session::CreateSessionRequest,
            crate::dto::session::SettingsInput,
            crate::dto::session::JoinSessionRequest,
            crate::dto::session::PlayerActionRequest,
            crate::dto::session::ReadyRequest,
            crate::dto::session::UpdateSettingsRequest,
            crate::dto::session::SessionSnapshot,
            crate::dto::session::MemberView,
            crate::dto::session::CategoryView,
            crate::dto::session::ActionAck,
            crate::dto::round::SubmitAnswersRequest,
            crate::dto::round::AnswerInput,
            crate::dto::round::StopRequest,
            crate::dto::round::AnswerView,
            crate::dto::round::RoundResultsView,
            crate::dto::round::ScoreEntry,
            crate::dto::sse::MemberJoinedEvent,
            crate::dto::sse::MemberLeftEvent,
            crate::dto::sse::MemberUpdatedEvent,
            crate::dto::sse::PlayerCompletedEvent,
            crate::dto::sse::RoundStartedEvent,
            crate::dto::sse::StopCalledEvent,
            crate::dto::sse::RoundScoredEvent,
            crate::dto::sse::SessionFinishedEvent,
            crate::dto::sse::SessionClosedEvent,
            crate::dto::sse::SessionRematchEvent,
            crate::dto::ws::PlayerInboundMessage,
            crate::dto::ws::PlayerOutboundMessage,
            crate::dao::models::SessionStatus,
            crate::dao::models::SessionSettings,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "session", description = "Session lifecycle and lobby membership"),
        (name = "round", description = "In-round actions: answers, STOP, results"),
        (name = "sse", description = "Server-sent events streams"),
    )
)]
pub struct ApiDoc;
