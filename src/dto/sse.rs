use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dto::{
    round::{AnswerView, ScoreEntry},
    session::MemberView,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across a session's SSE channel.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player joins the lobby.
pub struct MemberJoinedEvent {
    pub member: MemberView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player leaves or is removed.
pub struct MemberLeftEvent {
    pub player_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a member's readiness or score changes.
pub struct MemberUpdatedEvent {
    pub member: MemberView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player locks in their answers for the round.
pub struct PlayerCompletedEvent {
    pub player_id: Uuid,
    pub round_number: u32,
    /// Players that have locked in so far.
    pub completed: usize,
    /// Current member count the round waits for.
    pub total: usize,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a round begins, carrying everything needed to render it.
pub struct RoundStartedEvent {
    pub round_number: u32,
    pub letter: String,
    /// RFC 3339 instant the round started.
    pub round_started_at: String,
    /// RFC 3339 authoritative deadline of the round.
    pub round_ends_at: String,
    /// Session version after the transition; stale-event guard for clients.
    pub version: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when a player calls STOP and the shared countdown is armed.
pub struct StopCalledEvent {
    pub stopped_by: Uuid,
    /// RFC 3339 deadline shortened by the countdown.
    pub round_ends_at: String,
    pub version: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast once a round has been scored, before the next one starts.
pub struct RoundScoredEvent {
    pub round_number: u32,
    pub letter: Option<String>,
    pub answers: Vec<AnswerView>,
    pub scoreboard: Vec<ScoreEntry>,
    pub version: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the final round has been scored.
pub struct SessionFinishedEvent {
    pub scoreboard: Vec<ScoreEntry>,
    pub version: u64,
}

#[derive(Debug, Serialize, ToSchema)]
/// Terminal event: the session is gone and the stream is about to close.
pub struct SessionClosedEvent {
    /// Human-readable reason, e.g. the host left.
    pub reason: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast on a finished session when the host opens a rematch lobby.
pub struct SessionRematchEvent {
    pub next_session_id: Uuid,
    pub next_code: String,
}
