use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dto::sse::{
        MemberJoinedEvent, MemberLeftEvent, MemberUpdatedEvent, PlayerCompletedEvent,
        RoundScoredEvent, RoundStartedEvent, ServerEvent, SessionClosedEvent,
        SessionFinishedEvent, SessionRematchEvent, StopCalledEvent,
    },
    dto::{round::ScoreEntry, session::MemberView},
    state::SseHub,
};

/// Event name of the full-state snapshot sent first on every SSE attach.
pub const EVENT_SNAPSHOT: &str = "snapshot";
const EVENT_MEMBER_JOINED: &str = "member.joined";
const EVENT_MEMBER_LEFT: &str = "member.left";
const EVENT_MEMBER_UPDATED: &str = "member.updated";
const EVENT_PLAYER_COMPLETED: &str = "player.completed";
const EVENT_ROUND_STARTED: &str = "round.started";
const EVENT_STOP_CALLED: &str = "stop.called";
const EVENT_ROUND_SCORED: &str = "round.scored";
const EVENT_SESSION_FINISHED: &str = "session.finished";
const EVENT_SESSION_CLOSED: &str = "session.closed";
const EVENT_SESSION_REMATCH: &str = "session.rematch";

/// Broadcast the current full session snapshot.
pub fn broadcast_snapshot(hub: &SseHub, snapshot: &impl Serialize) {
    send(hub, EVENT_SNAPSHOT, snapshot);
}

/// Broadcast that a player joined the lobby.
pub fn broadcast_member_joined(hub: &SseHub, member: MemberView) {
    send(hub, EVENT_MEMBER_JOINED, &MemberJoinedEvent { member });
}

/// Broadcast that a player left or was removed.
pub fn broadcast_member_left(hub: &SseHub, player_id: Uuid) {
    send(hub, EVENT_MEMBER_LEFT, &MemberLeftEvent { player_id });
}

/// Broadcast a readiness or score change.
pub fn broadcast_member_updated(hub: &SseHub, member: MemberView) {
    send(hub, EVENT_MEMBER_UPDATED, &MemberUpdatedEvent { member });
}

/// Broadcast that a player locked in their answers for the round.
pub fn broadcast_player_completed(
    hub: &SseHub,
    player_id: Uuid,
    round_number: u32,
    completed: usize,
    total: usize,
) {
    send(
        hub,
        EVENT_PLAYER_COMPLETED,
        &PlayerCompletedEvent {
            player_id,
            round_number,
            completed,
            total,
        },
    );
}

/// Broadcast the start of a round.
pub fn broadcast_round_started(hub: &SseHub, payload: &RoundStartedEvent) {
    send(hub, EVENT_ROUND_STARTED, payload);
}

/// Broadcast that the STOP countdown was armed.
pub fn broadcast_stop_called(hub: &SseHub, payload: &StopCalledEvent) {
    send(hub, EVENT_STOP_CALLED, payload);
}

/// Broadcast the results of a scored round.
pub fn broadcast_round_scored(hub: &SseHub, payload: &RoundScoredEvent) {
    send(hub, EVENT_ROUND_SCORED, payload);
}

/// Broadcast that the final round has been scored.
pub fn broadcast_session_finished(hub: &SseHub, scoreboard: Vec<ScoreEntry>, version: u64) {
    send(
        hub,
        EVENT_SESSION_FINISHED,
        &SessionFinishedEvent { scoreboard, version },
    );
}

/// Broadcast that the session is gone; the stream closes right after.
pub fn broadcast_session_closed(hub: &SseHub, reason: &str) {
    send(
        hub,
        EVENT_SESSION_CLOSED,
        &SessionClosedEvent {
            reason: reason.to_string(),
        },
    );
}

/// Broadcast the successor session of a rematch.
pub fn broadcast_rematch(hub: &SseHub, payload: &SessionRematchEvent) {
    send(hub, EVENT_SESSION_REMATCH, payload);
}

fn send(hub: &SseHub, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => hub.broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
