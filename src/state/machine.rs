use thiserror::Error;

use crate::dao::models::SessionStatus;

/// Minimum live members a session needs before leaving the lobby.
pub const MIN_PLAYERS_TO_START: usize = 2;
/// Minimum number of categories a session plays each round.
pub const MIN_SESSION_CATEGORIES: usize = 3;

/// Events that drive a session's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Host starts the first round from the lobby.
    Start,
    /// A scored round rolls over into the next one.
    AdvanceRound,
    /// The last configured round was scored.
    Finish,
}

/// Error returned when attempting to apply an invalid transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {from:?}")]
pub struct InvalidTransition {
    /// The status the session was in when the invalid event was received.
    pub from: SessionStatus,
    /// The event that cannot be applied from this status.
    pub event: SessionEvent,
}

/// Compute the status a session moves to when `event` is applied in `from`.
///
/// The table is deliberately pure; callers persist the result through the
/// versioned session row, so a lost write never leaves the machine in a
/// status it could not have reached.
pub fn transition(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    match (from, event) {
        (SessionStatus::Waiting, SessionEvent::Start) => Ok(SessionStatus::Playing),
        (SessionStatus::Playing, SessionEvent::AdvanceRound) => Ok(SessionStatus::Playing),
        (SessionStatus::Playing, SessionEvent::Finish) => Ok(SessionStatus::Finished),
        (from, event) => Err(InvalidTransition { from, event }),
    }
}

/// Event produced by scoring the round `current_round` out of `max_rounds`.
pub fn completion_event(current_round: u32, max_rounds: u32) -> SessionEvent {
    if current_round >= max_rounds {
        SessionEvent::Finish
    } else {
        SessionEvent::AdvanceRound
    }
}
