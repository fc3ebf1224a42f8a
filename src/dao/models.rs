use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Lobby: players join, the host tweaks settings, nobody plays yet.
    Waiting,
    /// A round is active with a letter and a running deadline.
    Playing,
    /// All rounds played; only a rematch can follow.
    Finished,
}

impl SessionStatus {
    /// Whether the session can never leave this status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Finished)
    }
}

/// Tunable per-session rules, fixed once the session leaves the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SessionSettings {
    /// Number of rounds played before the session finishes.
    pub max_rounds: u32,
    /// Full round duration in seconds, measured from the round start.
    pub round_time_limit_secs: u32,
    /// Grace window in seconds granted to everyone once STOP is called.
    pub stop_countdown_secs: u32,
}

/// Session row persisted by the storage layer.
///
/// `version` increases by exactly one on every write; the store rejects any
/// update whose version is not the successor of the stored one, so concurrent
/// writers resolve to a single winner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Short shareable join code, stored uppercase, unique across sessions.
    pub code: String,
    /// Player that created the session. Always a member; leaving tears the
    /// session down for everyone.
    pub host_id: Uuid,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// 1-based round counter; 0 while the session is waiting.
    pub current_round: u32,
    /// Letter of the active round. Present exactly while `status` is playing.
    pub current_letter: Option<char>,
    /// Letters consumed by past and current rounds; never repeated until the
    /// alphabet is exhausted.
    pub used_letters: Vec<char>,
    /// Ordered category ids played each round. At least three.
    pub categories: Vec<Uuid>,
    /// Rules applied to every round of this session.
    pub settings: SessionSettings,
    /// Instant the active round started.
    pub round_started_at: Option<OffsetDateTime>,
    /// Authoritative deadline of the active round. Clients derive the
    /// remaining time by subtracting their clock from this value.
    pub round_ends_at: Option<OffsetDateTime>,
    /// Player that armed the STOP countdown for the current round.
    pub stopped_by: Option<Uuid>,
    /// Monotonic write counter used for optimistic concurrency and for
    /// clients to discard stale events.
    pub version: u64,
    /// Creation timestamp for auditing/debugging.
    pub created_at: OffsetDateTime,
    /// Last time this row was written.
    pub updated_at: OffsetDateTime,
}

impl SessionEntity {
    /// Prepare this row for a compare-and-set write: bump the version and
    /// refresh the update timestamp.
    pub fn touch(&mut self) {
        self.version += 1;
        self.updated_at = OffsetDateTime::now_utc();
    }
}

/// Membership row linking a player to a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberEntity {
    /// Session this membership belongs to.
    pub session_id: Uuid,
    /// Player identity, unique within the session.
    pub player_id: Uuid,
    /// Display name chosen by the player.
    pub display_name: String,
    /// Cumulative score, recomputed from scored answers after every round.
    pub score: u32,
    /// Lobby readiness flag; advisory, only meaningful while waiting.
    pub is_ready: bool,
    /// When the player joined.
    pub joined_at: OffsetDateTime,
}

/// One submitted answer for a category in a round.
///
/// Unique per `(session, player, round, category)`; a second insert for the
/// same tuple fails with a duplicate error so submission stays exactly-once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerEntity {
    /// Session the answer belongs to.
    pub session_id: Uuid,
    /// Player that submitted the answer.
    pub player_id: Uuid,
    /// Round the answer was submitted in.
    pub round_number: u32,
    /// Category the answer fills.
    pub category_id: Uuid,
    /// Raw submitted text; empty when the player left the field blank.
    pub answer_text: String,
    /// Points awarded by the scoring pass; 0 until scored.
    pub points: u32,
    /// Whether no other player submitted the same normalized answer.
    pub is_unique: bool,
}

/// Marker recording that a player's answers for a round are final.
///
/// Unique per `(session, player, round)`. Round completion is detected by
/// counting these markers against the live member count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionEntity {
    /// Session the marker belongs to.
    pub session_id: Uuid,
    /// Player whose answers are final.
    pub player_id: Uuid,
    /// Round the marker closes for this player.
    pub round_number: u32,
    /// When the answers were locked in.
    pub completed_at: OffsetDateTime,
}

/// Category catalog entry, seeded from configuration at store install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryEntity {
    /// Stable identifier referenced by session rows.
    pub id: Uuid,
    /// Human readable category name, unique in the catalog.
    pub name: String,
}
