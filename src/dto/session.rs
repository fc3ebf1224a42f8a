use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use time::OffsetDateTime;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::{
    dao::models::{
        CategoryEntity, CompletionEntity, MemberEntity, SessionEntity, SessionSettings,
        SessionStatus,
    },
    dto::{format_timestamp, validation::validate_join_code},
    state::machine::MIN_SESSION_CATEGORIES,
};

/// Payload used to open a brand-new session lobby.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Identity of the creating player; becomes the host and first member.
    pub host_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub display_name: String,
    /// Catalog categories to play. When omitted, the backend picks its
    /// configured default selection.
    #[serde(default)]
    #[validate(custom(function = validate_category_selection))]
    pub category_ids: Option<Vec<Uuid>>,
    #[serde(default)]
    #[validate(nested)]
    pub settings: Option<SettingsInput>,
}

/// Incoming session rules override.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SettingsInput {
    #[validate(range(min = 1, max = 50))]
    pub max_rounds: u32,
    #[validate(range(min = 10, max = 600))]
    pub round_time_limit_secs: u32,
    #[validate(range(min = 3, max = 60))]
    pub stop_countdown_secs: u32,
}

impl From<SettingsInput> for SessionSettings {
    fn from(value: SettingsInput) -> Self {
        Self {
            max_rounds: value.max_rounds,
            round_time_limit_secs: value.round_time_limit_secs,
            stop_countdown_secs: value.stop_countdown_secs,
        }
    }
}

/// Payload used to join an existing lobby by its shareable code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    #[validate(custom(function = validate_join_code))]
    pub code: String,
    pub player_id: Uuid,
    #[validate(length(min = 1, max = 32))]
    pub display_name: String,
}

/// Payload identifying the acting player for membership operations.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlayerActionRequest {
    pub player_id: Uuid,
}

/// Payload toggling the lobby readiness flag.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReadyRequest {
    pub player_id: Uuid,
    pub is_ready: bool,
}

/// Payload replacing the session rules while the lobby is open.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct UpdateSettingsRequest {
    /// Acting player; only the host may change the rules.
    pub player_id: Uuid,
    #[validate(nested)]
    pub settings: SettingsInput,
}

/// Public projection of one session member.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct MemberView {
    pub player_id: Uuid,
    pub display_name: String,
    pub score: u32,
    pub is_ready: bool,
    pub is_host: bool,
    /// Whether this member already locked in answers for the current round.
    pub has_completed_round: bool,
}

/// Catalog category as exposed to clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct CategoryView {
    pub id: Uuid,
    pub name: String,
}

impl From<CategoryEntity> for CategoryView {
    fn from(value: CategoryEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

/// Full client-facing view of a session.
///
/// This is the payload of the `snapshot` SSE event and of every session
/// read. `version` lets a client that just reconnected discard any buffered
/// event older than the snapshot it received.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub code: String,
    pub host_id: Uuid,
    pub status: SessionStatus,
    /// 1-based round counter; 0 while the session is waiting.
    pub current_round: u32,
    pub settings: SessionSettings,
    /// Letter of the active round, absent outside of play.
    pub current_letter: Option<String>,
    pub used_letters: Vec<String>,
    pub categories: Vec<CategoryView>,
    /// RFC 3339 instant the active round started.
    pub round_started_at: Option<String>,
    /// RFC 3339 deadline of the active round. Authoritative; clients derive
    /// their countdown from it rather than from a local timer.
    pub round_ends_at: Option<String>,
    /// Convenience remaining time, clamped to zero, for clients without a
    /// reliable clock.
    pub round_time_remaining_secs: Option<u64>,
    /// Player that armed the STOP countdown for this round.
    pub stopped_by: Option<Uuid>,
    pub version: u64,
    pub members: Vec<MemberView>,
}

impl SessionSnapshot {
    /// Project a session row and its satellite rows into the client view.
    pub fn assemble(
        session: SessionEntity,
        members: Vec<MemberEntity>,
        completions: &[CompletionEntity],
        categories: Vec<CategoryView>,
    ) -> Self {
        let member_views = members
            .into_iter()
            .map(|member| MemberView {
                is_host: member.player_id == session.host_id,
                has_completed_round: completions
                    .iter()
                    .any(|c| c.player_id == member.player_id),
                player_id: member.player_id,
                display_name: member.display_name,
                score: member.score,
                is_ready: member.is_ready,
            })
            .collect();

        let round_time_remaining_secs = match (session.status, session.round_ends_at) {
            (SessionStatus::Playing, Some(ends_at)) => {
                Some((ends_at - OffsetDateTime::now_utc()).whole_seconds().max(0) as u64)
            }
            _ => None,
        };

        Self {
            id: session.id,
            code: session.code,
            host_id: session.host_id,
            status: session.status,
            current_round: session.current_round,
            settings: session.settings,
            current_letter: session.current_letter.map(|letter| letter.to_string()),
            used_letters: session
                .used_letters
                .iter()
                .map(|letter| letter.to_string())
                .collect(),
            categories,
            round_started_at: session.round_started_at.map(format_timestamp),
            round_ends_at: session.round_ends_at.map(format_timestamp),
            round_time_remaining_secs,
            stopped_by: session.stopped_by,
            version: session.version,
            members: member_views,
        }
    }
}

/// Minimal acknowledgement for operations with nothing else to return.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionAck {
    /// Outcome marker, always "ok" on the success path.
    pub status: String,
}

impl ActionAck {
    /// Acknowledgement for a completed operation.
    pub fn ok() -> Self {
        Self {
            status: "ok".to_string(),
        }
    }
}

fn validate_category_selection(ids: &Vec<Uuid>) -> Result<(), ValidationError> {
    if ids.len() < MIN_SESSION_CATEGORIES {
        let mut err = ValidationError::new("category_count");
        err.message = Some(
            format!("A session needs at least {MIN_SESSION_CATEGORIES} categories").into(),
        );
        return Err(err);
    }

    let mut seen = HashSet::new();
    if !ids.iter().all(|id| seen.insert(*id)) {
        let mut err = ValidationError::new("category_duplicates");
        err.message = Some("Category selection contains duplicates".into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_session() -> SessionEntity {
        let now = OffsetDateTime::now_utc();
        SessionEntity {
            id: Uuid::new_v4(),
            code: "K7PW2".into(),
            host_id: Uuid::new_v4(),
            status: SessionStatus::Waiting,
            current_round: 0,
            current_letter: None,
            used_letters: Vec::new(),
            categories: Vec::new(),
            settings: SessionSettings {
                max_rounds: 5,
                round_time_limit_secs: 60,
                stop_countdown_secs: 10,
            },
            round_started_at: None,
            round_ends_at: None,
            stopped_by: None,
            version: 3,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn snapshot_marks_the_host_and_completed_members() {
        let mut session = base_session();
        session.status = SessionStatus::Playing;
        session.current_round = 2;
        let host = MemberEntity {
            session_id: session.id,
            player_id: session.host_id,
            display_name: "ana".into(),
            score: 30,
            is_ready: true,
            joined_at: OffsetDateTime::now_utc(),
        };
        let guest = MemberEntity {
            session_id: session.id,
            player_id: Uuid::new_v4(),
            display_name: "leo".into(),
            score: 10,
            is_ready: true,
            joined_at: OffsetDateTime::now_utc(),
        };
        let completions = vec![CompletionEntity {
            session_id: session.id,
            player_id: guest.player_id,
            round_number: 2,
            completed_at: OffsetDateTime::now_utc(),
        }];

        let snapshot =
            SessionSnapshot::assemble(session, vec![host.clone(), guest.clone()], &completions, vec![]);

        let host_view = snapshot
            .members
            .iter()
            .find(|m| m.player_id == host.player_id)
            .unwrap();
        assert!(host_view.is_host);
        assert!(!host_view.has_completed_round);

        let guest_view = snapshot
            .members
            .iter()
            .find(|m| m.player_id == guest.player_id)
            .unwrap();
        assert!(!guest_view.is_host);
        assert!(guest_view.has_completed_round);
    }

    #[test]
    fn remaining_time_is_clamped_and_absent_outside_play() {
        let mut session = base_session();
        session.status = SessionStatus::Playing;
        session.round_ends_at = Some(OffsetDateTime::now_utc() - time::Duration::seconds(30));
        let snapshot = SessionSnapshot::assemble(session, vec![], &[], vec![]);
        assert_eq!(snapshot.round_time_remaining_secs, Some(0));

        let idle = SessionSnapshot::assemble(base_session(), vec![], &[], vec![]);
        assert_eq!(idle.round_time_remaining_secs, None);
        assert_eq!(idle.round_ends_at, None);
    }

    #[test]
    fn category_selection_rejects_short_and_duplicated_lists() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let c = Uuid::new_v4();
        assert!(validate_category_selection(&vec![a, b]).is_err());
        assert!(validate_category_selection(&vec![a, b, a]).is_err());
        assert!(validate_category_selection(&vec![a, b, c]).is_ok());
    }
}
