use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::dao::models::{AnswerEntity, MemberEntity};

/// Payload locking in a player's answers for the current round.
///
/// Entries already buffered as drafts over the WebSocket may be omitted; an
/// explicit entry here wins over the buffered draft for the same category.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct SubmitAnswersRequest {
    pub player_id: Uuid,
    #[serde(default)]
    #[validate(nested)]
    pub answers: Vec<AnswerInput>,
}

/// One answer text for one category of the active round.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct AnswerInput {
    pub category_id: Uuid,
    #[validate(length(max = 64))]
    pub text: String,
}

/// Payload arming the STOP countdown.
#[derive(Debug, Deserialize, ToSchema)]
pub struct StopRequest {
    pub player_id: Uuid,
}

/// One scored answer as exposed to clients.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct AnswerView {
    pub player_id: Uuid,
    pub category_id: Uuid,
    pub text: String,
    pub points: u32,
    pub is_unique: bool,
}

impl From<AnswerEntity> for AnswerView {
    fn from(value: AnswerEntity) -> Self {
        Self {
            player_id: value.player_id,
            category_id: value.category_id,
            text: value.answer_text,
            points: value.points,
            is_unique: value.is_unique,
        }
    }
}

/// Answers of one played round.
#[derive(Debug, Serialize, ToSchema)]
pub struct RoundResultsView {
    pub round_number: u32,
    /// Letter the round was played with, when it is known.
    pub letter: Option<String>,
    pub answers: Vec<AnswerView>,
}

/// One scoreboard line.
#[derive(Clone, Debug, Serialize, ToSchema)]
pub struct ScoreEntry {
    pub player_id: Uuid,
    pub display_name: String,
    pub score: u32,
}

impl From<MemberEntity> for ScoreEntry {
    fn from(value: MemberEntity) -> Self {
        Self {
            player_id: value.player_id,
            display_name: value.display_name,
            score: value.score,
        }
    }
}

/// Project members into a scoreboard ordered by descending score, ties
/// broken by display name so the order is stable.
pub fn scoreboard(members: Vec<MemberEntity>) -> Vec<ScoreEntry> {
    let mut entries: Vec<ScoreEntry> = members.into_iter().map(Into::into).collect();
    entries.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then_with(|| a.display_name.cmp(&b.display_name))
    });
    entries
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn member(name: &str, score: u32) -> MemberEntity {
        MemberEntity {
            session_id: Uuid::new_v4(),
            player_id: Uuid::new_v4(),
            display_name: name.into(),
            score,
            is_ready: true,
            joined_at: OffsetDateTime::now_utc(),
        }
    }

    #[test]
    fn scoreboard_orders_by_score_then_name() {
        let entries = scoreboard(vec![
            member("leo", 20),
            member("ana", 45),
            member("bea", 20),
        ]);
        let names: Vec<&str> = entries.iter().map(|e| e.display_name.as_str()).collect();
        assert_eq!(names, ["ana", "bea", "leo"]);
    }
}
