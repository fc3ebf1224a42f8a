use mongodb::bson::{Binary, DateTime, Document, doc, spec::BinarySubtype};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::dao::models::{
    AnswerEntity, CategoryEntity, CompletionEntity, MemberEntity, SessionEntity, SessionSettings,
    SessionStatus,
};

fn to_bson_time(value: OffsetDateTime) -> DateTime {
    DateTime::from_system_time(value.into())
}

fn from_bson_time(value: DateTime) -> OffsetDateTime {
    value.to_system_time().into()
}

/// Session row as stored in the `sessions` collection.
///
/// `version` is persisted as a signed integer because BSON has no unsigned
/// type; it backs the compare-and-set filter on every update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    code: String,
    host_id: Uuid,
    status: SessionStatus,
    current_round: u32,
    current_letter: Option<char>,
    used_letters: Vec<char>,
    categories: Vec<Uuid>,
    settings: SessionSettings,
    round_started_at: Option<DateTime>,
    round_ends_at: Option<DateTime>,
    stopped_by: Option<Uuid>,
    version: i64,
    created_at: DateTime,
    updated_at: DateTime,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id,
            code: value.code,
            host_id: value.host_id,
            status: value.status,
            current_round: value.current_round,
            current_letter: value.current_letter,
            used_letters: value.used_letters,
            categories: value.categories,
            settings: value.settings,
            round_started_at: value.round_started_at.map(to_bson_time),
            round_ends_at: value.round_ends_at.map(to_bson_time),
            stopped_by: value.stopped_by,
            version: value.version as i64,
            created_at: to_bson_time(value.created_at),
            updated_at: to_bson_time(value.updated_at),
        }
    }
}

impl From<MongoSessionDocument> for SessionEntity {
    fn from(value: MongoSessionDocument) -> Self {
        Self {
            id: value.id,
            code: value.code,
            host_id: value.host_id,
            status: value.status,
            current_round: value.current_round,
            current_letter: value.current_letter,
            used_letters: value.used_letters,
            categories: value.categories,
            settings: value.settings,
            round_started_at: value.round_started_at.map(from_bson_time),
            round_ends_at: value.round_ends_at.map(from_bson_time),
            stopped_by: value.stopped_by,
            version: value.version as u64,
            created_at: from_bson_time(value.created_at),
            updated_at: from_bson_time(value.updated_at),
        }
    }
}

/// Membership row, keyed by the `(session_id, player_id)` unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoMemberDocument {
    session_id: Uuid,
    player_id: Uuid,
    display_name: String,
    score: u32,
    is_ready: bool,
    joined_at: DateTime,
}

impl From<MemberEntity> for MongoMemberDocument {
    fn from(value: MemberEntity) -> Self {
        Self {
            session_id: value.session_id,
            player_id: value.player_id,
            display_name: value.display_name,
            score: value.score,
            is_ready: value.is_ready,
            joined_at: to_bson_time(value.joined_at),
        }
    }
}

impl From<MongoMemberDocument> for MemberEntity {
    fn from(value: MongoMemberDocument) -> Self {
        Self {
            session_id: value.session_id,
            player_id: value.player_id,
            display_name: value.display_name,
            score: value.score,
            is_ready: value.is_ready,
            joined_at: from_bson_time(value.joined_at),
        }
    }
}

/// Answer row, keyed by the four-field submission unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    session_id: Uuid,
    player_id: Uuid,
    round_number: u32,
    category_id: Uuid,
    answer_text: String,
    points: u32,
    is_unique: bool,
}

impl From<AnswerEntity> for MongoAnswerDocument {
    fn from(value: AnswerEntity) -> Self {
        Self {
            session_id: value.session_id,
            player_id: value.player_id,
            round_number: value.round_number,
            category_id: value.category_id,
            answer_text: value.answer_text,
            points: value.points,
            is_unique: value.is_unique,
        }
    }
}

impl From<MongoAnswerDocument> for AnswerEntity {
    fn from(value: MongoAnswerDocument) -> Self {
        Self {
            session_id: value.session_id,
            player_id: value.player_id,
            round_number: value.round_number,
            category_id: value.category_id,
            answer_text: value.answer_text,
            points: value.points,
            is_unique: value.is_unique,
        }
    }
}

/// Completion marker row, keyed by the `(session, player, round)` unique index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCompletionDocument {
    session_id: Uuid,
    player_id: Uuid,
    round_number: u32,
    completed_at: DateTime,
}

impl From<CompletionEntity> for MongoCompletionDocument {
    fn from(value: CompletionEntity) -> Self {
        Self {
            session_id: value.session_id,
            player_id: value.player_id,
            round_number: value.round_number,
            completed_at: to_bson_time(value.completed_at),
        }
    }
}

impl From<MongoCompletionDocument> for CompletionEntity {
    fn from(value: MongoCompletionDocument) -> Self {
        Self {
            session_id: value.session_id,
            player_id: value.player_id,
            round_number: value.round_number,
            completed_at: from_bson_time(value.completed_at),
        }
    }
}

/// Category catalog row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoCategoryDocument {
    #[serde(rename = "_id")]
    id: Uuid,
    name: String,
}

impl From<CategoryEntity> for MongoCategoryDocument {
    fn from(value: CategoryEntity) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

impl From<MongoCategoryDocument> for CategoryEntity {
    fn from(value: MongoCategoryDocument) -> Self {
        Self {
            id: value.id,
            name: value.name,
        }
    }
}

pub fn uuid_as_binary(id: Uuid) -> Binary {
    Binary {
        subtype: BinarySubtype::Uuid,
        bytes: id.into_bytes().to_vec(),
    }
}

pub fn doc_id(id: Uuid) -> Document {
    doc! {"_id": uuid_as_binary(id)}
}

pub fn member_key(session_id: Uuid, player_id: Uuid) -> Document {
    doc! {
        "session_id": uuid_as_binary(session_id),
        "player_id": uuid_as_binary(player_id),
    }
}

pub fn answer_key(answer: &AnswerEntity) -> Document {
    doc! {
        "session_id": uuid_as_binary(answer.session_id),
        "player_id": uuid_as_binary(answer.player_id),
        "round_number": answer.round_number as i64,
        "category_id": uuid_as_binary(answer.category_id),
    }
}
