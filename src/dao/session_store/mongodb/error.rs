use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};
use thiserror::Error;
use uuid::Uuid;

pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Server error code for a unique-index violation.
const DUPLICATE_KEY_CODE: i32 = 11000;

fn is_duplicate_key(err: &MongoError) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(write_error))
            if write_error.code == DUPLICATE_KEY_CODE
    )
}

#[derive(Debug, Error)]
pub enum MongoDaoError {
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    #[error("missing environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    #[error("failed to insert session with code `{code}`")]
    InsertSession {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to load session `{id}`")]
    LoadSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to look up session by code `{code}`")]
    FindByCode {
        code: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to update session `{id}`")]
    UpdateSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to delete session `{id}`")]
    DeleteSession {
        id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write member `{player_id}` of session `{session_id}`")]
    WriteMember {
        session_id: Uuid,
        player_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list members of session `{session_id}`")]
    ListMembers {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write answer of player `{player_id}` in session `{session_id}`")]
    WriteAnswer {
        session_id: Uuid,
        player_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list answers of session `{session_id}`")]
    ListAnswers {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write completion of player `{player_id}` in session `{session_id}`")]
    WriteCompletion {
        session_id: Uuid,
        player_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to list completions of session `{session_id}`")]
    ListCompletions {
        session_id: Uuid,
        #[source]
        source: MongoError,
    },
    #[error("failed to write category `{name}`")]
    WriteCategory {
        name: String,
        #[source]
        source: MongoError,
    },
    #[error("failed to list categories")]
    ListCategories {
        #[source]
        source: MongoError,
    },
}

impl MongoDaoError {
    /// Subject of the unique key this error violated, when it is a
    /// duplicate-key rejection rather than an outage.
    pub fn duplicate_subject(&self) -> Option<&'static str> {
        let (subject, source) = match self {
            MongoDaoError::InsertSession { source, .. } => ("session code", source),
            MongoDaoError::WriteMember { source, .. } => ("member", source),
            MongoDaoError::WriteAnswer { source, .. } => ("answer", source),
            MongoDaoError::WriteCompletion { source, .. } => ("completion", source),
            MongoDaoError::WriteCategory { source, .. } => ("category", source),
            _ => return None,
        };
        is_duplicate_key(source).then_some(subject)
    }
}
