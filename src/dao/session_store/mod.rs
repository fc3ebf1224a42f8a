pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::changes::ChangeEvent;
use crate::dao::models::{
    AnswerEntity, CategoryEntity, CompletionEntity, MemberEntity, SessionEntity,
};
use crate::dao::storage::StorageResult;

/// Abstraction over the persistence layer for sessions and everything scoped
/// to them.
///
/// Write semantics shared by all backends:
/// - `insert_*` fails with [`StorageError::Duplicate`] when the row's unique
///   key already exists (session code, membership, answer tuple, completion
///   marker).
/// - `update_session` is a compare-and-set: the incoming row must carry the
///   successor of the stored version, otherwise it fails with
///   [`StorageError::Precondition`] and writes nothing.
/// - every successful write is published on the session's change feed.
///
/// [`StorageError::Duplicate`]: crate::dao::storage::StorageError::Duplicate
/// [`StorageError::Precondition`]: crate::dao::storage::StorageError::Precondition
pub trait SessionStore: Send + Sync {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn fetch_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<SessionEntity>>;
    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn update_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>>;
    /// Delete the session and cascade to its members, answers, and completion
    /// markers. Returns whether a session row existed.
    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>>;

    fn insert_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn fetch_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<MemberEntity>>;
    fn update_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn delete_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>>;
    fn list_members(&self, session_id: Uuid)
    -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>>;
    fn count_members(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<usize>>;

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Overwrite the scoring fields of an existing answer row.
    fn update_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn list_round_answers(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;
    fn list_session_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>>;

    fn insert_completion(
        &self,
        completion: CompletionEntity,
    ) -> BoxFuture<'static, StorageResult<()>>;
    fn list_completions(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<CompletionEntity>>>;
    fn count_completions(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<usize>>;

    /// Insert catalog entries for any of `names` not present yet, keeping the
    /// ids of existing entries stable. Returns the full catalog.
    fn seed_categories(
        &self,
        names: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<CategoryEntity>>>;
    fn list_categories(&self) -> BoxFuture<'static, StorageResult<Vec<CategoryEntity>>>;

    /// Subscribe to the change feed of one session. Subscription itself never
    /// fails; consumers must start with a store read because only events
    /// published after this call are delivered.
    fn watch_session(&self, session_id: Uuid) -> broadcast::Receiver<ChangeEvent>;

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
