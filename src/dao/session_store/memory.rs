use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use crate::dao::changes::{ChangeEvent, ChangeFeed, RowData, TableKind};
use crate::dao::models::{
    AnswerEntity, CategoryEntity, CompletionEntity, MemberEntity, SessionEntity,
};
use crate::dao::session_store::SessionStore;
use crate::dao::storage::{StorageError, StorageResult};

/// Every table behind one lock, so unique-key checks and cascades are atomic.
#[derive(Default)]
struct Tables {
    sessions: HashMap<Uuid, SessionEntity>,
    members: BTreeMap<(Uuid, Uuid), MemberEntity>,
    answers: BTreeMap<(Uuid, Uuid, u32, Uuid), AnswerEntity>,
    completions: BTreeMap<(Uuid, Uuid, u32), CompletionEntity>,
    categories: IndexMap<Uuid, CategoryEntity>,
}

struct MemoryInner {
    tables: RwLock<Tables>,
    feed: ChangeFeed,
}

/// In-process storage backend.
///
/// Default backend when the service runs without a database, and the fixture
/// every service test runs against. Change events are published in commit
/// order, while the table lock is still held.
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

impl MemorySessionStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MemoryInner {
                tables: RwLock::new(Tables::default()),
                feed: ChangeFeed::new(),
            }),
        }
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore for MemorySessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            if tables.sessions.contains_key(&session.id) {
                return Err(StorageError::duplicate("session id"));
            }
            if tables.sessions.values().any(|s| s.code == session.code) {
                return Err(StorageError::duplicate("session code"));
            }
            let event =
                ChangeEvent::inserted(TableKind::Sessions, RowData::Session(session.clone()));
            let session_id = session.id;
            tables.sessions.insert(session_id, session);
            inner.feed.publish(session_id, event);
            Ok(())
        })
    }

    fn fetch_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            tables
                .sessions
                .get(&id)
                .cloned()
                .ok_or_else(|| StorageError::not_found("session"))
        })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables.sessions.values().find(|s| s.code == code).cloned())
        })
    }

    fn update_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let stored = tables
                .sessions
                .get_mut(&session.id)
                .ok_or_else(|| StorageError::not_found("session"))?;
            if session.version != stored.version + 1 {
                return Err(StorageError::precondition("session version"));
            }
            let old = stored.clone();
            *stored = session.clone();
            let event = ChangeEvent::updated(
                TableKind::Sessions,
                Some(RowData::Session(old)),
                RowData::Session(session.clone()),
            );
            inner.feed.publish(session.id, event);
            Ok(session)
        })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let Some(old) = tables.sessions.remove(&id) else {
                return Ok(false);
            };
            tables.members.retain(|key, _| key.0 != id);
            tables.answers.retain(|key, _| key.0 != id);
            tables.completions.retain(|key, _| key.0 != id);
            inner
                .feed
                .publish(id, ChangeEvent::deleted(TableKind::Sessions, RowData::Session(old)));
            drop(tables);
            inner.feed.remove(id);
            Ok(true)
        })
    }

    fn insert_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let key = (member.session_id, member.player_id);
            if tables.members.contains_key(&key) {
                return Err(StorageError::duplicate("member"));
            }
            let event = ChangeEvent::inserted(TableKind::Members, RowData::Member(member.clone()));
            tables.members.insert(key, member.clone());
            inner.feed.publish(member.session_id, event);
            Ok(())
        })
    }

    fn fetch_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<MemberEntity>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            tables
                .members
                .get(&(session_id, player_id))
                .cloned()
                .ok_or_else(|| StorageError::not_found("member"))
        })
    }

    fn update_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let key = (member.session_id, member.player_id);
            let stored = tables
                .members
                .get_mut(&key)
                .ok_or_else(|| StorageError::not_found("member"))?;
            let old = stored.clone();
            *stored = member.clone();
            let event = ChangeEvent::updated(
                TableKind::Members,
                Some(RowData::Member(old)),
                RowData::Member(member.clone()),
            );
            inner.feed.publish(member.session_id, event);
            Ok(())
        })
    }

    fn delete_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let Some(old) = tables.members.remove(&(session_id, player_id)) else {
                return Ok(false);
            };
            inner
                .feed
                .publish(session_id, ChangeEvent::deleted(TableKind::Members, RowData::Member(old)));
            Ok(true)
        })
    }

    fn list_members(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            let mut members: Vec<MemberEntity> = tables
                .members
                .values()
                .filter(|m| m.session_id == session_id)
                .cloned()
                .collect();
            members.sort_by_key(|m| (m.joined_at, m.player_id));
            Ok(members)
        })
    }

    fn count_members(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<usize>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .members
                .values()
                .filter(|m| m.session_id == session_id)
                .count())
        })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let key = (
                answer.session_id,
                answer.player_id,
                answer.round_number,
                answer.category_id,
            );
            if tables.answers.contains_key(&key) {
                return Err(StorageError::duplicate("answer"));
            }
            let event =
                ChangeEvent::inserted(TableKind::RoundAnswers, RowData::Answer(answer.clone()));
            let session_id = answer.session_id;
            tables.answers.insert(key, answer);
            inner.feed.publish(session_id, event);
            Ok(())
        })
    }

    fn update_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let key = (
                answer.session_id,
                answer.player_id,
                answer.round_number,
                answer.category_id,
            );
            let stored = tables
                .answers
                .get_mut(&key)
                .ok_or_else(|| StorageError::not_found("answer"))?;
            let old = stored.clone();
            *stored = answer.clone();
            let event = ChangeEvent::updated(
                TableKind::RoundAnswers,
                Some(RowData::Answer(old)),
                RowData::Answer(answer.clone()),
            );
            inner.feed.publish(answer.session_id, event);
            Ok(())
        })
    }

    fn list_round_answers(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .answers
                .values()
                .filter(|a| a.session_id == session_id && a.round_number == round_number)
                .cloned()
                .collect())
        })
    }

    fn list_session_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .answers
                .values()
                .filter(|a| a.session_id == session_id)
                .cloned()
                .collect())
        })
    }

    fn insert_completion(
        &self,
        completion: CompletionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            let key = (
                completion.session_id,
                completion.player_id,
                completion.round_number,
            );
            if tables.completions.contains_key(&key) {
                return Err(StorageError::duplicate("completion"));
            }
            let event = ChangeEvent::inserted(
                TableKind::RoundCompletions,
                RowData::Completion(completion.clone()),
            );
            let session_id = completion.session_id;
            tables.completions.insert(key, completion);
            inner.feed.publish(session_id, event);
            Ok(())
        })
    }

    fn list_completions(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<CompletionEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .completions
                .values()
                .filter(|c| c.session_id == session_id && c.round_number == round_number)
                .cloned()
                .collect())
        })
    }

    fn count_completions(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables
                .completions
                .values()
                .filter(|c| c.session_id == session_id && c.round_number == round_number)
                .count())
        })
    }

    fn seed_categories(
        &self,
        names: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<CategoryEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let mut tables = inner.tables.write().await;
            for name in names {
                if tables.categories.values().any(|c| c.name == name) {
                    continue;
                }
                let entry = CategoryEntity {
                    id: Uuid::new_v4(),
                    name,
                };
                tables.categories.insert(entry.id, entry);
            }
            Ok(tables.categories.values().cloned().collect())
        })
    }

    fn list_categories(&self) -> BoxFuture<'static, StorageResult<Vec<CategoryEntity>>> {
        let inner = Arc::clone(&self.inner);
        Box::pin(async move {
            let tables = inner.tables.read().await;
            Ok(tables.categories.values().cloned().collect())
        })
    }

    fn watch_session(&self, session_id: Uuid) -> broadcast::Receiver<ChangeEvent> {
        self.inner.feed.subscribe(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::changes::ChangeOp;
    use crate::dao::models::{SessionSettings, SessionStatus};
    use time::OffsetDateTime;

    fn sample_session(code: &str) -> SessionEntity {
        let now = OffsetDateTime::now_utc();
        SessionEntity {
            id: Uuid::new_v4(),
            code: code.to_string(),
            host_id: Uuid::new_v4(),
            status: SessionStatus::Waiting,
            current_round: 0,
            current_letter: None,
            used_letters: Vec::new(),
            categories: vec![Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()],
            settings: SessionSettings {
                max_rounds: 5,
                round_time_limit_secs: 60,
                stop_countdown_secs: 10,
            },
            round_started_at: None,
            round_ends_at: None,
            stopped_by: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn member_of(session: &SessionEntity, name: &str) -> MemberEntity {
        MemberEntity {
            session_id: session.id,
            player_id: Uuid::new_v4(),
            display_name: name.to_string(),
            score: 0,
            is_ready: false,
            joined_at: OffsetDateTime::now_utc(),
        }
    }

    fn answer_of(member: &MemberEntity, round: u32, text: &str) -> AnswerEntity {
        AnswerEntity {
            session_id: member.session_id,
            player_id: member.player_id,
            round_number: round,
            category_id: Uuid::new_v4(),
            answer_text: text.to_string(),
            points: 0,
            is_unique: false,
        }
    }

    fn completion_of(member: &MemberEntity, round: u32) -> CompletionEntity {
        CompletionEntity {
            session_id: member.session_id,
            player_id: member.player_id,
            round_number: round,
            completed_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn update_requires_the_successor_version() {
        let store = MemorySessionStore::new();
        let session = sample_session("QZWXC");
        store.insert_session(session.clone()).await.unwrap();

        let mut first = session.clone();
        first.touch();
        let mut second = session.clone();
        second.touch();

        let written = store.update_session(first).await.unwrap();
        assert_eq!(written.version, 1);

        let err = store.update_session(second).await.unwrap_err();
        assert!(err.is_precondition());

        let stored = store.fetch_session(session.id).await.unwrap();
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn duplicate_code_is_rejected() {
        let store = MemorySessionStore::new();
        store.insert_session(sample_session("ABCDE")).await.unwrap();

        let err = store
            .insert_session(sample_session("ABCDE"))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
    }

    #[tokio::test]
    async fn find_by_code_matches_exactly() {
        let store = MemorySessionStore::new();
        let session = sample_session("QZWXC");
        store.insert_session(session.clone()).await.unwrap();

        let found = store
            .find_session_by_code("QZWXC".into())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, session.id);
        assert!(store.find_session_by_code("AAAAA".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_cascades_and_closes_the_feed() {
        let store = MemorySessionStore::new();
        let session = sample_session("QZWXC");
        let member = member_of(&session, "ana");
        store.insert_session(session.clone()).await.unwrap();
        store.insert_member(member.clone()).await.unwrap();
        store.insert_answer(answer_of(&member, 1, "casa")).await.unwrap();
        store.insert_completion(completion_of(&member, 1)).await.unwrap();

        let mut rx = store.watch_session(session.id);
        assert!(store.delete_session(session.id).await.unwrap());

        assert!(matches!(
            store.fetch_session(session.id).await,
            Err(StorageError::NotFound { .. })
        ));
        assert_eq!(store.count_members(session.id).await.unwrap(), 0);
        assert!(store.list_session_answers(session.id).await.unwrap().is_empty());
        assert_eq!(store.count_completions(session.id, 1).await.unwrap(), 0);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.table, TableKind::Sessions);
        assert_eq!(event.op, ChangeOp::Delete);
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn second_completion_marker_is_rejected() {
        let store = MemorySessionStore::new();
        let session = sample_session("QZWXC");
        let member = member_of(&session, "ana");
        store.insert_session(session.clone()).await.unwrap();
        store.insert_member(member.clone()).await.unwrap();

        store.insert_completion(completion_of(&member, 1)).await.unwrap();
        let err = store
            .insert_completion(completion_of(&member, 1))
            .await
            .unwrap_err();
        assert!(err.is_duplicate());
        assert_eq!(store.count_completions(session.id, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn seeding_categories_is_idempotent() {
        let store = MemorySessionStore::new();
        let first = store
            .seed_categories(vec!["Animal".into(), "City".into()])
            .await
            .unwrap();
        let second = store
            .seed_categories(vec!["City".into(), "Food".into()])
            .await
            .unwrap();

        assert_eq!(second.len(), 3);
        let city_before = first.iter().find(|c| c.name == "City").unwrap();
        let city_after = second.iter().find(|c| c.name == "City").unwrap();
        assert_eq!(city_before.id, city_after.id);
    }

    #[tokio::test]
    async fn change_feed_reflects_member_writes() {
        let store = MemorySessionStore::new();
        let session = sample_session("QZWXC");
        store.insert_session(session.clone()).await.unwrap();

        let mut rx = store.watch_session(session.id);
        let mut member = member_of(&session, "ana");
        store.insert_member(member.clone()).await.unwrap();
        member.score = 25;
        store.update_member(member.clone()).await.unwrap();

        let inserted = rx.recv().await.unwrap();
        assert_eq!(inserted.op, ChangeOp::Insert);
        assert_eq!(inserted.table, TableKind::Members);

        let updated = rx.recv().await.unwrap();
        assert_eq!(updated.op, ChangeOp::Update);
        match updated.new_row {
            Some(RowData::Member(m)) => assert_eq!(m.score, 25),
            other => panic!("unexpected row: {other:?}"),
        }
    }
}
