use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::sync::{RwLock, broadcast};
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAnswerDocument, MongoCategoryDocument, MongoCompletionDocument, MongoMemberDocument,
        MongoSessionDocument, answer_key, doc_id, member_key, uuid_as_binary,
    },
};
use crate::dao::{
    changes::{ChangeEvent, ChangeFeed, RowData, TableKind},
    models::{AnswerEntity, CategoryEntity, CompletionEntity, MemberEntity, SessionEntity},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const MEMBER_COLLECTION_NAME: &str = "members";
const ANSWER_COLLECTION_NAME: &str = "round_answers";
const COMPLETION_COLLECTION_NAME: &str = "round_completions";
const CATEGORY_COLLECTION_NAME: &str = "categories";

/// MongoDB-backed storage.
///
/// Uniqueness (join codes, memberships, submissions, completion markers) is
/// enforced by the indexes created at connect time, and the session version
/// check rides the replace filter, so concurrent writers behave exactly like
/// they do against the in-process backend. This service is the only writer of
/// these collections; change events are published locally after each write.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
    feed: ChangeFeed,
}

struct MongoState {
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = {
            let guard = self.state.read().await;
            guard.database.clone()
        };

        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let inner = Arc::new(MongoInner {
            state: RwLock::new(MongoState { client, database }),
            config,
            feed: ChangeFeed::new(),
        });

        let store = Self { inner };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let database = self.database().await;

        let unique_index = |collection: &'static str,
                            index: &'static str,
                            keys: Document|
         -> (&'static str, &'static str, IndexModel) {
            let model = IndexModel::builder()
                .keys(keys)
                .options(
                    IndexOptions::builder()
                        .name(Some(index.to_owned()))
                        .unique(Some(true))
                        .build(),
                )
                .build();
            (collection, index, model)
        };

        let indexes = [
            unique_index(SESSION_COLLECTION_NAME, "session_code_idx", doc! {"code": 1}),
            unique_index(
                MEMBER_COLLECTION_NAME,
                "member_session_player_idx",
                doc! {"session_id": 1, "player_id": 1},
            ),
            unique_index(
                ANSWER_COLLECTION_NAME,
                "answer_submission_idx",
                doc! {"session_id": 1, "player_id": 1, "round_number": 1, "category_id": 1},
            ),
            unique_index(
                COMPLETION_COLLECTION_NAME,
                "completion_round_idx",
                doc! {"session_id": 1, "player_id": 1, "round_number": 1},
            ),
            unique_index(CATEGORY_COLLECTION_NAME, "category_name_idx", doc! {"name": 1}),
        ];

        for (collection_name, index_name, model) in indexes {
            database
                .collection::<Document>(collection_name)
                .create_index(model)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: collection_name,
                    index: index_name,
                    source,
                })?;
        }

        Ok(())
    }

    async fn database(&self) -> Database {
        let guard = self.inner.state.read().await;
        guard.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database()
            .await
            .collection(SESSION_COLLECTION_NAME)
    }

    async fn members(&self) -> Collection<MongoMemberDocument> {
        self.database().await.collection(MEMBER_COLLECTION_NAME)
    }

    async fn answers(&self) -> Collection<MongoAnswerDocument> {
        self.database().await.collection(ANSWER_COLLECTION_NAME)
    }

    async fn completions(&self) -> Collection<MongoCompletionDocument> {
        self.database()
            .await
            .collection(COMPLETION_COLLECTION_NAME)
    }

    async fn categories(&self) -> Collection<MongoCategoryDocument> {
        self.database().await.collection(CATEGORY_COLLECTION_NAME)
    }

    fn publish(&self, session_id: Uuid, event: ChangeEvent) {
        self.inner.feed.publish(session_id, event);
    }

    async fn create_session(&self, session: SessionEntity) -> MongoResult<()> {
        let document: MongoSessionDocument = session.clone().into();
        self.sessions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::InsertSession {
                code: session.code.clone(),
                source,
            })?;
        self.publish(
            session.id,
            ChangeEvent::inserted(TableKind::Sessions, RowData::Session(session)),
        );
        Ok(())
    }

    async fn find_session(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn find_by_code(&self, code: String) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc! {"code": &code})
            .await
            .map_err(|source| MongoDaoError::FindByCode { code, source })?;
        Ok(document.map(Into::into))
    }

    /// Replace the session row only when the stored version is the direct
    /// predecessor of the incoming one. A miss is disambiguated with a
    /// follow-up read: vanished row or lost race.
    async fn compare_and_set_session(
        &self,
        session: SessionEntity,
    ) -> StorageResult<SessionEntity> {
        let id = session.id;
        let Some(previous) = session.version.checked_sub(1) else {
            return Err(StorageError::precondition("session version"));
        };

        let document: MongoSessionDocument = session.clone().into();
        let filter = doc! {
            "_id": uuid_as_binary(id),
            "version": previous as i64,
        };
        let result = self
            .sessions()
            .await
            .replace_one(filter, &document)
            .await
            .map_err(|source| MongoDaoError::UpdateSession { id, source })
            .map_err(StorageError::from)?;

        if result.matched_count == 0 {
            return match self.find_session(id).await.map_err(StorageError::from)? {
                Some(_) => Err(StorageError::precondition("session version")),
                None => Err(StorageError::not_found("session")),
            };
        }

        self.publish(
            id,
            ChangeEvent::updated(TableKind::Sessions, None, RowData::Session(session.clone())),
        );
        Ok(session)
    }

    async fn remove_session(&self, id: Uuid) -> MongoResult<bool> {
        let removed = self
            .sessions()
            .await
            .find_one_and_delete(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
        let Some(old) = removed else {
            return Ok(false);
        };

        let scope = doc! {"session_id": uuid_as_binary(id)};
        self.members()
            .await
            .delete_many(scope.clone())
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
        self.answers()
            .await
            .delete_many(scope.clone())
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;
        self.completions()
            .await
            .delete_many(scope)
            .await
            .map_err(|source| MongoDaoError::DeleteSession { id, source })?;

        self.publish(
            id,
            ChangeEvent::deleted(TableKind::Sessions, RowData::Session(old.into())),
        );
        self.inner.feed.remove(id);
        Ok(true)
    }

    async fn create_member(&self, member: MemberEntity) -> MongoResult<()> {
        let document: MongoMemberDocument = member.clone().into();
        self.members()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::WriteMember {
                session_id: member.session_id,
                player_id: member.player_id,
                source,
            })?;
        self.publish(
            member.session_id,
            ChangeEvent::inserted(TableKind::Members, RowData::Member(member)),
        );
        Ok(())
    }

    async fn find_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> MongoResult<Option<MemberEntity>> {
        let document = self
            .members()
            .await
            .find_one(member_key(session_id, player_id))
            .await
            .map_err(|source| MongoDaoError::WriteMember {
                session_id,
                player_id,
                source,
            })?;
        Ok(document.map(Into::into))
    }

    async fn replace_member(&self, member: MemberEntity) -> StorageResult<()> {
        let document: MongoMemberDocument = member.clone().into();
        let result = self
            .members()
            .await
            .replace_one(member_key(member.session_id, member.player_id), &document)
            .await
            .map_err(|source| MongoDaoError::WriteMember {
                session_id: member.session_id,
                player_id: member.player_id,
                source,
            })
            .map_err(StorageError::from)?;

        if result.matched_count == 0 {
            return Err(StorageError::not_found("member"));
        }
        self.publish(
            member.session_id,
            ChangeEvent::updated(TableKind::Members, None, RowData::Member(member)),
        );
        Ok(())
    }

    async fn remove_member(&self, session_id: Uuid, player_id: Uuid) -> MongoResult<bool> {
        let removed = self
            .members()
            .await
            .find_one_and_delete(member_key(session_id, player_id))
            .await
            .map_err(|source| MongoDaoError::WriteMember {
                session_id,
                player_id,
                source,
            })?;
        let Some(old) = removed else {
            return Ok(false);
        };
        self.publish(
            session_id,
            ChangeEvent::deleted(TableKind::Members, RowData::Member(old.into())),
        );
        Ok(true)
    }

    async fn member_list(&self, session_id: Uuid) -> MongoResult<Vec<MemberEntity>> {
        let documents: Vec<MongoMemberDocument> = self
            .members()
            .await
            .find(doc! {"session_id": uuid_as_binary(session_id)})
            .sort(doc! {"joined_at": 1})
            .await
            .map_err(|source| MongoDaoError::ListMembers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListMembers { session_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn member_count(&self, session_id: Uuid) -> MongoResult<usize> {
        let count = self
            .members()
            .await
            .count_documents(doc! {"session_id": uuid_as_binary(session_id)})
            .await
            .map_err(|source| MongoDaoError::ListMembers { session_id, source })?;
        Ok(count as usize)
    }

    async fn create_answer(&self, answer: AnswerEntity) -> MongoResult<()> {
        let document: MongoAnswerDocument = answer.clone().into();
        self.answers()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::WriteAnswer {
                session_id: answer.session_id,
                player_id: answer.player_id,
                source,
            })?;
        self.publish(
            answer.session_id,
            ChangeEvent::inserted(TableKind::RoundAnswers, RowData::Answer(answer)),
        );
        Ok(())
    }

    async fn replace_answer(&self, answer: AnswerEntity) -> StorageResult<()> {
        let document: MongoAnswerDocument = answer.clone().into();
        let result = self
            .answers()
            .await
            .replace_one(answer_key(&answer), &document)
            .await
            .map_err(|source| MongoDaoError::WriteAnswer {
                session_id: answer.session_id,
                player_id: answer.player_id,
                source,
            })
            .map_err(StorageError::from)?;

        if result.matched_count == 0 {
            return Err(StorageError::not_found("answer"));
        }
        self.publish(
            answer.session_id,
            ChangeEvent::updated(TableKind::RoundAnswers, None, RowData::Answer(answer)),
        );
        Ok(())
    }

    async fn round_answer_list(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> MongoResult<Vec<AnswerEntity>> {
        let filter = doc! {
            "session_id": uuid_as_binary(session_id),
            "round_number": round_number as i64,
        };
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .await
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::ListAnswers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListAnswers { session_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn session_answer_list(&self, session_id: Uuid) -> MongoResult<Vec<AnswerEntity>> {
        let documents: Vec<MongoAnswerDocument> = self
            .answers()
            .await
            .find(doc! {"session_id": uuid_as_binary(session_id)})
            .await
            .map_err(|source| MongoDaoError::ListAnswers { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListAnswers { session_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn create_completion(&self, completion: CompletionEntity) -> MongoResult<()> {
        let document: MongoCompletionDocument = completion.clone().into();
        self.completions()
            .await
            .insert_one(&document)
            .await
            .map_err(|source| MongoDaoError::WriteCompletion {
                session_id: completion.session_id,
                player_id: completion.player_id,
                source,
            })?;
        self.publish(
            completion.session_id,
            ChangeEvent::inserted(TableKind::RoundCompletions, RowData::Completion(completion)),
        );
        Ok(())
    }

    async fn completion_list(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> MongoResult<Vec<CompletionEntity>> {
        let filter = doc! {
            "session_id": uuid_as_binary(session_id),
            "round_number": round_number as i64,
        };
        let documents: Vec<MongoCompletionDocument> = self
            .completions()
            .await
            .find(filter)
            .await
            .map_err(|source| MongoDaoError::ListCompletions { session_id, source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCompletions { session_id, source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }

    async fn completion_count(&self, session_id: Uuid, round_number: u32) -> MongoResult<usize> {
        let filter = doc! {
            "session_id": uuid_as_binary(session_id),
            "round_number": round_number as i64,
        };
        let count = self
            .completions()
            .await
            .count_documents(filter)
            .await
            .map_err(|source| MongoDaoError::ListCompletions { session_id, source })?;
        Ok(count as usize)
    }

    async fn ensure_categories(&self, names: Vec<String>) -> MongoResult<Vec<CategoryEntity>> {
        let collection = self.categories().await;
        for name in names {
            let existing = collection
                .find_one(doc! {"name": &name})
                .await
                .map_err(|source| MongoDaoError::WriteCategory {
                    name: name.clone(),
                    source,
                })?;
            if existing.is_some() {
                continue;
            }
            let document: MongoCategoryDocument = CategoryEntity {
                id: Uuid::new_v4(),
                name: name.clone(),
            }
            .into();
            if let Err(source) = collection.insert_one(&document).await {
                let err = MongoDaoError::WriteCategory { name, source };
                // Lost a seeding race: the name exists now, which is fine.
                if err.duplicate_subject().is_some() {
                    continue;
                }
                return Err(err);
            }
        }
        self.category_list().await
    }

    async fn category_list(&self) -> MongoResult<Vec<CategoryEntity>> {
        let documents: Vec<MongoCategoryDocument> = self
            .categories()
            .await
            .find(doc! {})
            .sort(doc! {"name": 1})
            .await
            .map_err(|source| MongoDaoError::ListCategories { source })?
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListCategories { source })?;
        Ok(documents.into_iter().map(Into::into).collect())
    }
}

impl SessionStore for MongoSessionStore {
    fn insert_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_session(session).await.map_err(Into::into) })
    }

    fn fetch_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_session(id)
                .await
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::not_found("session"))
        })
    }

    fn find_session_by_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_by_code(code).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        session: SessionEntity,
    ) -> BoxFuture<'static, StorageResult<SessionEntity>> {
        let store = self.clone();
        Box::pin(async move { store.compare_and_set_session(session).await })
    }

    fn delete_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move { store.remove_session(id).await.map_err(Into::into) })
    }

    fn insert_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_member(member).await.map_err(Into::into) })
    }

    fn fetch_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<MemberEntity>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_member(session_id, player_id)
                .await
                .map_err(StorageError::from)?
                .ok_or_else(|| StorageError::not_found("member"))
        })
    }

    fn update_member(&self, member: MemberEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.replace_member(member).await })
    }

    fn delete_member(
        &self,
        session_id: Uuid,
        player_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .remove_member(session_id, player_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_members(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<MemberEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.member_list(session_id).await.map_err(Into::into) })
    }

    fn count_members(&self, session_id: Uuid) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move { store.member_count(session_id).await.map_err(Into::into) })
    }

    fn insert_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_answer(answer).await.map_err(Into::into) })
    }

    fn update_answer(&self, answer: AnswerEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.replace_answer(answer).await })
    }

    fn list_round_answers(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .round_answer_list(session_id, round_number)
                .await
                .map_err(Into::into)
        })
    }

    fn list_session_answers(
        &self,
        session_id: Uuid,
    ) -> BoxFuture<'static, StorageResult<Vec<AnswerEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .session_answer_list(session_id)
                .await
                .map_err(Into::into)
        })
    }

    fn insert_completion(
        &self,
        completion: CompletionEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.create_completion(completion).await.map_err(Into::into) })
    }

    fn list_completions(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<Vec<CompletionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .completion_list(session_id, round_number)
                .await
                .map_err(Into::into)
        })
    }

    fn count_completions(
        &self,
        session_id: Uuid,
        round_number: u32,
    ) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .completion_count(session_id, round_number)
                .await
                .map_err(Into::into)
        })
    }

    fn seed_categories(
        &self,
        names: Vec<String>,
    ) -> BoxFuture<'static, StorageResult<Vec<CategoryEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_categories(names).await.map_err(Into::into) })
    }

    fn list_categories(&self) -> BoxFuture<'static, StorageResult<Vec<CategoryEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.category_list().await.map_err(Into::into) })
    }

    fn watch_session(&self, session_id: Uuid) -> broadcast::Receiver<ChangeEvent> {
        self.inner.feed.subscribe(session_id)
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
