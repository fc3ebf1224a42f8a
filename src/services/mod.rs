/// OpenAPI documentation generation.
pub mod documentation;
/// Health check service.
pub mod health_service;
/// Lobby membership: join, leave, readiness.
pub mod member_service;
/// Round lifecycle: drafts, submissions, deadlines, advancement.
pub mod round_service;
/// Answer validation and point attribution.
pub mod scoring;
/// Session lifecycle: creation, start, settings, rematch.
pub mod session_service;
/// Server-Sent Events message generation.
pub mod sse_events;
/// Server-Sent Events broadcasting service.
pub mod sse_service;
/// The shared STOP countdown protocol.
pub mod stop_service;
/// Storage connection supervision and reconnection.
pub mod storage_supervisor;
/// Per-session change-feed watcher and deadline clock.
pub mod watch_service;
/// WebSocket connection and message handling service.
pub mod websocket_service;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use time::OffsetDateTime;
    use uuid::Uuid;

    use crate::config::AppConfig;
    use crate::dao::models::MemberEntity;
    use crate::dao::session_store::{SessionStore, memory::MemorySessionStore};
    use crate::state::{AppState, SharedState};

    /// Fresh application state backed by an in-memory store seeded with the
    /// default category catalogue.
    pub async fn test_state() -> (SharedState, Arc<dyn SessionStore>) {
        let config = AppConfig::default();
        let store: Arc<dyn SessionStore> = Arc::new(MemorySessionStore::new());
        store
            .seed_categories(config.categories().to_vec())
            .await
            .expect("seeding categories");
        let state = AppState::new(config);
        state.install_session_store(store.clone()).await;
        (state, store)
    }

    /// Seat a player directly in the store, bypassing the join flow.
    pub async fn joined_player(state: &SharedState, session_id: Uuid, display_name: &str) -> Uuid {
        let store = state.require_session_store().await.expect("store installed");
        let player_id = Uuid::new_v4();
        store
            .insert_member(MemberEntity {
                session_id,
                player_id,
                display_name: display_name.to_string(),
                score: 0,
                is_ready: false,
                joined_at: OffsetDateTime::now_utc(),
            })
            .await
            .expect("seating member");
        player_id
    }
}
