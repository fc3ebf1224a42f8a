use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{MemberEntity, SessionStatus},
    dto::session::{JoinSessionRequest, SessionSnapshot},
    error::ServiceError,
    services::{session_service, watch_service},
    state::SharedState,
};

/// Seat a player in the lobby named by a join code.
///
/// Joining twice is a no-op success. A session that already left the lobby
/// does not resolve for joiners.
pub async fn join_by_code(
    state: &SharedState,
    request: JoinSessionRequest,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let code = request.code.trim().to_ascii_uppercase();
    let session = store
        .find_session_by_code(code.clone())
        .await?
        .filter(|session| session.status == SessionStatus::Waiting)
        .ok_or_else(|| ServiceError::NotFound(format!("no open session with code `{code}`")))?;

    let member = MemberEntity {
        session_id: session.id,
        player_id: request.player_id,
        display_name: request.display_name,
        score: 0,
        is_ready: false,
        joined_at: OffsetDateTime::now_utc(),
    };
    match store.insert_member(member).await {
        Ok(()) => {
            info!(session_id = %session.id, player_id = %request.player_id, "player joined");
        }
        // Re-join: keep the existing membership untouched.
        Err(err) if err.is_duplicate() => {}
        Err(err) => return Err(err.into()),
    }

    watch_service::ensure_runtime(state, session.id).await?;
    session_service::snapshot(state, session.id).await
}

/// Remove a player from the session.
///
/// When the host leaves the whole session is torn down: the row cascade
/// deletes every member, answer, and completion marker, and the change feed
/// tells every other client the session is gone.
pub async fn leave(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = match store.fetch_session(session_id).await {
        Ok(session) => session,
        // Already torn down; leaving is idempotent.
        Err(err) if matches!(err, crate::dao::storage::StorageError::NotFound { .. }) => {
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if session.host_id == player_id {
        info!(session_id = %session_id, "host left; tearing the session down");
        store.delete_session(session_id).await?;
        return Ok(());
    }

    if let Some(runtime) = state.runtime(session_id) {
        runtime.clear_draft(player_id);
    }
    store.delete_member(session_id, player_id).await?;
    Ok(())
}

/// Toggle the advisory lobby readiness flag of a member.
pub async fn set_ready(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
    is_ready: bool,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = store.fetch_session(session_id).await?;
    if session.status != SessionStatus::Waiting {
        return Err(ServiceError::PreconditionFailed(
            "readiness only matters while the lobby is open".into(),
        ));
    }

    let mut member = store.fetch_member(session_id, player_id).await?;
    if member.is_ready != is_ready {
        member.is_ready = is_ready;
        store.update_member(member).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::changes::{ChangeOp, TableKind};
    use crate::dto::session::CreateSessionRequest;
    use crate::services::session_service::create_session;
    use crate::services::test_support::test_state;

    async fn open_session(state: &SharedState) -> (SessionSnapshot, Uuid) {
        let host_id = Uuid::new_v4();
        let snapshot = create_session(
            state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings: None,
            },
        )
        .await
        .unwrap();
        (snapshot, host_id)
    }

    #[tokio::test]
    async fn joining_twice_is_a_noop_success() {
        let (state, store) = test_state().await;
        let (session, _host) = open_session(&state).await;
        let player_id = Uuid::new_v4();

        let request = || JoinSessionRequest {
            code: session.code.to_lowercase(),
            player_id,
            display_name: "leo".into(),
        };
        join_by_code(&state, request()).await.unwrap();
        let snapshot = join_by_code(&state, request()).await.unwrap();

        assert_eq!(snapshot.members.len(), 2);
        assert_eq!(store.count_members(session.id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn joining_a_started_session_does_not_resolve() {
        let (state, _store) = test_state().await;
        let (session, host_id) = open_session(&state).await;
        join_by_code(
            &state,
            JoinSessionRequest {
                code: session.code.clone(),
                player_id: Uuid::new_v4(),
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();
        session_service::start(&state, session.id, host_id)
            .await
            .unwrap();

        let err = join_by_code(
            &state,
            JoinSessionRequest {
                code: session.code.clone(),
                player_id: Uuid::new_v4(),
                display_name: "late".into(),
            },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn host_leave_tears_the_session_down_for_everyone() {
        let (state, store) = test_state().await;
        let (session, host_id) = open_session(&state).await;
        join_by_code(
            &state,
            JoinSessionRequest {
                code: session.code.clone(),
                player_id: Uuid::new_v4(),
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();

        let mut feed = store.watch_session(session.id);
        leave(&state, session.id, host_id).await.unwrap();

        assert!(store.fetch_session(session.id).await.is_err());
        assert_eq!(store.count_members(session.id).await.unwrap(), 0);

        // The deletion is observable on the change feed within one delivery.
        let deleted = loop {
            let event = feed.recv().await.unwrap();
            if event.table == TableKind::Sessions && event.op == ChangeOp::Delete {
                break event;
            }
        };
        assert!(deleted.new_row.is_none());

        // Leaving again is still fine.
        leave(&state, session.id, host_id).await.unwrap();
    }

    #[tokio::test]
    async fn guest_leave_only_removes_the_member() {
        let (state, store) = test_state().await;
        let (session, _host) = open_session(&state).await;
        let guest = Uuid::new_v4();
        join_by_code(
            &state,
            JoinSessionRequest {
                code: session.code.clone(),
                player_id: guest,
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();

        leave(&state, session.id, guest).await.unwrap();

        assert!(store.fetch_session(session.id).await.is_ok());
        assert_eq!(store.count_members(session.id).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn readiness_toggles_only_in_the_lobby() {
        let (state, store) = test_state().await;
        let (session, host_id) = open_session(&state).await;
        let guest = Uuid::new_v4();
        join_by_code(
            &state,
            JoinSessionRequest {
                code: session.code.clone(),
                player_id: guest,
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();

        set_ready(&state, session.id, guest, true).await.unwrap();
        let member = store.fetch_member(session.id, guest).await.unwrap();
        assert!(member.is_ready);

        session_service::start(&state, session.id, host_id)
            .await
            .unwrap();
        let err = set_ready(&state, session.id, guest, false)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }
}
