use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        changes::{ChangeEvent, ChangeOp, RowData, TableKind},
        models::{CompletionEntity, MemberEntity, SessionEntity, SessionStatus},
    },
    dto::{
        format_timestamp,
        round::scoreboard,
        session::MemberView,
        sse::{RoundStartedEvent, StopCalledEvent},
    },
    error::ServiceError,
    services::{round_service, session_service, sse_events},
    state::{SessionRuntime, SharedState, clock},
};

/// Live runtime bundle of a session, created on first use.
///
/// The first caller spawns the two background tasks every live session has:
/// the watcher consuming the store's change feed and the deadline clock.
/// Subsequent callers get the existing bundle. Fails without leaving a
/// bundle behind when the session does not exist.
///
/// Boxed because the watcher itself re-enters this function through the
/// completion check; the erased future keeps the spawned task `Send`.
pub fn ensure_runtime(
    state: &SharedState,
    session_id: Uuid,
) -> BoxFuture<'_, Result<Arc<SessionRuntime>, ServiceError>> {
    Box::pin(bootstrap_runtime(state, session_id))
}

async fn bootstrap_runtime(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Arc<SessionRuntime>, ServiceError> {
    let store = state.require_session_store().await?;
    let (runtime, created) = state.runtime_entry(session_id);
    if created {
        // Subscribe before the initial read so no event can fall in between.
        let feed = store.watch_session(session_id);
        let session = match store.fetch_session(session_id).await {
            Ok(session) => session,
            Err(err) => {
                if let Some(runtime) = state.remove_runtime(session_id) {
                    runtime.shutdown();
                }
                return Err(err.into());
            }
        };
        runtime.set_deadline(session.round_ends_at);

        let watcher_state = state.clone();
        runtime.register_task(tokio::spawn(run_watcher(watcher_state, session_id, feed)));

        let clock_state = state.clone();
        let deadline_rx = runtime.deadline_watcher();
        runtime.register_task(tokio::spawn(async move {
            clock::run(deadline_rx, move |_fired_at| {
                let state = clock_state.clone();
                async move {
                    round_service::handle_deadline(&state, session_id).await;
                }
            })
            .await;
        }));

        info!(session_id = %session_id, "session runtime started");
    }
    Ok(runtime)
}

/// Consume a session's change feed and derive every engine reaction from it:
/// SSE fan-out, deadline re-arming, completion re-evaluation, teardown.
async fn run_watcher(
    state: SharedState,
    session_id: Uuid,
    mut feed: broadcast::Receiver<ChangeEvent>,
) {
    loop {
        match feed.recv().await {
            Ok(event) => {
                if !handle_event(&state, session_id, event).await {
                    break;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(
                    session_id = %session_id,
                    skipped,
                    "change feed lagged; resynchronizing from the store"
                );
                if !resync(&state, session_id).await {
                    break;
                }
            }
            Err(RecvError::Closed) => {
                teardown(&state, session_id, "session closed").await;
                break;
            }
        }
    }
}

/// React to one change event. Returns whether the watcher keeps running.
async fn handle_event(state: &SharedState, session_id: Uuid, event: ChangeEvent) -> bool {
    match (event.table, event.op) {
        (TableKind::Sessions, ChangeOp::Update) => {
            if let Some(RowData::Session(new)) = event.new_row {
                let old = match event.old_row {
                    Some(RowData::Session(old)) => Some(old),
                    _ => None,
                };
                on_session_updated(state, session_id, old, new).await;
            }
            true
        }
        (TableKind::Sessions, ChangeOp::Delete) => {
            teardown(state, session_id, "the host closed the session").await;
            false
        }
        (TableKind::Members, op) => {
            if let Some(RowData::Member(member)) = event.new_row.or(event.old_row) {
                on_member_event(state, session_id, op, member).await;
            }
            true
        }
        (TableKind::RoundCompletions, ChangeOp::Insert) => {
            if let Some(RowData::Completion(completion)) = event.new_row {
                on_completion(state, session_id, completion).await;
            }
            true
        }
        // Answer rows only matter once the completion marker lands.
        _ => true,
    }
}

async fn on_session_updated(
    state: &SharedState,
    session_id: Uuid,
    old: Option<SessionEntity>,
    new: SessionEntity,
) {
    let Some(runtime) = state.runtime(session_id) else {
        return;
    };
    runtime.set_deadline(new.round_ends_at);

    let round_started = match &old {
        Some(old) => new.current_round > old.current_round
            || (old.status == SessionStatus::Waiting && new.status == SessionStatus::Playing),
        None => new.status == SessionStatus::Playing,
    };
    if round_started {
        if let (Some(letter), Some(started_at), Some(ends_at)) =
            (new.current_letter, new.round_started_at, new.round_ends_at)
        {
            sse_events::broadcast_round_started(
                runtime.hub(),
                &RoundStartedEvent {
                    round_number: new.current_round,
                    letter: letter.to_string(),
                    round_started_at: format_timestamp(started_at),
                    round_ends_at: format_timestamp(ends_at),
                    version: new.version,
                },
            );
        }
        return;
    }

    if new.status == SessionStatus::Finished
        && old.as_ref().is_none_or(|old| old.status != SessionStatus::Finished)
    {
        match state.require_session_store().await {
            Ok(store) => match store.list_members(session_id).await {
                Ok(members) => sse_events::broadcast_session_finished(
                    runtime.hub(),
                    scoreboard(members),
                    new.version,
                ),
                Err(err) => warn!(session_id = %session_id, error = %err, "failed to read the final scoreboard"),
            },
            Err(err) => warn!(session_id = %session_id, error = %err, "failed to read the final scoreboard"),
        }
        return;
    }

    if new.stopped_by.is_some() && old.as_ref().is_none_or(|old| old.stopped_by.is_none()) {
        if let (Some(stopped_by), Some(ends_at)) = (new.stopped_by, new.round_ends_at) {
            sse_events::broadcast_stop_called(
                runtime.hub(),
                &StopCalledEvent {
                    stopped_by,
                    round_ends_at: format_timestamp(ends_at),
                    version: new.version,
                },
            );
        }
        return;
    }

    if old.is_none_or(|old| old.settings != new.settings) {
        broadcast_fresh_snapshot(state, session_id, &runtime).await;
    }
}

async fn on_member_event(
    state: &SharedState,
    session_id: Uuid,
    op: ChangeOp,
    member: MemberEntity,
) {
    let Some(runtime) = state.runtime(session_id) else {
        return;
    };

    match op {
        ChangeOp::Delete => {
            sse_events::broadcast_member_left(runtime.hub(), member.player_id);
            // One player fewer may be all the round was waiting for.
            if let Err(err) = round_service::evaluate_completion(state, session_id).await {
                warn!(session_id = %session_id, error = %err, "completion check failed");
            }
        }
        ChangeOp::Insert | ChangeOp::Update => {
            let view = match member_view(state, session_id, member).await {
                Ok(view) => view,
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "failed to project member event");
                    return;
                }
            };
            match op {
                ChangeOp::Insert => sse_events::broadcast_member_joined(runtime.hub(), view),
                _ => sse_events::broadcast_member_updated(runtime.hub(), view),
            }
        }
    }
}

async fn on_completion(state: &SharedState, session_id: Uuid, completion: CompletionEntity) {
    if let Some(runtime) = state.runtime(session_id) {
        match completion_progress(state, session_id, completion.round_number).await {
            Ok((completed, total)) => sse_events::broadcast_player_completed(
                runtime.hub(),
                completion.player_id,
                completion.round_number,
                completed,
                total,
            ),
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to count completions")
            }
        }
    }

    if let Err(err) = round_service::evaluate_completion(state, session_id).await {
        warn!(session_id = %session_id, error = %err, "completion check failed");
    }
}

/// Re-establish ground truth after the feed lost events. Returns whether the
/// watcher keeps running.
async fn resync(state: &SharedState, session_id: Uuid) -> bool {
    let Ok(store) = state.require_session_store().await else {
        return true;
    };
    let session = match store.fetch_session(session_id).await {
        Ok(session) => session,
        Err(_) => {
            teardown(state, session_id, "the host closed the session").await;
            return false;
        }
    };

    let Some(runtime) = state.runtime(session_id) else {
        return false;
    };
    runtime.set_deadline(session.round_ends_at);
    broadcast_fresh_snapshot(state, session_id, &runtime).await;
    if let Err(err) = round_service::evaluate_completion(state, session_id).await {
        warn!(session_id = %session_id, error = %err, "completion check failed");
    }
    true
}

async fn teardown(state: &SharedState, session_id: Uuid, reason: &str) {
    if let Some(runtime) = state.remove_runtime(session_id) {
        sse_events::broadcast_session_closed(runtime.hub(), reason);
        info!(session_id = %session_id, reason, "session runtime torn down");
        runtime.shutdown();
    }
}

async fn broadcast_fresh_snapshot(
    state: &SharedState,
    session_id: Uuid,
    runtime: &Arc<SessionRuntime>,
) {
    match session_service::snapshot(state, session_id).await {
        Ok(snapshot) => sse_events::broadcast_snapshot(runtime.hub(), &snapshot),
        Err(err) => warn!(session_id = %session_id, error = %err, "failed to rebuild snapshot"),
    }
}

async fn member_view(
    state: &SharedState,
    session_id: Uuid,
    member: MemberEntity,
) -> Result<MemberView, ServiceError> {
    let store = state.require_session_store().await?;
    let session = store.fetch_session(session_id).await?;
    let has_completed_round = session.status == SessionStatus::Playing
        && store
            .list_completions(session_id, session.current_round)
            .await?
            .iter()
            .any(|c| c.player_id == member.player_id);
    Ok(MemberView {
        is_host: member.player_id == session.host_id,
        has_completed_round,
        player_id: member.player_id,
        display_name: member.display_name,
        score: member.score,
        is_ready: member.is_ready,
    })
}

async fn completion_progress(
    state: &SharedState,
    session_id: Uuid,
    round_number: u32,
) -> Result<(usize, usize), ServiceError> {
    let store = state.require_session_store().await?;
    let completed = store.count_completions(session_id, round_number).await?;
    let total = store.count_members(session_id).await?;
    Ok((completed, total))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;
    use crate::dto::session::{CreateSessionRequest, JoinSessionRequest, SettingsInput};
    use crate::dto::sse::ServerEvent;
    use crate::services::test_support::test_state;
    use crate::services::{member_service, round_service, session_service, stop_service};

    /// Wait until the hub delivers an event with the given name.
    async fn expect_event(
        rx: &mut broadcast::Receiver<ServerEvent>,
        name: &str,
    ) -> ServerEvent {
        timeout(Duration::from_secs(2), async {
            loop {
                let event = rx.recv().await.expect("hub closed before the event");
                if event.event.as_deref() == Some(name) {
                    return event;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for `{name}`"))
    }

    async fn lobby_with_guest(
        state: &SharedState,
    ) -> (crate::dto::session::SessionSnapshot, Uuid, Uuid) {
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
            state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings: Some(SettingsInput {
                    max_rounds: 1,
                    round_time_limit_secs: 60,
                    stop_countdown_secs: 10,
                }),
            },
        )
        .await
        .unwrap();
        let guest = Uuid::new_v4();
        member_service::join_by_code(
            state,
            JoinSessionRequest {
                code: created.code.clone(),
                player_id: guest,
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();
        (created, host_id, guest)
    }

    #[tokio::test]
    async fn runtime_bootstrap_future_can_be_spawned() {
        fn assert_send<T: Send>(value: T) -> T {
            value
        }

        let (state, _store) = test_state().await;
        let ghost = Uuid::new_v4();
        // The watcher re-enters ensure_runtime; the future must stay `Send`
        // for tokio::spawn.
        let result = assert_send(ensure_runtime(&state, ghost)).await;
        assert!(matches!(result, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn no_runtime_is_left_behind_for_an_unknown_session() {
        let (state, _store) = test_state().await;
        let ghost = Uuid::new_v4();

        let err = ensure_runtime(&state, ghost).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(state.runtime(ghost).is_none());
    }

    #[tokio::test]
    async fn watcher_fans_the_whole_round_out_over_the_hub() {
        let (state, _store) = test_state().await;
        let (session, host_id, guest) = lobby_with_guest(&state).await;

        let runtime = ensure_runtime(&state, session.id).await.unwrap();
        let mut rx = runtime.hub().subscribe();

        session_service::start(&state, session.id, host_id)
            .await
            .unwrap();
        let started = expect_event(&mut rx, "round.started").await;
        assert!(started.data.contains("\"round_number\":1"));

        round_service::submit_answers(&state, session.id, host_id, Vec::new())
            .await
            .unwrap();
        expect_event(&mut rx, "player.completed").await;

        round_service::submit_answers(&state, session.id, guest, Vec::new())
            .await
            .unwrap();
        expect_event(&mut rx, "round.scored").await;
        // max_rounds = 1, so the session finishes right after.
        expect_event(&mut rx, "session.finished").await;
    }

    #[tokio::test]
    async fn stop_call_reaches_every_subscriber() {
        let (state, _store) = test_state().await;
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
            &state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings: None,
            },
        )
        .await
        .unwrap();
        let guest = Uuid::new_v4();
        member_service::join_by_code(
            &state,
            JoinSessionRequest {
                code: created.code.clone(),
                player_id: guest,
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();
        session_service::start(&state, created.id, host_id)
            .await
            .unwrap();
        for category in &created.categories {
            round_service::record_draft(&state, created.id, host_id, category.id, "Casa".into())
                .await
                .unwrap();
        }

        let runtime = ensure_runtime(&state, created.id).await.unwrap();
        let mut rx = runtime.hub().subscribe();

        stop_service::call_stop(&state, created.id, host_id)
            .await
            .unwrap();

        let event = expect_event(&mut rx, "stop.called").await;
        assert!(event.data.contains(&host_id.to_string()));
    }

    #[tokio::test]
    async fn host_leave_closes_the_stream_and_drops_the_runtime() {
        let (state, _store) = test_state().await;
        let (session, host_id, _guest) = lobby_with_guest(&state).await;

        let runtime = ensure_runtime(&state, session.id).await.unwrap();
        let mut rx = runtime.hub().subscribe();

        member_service::leave(&state, session.id, host_id)
            .await
            .unwrap();

        expect_event(&mut rx, "session.closed").await;
        let gone = timeout(Duration::from_secs(2), async {
            loop {
                if state.runtime(session.id).is_none() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(gone.is_ok(), "runtime was not removed");
    }

    #[tokio::test]
    async fn member_join_is_observed_on_the_hub() {
        let (state, _store) = test_state().await;
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
            &state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings: None,
            },
        )
        .await
        .unwrap();

        let runtime = ensure_runtime(&state, created.id).await.unwrap();
        let mut rx = runtime.hub().subscribe();

        member_service::join_by_code(
            &state,
            JoinSessionRequest {
                code: created.code.clone(),
                player_id: Uuid::new_v4(),
                display_name: "leo".into(),
            },
        )
        .await
        .unwrap();

        let event = expect_event(&mut rx, "member.joined").await;
        assert!(event.data.contains("leo"));
    }

    #[tokio::test]
    async fn reconnecting_snapshot_matches_a_fresh_join() {
        let (state, _store) = test_state().await;
        let (session, host_id, _guest) = lobby_with_guest(&state).await;
        session_service::start(&state, session.id, host_id)
            .await
            .unwrap();

        // A reconnecting client and a fresh client read the same instant.
        let reconnecting = session_service::snapshot(&state, session.id).await.unwrap();
        let fresh = session_service::snapshot(&state, session.id).await.unwrap();

        assert_eq!(reconnecting.version, fresh.version);
        assert_eq!(reconnecting.status, fresh.status);
        assert_eq!(reconnecting.current_round, fresh.current_round);
        assert_eq!(reconnecting.current_letter, fresh.current_letter);
        assert_eq!(reconnecting.round_ends_at, fresh.round_ends_at);
        assert_eq!(reconnecting.members.len(), fresh.members.len());
    }
}
