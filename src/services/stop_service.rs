use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionStatus},
    error::ServiceError,
    services::watch_service,
    state::SharedState,
};

/// How often a STOP write retries when it loses a version race before the
/// call gives up.
const MAX_STOP_ATTEMPTS: usize = 3;

/// Arm the shared STOP countdown for the current round.
///
/// Only a player whose every category is filled may call this. The round
/// deadline is pulled in to `now + stop_countdown`; every client derives the
/// same remaining time from the row. Calling STOP while a countdown is
/// already armed is a no-op success and never resets or extends the window.
/// A STOP that would lengthen the round is rejected.
pub async fn call_stop(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    // The session row is checked before any runtime state is allocated for
    // the id; unknown ids must not leave a bundle behind.
    store.fetch_session(session_id).await?;
    let runtime = watch_service::ensure_runtime(state, session_id).await?;

    let mut attempts = 0;
    loop {
        let session = store.fetch_session(session_id).await?;
        match session.status {
            SessionStatus::Playing => {}
            SessionStatus::Finished => return Err(ServiceError::SessionClosed),
            _ => {
                return Err(ServiceError::PreconditionFailed(
                    "no round is active".into(),
                ));
            }
        }
        store.fetch_member(session_id, player_id).await?;

        if session.stopped_by.is_some() {
            // Already armed; the grace window is never re-armed.
            return Ok(());
        }

        let already_submitted = store
            .list_completions(session_id, session.current_round)
            .await?
            .iter()
            .any(|c| c.player_id == player_id);
        if !already_submitted && !all_categories_filled(&session, state, player_id) {
            return Err(ServiceError::PreconditionFailed(
                "fill every category before calling STOP".into(),
            ));
        }

        let now = OffsetDateTime::now_utc();
        let remaining = session
            .round_ends_at
            .map(|ends_at| ends_at - now)
            .unwrap_or(Duration::ZERO);
        let countdown = Duration::seconds(session.settings.stop_countdown_secs as i64);
        if countdown >= remaining {
            return Err(ServiceError::PreconditionFailed(
                "the STOP countdown would not shorten the round".into(),
            ));
        }

        let mut updated = session;
        updated.round_ends_at = Some(now + countdown);
        updated.stopped_by = Some(player_id);
        updated.touch();

        match store.update_session(updated).await {
            Ok(written) => {
                runtime.set_deadline(written.round_ends_at);
                info!(
                    session_id = %session_id,
                    player_id = %player_id,
                    round = written.current_round,
                    "STOP countdown armed"
                );
                return Ok(());
            }
            // Lost a version race; re-read and re-apply the guards.
            Err(err) if err.is_precondition() => {
                attempts += 1;
                if attempts >= MAX_STOP_ATTEMPTS {
                    return Err(err.into());
                }
            }
            Err(err) => return Err(err.into()),
        }
    }
}

/// Whether the caller's draft covers every session category with non-blank
/// text.
fn all_categories_filled(session: &SessionEntity, state: &SharedState, player_id: Uuid) -> bool {
    let Some(runtime) = state.runtime(session.id) else {
        return false;
    };
    let draft = runtime.draft_for(player_id);
    session.categories.iter().all(|category_id| {
        draft
            .get(category_id)
            .is_some_and(|text| !text.trim().is_empty())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::round::AnswerInput;
    use crate::dto::session::{CreateSessionRequest, JoinSessionRequest, SessionSnapshot, SettingsInput};
    use crate::services::test_support::test_state;
    use crate::services::{member_service, round_service, session_service};

    async fn playing_session(
        state: &SharedState,
        settings: Option<SettingsInput>,
    ) -> (SessionSnapshot, Uuid, Uuid) {
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
            state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings,
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
        let started = session_service::start(state, created.id, host_id)
            .await
            .unwrap();
        (started, host_id, guest)
    }

    async fn fill_all_categories(state: &SharedState, snapshot: &SessionSnapshot, player_id: Uuid) {
        for category in &snapshot.categories {
            round_service::record_draft(state, snapshot.id, player_id, category.id, "Casa".into())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn stop_shortens_the_round_deadline() {
        let (state, store) = test_state().await;
        let (session, host_id, _guest) = playing_session(&state, None).await;
        fill_all_categories(&state, &session, host_id).await;

        call_stop(&state, session.id, host_id).await.unwrap();

        let stopped = store.fetch_session(session.id).await.unwrap();
        assert_eq!(stopped.stopped_by, Some(host_id));
        let remaining = stopped.round_ends_at.unwrap() - OffsetDateTime::now_utc();
        let countdown = stopped.settings.stop_countdown_secs as i64;
        assert!(remaining.whole_seconds() <= countdown);
    }

    #[tokio::test]
    async fn repeat_stop_never_extends_the_window() {
        let (state, store) = test_state().await;
        let (session, host_id, guest) = playing_session(&state, None).await;
        fill_all_categories(&state, &session, host_id).await;
        fill_all_categories(&state, &session, guest).await;

        call_stop(&state, session.id, host_id).await.unwrap();
        let armed = store.fetch_session(session.id).await.unwrap();

        call_stop(&state, session.id, guest).await.unwrap();

        let after = store.fetch_session(session.id).await.unwrap();
        assert_eq!(after.round_ends_at, armed.round_ends_at);
        assert_eq!(after.stopped_by, Some(host_id));
        assert_eq!(after.version, armed.version);
    }

    #[tokio::test]
    async fn stop_that_would_lengthen_the_round_is_rejected() {
        let (state, store) = test_state().await;
        // Countdown longer than the whole round.
        let (session, host_id, _guest) = playing_session(
            &state,
            Some(SettingsInput {
                max_rounds: 5,
                round_time_limit_secs: 10,
                stop_countdown_secs: 30,
            }),
        )
        .await;
        fill_all_categories(&state, &session, host_id).await;

        let before = store.fetch_session(session.id).await.unwrap();
        let err = call_stop(&state, session.id, host_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));

        let after = store.fetch_session(session.id).await.unwrap();
        assert_eq!(after.round_ends_at, before.round_ends_at);
        assert!(after.stopped_by.is_none());
    }

    #[tokio::test]
    async fn stop_requires_every_category_filled() {
        let (state, _store) = test_state().await;
        let (session, host_id, _guest) = playing_session(&state, None).await;
        // Only the first category is filled.
        round_service::record_draft(
            &state,
            session.id,
            host_id,
            session.categories[0].id,
            "Casa".into(),
        )
        .await
        .unwrap();

        let err = call_stop(&state, session.id, host_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn a_submitted_player_may_stop_without_a_draft() {
        let (state, store) = test_state().await;
        let (session, host_id, _guest) = playing_session(&state, None).await;
        let answers: Vec<AnswerInput> = session
            .categories
            .iter()
            .map(|category| AnswerInput {
                category_id: category.id,
                text: "Casa".into(),
            })
            .collect();
        round_service::submit_answers(&state, session.id, host_id, answers)
            .await
            .unwrap();

        call_stop(&state, session.id, host_id).await.unwrap();

        let stopped = store.fetch_session(session.id).await.unwrap();
        assert_eq!(stopped.stopped_by, Some(host_id));
    }

    #[tokio::test]
    async fn stop_on_an_unknown_session_leaves_no_runtime_behind() {
        let (state, _store) = test_state().await;
        let ghost = Uuid::new_v4();

        let err = call_stop(&state, ghost, Uuid::new_v4()).await.unwrap_err();

        assert!(matches!(err, ServiceError::NotFound(_)));
        assert!(state.runtime(ghost).is_none());
    }

    #[tokio::test]
    async fn stop_on_a_finished_session_reports_it_gone() {
        let (state, _store) = test_state().await;
        let (session, host_id, guest) = playing_session(
            &state,
            Some(SettingsInput {
                max_rounds: 1,
                round_time_limit_secs: 60,
                stop_countdown_secs: 10,
            }),
        )
        .await;
        round_service::submit_answers(&state, session.id, host_id, Vec::new())
            .await
            .unwrap();
        round_service::submit_answers(&state, session.id, guest, Vec::new())
            .await
            .unwrap();

        let err = call_stop(&state, session.id, host_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::SessionClosed));
    }

    #[tokio::test]
    async fn stop_is_rejected_outside_of_play() {
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

        let err = call_stop(&state, created.id, host_id).await.unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }
}
