use time::{Duration, OffsetDateTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AnswerEntity, CompletionEntity, SessionEntity, SessionStatus},
        storage::StorageError,
    },
    dto::{
        round::{AnswerInput, RoundResultsView, scoreboard},
        sse::RoundScoredEvent,
    },
    error::ServiceError,
    services::{scoring, session_service, sse_events, watch_service},
    state::{SharedState, machine},
};

/// Buffer the latest draft text a player typed for one category.
///
/// Drafts live in process memory only; nothing is persisted until submission.
pub async fn record_draft(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
    category_id: Uuid,
    text: String,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = store.fetch_session(session_id).await?;
    require_active_round(&session)?;
    if !session.categories.contains(&category_id) {
        return Err(ServiceError::InvalidInput(format!(
            "category `{category_id}` is not part of this session"
        )));
    }
    store.fetch_member(session_id, player_id).await?;

    let runtime = watch_service::ensure_runtime(state, session_id).await?;
    runtime.set_draft_entry(player_id, category_id, text);
    Ok(())
}

/// Lock in a player's answers for the current round, exactly once.
///
/// Explicit entries win over the buffered draft for the same category;
/// categories missing from both submit as empty text. A repeat submission is
/// reported as success and writes nothing.
pub async fn submit_answers(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
    explicit: Vec<AnswerInput>,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = store.fetch_session(session_id).await?;
    require_active_round(&session)?;
    store.fetch_member(session_id, player_id).await?;

    let runtime = watch_service::ensure_runtime(state, session_id).await?;
    let mut texts = runtime.draft_for(player_id);
    for input in explicit {
        texts.insert(input.category_id, input.text);
    }

    for category_id in &session.categories {
        let answer_text = texts
            .get(category_id)
            .map(|text| text.trim().to_string())
            .unwrap_or_default();
        let row = AnswerEntity {
            session_id,
            player_id,
            round_number: session.current_round,
            category_id: *category_id,
            answer_text,
            points: 0,
            is_unique: false,
        };
        match store.insert_answer(row).await {
            Ok(()) => {}
            // Already submitted this round; keep the first write.
            Err(err) if err.is_duplicate() => {}
            Err(err) => return Err(err.into()),
        }
    }

    match store
        .insert_completion(CompletionEntity {
            session_id,
            player_id,
            round_number: session.current_round,
            completed_at: OffsetDateTime::now_utc(),
        })
        .await
    {
        Ok(()) => {
            info!(
                session_id = %session_id,
                player_id = %player_id,
                round = session.current_round,
                "answers locked in"
            );
        }
        Err(err) if err.is_duplicate() => {}
        Err(err) => return Err(err.into()),
    }

    runtime.clear_draft(player_id);
    evaluate_completion(state, session_id).await
}

/// Gameplay writes only land during play; a finished session is gone for
/// them, a lobby merely has no round yet.
fn require_active_round(session: &SessionEntity) -> Result<(), ServiceError> {
    match session.status {
        SessionStatus::Playing => Ok(()),
        SessionStatus::Finished => Err(ServiceError::SessionClosed),
        _ => Err(ServiceError::PreconditionFailed(
            "no round is active".into(),
        )),
    }
}

/// Check whether every member has locked in the current round, and if so
/// finalize it: score, then advance or finish.
///
/// Called after every submission and on every change-feed event touching
/// members or completions. The per-session gate plus the versioned session
/// write guarantee a round is finalized exactly once; a caller that loses
/// the race observes the precondition failure and treats the work as done.
pub async fn evaluate_completion(
    state: &SharedState,
    session_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let runtime = watch_service::ensure_runtime(state, session_id).await?;
    let _gate = runtime.finalize_gate().lock().await;

    let session = match store.fetch_session(session_id).await {
        Ok(session) => session,
        Err(StorageError::NotFound { .. }) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if session.status != SessionStatus::Playing {
        return Ok(());
    }

    let members = store.count_members(session_id).await?;
    if members == 0 {
        return Ok(());
    }
    let completions = store
        .count_completions(session_id, session.current_round)
        .await?;
    if completions < members {
        return Ok(());
    }

    let scored = scoring::score_round(&store, &session).await?;
    let standing = store.list_members(session_id).await?;

    let finished_round = session.current_round;
    let finished_letter = session.current_letter;
    let event = machine::completion_event(session.current_round, session.settings.max_rounds);
    let next_status = machine::transition(session.status, event)
        .map_err(|err| ServiceError::PreconditionFailed(err.to_string()))?;

    let mut updated = session;
    updated.status = next_status;
    updated.stopped_by = None;
    match event {
        machine::SessionEvent::AdvanceRound => {
            let letter = session_service::pick_letter(&updated.used_letters);
            let now = OffsetDateTime::now_utc();
            updated.current_round += 1;
            updated.current_letter = Some(letter);
            updated.used_letters.push(letter);
            updated.round_started_at = Some(now);
            updated.round_ends_at =
                Some(now + Duration::seconds(updated.settings.round_time_limit_secs as i64));
        }
        machine::SessionEvent::Finish => {
            updated.current_letter = None;
            updated.round_started_at = None;
            updated.round_ends_at = None;
        }
        machine::SessionEvent::Start => unreachable!("completion never yields a start event"),
    }
    updated.touch();

    let version = match store.update_session(updated).await {
        Ok(written) => written.version,
        // Another finalizer already moved the session on.
        Err(err) if err.is_precondition() => return Ok(()),
        Err(err) => return Err(err.into()),
    };

    runtime.clear_all_drafts();
    sse_events::broadcast_round_scored(
        runtime.hub(),
        &RoundScoredEvent {
            round_number: finished_round,
            letter: finished_letter.map(|letter| letter.to_string()),
            answers: scored.into_iter().map(Into::into).collect(),
            scoreboard: scoreboard(standing),
            version,
        },
    );
    info!(
        session_id = %session_id,
        round = finished_round,
        "round finalized"
    );
    Ok(())
}

/// React to the round deadline elapsing: force-submit every member that has
/// not locked in yet, which in turn finalizes the round.
pub async fn handle_deadline(state: &SharedState, session_id: Uuid) {
    if let Err(err) = force_submit_round(state, session_id).await {
        warn!(session_id = %session_id, error = %err, "deadline handling failed");
    }
}

async fn force_submit_round(state: &SharedState, session_id: Uuid) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    let session = match store.fetch_session(session_id).await {
        Ok(session) => session,
        Err(StorageError::NotFound { .. }) => return Ok(()),
        Err(err) => return Err(err.into()),
    };
    if session.status != SessionStatus::Playing {
        return Ok(());
    }
    let Some(ends_at) = session.round_ends_at else {
        return Ok(());
    };
    // A fire for a deadline that has since been re-armed is stale.
    if ends_at > OffsetDateTime::now_utc() {
        return Ok(());
    }

    let members = store.list_members(session_id).await?;
    let completions = store
        .list_completions(session_id, session.current_round)
        .await?;
    for member in members {
        let done = completions
            .iter()
            .any(|c| c.player_id == member.player_id);
        if !done {
            submit_answers(state, session_id, member.player_id, Vec::new()).await?;
        }
    }
    Ok(())
}

/// Answers of one already-played (or in-flight) round.
pub async fn round_results(
    state: &SharedState,
    session_id: Uuid,
    round_number: u32,
) -> Result<RoundResultsView, ServiceError> {
    let store = state.require_session_store().await?;
    let session = store.fetch_session(session_id).await?;
    if round_number == 0 || round_number > session.current_round {
        return Err(ServiceError::NotFound(format!(
            "round {round_number} has not been played"
        )));
    }

    let answers = store.list_round_answers(session_id, round_number).await?;
    let letter = session
        .used_letters
        .get(round_number as usize - 1)
        .map(|letter| letter.to_string());
    Ok(RoundResultsView {
        round_number,
        letter,
        answers: answers.into_iter().map(Into::into).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::session::{CreateSessionRequest, JoinSessionRequest, SessionSnapshot};
    use crate::services::scoring::{BASE_POINTS, UNIQUE_BONUS};
    use crate::services::test_support::test_state;
    use crate::services::{member_service, session_service};

    async fn playing_session(state: &SharedState) -> (SessionSnapshot, Uuid, Uuid) {
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
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

    fn letter_of(snapshot: &SessionSnapshot) -> char {
        snapshot
            .current_letter
            .as_deref()
            .unwrap()
            .chars()
            .next()
            .unwrap()
    }

    async fn fill_all_categories(
        state: &SharedState,
        snapshot: &SessionSnapshot,
        player_id: Uuid,
        text: &str,
    ) {
        for category in &snapshot.categories {
            record_draft(state, snapshot.id, player_id, category.id, text.to_string())
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn submission_is_exactly_once_per_round() {
        let (state, store) = test_state().await;
        let (session, host_id, _guest) = playing_session(&state).await;
        fill_all_categories(&state, &session, host_id, "Casa").await;

        submit_answers(&state, session.id, host_id, Vec::new())
            .await
            .unwrap();
        // Second call reports success and inserts nothing.
        submit_answers(&state, session.id, host_id, Vec::new())
            .await
            .unwrap();

        let answers = store.list_round_answers(session.id, 1).await.unwrap();
        let mine: Vec<_> = answers
            .iter()
            .filter(|a| a.player_id == host_id)
            .collect();
        assert_eq!(mine.len(), session.categories.len());
        assert_eq!(store.count_completions(session.id, 1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn round_finalizes_only_when_every_member_submitted() {
        let (state, store) = test_state().await;
        let (session, host_id, guest) = playing_session(&state).await;
        let letter = letter_of(&session);
        let valid = format!("{letter}asa");

        fill_all_categories(&state, &session, host_id, &valid).await;
        submit_answers(&state, session.id, host_id, Vec::new())
            .await
            .unwrap();

        // One of two completions: still round 1.
        let mid = store.fetch_session(session.id).await.unwrap();
        assert_eq!(mid.current_round, 1);

        submit_answers(&state, session.id, guest, Vec::new())
            .await
            .unwrap();

        let advanced = store.fetch_session(session.id).await.unwrap();
        assert_eq!(advanced.current_round, 2);
        assert_eq!(advanced.status, SessionStatus::Playing);
        assert_eq!(advanced.used_letters.len(), 2);
        assert_ne!(advanced.used_letters[0], advanced.used_letters[1]);
        assert!(advanced.stopped_by.is_none());

        // The host answered every category validly and uniquely.
        let host = store.fetch_member(session.id, host_id).await.unwrap();
        let expected = (BASE_POINTS + UNIQUE_BONUS) * session.categories.len() as u32;
        assert_eq!(host.score, expected);
        let guest_row = store.fetch_member(session.id, guest).await.unwrap();
        assert_eq!(guest_row.score, 0);
    }

    #[tokio::test]
    async fn explicit_answers_win_over_buffered_drafts() {
        let (state, store) = test_state().await;
        let (session, host_id, _guest) = playing_session(&state).await;
        let category = session.categories[0].id;

        record_draft(&state, session.id, host_id, category, "draft".into())
            .await
            .unwrap();
        submit_answers(
            &state,
            session.id,
            host_id,
            vec![AnswerInput {
                category_id: category,
                text: "explicit".into(),
            }],
        )
        .await
        .unwrap();

        let answers = store.list_round_answers(session.id, 1).await.unwrap();
        let submitted = answers
            .iter()
            .find(|a| a.player_id == host_id && a.category_id == category)
            .unwrap();
        assert_eq!(submitted.answer_text, "explicit");
    }

    #[tokio::test]
    async fn elapsed_deadline_force_submits_everyone() {
        let (state, store) = test_state().await;
        let (session, host_id, _guest) = playing_session(&state).await;
        fill_all_categories(&state, &session, host_id, "Casa").await;

        let mut row = store.fetch_session(session.id).await.unwrap();
        row.round_ends_at = Some(OffsetDateTime::now_utc() - Duration::seconds(1));
        row.touch();
        store.update_session(row).await.unwrap();

        handle_deadline(&state, session.id).await;

        // Both players have completion markers and the round moved on.
        let advanced = store.fetch_session(session.id).await.unwrap();
        assert_eq!(advanced.current_round, 2);
        assert_eq!(store.count_completions(session.id, 1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn future_deadline_fire_is_ignored() {
        let (state, store) = test_state().await;
        let (session, _host, _guest) = playing_session(&state).await;

        handle_deadline(&state, session.id).await;

        let unchanged = store.fetch_session(session.id).await.unwrap();
        assert_eq!(unchanged.current_round, 1);
        assert_eq!(store.count_completions(session.id, 1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn final_round_finishes_the_session() {
        let (state, store) = test_state().await;
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
            &state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings: Some(crate::dto::session::SettingsInput {
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

        submit_answers(&state, created.id, host_id, Vec::new())
            .await
            .unwrap();
        submit_answers(&state, created.id, guest, Vec::new())
            .await
            .unwrap();

        let finished = store.fetch_session(created.id).await.unwrap();
        assert_eq!(finished.status, SessionStatus::Finished);
        assert!(finished.current_letter.is_none());
        assert!(finished.round_ends_at.is_none());
    }

    #[tokio::test]
    async fn gameplay_writes_on_a_finished_session_report_it_gone() {
        let (state, store) = test_state().await;
        let host_id = Uuid::new_v4();
        let created = session_service::create_session(
            &state,
            CreateSessionRequest {
                host_id,
                display_name: "ana".into(),
                category_ids: None,
                settings: Some(crate::dto::session::SettingsInput {
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
        submit_answers(&state, created.id, host_id, Vec::new())
            .await
            .unwrap();
        submit_answers(&state, created.id, guest, Vec::new())
            .await
            .unwrap();
        let finished = store.fetch_session(created.id).await.unwrap();
        assert_eq!(finished.status, SessionStatus::Finished);

        let submit_err = submit_answers(&state, created.id, host_id, Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(submit_err, ServiceError::SessionClosed));

        let draft_err = record_draft(
            &state,
            created.id,
            host_id,
            created.categories[0].id,
            "Casa".into(),
        )
        .await
        .unwrap_err();
        assert!(matches!(draft_err, ServiceError::SessionClosed));
    }

    #[tokio::test]
    async fn drafts_are_rejected_outside_of_play() {
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

        let err = record_draft(
            &state,
            created.id,
            host_id,
            created.categories[0].id,
            "Casa".into(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed(_)));
    }

    #[tokio::test]
    async fn round_results_expose_the_played_letter() {
        let (state, _store) = test_state().await;
        let (session, host_id, guest) = playing_session(&state).await;
        let first_letter = session.used_letters[0].clone();

        submit_answers(&state, session.id, host_id, Vec::new())
            .await
            .unwrap();
        submit_answers(&state, session.id, guest, Vec::new())
            .await
            .unwrap();

        let results = round_results(&state, session.id, 1).await.unwrap();
        assert_eq!(results.round_number, 1);
        assert_eq!(results.letter, Some(first_letter));
        assert_eq!(results.answers.len(), 2 * session.categories.len());

        let err = round_results(&state, session.id, 9).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
