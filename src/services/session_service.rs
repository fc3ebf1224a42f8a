use std::sync::Arc;

use rand::Rng;
use time::{Duration, OffsetDateTime};
use tracing::info;
use uuid::Uuid;

use crate::{
    dao::{
        models::{MemberEntity, SessionEntity, SessionStatus},
        session_store::SessionStore,
        storage::StorageError,
    },
    dto::session::{
        CategoryView, CreateSessionRequest, SessionSnapshot, UpdateSettingsRequest,
    },
    dto::sse::SessionRematchEvent,
    error::ServiceError,
    services::{sse_events, watch_service},
    state::{
        SharedState,
        machine::{self, MIN_PLAYERS_TO_START, MIN_SESSION_CATEGORIES, SessionEvent},
    },
};

/// Length of generated join codes.
const JOIN_CODE_LENGTH: usize = 5;
/// Code alphabet without the characters commonly misread aloud (0/O, 1/I/L).
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";
/// Collision retries before session creation gives up.
const MAX_CODE_ATTEMPTS: usize = 8;

const ALPHABET: [char; 26] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R',
    'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Open a new session lobby with the caller as host and first member.
pub async fn create_session(
    state: &SharedState,
    request: CreateSessionRequest,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;

    let categories = match request.category_ids {
        Some(ids) => validate_catalog_ids(&store, ids).await?,
        None => default_selection(state, &store).await?,
    };
    let settings = request
        .settings
        .map(Into::into)
        .unwrap_or_else(|| state.config().default_settings());

    let now = OffsetDateTime::now_utc();
    let mut session = SessionEntity {
        id: Uuid::new_v4(),
        code: generate_join_code(),
        host_id: request.host_id,
        status: SessionStatus::Waiting,
        current_round: 0,
        current_letter: None,
        used_letters: Vec::new(),
        categories,
        settings,
        round_started_at: None,
        round_ends_at: None,
        stopped_by: None,
        version: 0,
        created_at: now,
        updated_at: now,
    };

    let mut attempts = 0;
    loop {
        match store.insert_session(session.clone()).await {
            Ok(()) => break,
            Err(err @ StorageError::Duplicate { .. }) => {
                attempts += 1;
                if attempts >= MAX_CODE_ATTEMPTS {
                    return Err(ServiceError::Unavailable(err));
                }
                session.code = generate_join_code();
            }
            Err(err) => return Err(err.into()),
        }
    }

    store
        .insert_member(MemberEntity {
            session_id: session.id,
            player_id: request.host_id,
            display_name: request.display_name,
            score: 0,
            is_ready: true,
            joined_at: now,
        })
        .await?;

    watch_service::ensure_runtime(state, session.id).await?;
    info!(session_id = %session.id, code = %session.code, "session created");

    snapshot(state, session.id).await
}

/// Resolve a join code (case-insensitive) to the session it names.
pub async fn resolve_by_code(
    state: &SharedState,
    code: &str,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let session = store
        .find_session_by_code(code.trim().to_ascii_uppercase())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("no session with code `{code}`")))?;
    assemble_snapshot(&store, session).await
}

/// Current client-facing view of a session, read straight from the store.
pub async fn snapshot(
    state: &SharedState,
    session_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let session = store.fetch_session(session_id).await?;
    assemble_snapshot(&store, session).await
}

/// Replace the session rules; host-only, lobby-only.
pub async fn update_settings(
    state: &SharedState,
    session_id: Uuid,
    request: UpdateSettingsRequest,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let mut session = store.fetch_session(session_id).await?;
    require_host(&session, request.player_id)?;
    if session.status != SessionStatus::Waiting {
        return Err(ServiceError::PreconditionFailed(
            "settings can only change while the lobby is open".into(),
        ));
    }

    session.settings = request.settings.into();
    session.touch();
    let session = store.update_session(session).await?;
    assemble_snapshot(&store, session).await
}

/// Leave the lobby and start the first round; host-only, needs two players.
pub async fn start(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let mut session = store.fetch_session(session_id).await?;
    require_host(&session, player_id)?;

    let next_status = machine::transition(session.status, SessionEvent::Start)
        .map_err(|err| ServiceError::PreconditionFailed(err.to_string()))?;
    let members = store.count_members(session_id).await?;
    if members < MIN_PLAYERS_TO_START {
        return Err(ServiceError::PreconditionFailed(format!(
            "a session needs at least {MIN_PLAYERS_TO_START} players to start (got {members})"
        )));
    }

    let letter = pick_letter(&[]);
    let now = OffsetDateTime::now_utc();
    session.status = next_status;
    session.current_round = 1;
    session.current_letter = Some(letter);
    session.used_letters = vec![letter];
    session.round_started_at = Some(now);
    session.round_ends_at =
        Some(now + Duration::seconds(session.settings.round_time_limit_secs as i64));
    session.stopped_by = None;
    session.touch();

    let session = store.update_session(session).await?;
    info!(session_id = %session.id, letter = %letter, "session started");
    assemble_snapshot(&store, session).await
}

/// Open a fresh lobby from a finished session, announcing it to its members.
pub async fn rematch(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<SessionSnapshot, ServiceError> {
    let store = state.require_session_store().await?;
    let finished = store.fetch_session(session_id).await?;
    require_host(&finished, player_id)?;
    if finished.status != SessionStatus::Finished {
        return Err(ServiceError::PreconditionFailed(
            "a rematch can only follow a finished session".into(),
        ));
    }

    let host = store.fetch_member(session_id, player_id).await?;
    let next = create_session(
        state,
        CreateSessionRequest {
            host_id: player_id,
            display_name: host.display_name,
            category_ids: Some(finished.categories.clone()),
            settings: None,
        },
    )
    .await?;

    // Settings carry over as-is; create_session applied the defaults.
    let mut created = store.fetch_session(next.id).await?;
    created.settings = finished.settings;
    created.touch();
    let created = store.update_session(created).await?;

    if let Some(runtime) = state.runtime(session_id) {
        sse_events::broadcast_rematch(
            runtime.hub(),
            &SessionRematchEvent {
                next_session_id: created.id,
                next_code: created.code.clone(),
            },
        );
    }

    assemble_snapshot(&store, created).await
}

/// Catalog of categories sessions can play.
pub async fn list_categories(state: &SharedState) -> Result<Vec<CategoryView>, ServiceError> {
    let store = state.require_session_store().await?;
    Ok(store
        .list_categories()
        .await?
        .into_iter()
        .map(Into::into)
        .collect())
}

/// Project a session row and its satellite rows into a snapshot.
pub(crate) async fn assemble_snapshot(
    store: &Arc<dyn SessionStore>,
    session: SessionEntity,
) -> Result<SessionSnapshot, ServiceError> {
    let members = store.list_members(session.id).await?;
    let completions = if session.status == SessionStatus::Playing {
        store
            .list_completions(session.id, session.current_round)
            .await?
    } else {
        Vec::new()
    };
    let categories = category_views(store, &session.categories).await?;
    Ok(SessionSnapshot::assemble(
        session,
        members,
        &completions,
        categories,
    ))
}

/// Resolve category ids to named views, preserving the session's order.
async fn category_views(
    store: &Arc<dyn SessionStore>,
    ids: &[Uuid],
) -> Result<Vec<CategoryView>, ServiceError> {
    let catalog = store.list_categories().await?;
    Ok(ids
        .iter()
        .filter_map(|id| catalog.iter().find(|c| c.id == *id))
        .cloned()
        .map(Into::into)
        .collect())
}

async fn validate_catalog_ids(
    store: &Arc<dyn SessionStore>,
    ids: Vec<Uuid>,
) -> Result<Vec<Uuid>, ServiceError> {
    let catalog = store.list_categories().await?;
    for id in &ids {
        if !catalog.iter().any(|c| c.id == *id) {
            return Err(ServiceError::InvalidInput(format!(
                "unknown category `{id}`"
            )));
        }
    }
    Ok(ids)
}

async fn default_selection(
    state: &SharedState,
    store: &Arc<dyn SessionStore>,
) -> Result<Vec<Uuid>, ServiceError> {
    let catalog = store.list_categories().await?;
    if catalog.len() < MIN_SESSION_CATEGORIES {
        return Err(ServiceError::PreconditionFailed(format!(
            "the catalog holds fewer than {MIN_SESSION_CATEGORIES} categories"
        )));
    }
    Ok(catalog
        .into_iter()
        .take(state.config().default_category_count())
        .map(|c| c.id)
        .collect())
}

fn require_host(session: &SessionEntity, player_id: Uuid) -> Result<(), ServiceError> {
    if session.host_id != player_id {
        return Err(ServiceError::PreconditionFailed(
            "only the host may do this".into(),
        ));
    }
    Ok(())
}

fn generate_join_code() -> String {
    let mut rng = rand::rng();
    (0..JOIN_CODE_LENGTH)
        .map(|_| JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())] as char)
        .collect()
}

/// Pick a round letter, avoiding the ones already played. Once the whole
/// alphabet has been consumed the pool resets.
pub(crate) fn pick_letter(used: &[char]) -> char {
    let pool: Vec<char> = ALPHABET
        .iter()
        .copied()
        .filter(|letter| !used.contains(letter))
        .collect();
    let pool = if pool.is_empty() {
        ALPHABET.to_vec()
    } else {
        pool
    };
    let mut rng = rand::rng();
    pool[rng.random_range(0..pool.len())]
}
