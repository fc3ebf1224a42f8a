pub mod clock;
pub mod machine;
mod sse;

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use dashmap::DashMap;
use time::OffsetDateTime;
use tokio::sync::{Mutex, RwLock, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::{config::AppConfig, dao::session_store::SessionStore, error::ServiceError};

pub use self::sse::SseHub;

/// Shared handle to the application state.
pub type SharedState = Arc<AppState>;

/// Capacity of each per-session SSE broadcast channel.
const EVENT_HUB_CAPACITY: usize = 32;

/// Central application state storing the storage handle and the per-session
/// runtime bundles.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    runtimes: DashMap<Uuid, Arc<SessionRuntime>>,
    config: AppConfig,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            runtimes: DashMap::new(),
            config,
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the session store or fail because the application is degraded.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_session_store(&self) {
        {
            let mut guard = self.session_store.write().await;
            guard.take();
        }
        self.update_degraded(true).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        let guard = self.session_store.read().await;
        guard.is_none()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Runtime bundle of a session, if one is live on this process.
    pub fn runtime(&self, session_id: Uuid) -> Option<Arc<SessionRuntime>> {
        self.runtimes.get(&session_id).map(|entry| entry.clone())
    }

    /// Runtime bundle of a session, created on first use. The boolean reports
    /// whether this call created it, so exactly one caller spawns its tasks.
    pub fn runtime_entry(&self, session_id: Uuid) -> (Arc<SessionRuntime>, bool) {
        match self.runtimes.entry(session_id) {
            dashmap::Entry::Occupied(entry) => (entry.get().clone(), false),
            dashmap::Entry::Vacant(entry) => {
                let runtime = SessionRuntime::new(session_id);
                entry.insert(runtime.clone());
                (runtime, true)
            }
        }
    }

    /// Detach and return a session's runtime bundle.
    pub fn remove_runtime(&self, session_id: Uuid) -> Option<Arc<SessionRuntime>> {
        self.runtimes.remove(&session_id).map(|(_, runtime)| runtime)
    }

    /// Update and broadcast the degraded flag when the value changes.
    async fn update_degraded(&self, value: bool) {
        if self.is_degraded().await == value {
            return;
        }

        let _ = self.degraded.send(value);
    }
}

/// Per-session runtime bundle: the event hub, live draft buffers, the armed
/// deadline, and the background tasks driving them.
///
/// Everything here is reconstructible from the store; losing it on restart
/// costs at most the unsubmitted drafts.
#[derive(Debug)]
pub struct SessionRuntime {
    session_id: Uuid,
    hub: SseHub,
    drafts: DashMap<Uuid, HashMap<Uuid, String>>,
    deadline: watch::Sender<Option<OffsetDateTime>>,
    finalize_gate: Mutex<()>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl SessionRuntime {
    fn new(session_id: Uuid) -> Arc<Self> {
        let (deadline_tx, _rx) = watch::channel(None);
        Arc::new(Self {
            session_id,
            hub: SseHub::new(EVENT_HUB_CAPACITY),
            drafts: DashMap::new(),
            deadline: deadline_tx,
            finalize_gate: Mutex::new(()),
            tasks: StdMutex::new(Vec::new()),
        })
    }

    /// Session this runtime belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Broadcast hub for this session's event stream.
    pub fn hub(&self) -> &SseHub {
        &self.hub
    }

    /// Gate serialising round finalisation; scoring and advancing must not
    /// run twice for the same round.
    pub fn finalize_gate(&self) -> &Mutex<()> {
        &self.finalize_gate
    }

    /// Subscribe to deadline changes; consumed by the session clock.
    pub fn deadline_watcher(&self) -> watch::Receiver<Option<OffsetDateTime>> {
        self.deadline.subscribe()
    }

    /// Arm, move, or disarm the round deadline.
    pub fn set_deadline(&self, deadline: Option<OffsetDateTime>) {
        self.deadline.send_replace(deadline);
    }

    /// Snapshot of a player's draft buffer, keyed by category.
    pub fn draft_for(&self, player_id: Uuid) -> HashMap<Uuid, String> {
        self.drafts
            .get(&player_id)
            .map(|entry| entry.clone())
            .unwrap_or_default()
    }

    /// Record the latest draft text a player typed for one category.
    pub fn set_draft_entry(&self, player_id: Uuid, category_id: Uuid, text: String) {
        self.drafts.entry(player_id).or_default().insert(category_id, text);
    }

    /// Drop a player's draft buffer, after submission consumed it.
    pub fn clear_draft(&self, player_id: Uuid) {
        self.drafts.remove(&player_id);
    }

    /// Drop every draft buffer, at a round boundary.
    pub fn clear_all_drafts(&self) {
        self.drafts.clear();
    }

    /// Track a background task tied to this session's lifetime.
    pub fn register_task(&self, handle: JoinHandle<()>) {
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Abort every background task of this session.
    pub fn shutdown(&self) {
        let handles = match self.tasks.lock() {
            Ok(mut tasks) => std::mem::take(&mut *tasks),
            Err(_) => return,
        };
        for handle in handles {
            handle.abort();
        }
    }
}
