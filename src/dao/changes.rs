use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::dao::models::{AnswerEntity, CompletionEntity, MemberEntity, SessionEntity};

/// Capacity of each per-session change channel. Subscribers that fall behind
/// observe a lag error and must re-read the store, so a bounded buffer is safe.
const FEED_CAPACITY: usize = 128;

/// Table a change event originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Sessions,
    Members,
    RoundAnswers,
    RoundCompletions,
}

/// Kind of row mutation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// Typed row payload attached to a change event.
#[derive(Debug, Clone, PartialEq)]
pub enum RowData {
    Session(SessionEntity),
    Member(MemberEntity),
    Answer(AnswerEntity),
    Completion(CompletionEntity),
}

/// One row mutation observed on a session's tables.
///
/// Delivery is at-least-once and unordered across tables; consumers derive
/// conclusions by re-reading rows, never from the event alone.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    /// Table the mutation touched.
    pub table: TableKind,
    /// Insert, update, or delete.
    pub op: ChangeOp,
    /// Row state before the mutation, when known.
    pub old_row: Option<RowData>,
    /// Row state after the mutation; absent for deletes.
    pub new_row: Option<RowData>,
}

impl ChangeEvent {
    /// Event for a freshly inserted row.
    pub fn inserted(table: TableKind, row: RowData) -> Self {
        Self {
            table,
            op: ChangeOp::Insert,
            old_row: None,
            new_row: Some(row),
        }
    }

    /// Event for a replaced row. The pre-image is attached only when the
    /// backend already had it loaded; consumers must not depend on it.
    pub fn updated(table: TableKind, old_row: Option<RowData>, new_row: RowData) -> Self {
        Self {
            table,
            op: ChangeOp::Update,
            old_row,
            new_row: Some(new_row),
        }
    }

    /// Event for a deleted row.
    pub fn deleted(table: TableKind, row: RowData) -> Self {
        Self {
            table,
            op: ChangeOp::Delete,
            old_row: Some(row),
            new_row: None,
        }
    }
}

/// Per-session fan-out of change events, shared by every storage backend.
///
/// Backends publish an event after each successful write. This service is the
/// only writer of its store, so emitting at the store boundary observes every
/// mutation without any database-side stream.
pub struct ChangeFeed {
    channels: DashMap<Uuid, broadcast::Sender<ChangeEvent>>,
}

impl ChangeFeed {
    /// Create an empty feed with no channels.
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to every future change touching `session_id`, creating the
    /// channel when this is the first subscriber.
    pub fn subscribe(&self, session_id: Uuid) -> broadcast::Receiver<ChangeEvent> {
        self.channels
            .entry(session_id)
            .or_insert_with(|| broadcast::channel(FEED_CAPACITY).0)
            .subscribe()
    }

    /// Publish a change to current subscribers of `session_id`. Events for
    /// sessions nobody watches are dropped; subscribers always start with a
    /// store read, so nothing is lost.
    pub fn publish(&self, session_id: Uuid, event: ChangeEvent) {
        if let Some(sender) = self.channels.get(&session_id) {
            let _ = sender.send(event);
        }
    }

    /// Drop the channel of a deleted session. Pending events are still
    /// delivered; receivers then observe a closed channel.
    pub fn remove(&self, session_id: Uuid) {
        self.channels.remove(&session_id);
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::OffsetDateTime;

    fn member(session_id: Uuid) -> MemberEntity {
        MemberEntity {
            session_id,
            player_id: Uuid::new_v4(),
            display_name: "ana".into(),
            score: 0,
            is_ready: false,
            joined_at: OffsetDateTime::now_utc(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let feed = ChangeFeed::new();
        let session_id = Uuid::new_v4();
        let mut rx = feed.subscribe(session_id);

        let event = ChangeEvent::inserted(TableKind::Members, RowData::Member(member(session_id)));
        feed.publish(session_id, event.clone());

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn events_are_scoped_to_their_session() {
        let feed = ChangeFeed::new();
        let watched = Uuid::new_v4();
        let other = Uuid::new_v4();
        let mut rx = feed.subscribe(watched);
        // Create the other channel too, so the publish is not simply dropped.
        let _other_rx = feed.subscribe(other);

        feed.publish(
            other,
            ChangeEvent::inserted(TableKind::Members, RowData::Member(member(other))),
        );

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn removing_a_session_closes_its_channel() {
        let feed = ChangeFeed::new();
        let session_id = Uuid::new_v4();
        let mut rx = feed.subscribe(session_id);

        feed.remove(session_id);

        assert!(matches!(
            rx.recv().await,
            Err(tokio::sync::broadcast::error::RecvError::Closed)
        ));
    }
}
