use std::{convert::Infallible, time::Duration};

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::session::SessionSnapshot,
    dto::sse::ServerEvent,
    error::ServiceError,
    services::{session_service, sse_events, watch_service},
    state::SharedState,
};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Attach a client to a session's event stream.
///
/// The first event on the wire is always a full snapshot taken after the
/// subscription, so the client never has a gap between the state it rendered
/// and the events that follow. Every later event carries the session version;
/// clients discard deliveries older than what they already hold.
pub async fn attach(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>> + use<>>, ServiceError> {
    let store = state.require_session_store().await?;
    store.fetch_session(session_id).await?;

    let runtime = watch_service::ensure_runtime(state, session_id).await?;
    let receiver = runtime.hub().subscribe();
    let snapshot = session_service::snapshot(state, session_id).await?;
    Ok(to_sse_stream(session_id, snapshot, receiver))
}

/// Convert a hub subscription into an SSE response, fronted by the snapshot
/// and forwarded until the client disconnects.
fn to_sse_stream(
    session_id: Uuid,
    snapshot: SessionSnapshot,
    mut receiver: broadcast::Receiver<ServerEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // small bounded channel between forwarder and response
    let (tx, rx) = mpsc::channel::<Result<Event, Infallible>>(8);

    // forwarder task: snapshot first, then reads from broadcast and pushes
    // into mpsc
    tokio::spawn(async move {
        match Event::default()
            .event(sse_events::EVENT_SNAPSHOT)
            .json_data(&snapshot)
        {
            Ok(event) => {
                if tx.send(Ok(event)).await.is_err() {
                    return;
                }
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to serialize the initial snapshot");
                return;
            }
        }

        loop {
            tokio::select! {
                _ = tx.closed() => break,
                recv_result = receiver.recv() => {
                    match recv_result {
                        Ok(payload) => {
                            let mut event = Event::default().data(payload.data);
                            if let Some(name) = payload.event {
                                event = event.event(name);
                            }

                            if tx.send(Ok(event)).await.is_err() {
                                break;
                            }
                        }
                        Err(RecvError::Closed) => break,
                        Err(RecvError::Lagged(_)) => {
                            // Skip lagged messages; the watcher follows up
                            // with a fresh snapshot broadcast.
                            continue;
                        }
                    }
                }
            }
        }

        info!(session_id = %session_id, "event stream disconnected");
    });

    // response stream reads from mpsc; when client disconnects axum drops this stream
    let stream = ReceiverStream::new(rx);
    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(KEEP_ALIVE_INTERVAL)
            .text("keep-alive"),
    )
}
