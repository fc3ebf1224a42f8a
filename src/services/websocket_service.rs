use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dto::ws::{PlayerInboundMessage, PlayerOutboundMessage},
    error::ServiceError,
    services::{round_service, stop_service},
    state::SharedState,
};

const IDENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle the full lifecycle of one player WebSocket connection.
///
/// The first frame must identify the player; the socket is refused when the
/// identification does not name a member of the session. Afterwards the
/// socket carries drafts, submissions, and STOP calls, each acknowledged with
/// an `accepted` or `rejected` reply.
pub async fn handle_socket(state: SharedState, session_id: Uuid, socket: WebSocket) {
    let (mut sender, mut receiver) = socket.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    // Dedicated writer task keeps outbound messages flowing even while we await inbound frames.
    let writer_task = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            if sender.send(message).await.is_err() {
                break;
            }
        }
    });

    let initial_message = match tokio::time::timeout(IDENT_TIMEOUT, receiver.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => text,
        Ok(Some(Ok(Message::Close(_)))) => {
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Ok(_))) => {
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(Some(Err(err))) => {
            warn!(session_id = %session_id, error = %err, "websocket receive error");
            finalize(writer_task, outbound_tx).await;
            return;
        }
        Ok(None) | Err(_) => {
            warn!(session_id = %session_id, "websocket identification timed out");
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let inbound = match serde_json::from_str::<PlayerInboundMessage>(&initial_message) {
        Ok(message) => message,
        Err(err) => {
            warn!(session_id = %session_id, error = %err, "failed to parse player message");
            let _ = outbound_tx.send(Message::Close(None));
            finalize(writer_task, outbound_tx).await;
            return;
        }
    };

    let Some(player_id) = inbound.identify_player_id() else {
        warn!(session_id = %session_id, "first message was not identification");
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    };

    if let Err(err) = verify_membership(&state, session_id, player_id).await {
        warn!(session_id = %session_id, player_id = %player_id, error = %err, "identification refused");
        let _ = send_to_socket(
            &outbound_tx,
            &PlayerOutboundMessage::Rejected {
                action: "identify".into(),
                message: err.to_string(),
            },
        );
        let _ = outbound_tx.send(Message::Close(None));
        finalize(writer_task, outbound_tx).await;
        return;
    }

    if send_to_socket(
        &outbound_tx,
        &PlayerOutboundMessage::Identified {
            session_id,
            player_id,
        },
    )
    .is_err()
    {
        finalize(writer_task, outbound_tx).await;
        return;
    }

    info!(session_id = %session_id, player_id = %player_id, "player socket connected");

    while let Some(message) = receiver.next().await {
        match message {
            Ok(Message::Text(text)) => match serde_json::from_str::<PlayerInboundMessage>(&text) {
                Ok(inbound) => {
                    if dispatch(&state, session_id, player_id, inbound, &outbound_tx)
                        .await
                        .is_err()
                    {
                        // Writer gone, nobody reads the replies any more.
                        break;
                    }
                }
                Err(err) => {
                    warn!(session_id = %session_id, player_id = %player_id, error = %err, "failed to parse player message");
                }
            },
            Ok(Message::Ping(payload)) => {
                let _ = outbound_tx.send(Message::Pong(payload));
            }
            Ok(Message::Close(frame)) => {
                let _ = outbound_tx.send(Message::Close(frame));
                break;
            }
            Ok(Message::Binary(_)) => {}
            Ok(Message::Pong(_)) => {}
            Err(err) => {
                warn!(session_id = %session_id, player_id = %player_id, error = %err, "websocket error");
                break;
            }
        }
    }

    info!(session_id = %session_id, player_id = %player_id, "player socket disconnected");

    finalize(writer_task, outbound_tx).await;
}

/// Apply one inbound action and acknowledge it. Fails only when the writer
/// channel is gone.
async fn dispatch(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
    inbound: PlayerInboundMessage,
    outbound_tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), ()> {
    let (action, result) = match inbound {
        PlayerInboundMessage::Draft { category_id, text } => (
            "draft",
            round_service::record_draft(state, session_id, player_id, category_id, text).await,
        ),
        PlayerInboundMessage::Submit => (
            "submit",
            round_service::submit_answers(state, session_id, player_id, Vec::new())
                .await
                .map(|_| ()),
        ),
        PlayerInboundMessage::Stop => (
            "stop",
            stop_service::call_stop(state, session_id, player_id).await,
        ),
        PlayerInboundMessage::Identify { .. } => {
            warn!(session_id = %session_id, player_id = %player_id, "ignoring duplicate identification message");
            return Ok(());
        }
        PlayerInboundMessage::Unknown => {
            warn!(session_id = %session_id, player_id = %player_id, "ignoring unknown message type");
            return Ok(());
        }
    };

    let reply = match result {
        Ok(()) => PlayerOutboundMessage::Accepted {
            action: action.into(),
        },
        Err(err) => PlayerOutboundMessage::Rejected {
            action: action.into(),
            message: err.to_string(),
        },
    };
    send_to_socket(outbound_tx, &reply)
}

async fn verify_membership(
    state: &SharedState,
    session_id: Uuid,
    player_id: Uuid,
) -> Result<(), ServiceError> {
    let store = state.require_session_store().await?;
    store.fetch_member(session_id, player_id).await?;
    Ok(())
}

/// Serialize a payload and push it onto the writer channel. Fails only when
/// the writer is gone; serialization failures are logged and dropped.
fn send_to_socket(
    tx: &mpsc::UnboundedSender<Message>,
    message: &PlayerOutboundMessage,
) -> Result<(), ()> {
    let payload = match serde_json::to_string(message) {
        Ok(payload) => payload,
        Err(err) => {
            warn!(error = %err, "failed to serialize outbound message `{message:?}`");
            return Ok(());
        }
    };
    tx.send(Message::Text(payload.into())).map_err(|_| ())
}

/// Ensure the writer task winds down before we return from the socket handler.
async fn finalize(writer_task: JoinHandle<()>, outbound_tx: mpsc::UnboundedSender<Message>) {
    drop(outbound_tx);
    let _ = writer_task.await;
}
