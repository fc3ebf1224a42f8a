use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Deserialize, Serialize, ToSchema)]
/// Messages accepted from player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerInboundMessage {
    /// First message on every connection; binds the socket to a member.
    Identify { player_id: Uuid },
    /// Live draft text for one category, buffered server-side until
    /// submission.
    Draft { category_id: Uuid, text: String },
    /// Lock in the buffered drafts for the current round.
    Submit,
    /// Arm the shared STOP countdown.
    Stop,
    #[serde(other)]
    Unknown,
}

impl PlayerInboundMessage {
    /// Player id carried by an identification message.
    pub fn identify_player_id(&self) -> Option<Uuid> {
        match self {
            Self::Identify { player_id } => Some(*player_id),
            _ => None,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Messages sent back to player WebSocket clients.
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PlayerOutboundMessage {
    /// Positive acknowledgement after successful identification.
    Identified { session_id: Uuid, player_id: Uuid },
    /// An action sent over the socket was applied.
    Accepted { action: String },
    /// An action sent over the socket was refused; the session state did not
    /// change.
    Rejected { action: String, message: String },
}
