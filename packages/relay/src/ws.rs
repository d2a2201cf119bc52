//! Core envelope routing and connection management.
//!
//! This module provides the implementation for routing relay envelopes:
//! connection lifecycle handling, room joins, targeted signal forwarding, and
//! room broadcasts. Delivery failures for destinations that are permanently
//! gone feed back into the room registry as evictions.

use std::sync::RwLock;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::{
    models::{
        BroadcastPayload, ConnectionId, InboundMessageType, InboundPayload, JoinRoomPayload,
        OutboundPayload, PeerBroadcastPayload, PeerJoinedPayload, PeerSignalPayload, Response,
        RoomId, RoomJoinedPayload, SignalPayload,
    },
    rooms::RoomRegistry,
};

/// Context for a websocket connection.
#[derive(Clone, Default, Debug)]
pub struct WebsocketContext {
    /// Unique identifier for this connection.
    pub connection_id: ConnectionId,
}

/// Errors that can occur when sending websocket messages.
#[derive(Debug, Error)]
pub enum WebsocketSendError {
    /// No session is registered for the connection
    #[error("Session {0} not connected")]
    NoSession(ConnectionId),
    /// The connection's channel closed before the message could be handed off
    #[error("Connection {0} is gone")]
    Gone(ConnectionId),
    /// Unknown error with details
    #[error("Unknown: {0}")]
    Unknown(String),
    /// JSON serialization/deserialization error
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Trait for sending messages via websocket.
///
/// Implemented by the hosting transport; the relay performs exactly one
/// delivery attempt per call and never retries internally.
#[async_trait]
pub trait WebsocketSender: Send + Sync {
    /// Sends a message to a specific connection.
    ///
    /// # Errors
    ///
    /// * If the websocket message fails to send
    async fn send(&self, connection_id: &str, data: &str) -> Result<(), WebsocketSendError>;
}

/// Handles a websocket connection.
#[must_use]
pub fn connect(_sender: &impl WebsocketSender, context: &WebsocketContext) -> Response {
    log::debug!("Connected {}", context.connection_id);

    Response {
        status_code: 200,
        body: "Connected".into(),
    }
}

/// Handles a websocket disconnection and evicts the connection from every
/// room it belongs to. Rooms left empty are dropped.
///
/// # Panics
///
/// * If the room registry `RwLock` panics
pub fn disconnect(
    rooms: &RwLock<RoomRegistry>,
    _sender: &impl WebsocketSender,
    context: &WebsocketContext,
) -> Response {
    let left = rooms.write().unwrap().leave(&context.connection_id);

    if !left.is_empty() {
        log::debug!("Connection {} left rooms {left:?}", context.connection_id);
    }

    log::debug!("Disconnected {}", context.connection_id);

    Response {
        status_code: 200,
        body: "Disconnected".into(),
    }
}

/// Errors that can occur when processing a websocket message.
#[derive(Debug, Error)]
pub enum WebsocketMessageError {
    /// Message is missing the required type field
    #[error("Missing message type")]
    MissingMessageType,
    /// Message type is not recognized or invalid
    #[error("Invalid message type")]
    InvalidMessageType,
    /// Message payload is invalid or malformed
    #[error("Invalid payload: '{0}' ({1})")]
    InvalidPayload(String, String),
    /// The room does not exist
    #[error("Room '{0}' not found")]
    RoomNotFound(RoomId),
    /// The signal target is not known to the relay
    #[error("Target '{0}' not found")]
    TargetNotFound(ConnectionId),
    /// Websocket send error
    #[error(transparent)]
    WebsocketSend(#[from] WebsocketSendError),
}

impl WebsocketMessageError {
    /// Maps the failure onto the acknowledgment returned to the message
    /// sender.
    #[must_use]
    pub fn to_response(&self) -> Response {
        let status_code = match self {
            Self::RoomNotFound(..) | Self::TargetNotFound(..) => 404,
            Self::WebsocketSend(..) => 500,
            Self::MissingMessageType | Self::InvalidMessageType | Self::InvalidPayload(..) => 400,
        };

        Response {
            status_code,
            body: self.to_string(),
        }
    }
}

/// Processes an incoming websocket message and routes it to the appropriate
/// handler.
///
/// The `type` field is validated before the payload is deserialized so an
/// unknown message type and a malformed payload are reported as distinct
/// failures. Rejected messages never mutate the room registry.
///
/// # Errors
///
/// * If the message is an invalid type
/// * If the message fails to process
pub async fn process_message(
    rooms: &RwLock<RoomRegistry>,
    body: Value,
    context: WebsocketContext,
    sender: &impl WebsocketSender,
) -> Result<Response, WebsocketMessageError> {
    let message_type = body
        .get("type")
        .and_then(Value::as_str)
        .ok_or(WebsocketMessageError::MissingMessageType)?
        .parse::<InboundMessageType>()
        .map_err(|_| WebsocketMessageError::InvalidMessageType)?;

    log::trace!(
        "Received {message_type} message from {}",
        context.connection_id
    );

    let payload: InboundPayload = serde_json::from_value(body.clone())
        .map_err(|e| WebsocketMessageError::InvalidPayload(body.to_string(), e.to_string()))?;

    message(rooms, sender, payload, &context).await
}

/// Routes a parsed websocket message to its appropriate handler.
///
/// # Errors
///
/// * If the message fails to process
pub async fn message(
    rooms: &RwLock<RoomRegistry>,
    sender: &impl WebsocketSender,
    message: InboundPayload,
    context: &WebsocketContext,
) -> Result<Response, WebsocketMessageError> {
    let message_type = message.as_ref().to_string();
    log::debug!(
        "Received message type {} from {}: {:?}",
        message_type,
        context.connection_id,
        message
    );

    match message {
        InboundPayload::JoinRoom(payload) => {
            join_room(rooms, sender, context, &payload).await?;
        }
        InboundPayload::Signal(payload) => {
            signal(rooms, sender, context, &payload).await?;
        }
        InboundPayload::Broadcast(payload) => {
            broadcast(rooms, sender, context, &payload).await?;
        }
    }

    log::debug!(
        "Successfully processed message type {} from {}",
        message_type,
        context.connection_id
    );
    Ok(Response {
        status_code: 200,
        body: "Received".into(),
    })
}

async fn join_room(
    rooms: &RwLock<RoomRegistry>,
    sender: &impl WebsocketSender,
    context: &WebsocketContext,
    payload: &JoinRoomPayload,
) -> Result<(), WebsocketMessageError> {
    // prior members are snapshotted before the join so the joiner is never
    // listed as its own peer
    let prior = rooms
        .write()
        .unwrap()
        .join(&payload.room_id, &context.connection_id);

    let joined = OutboundPayload::RoomJoined(RoomJoinedPayload {
        room_id: payload.room_id.clone(),
        peers: prior.iter().cloned().collect(),
    });

    // the joiner is acknowledged before any prior member hears about it
    match deliver(rooms, sender, &context.connection_id, &joined).await {
        Err(WebsocketSendError::NoSession(id)) => {
            evict(rooms, &id);
            return Ok(());
        }
        result => result?,
    }

    if !rooms
        .read()
        .unwrap()
        .is_member(&payload.room_id, &context.connection_id)
    {
        // the join was undone by an eviction during delivery
        return Ok(());
    }

    let peer_joined = OutboundPayload::PeerJoined(PeerJoinedPayload {
        room_id: payload.room_id.clone(),
        peer_id: context.connection_id.clone(),
    });

    deliver_to_all(rooms, sender, prior, &peer_joined).await;

    Ok(())
}

async fn signal(
    rooms: &RwLock<RoomRegistry>,
    sender: &impl WebsocketSender,
    context: &WebsocketContext,
    payload: &SignalPayload,
) -> Result<(), WebsocketMessageError> {
    let forward = OutboundPayload::Signal(PeerSignalPayload {
        peer_id: context.connection_id.clone(),
        signal: payload.signal.clone(),
    });

    // delivered to the target only, never to other room members
    match deliver(rooms, sender, &payload.target_id, &forward).await {
        Err(WebsocketSendError::NoSession(id)) => {
            evict(rooms, &id);
            Err(WebsocketMessageError::TargetNotFound(id))
        }
        result => result.map_err(Into::into),
    }
}

async fn broadcast(
    rooms: &RwLock<RoomRegistry>,
    sender: &impl WebsocketSender,
    context: &WebsocketContext,
    payload: &BroadcastPayload,
) -> Result<(), WebsocketMessageError> {
    let targets = {
        let registry = rooms.read().unwrap();

        if !registry.room_exists(&payload.room_id) {
            return Err(WebsocketMessageError::RoomNotFound(payload.room_id.clone()));
        }

        registry.members_except(&payload.room_id, &context.connection_id)
    };

    let forward = OutboundPayload::Broadcast(PeerBroadcastPayload {
        peer_id: context.connection_id.clone(),
        data: payload.data.clone(),
    });

    deliver_to_all(rooms, sender, targets, &forward).await;

    Ok(())
}

/// Sends one envelope to one connection.
///
/// A destination reported gone is evicted from every room and the failure is
/// swallowed; any other failure is returned to the caller with membership
/// left intact.
async fn deliver(
    rooms: &RwLock<RoomRegistry>,
    sender: &impl WebsocketSender,
    connection_id: &str,
    payload: &OutboundPayload,
) -> Result<(), WebsocketSendError> {
    log::debug!("Sending {payload} to {connection_id}");

    let data = serde_json::to_value(payload)?.to_string();

    match sender.send(connection_id, &data).await {
        Err(WebsocketSendError::Gone(id)) => {
            evict(rooms, &id);
            Ok(())
        }
        result => result,
    }
}

/// Fans an envelope out to every target; each delivery is independent, so one
/// failed target never prevents delivery to the others.
async fn deliver_to_all(
    rooms: &RwLock<RoomRegistry>,
    sender: &impl WebsocketSender,
    targets: impl IntoIterator<Item = ConnectionId> + Send,
    payload: &OutboundPayload,
) {
    for connection_id in targets {
        match deliver(rooms, sender, &connection_id, payload).await {
            Err(WebsocketSendError::NoSession(id)) => evict(rooms, &id),
            Err(error) => {
                log::warn!("Failed to send message to {connection_id}: {error:?}");
            }
            Ok(()) => {}
        }
    }
}

fn evict(rooms: &RwLock<RoomRegistry>, connection_id: &str) {
    let left = rooms.write().unwrap().leave(connection_id);

    log::debug!("Evicted unreachable connection {connection_id} from rooms {left:?}");
}
