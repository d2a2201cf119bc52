use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum_macros::{AsRefStr, EnumString};

/// Room ID type for identifying relay rooms.
///
/// Rooms are named groups that connections join for receiving each other's
/// join notifications and broadcasts.
pub type RoomId = String;

/// Connection ID type for identifying WebSocket clients.
///
/// Opaque to the relay; assigned by the hosting transport.
pub type ConnectionId = String;

/// Response for websocket operations.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    /// HTTP-style status code indicating operation result.
    pub status_code: u16,
    /// Response message body.
    pub body: String,
}

#[derive(Debug, Serialize, Deserialize, EnumString, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum InboundMessageType {
    JoinRoom,
    Signal,
    Broadcast,
}

impl std::fmt::Display for InboundMessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Inbound envelope, tagged by the `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[serde(tag = "type")]
#[strum(serialize_all = "kebab-case")]
pub enum InboundPayload {
    JoinRoom(JoinRoomPayload),
    Signal(SignalPayload),
    Broadcast(BroadcastPayload),
}

impl std::fmt::Display for InboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Join the named room, creating it on first join.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct JoinRoomPayload {
    pub room_id: RoomId,
}

/// Forward a negotiation payload to one peer.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SignalPayload {
    pub target_id: ConnectionId,
    pub signal: Value,
}

/// Broadcast data to every other member of a room.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastPayload {
    pub room_id: RoomId,
    pub data: Value,
}

/// Outbound envelope, tagged by the `type` field.
#[derive(Debug, Serialize, Deserialize, Clone, AsRefStr)]
#[serde(rename_all = "kebab-case")]
#[serde(tag = "type")]
#[strum(serialize_all = "kebab-case")]
pub enum OutboundPayload {
    RoomJoined(RoomJoinedPayload),
    PeerJoined(PeerJoinedPayload),
    Signal(PeerSignalPayload),
    Broadcast(PeerBroadcastPayload),
}

impl std::fmt::Display for OutboundPayload {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Sent to a joiner; `peers` is the room membership before the join.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RoomJoinedPayload {
    pub room_id: RoomId,
    pub peers: Vec<ConnectionId>,
}

/// Sent to each prior member of a room when a new peer joins.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PeerJoinedPayload {
    pub room_id: RoomId,
    pub peer_id: ConnectionId,
}

/// A negotiation payload forwarded from `peer_id`.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PeerSignalPayload {
    pub peer_id: ConnectionId,
    pub signal: Value,
}

/// Data broadcast by `peer_id` to the room.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PeerBroadcastPayload {
    pub peer_id: ConnectionId,
    pub data: Value,
}
