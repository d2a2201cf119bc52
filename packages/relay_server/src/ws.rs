//! WebSocket server and connection handling.
//!
//! This module hosts the relay over actix WebSockets. It manages client
//! connections, routes envelopes through [`signalbox_relay`], and delivers
//! outbound messages to the per-connection handler tasks.

pub mod api;
pub mod handler;
pub mod server;

/// Connection ID type for identifying WebSocket clients.
///
/// Each connected client is assigned a unique numeric identifier; its decimal
/// string form is the identifier used in relay envelopes.
pub type ConnId = u64;

/// Message type for WebSocket communication.
///
/// All WebSocket messages are transmitted as JSON-encoded strings.
pub type Msg = String;
