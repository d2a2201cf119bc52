//! Room-based signaling relay for `Signalbox`.
//!
//! This crate contains the transport-agnostic core of the relay: clients join
//! named rooms, exchange connection-negotiation payloads with specific peers,
//! and broadcast data to all room members. The relay carries no media or
//! application payload semantics; it is membership bookkeeping plus message
//! routing, with eviction of unreachable peers.
//!
//! # Main Components
//!
//! * [`WebsocketSender`] - Trait the hosting transport implements to deliver
//!   messages to a connection
//! * [`WebsocketContext`] - Context information for a WebSocket connection
//! * [`process_message`] - Routes an incoming envelope
//! * [`connect`] and [`disconnect`] - Handle connection lifecycle
//! * [`rooms::RoomRegistry`] - Room membership table
//! * [`models`] - Envelope payload types for inbound and outbound messages
//!
//! # Example
//!
//! ```rust
//! # use signalbox_relay::{WebsocketSender, WebsocketContext, WebsocketSendError, connect};
//! # struct MockSender;
//! # #[async_trait::async_trait]
//! # impl WebsocketSender for MockSender {
//! #     async fn send(&self, _: &str, _: &str) -> Result<(), WebsocketSendError> { Ok(()) }
//! # }
//! # let sender = MockSender;
//! // When a client connects
//! let context = WebsocketContext {
//!     connection_id: "client-123".to_string(),
//! };
//! let response = connect(&sender, &context);
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod ws;

pub use ws::*;

pub mod models;
pub mod rooms;
