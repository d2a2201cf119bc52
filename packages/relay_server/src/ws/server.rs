//! A multi-room relay server.

use std::{
    collections::BTreeMap,
    io,
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use rand::Rng as _;
use serde_json::Value;
use signalbox_relay::{
    WebsocketContext, WebsocketMessageError, WebsocketSendError, WebsocketSender, models::Response,
    rooms::RoomRegistry,
};
use strum_macros::AsRefStr;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::ws::{ConnId, Msg};

/// A command received by the [`WsServer`].
#[derive(Debug, AsRefStr)]
pub enum Command {
    /// Registers a new WebSocket connection.
    Connect {
        /// Channel sender for messages to this connection.
        conn_tx: mpsc::UnboundedSender<Msg>,
        /// Channel to send back the assigned connection ID.
        res_tx: oneshot::Sender<ConnId>,
    },

    /// Removes a WebSocket connection.
    Disconnect {
        /// Connection ID to disconnect.
        conn: ConnId,
    },

    /// Processes an incoming envelope from a connection.
    Message {
        /// The received message.
        msg: Msg,
        /// Connection ID that sent the message.
        conn: ConnId,
        /// Channel to send back the acknowledgment.
        res_tx: oneshot::Sender<Response>,
    },
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// A multi-room relay server.
///
/// Contains the logic of how connections signal each other plus room
/// management. Commands are processed one at a time, so a fan-out's recipient
/// set can never change mid-delivery.
///
/// Call and spawn [`run`](Self::run) to start processing commands.
#[derive(Debug)]
pub struct WsServer {
    /// Map of connection IDs to their message receivers.
    sessions: BTreeMap<ConnId, mpsc::UnboundedSender<Msg>>,

    /// Room membership, shared with the relay router.
    rooms: RwLock<RoomRegistry>,

    /// Tracks total number of historical connections established.
    visitor_count: Arc<AtomicUsize>,

    /// Command receiver.
    cmd_rx: mpsc::UnboundedReceiver<Command>,

    token: CancellationToken,
}

#[async_trait]
impl WebsocketSender for WsServer {
    async fn send(&self, connection_id: &str, data: &str) -> Result<(), WebsocketSendError> {
        let Ok(id) = connection_id.parse::<ConnId>() else {
            return Err(WebsocketSendError::NoSession(connection_id.to_owned()));
        };

        self.send_message_to(id, data.to_string())
    }
}

impl WsServer {
    #[must_use]
    pub fn new() -> (Self, WsServerHandle) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let handle = WsServerHandle {
            cmd_tx,
            token: token.clone(),
        };

        (
            Self {
                sessions: BTreeMap::new(),
                rooms: RwLock::new(RoomRegistry::new()),
                visitor_count: Arc::new(AtomicUsize::new(0)),
                cmd_rx,
                token,
            },
            handle,
        )
    }

    /// Send message directly to the user.
    fn send_message_to(&self, id: ConnId, msg: impl Into<String>) -> Result<(), WebsocketSendError> {
        let Some(session) = self.sessions.get(&id) else {
            return Err(WebsocketSendError::NoSession(id.to_string()));
        };

        // errors if client disconnected abruptly and hasn't been timed-out yet
        session
            .send(msg.into())
            .map_err(|_| WebsocketSendError::Gone(id.to_string()))
    }

    async fn on_message(&self, id: ConnId, msg: impl Into<String> + Send) -> Response {
        let context = WebsocketContext {
            connection_id: id.to_string(),
        };
        let payload = msg.into();

        let result = match serde_json::from_str::<Value>(&payload) {
            Ok(body) => signalbox_relay::process_message(&self.rooms, body, context, self).await,
            Err(e) => Err(WebsocketMessageError::InvalidPayload(
                payload.clone(),
                e.to_string(),
            )),
        };

        match result {
            Ok(response) => response,
            Err(error) => {
                log::error!("Failed to process message from {id}: {payload:?}: {error:?}");

                let response = error.to_response();

                // non-success acknowledgments go back to the sender only;
                // success is observable to the caller but never put on the wire
                if let Ok(ack) = serde_json::to_string(&response)
                    && let Err(err) = self.send_message_to(id, ack)
                {
                    log::debug!("Failed to deliver ack to {id}: {err:?}");
                }

                response
            }
        }
    }

    /// Register new session and assign unique ID to this session
    fn connect(&mut self, tx: mpsc::UnboundedSender<Msg>) -> ConnId {
        // register session with random connection ID
        let id = rand::rng().random::<ConnId>();
        self.sessions.insert(id, tx);

        log::info!("Someone joined {id}");

        let count = self.visitor_count.fetch_add(1, Ordering::SeqCst);
        log::debug!("Visitor count: {}", count + 1);

        let context = WebsocketContext {
            connection_id: id.to_string(),
        };

        let _ = signalbox_relay::connect(self, &context);

        // send id back
        id
    }

    /// Unregister connection and evict it from every room.
    fn disconnect(&mut self, conn_id: ConnId) {
        log::info!("Someone disconnected {conn_id}");

        let count = self.visitor_count.fetch_sub(1, Ordering::SeqCst);
        log::debug!("Visitor count: {}", count - 1);

        // remove sender
        if self.sessions.remove(&conn_id).is_some() {
            let context = WebsocketContext {
                connection_id: conn_id.to_string(),
            };

            let _ = signalbox_relay::disconnect(&self.rooms, self, &context);
        }
    }

    async fn process_command(&mut self, cmd: Command) {
        let cmd_str = cmd.to_string();
        log::debug!("process_command: cmd={cmd_str}");

        match cmd {
            Command::Connect { conn_tx, res_tx } => {
                let conn_id = self.connect(conn_tx);
                if res_tx.send(conn_id).is_err() {
                    log::error!("Failed to send connection ID {conn_id} back to the session");
                }
            }

            Command::Disconnect { conn } => self.disconnect(conn),

            Command::Message { conn, msg, res_tx } => {
                let response = self.on_message(conn, msg).await;
                let _ = res_tx.send(response);
            }
        }

        log::debug!("process_command: Finished processing cmd {cmd_str}");
    }

    /// Process commands until the channel closes or the server is shut down.
    ///
    /// Commands are handled sequentially; the room registry is only ever
    /// mutated from this loop.
    ///
    /// # Errors
    ///
    /// * Infallible; the `io::Result` mirrors the HTTP server it is joined
    ///   with
    pub async fn run(mut self) -> io::Result<()> {
        let token = self.token.clone();

        loop {
            let cmd = tokio::select! {
                () = token.cancelled() => {
                    log::debug!("WsServer was cancelled");
                    break;
                }
                cmd = self.cmd_rx.recv() => cmd,
            };

            let Some(cmd) = cmd else {
                break;
            };

            log::trace!("Received WsServer command {cmd}");
            self.process_command(cmd).await;
        }

        log::debug!("Stopped WsServer");

        Ok(())
    }
}

/// Handle and command sender for ws server.
///
/// Reduces boilerplate of setting up response channels in WebSocket handlers.
#[derive(Debug, Clone)]
pub struct WsServerHandle {
    cmd_tx: mpsc::UnboundedSender<Command>,
    token: CancellationToken,
}

impl WsServerHandle {
    /// Register client message sender and obtain connection ID.
    ///
    /// # Panics
    ///
    /// * If the ws server has been dropped
    pub async fn connect(&self, conn_tx: mpsc::UnboundedSender<Msg>) -> ConnId {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::Connect { conn_tx, res_tx })
            .unwrap();

        // unwrap: ws server does not drop our response channel
        res_rx.await.unwrap()
    }

    /// Route an inbound client envelope and return the relay's
    /// acknowledgment.
    ///
    /// # Panics
    ///
    /// * If the ws server has been dropped
    pub async fn send_message(&self, conn: ConnId, msg: impl Into<String> + Send) -> Response {
        let (res_tx, res_rx) = oneshot::channel();

        // unwrap: ws server should not have been dropped
        self.cmd_tx
            .send(Command::Message {
                msg: msg.into(),
                conn,
                res_tx,
            })
            .unwrap();

        // unwrap: ws server does not drop our response channel
        res_rx.await.unwrap()
    }

    /// Unregister message sender and evict the connection from its rooms.
    pub fn disconnect(&self, conn: ConnId) {
        if let Err(e) = self.cmd_tx.send(Command::Disconnect { conn }) {
            log::error!("Failed to send command: {e:?}");
        }
    }

    pub fn shutdown(&self) {
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    async fn connect(handle: &WsServerHandle) -> (ConnId, mpsc::UnboundedReceiver<Msg>) {
        let (conn_tx, conn_rx) = mpsc::unbounded_channel();
        let conn_id = handle.connect(conn_tx).await;
        (conn_id, conn_rx)
    }

    fn recv_json(rx: &mut mpsc::UnboundedReceiver<Msg>) -> Value {
        serde_json::from_str(&rx.try_recv().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_envelopes_route_between_connections() {
        let (server, handle) = WsServer::new();
        let server = tokio::spawn(server.run());

        let (a, mut a_rx) = connect(&handle).await;
        let (b, mut b_rx) = connect(&handle).await;

        let response = handle
            .send_message(a, json!({"type": "join-room", "roomId": "r1"}).to_string())
            .await;
        assert_eq!(response.status_code, 200);

        let room_joined = recv_json(&mut a_rx);
        assert_eq!(room_joined["type"], "room-joined");
        assert_eq!(room_joined["peers"], json!([]));

        handle
            .send_message(b, json!({"type": "join-room", "roomId": "r1"}).to_string())
            .await;

        let room_joined = recv_json(&mut b_rx);
        assert_eq!(room_joined["peers"], json!([a.to_string()]));

        let peer_joined = recv_json(&mut a_rx);
        assert_eq!(peer_joined["type"], "peer-joined");
        assert_eq!(peer_joined["peerId"], b.to_string());

        handle
            .send_message(
                a,
                json!({"type": "broadcast", "roomId": "r1", "data": "x"}).to_string(),
            )
            .await;

        let broadcast = recv_json(&mut b_rx);
        assert_eq!(broadcast["type"], "broadcast");
        assert_eq!(broadcast["peerId"], a.to_string());
        assert_eq!(broadcast["data"], "x");

        // the broadcaster receives nothing for its own broadcast
        assert!(a_rx.try_recv().is_err());

        handle.shutdown();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_signal_is_forwarded_to_target_only() {
        let (server, handle) = WsServer::new();
        let server = tokio::spawn(server.run());

        let (a, mut a_rx) = connect(&handle).await;
        let (b, mut b_rx) = connect(&handle).await;
        let (c, mut c_rx) = connect(&handle).await;

        for conn in [a, b, c] {
            handle
                .send_message(conn, json!({"type": "join-room", "roomId": "r1"}).to_string())
                .await;
        }

        while a_rx.try_recv().is_ok() {}
        while c_rx.try_recv().is_ok() {}
        while b_rx.try_recv().is_ok() {}

        let response = handle
            .send_message(
                a,
                json!({
                    "type": "signal",
                    "targetId": b.to_string(),
                    "signal": {"sdp": "offer"},
                })
                .to_string(),
            )
            .await;
        assert_eq!(response.status_code, 200);

        let signal = recv_json(&mut b_rx);
        assert_eq!(signal["type"], "signal");
        assert_eq!(signal["peerId"], a.to_string());
        assert_eq!(signal["signal"], json!({"sdp": "offer"}));

        assert!(a_rx.try_recv().is_err());
        assert!(c_rx.try_recv().is_err());

        handle.shutdown();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_evicts_connection_and_drops_empty_room() {
        let (server, handle) = WsServer::new();
        let server = tokio::spawn(server.run());

        let (a, mut a_rx) = connect(&handle).await;
        let (b, _b_rx) = connect(&handle).await;

        handle
            .send_message(a, json!({"type": "join-room", "roomId": "r1"}).to_string())
            .await;
        handle
            .send_message(b, json!({"type": "join-room", "roomId": "r1"}).to_string())
            .await;
        while a_rx.try_recv().is_ok() {}

        handle.disconnect(b);

        // the disconnected peer is no longer a valid signal target
        let response = handle
            .send_message(
                a,
                json!({"type": "signal", "targetId": b.to_string(), "signal": null}).to_string(),
            )
            .await;
        assert_eq!(response.status_code, 404);

        let ack = recv_json(&mut a_rx);
        assert_eq!(ack["statusCode"], 404);

        // the room still exists while the last member remains
        let response = handle
            .send_message(
                a,
                json!({"type": "broadcast", "roomId": "r1", "data": 1}).to_string(),
            )
            .await;
        assert_eq!(response.status_code, 200);

        handle.disconnect(a);

        let (c, mut c_rx) = connect(&handle).await;
        let response = handle
            .send_message(
                c,
                json!({"type": "broadcast", "roomId": "r1", "data": 1}).to_string(),
            )
            .await;
        assert_eq!(response.status_code, 404);
        assert_eq!(recv_json(&mut c_rx)["statusCode"], 404);

        handle.shutdown();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_messages_are_acked_with_client_errors() {
        let (server, handle) = WsServer::new();
        let server = tokio::spawn(server.run());

        let (a, mut a_rx) = connect(&handle).await;

        let response = handle.send_message(a, "not json").await;
        assert_eq!(response.status_code, 400);
        assert_eq!(recv_json(&mut a_rx)["statusCode"], 400);

        let response = handle
            .send_message(a, json!({"type": "nope"}).to_string())
            .await;
        assert_eq!(response.status_code, 400);
        assert_eq!(response.body, "Invalid message type");
        assert_eq!(recv_json(&mut a_rx)["statusCode"], 400);

        handle.shutdown();
        server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_closed_session_channel_is_evicted_on_delivery() {
        let (server, handle) = WsServer::new();
        let server = tokio::spawn(server.run());

        let (a, mut a_rx) = connect(&handle).await;
        let (b, b_rx) = connect(&handle).await;
        let (c, mut c_rx) = connect(&handle).await;

        for conn in [a, b, c] {
            handle
                .send_message(conn, json!({"type": "join-room", "roomId": "r1"}).to_string())
                .await;
        }
        while a_rx.try_recv().is_ok() {}
        while c_rx.try_recv().is_ok() {}

        // b's handler went away without a disconnect notification
        drop(b_rx);

        let response = handle
            .send_message(
                a,
                json!({"type": "broadcast", "roomId": "r1", "data": "x"}).to_string(),
            )
            .await;

        // the sender's request still succeeds and the live peer is delivered
        assert_eq!(response.status_code, 200);
        assert_eq!(recv_json(&mut c_rx)["data"], "x");

        // the dead peer was evicted: a fresh broadcast from c reaches a only
        let response = handle
            .send_message(
                c,
                json!({"type": "broadcast", "roomId": "r1", "data": "y"}).to_string(),
            )
            .await;
        assert_eq!(response.status_code, 200);
        assert_eq!(recv_json(&mut a_rx)["data"], "y");

        handle.shutdown();
        server.await.unwrap().unwrap();
    }
}
