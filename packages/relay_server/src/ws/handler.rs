use std::time::{Duration, Instant};

use actix_ws::Message;
use futures_util::{
    StreamExt as _,
    future::{Either, select},
};
use tokio::{pin, sync::mpsc, time::interval};

use crate::ws::{ConnId, server::WsServerHandle};

/// How often heartbeat pings are sent
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// How long before lack of client response causes a timeout
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Route envelopes received from the client, respond to ping messages, and
/// monitor connection health to detect network issues and free up resources.
#[allow(clippy::future_not_send)]
pub async fn handle_ws(
    ws_server: WsServerHandle,
    mut session: actix_ws::Session,
    mut msg_stream: actix_ws::MessageStream,
) {
    log::info!("connected");

    let mut last_heartbeat = Instant::now();
    let mut interval = interval(HEARTBEAT_INTERVAL);

    let (conn_tx, mut conn_rx) = mpsc::unbounded_channel();

    let conn_id = ws_server.connect(conn_tx).await;

    log::debug!("Connection id: {conn_id}");

    let close_reason = loop {
        // most of the futures we process need to be stack-pinned to work with select()

        let tick = interval.tick();
        pin!(tick);

        let msg_rx = conn_rx.recv();
        pin!(msg_rx);

        let messages = select(msg_stream.next(), msg_rx);
        pin!(messages);

        match select(messages, tick).await {
            // commands & messages received from client
            Either::Left((Either::Left((Some(Ok(msg)), _)), _)) => match msg {
                Message::Ping(bytes) => {
                    last_heartbeat = Instant::now();
                    session.pong(&bytes).await.unwrap();
                }

                Message::Pong(_) => {
                    last_heartbeat = Instant::now();
                }

                Message::Text(text) => {
                    last_heartbeat = Instant::now();
                    process_text_msg(&ws_server, &text, conn_id).await;
                }

                Message::Binary(bytes) => {
                    last_heartbeat = Instant::now();

                    match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => {
                            process_text_msg(&ws_server, &text, conn_id).await;
                        }
                        Err(e) => {
                            log::warn!("unexpected binary message: {e:?}");
                        }
                    }
                }

                Message::Close(reason) => break reason,

                _ => {
                    break None;
                }
            },

            // client WebSocket stream error
            Either::Left((Either::Left((Some(Err(err)), _)), _)) => {
                log::error!("{}", err);
                break None;
            }

            // client WebSocket stream ended
            Either::Left((Either::Left((None, _)), _)) => break None,

            // relay messages received for this connection
            Either::Left((Either::Right((Some(relay_msg), _)), _)) => {
                if let Err(err) = session.text(relay_msg).await {
                    log::error!("Failed to send text message: {err:?}");
                }
            }

            // all connection's message senders were dropped
            Either::Left((Either::Right((None, _)), _)) => unreachable!(
                "all connection message senders were dropped; ws server may have panicked"
            ),

            // heartbeat internal tick
            Either::Right((_inst, _)) => {
                // if no heartbeat ping/pong received recently, close the connection
                if Instant::now().duration_since(last_heartbeat) > CLIENT_TIMEOUT {
                    log::info!(
                        "client has not sent heartbeat in over {CLIENT_TIMEOUT:?}; disconnecting"
                    );
                    break None;
                }

                // send heartbeat ping
                let _ = session.ping(b"").await;
            }
        };
    };

    ws_server.disconnect(conn_id);

    // attempt to close connection gracefully
    let _ = session.close(close_reason).await;
}

async fn process_text_msg(ws_server: &WsServerHandle, text: &str, conn: ConnId) {
    let response = ws_server.send_message(conn, text).await;

    if response.status_code == 200 {
        log::debug!("Processed message from {conn}: {}", response.body);
    } else {
        log::debug!(
            "Rejected message from {conn}: {} {}",
            response.status_code,
            response.body
        );
    }
}
