use actix_web::{HttpResponse, Result, get, web};
use tokio::task::spawn_local;

use crate::WS_SERVER_HANDLE;
use crate::ws::handler;

#[get("/ws")]
pub async fn websocket(
    req: actix_web::HttpRequest,
    stream: web::Payload,
) -> Result<HttpResponse, actix_web::Error> {
    let ws_server = WS_SERVER_HANDLE
        .read()
        .await
        .as_ref()
        .expect("No WsServerHandle available")
        .clone();

    let (response, session, msg_stream) = actix_ws::handle(&req, stream)?;

    // spawn websocket handler (and don't await it) so that the response is returned immediately
    spawn_local(handler::handle_ws(ws_server, session, msg_stream));

    Ok(response)
}
