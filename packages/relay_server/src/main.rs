#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

mod api;
mod ws;

use std::{env, sync::LazyLock};

use actix_cors::Cors;
use actix_web::{App, http, middleware};
use api::health_endpoint;
use tokio::try_join;

static WS_SERVER_HANDLE: LazyLock<tokio::sync::RwLock<Option<ws::server::WsServerHandle>>> =
    LazyLock::new(|| tokio::sync::RwLock::new(None));

#[actix_web::main]
async fn main() -> Result<(), std::io::Error> {
    env_logger::init();

    let service_port = {
        let args: Vec<String> = env::args().collect();

        if args.len() > 1 {
            args[1].parse::<u16>().expect("Invalid port argument")
        } else {
            env::var("PORT").map_or(8000, |x| {
                x.parse::<u16>().expect("Invalid PORT environment variable")
            })
        }
    };

    let (ws_server, ws_server_handle) = ws::server::WsServer::new();
    let ws_server = tokio::spawn(ws_server.run());

    WS_SERVER_HANDLE.write().await.replace(ws_server_handle);

    let app = move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST"])
            .allowed_headers(vec![http::header::AUTHORIZATION, http::header::ACCEPT])
            .allowed_header(http::header::CONTENT_TYPE)
            .supports_credentials()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .wrap(middleware::Compress::default())
            .service(health_endpoint)
            .service(ws::api::websocket)
    };

    let mut http_server = actix_web::HttpServer::new(app);

    if let Ok(workers) = env::var("ACTIX_WORKERS") {
        let workers = workers
            .parse::<usize>()
            .expect("Invalid ACTIX_WORKERS environment variable");
        log::debug!("Running with {workers} Actix workers");
        http_server = http_server.workers(workers);
    }

    let http_server = http_server
        .bind((
            env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_string()),
            service_port,
        ))?
        .run();

    try_join!(
        async move {
            let resp = http_server.await;

            log::debug!("Shutting down ws server...");
            if let Some(handle) = WS_SERVER_HANDLE.write().await.take() {
                handle.shutdown();
            }

            resp
        },
        async move {
            let resp = ws_server.await.expect("Failed to shut down ws server");
            log::debug!("WsServer connection closed");
            resp
        },
    )?;

    log::debug!("Server shut down");

    Ok(())
}
