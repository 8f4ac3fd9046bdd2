//! Rendezvous HTTP + WebSocket server
//!
//! Routes: `/` landing page, `/health` status JSON, `/ws` signaling socket.
//! One WebSocket connection is one signaling session; its teardown implicitly
//! unregisters whatever identity it held.

use futures::{SinkExt, StreamExt};
use nexus_core::signaling::{ClientRequest, Directory, Rendezvous, ServerEvent, SessionId};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use warp::filters::BoxedFilter;
use warp::Filter;

/// The landing page HTML, compiled into the binary.
const LANDING_HTML: &str = include_str!("landing.html");

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    peers_online: usize,
}

/// Serve until the process is stopped.
pub async fn run(port: u16) -> anyhow::Result<()> {
    let routes = routes(Arc::new(Rendezvous::new(Arc::new(Directory::new()))));
    info!("signaling rendezvous listening on 0.0.0.0:{}", port);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;
    Ok(())
}

fn routes(rendezvous: Arc<Rendezvous>) -> BoxedFilter<(impl warp::Reply,)> {
    let rendezvous_filter = warp::any().map({
        let rendezvous = rendezvous.clone();
        move || rendezvous.clone()
    });

    // 1. Landing page at /
    let landing_html = LANDING_HTML.to_string();
    let landing_route = warp::path::end()
        .and(warp::get())
        .map(move || {
            warp::http::Response::builder()
                .header("content-type", "text/html; charset=utf-8")
                .body(landing_html.clone())
                .unwrap()
        })
        .boxed();

    // 2. Health check
    let health_route = warp::path("health")
        .and(warp::get())
        .and(rendezvous_filter.clone())
        .map(|rendezvous: Arc<Rendezvous>| {
            warp::reply::json(&HealthResponse {
                status: "healthy",
                peers_online: rendezvous.directory().len(),
            })
        })
        .boxed();

    // 3. Signaling WebSocket
    let ws_route = warp::path("ws")
        .and(warp::ws())
        .and(rendezvous_filter)
        .map(|ws: warp::ws::Ws, rendezvous| {
            ws.on_upgrade(move |socket| handle_session(socket, rendezvous))
        })
        .boxed();

    let cors = warp::cors().allow_any_origin();
    landing_route
        .or(health_route)
        .or(ws_route)
        .with(cors)
        .boxed()
}

async fn handle_session(socket: warp::ws::WebSocket, rendezvous: Arc<Rendezvous>) {
    let session = SessionId::new();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<ServerEvent>();

    info!("session {} connected", session);

    // Outbox → socket pump
    let forward_task = tokio::spawn(async move {
        while let Some(event) = outbox_rx.recv().await {
            let Ok(json) = serde_json::to_string(&event) else {
                continue;
            };
            if ws_tx.send(warp::ws::Message::text(json)).await.is_err() {
                break;
            }
        }
    });

    // Socket → dispatch
    while let Some(result) = ws_rx.next().await {
        let msg = match result {
            Ok(msg) => msg,
            Err(e) => {
                debug!("session {} socket error: {}", session, e);
                break;
            }
        };
        if msg.is_close() {
            break;
        }
        let Ok(text) = msg.to_str() else {
            continue;
        };
        let request = match serde_json::from_str::<ClientRequest>(text) {
            Ok(request) => request,
            Err(e) => {
                let _ = outbox_tx.send(ServerEvent::Error {
                    message: format!("unrecognized request: {e}"),
                });
                continue;
            }
        };
        if let Err(err) = rendezvous.handle(session, &outbox_tx, request) {
            let _ = outbox_tx.send(ServerEvent::Error {
                message: err.to_string(),
            });
        }
    }

    rendezvous.disconnect(session);
    forward_task.abort();
    info!(
        "session {} disconnected | peers online: {}",
        session,
        rendezvous.directory().len()
    );
}
