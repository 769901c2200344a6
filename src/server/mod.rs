//! HTTP/WebSocket front door.
//!
//! Thin by design: the router, the `/ws` upgrade with its admission gate,
//! the writer task that owns the socket's send half, and graceful shutdown.
//! Everything per-call happens inside [`CallSession`].

pub mod http;

use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::{get, post},
    Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::session::{CallRegistry, CallSession, Gateway, SessionControl};
use crate::telephony::protocol::OutboundFrame;

/// How long existing calls get to finish after a shutdown signal.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Clone)]
pub struct ServerState {
    pub gateway: Gateway,
}

pub fn router(gateway: Gateway) -> Router {
    let state = ServerState { gateway };
    Router::new()
        .route("/health", get(http::health))
        .route("/metrics", get(http::metrics))
        .route("/twiml", get(http::twiml))
        .route("/call/outbound", post(http::outbound_call))
        .route("/ws", get(ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until SIGTERM/ctrl-c, then drain: stop admitting new
/// sessions, give existing calls up to 30 s, then exit.
pub async fn serve(gateway: Gateway) -> Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        gateway.config.server.host, gateway.config.server.port
    )
    .parse()
    .context("invalid server address")?;

    let registry = gateway.registry.clone();
    let app = router(gateway);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on {addr}");

    let drain = registry.clone();
    let graceful = axum::serve(listener, app).with_graceful_shutdown(async move {
        shutdown_signal().await;
        info!("shutdown signal received, draining active calls");
        drain.begin_draining();
    });

    tokio::select! {
        result = graceful => result.context("server error")?,
        _ = drain_deadline(registry) => {
            warn!("drain deadline reached, exiting with calls still active");
        }
    }
    Ok(())
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| handle_media_stream(socket, state))
}

async fn handle_media_stream(mut socket: WebSocket, state: ServerState) {
    // Hard admission gate, before any protocol frame is touched.
    if !state.gateway.registry.try_admit() {
        warn!("at capacity, refusing new media stream");
        let _ = socket
            .send(Message::Close(Some(CloseFrame {
                code: close_code::AGAIN,
                reason: "try again later".into(),
            })))
            .await;
        return;
    }

    info!("media stream connected");
    let (ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, frame_rx) = mpsc::channel::<OutboundFrame>(64);
    let writer = tokio::spawn(write_loop(ws_tx, frame_rx));

    let mut session = CallSession::new(state.gateway.clone(), frame_tx);

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                if session.handle_text(&text).await == SessionControl::End {
                    break;
                }
            }
            Ok(Message::Close(_)) => {
                info!("media stream disconnected");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("websocket read error, terminating session: {e}");
                session.mark_error(&e.to_string());
                break;
            }
        }
    }

    // Same cleanup for stop, close, and error paths; the admission slot is
    // released only once it has fully run.
    session.shutdown().await;
    state.gateway.registry.release();
    writer.abort();
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<OutboundFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let json = match serde_json::to_string(&frame) {
            Ok(json) => json,
            Err(e) => {
                error!("failed to serialize outbound frame: {e}");
                continue;
            }
        };
        if ws_tx.send(Message::Text(json.into())).await.is_err() {
            break;
        }
    }
}

/// Resolves only if draining takes longer than the deadline.
async fn drain_deadline(registry: Arc<CallRegistry>) {
    registry.drained_signal().await;
    if registry.wait_idle(DRAIN_TIMEOUT).await {
        // Calls finished in time; let the graceful path win.
        std::future::pending::<()>().await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
