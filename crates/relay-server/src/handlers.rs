//! Connection handlers for the Payrelay server.
//!
//! Each WebSocket connection gets a [`Subscriber`] and two pumps. The read
//! pump decodes inbound frames and submits them to the relay loop; the write
//! pump drains the subscriber's outbound buffer onto the socket.

use crate::config::{Config, HeartbeatConfig};
use crate::metrics::{self, ConnectionMetricsGuard};
use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use payrelay_core::{Envelope, Hub, HubHandle, Outbound, RelayError, Subscriber};
use payrelay_protocol::codec;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// Handle to the relay loop.
    pub hub: HubHandle,
    /// Server configuration.
    pub config: Config,
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    let (hub, _hub_task) = Hub::spawn(config.hub_config());
    if config.metrics.enabled {
        metrics::spawn_stats_reporter(
            hub.clone(),
            Duration::from_millis(config.metrics.stats_interval_ms),
        );
    }

    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("Payrelay server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}{}", addr, config.websocket_path);

    serve(listener, Arc::new(AppState { hub, config })).await
}

/// Build the HTTP router.
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve connections from an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, app(state)).await?;
    Ok(())
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    match state.hub.stats().await {
        Ok(stats) => Json(serde_json::json!({
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "channels": stats.channel_count,
            "subscribers": stats.subscriber_count,
            "memberships": stats.total_memberships,
        }))
        .into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "unavailable",
                "error": e.to_string(),
            })),
        )
            .into_response(),
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.max_message_size(state.config.limits.max_message_size)
        .on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (subscriber, outbound) = Subscriber::new(state.config.limits.send_buffer);
    let id = subscriber.id();
    debug!(subscriber = %id, "WebSocket connected");

    let (sink, stream) = socket.split();
    let mut writer = tokio::spawn(write_pump(sink, outbound, state.config.heartbeat.clone()));

    // Whichever side stops first ends the connection.
    let writer_done = tokio::select! {
        () = read_pump(stream, &subscriber, &state) => false,
        result = &mut writer => {
            if let Err(e) = result {
                warn!(subscriber = %id, error = %e, "Write pump failed");
            }
            true
        }
    };

    subscriber.close();
    if let Err(e) = state.hub.unregister(subscriber) {
        warn!(subscriber = %id, error = %e, "Failed to unregister");
    }

    if !writer_done {
        if let Err(e) = writer.await {
            warn!(subscriber = %id, error = %e, "Write pump failed");
        }
    }

    debug!(subscriber = %id, "WebSocket disconnected");
}

/// Read frames from the client until it goes away or falls silent.
async fn read_pump(mut stream: SplitStream<WebSocket>, subscriber: &Subscriber, state: &AppState) {
    let deadline = state.config.heartbeat.timeout();

    loop {
        let msg = match tokio::time::timeout(deadline, stream.next()).await {
            Ok(msg) => msg,
            Err(_) => {
                debug!(subscriber = %subscriber.id(), "Read deadline elapsed");
                metrics::record_error("timeout");
                break;
            }
        };

        let result = match msg {
            Some(Ok(Message::Text(text))) => {
                relay_frame(text.as_bytes(), subscriber, &state.hub).await
            }
            Some(Ok(Message::Binary(data))) => relay_frame(&data, subscriber, &state.hub).await,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                // Pings are answered by the WebSocket layer; any traffic resets the deadline.
                Ok(())
            }
            Some(Ok(Message::Close(_))) => {
                debug!(subscriber = %subscriber.id(), "Received close frame");
                break;
            }
            Some(Err(e)) => {
                warn!(subscriber = %subscriber.id(), error = %e, "WebSocket error");
                metrics::record_error("websocket");
                break;
            }
            None => {
                debug!(subscriber = %subscriber.id(), "WebSocket stream ended");
                break;
            }
        };

        if let Err(e) = result {
            error!(subscriber = %subscriber.id(), error = %e, "Relay unavailable");
            break;
        }
    }
}

/// Decode one inbound frame and hand it to the relay loop.
///
/// Undecodable frames are dropped; only a stopped hub is an error.
async fn relay_frame(data: &[u8], subscriber: &Subscriber, hub: &HubHandle) -> Result<(), RelayError> {
    metrics::record_message(data.len(), "inbound");

    let frame = match codec::decode_frame(data) {
        Ok(frame) => frame,
        Err(e) => {
            warn!(
                subscriber = %subscriber.id(),
                data = %String::from_utf8_lossy(data),
                error = %e,
                "Dropping malformed frame"
            );
            metrics::record_error("decode");
            return Ok(());
        }
    };

    let start = Instant::now();
    let envelope = Envelope::from_frame(subscriber.clone(), frame);
    match hub.try_submit(envelope.clone()) {
        Ok(()) => {}
        Err(RelayError::HubBusy) => {
            // Queue is full: wait for room, which also stops reading this socket.
            metrics::record_error("hub_busy");
            hub.submit(envelope).await?;
        }
        Err(e) => return Err(e),
    }
    metrics::record_submit_latency(start.elapsed().as_secs_f64());
    Ok(())
}

/// Drain the outbound buffer onto the socket, pinging while idle.
///
/// Ends with a close frame once the buffer is closed.
async fn write_pump(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: Outbound,
    heartbeat: HeartbeatConfig,
) {
    let id = outbound.id();
    let write_timeout = heartbeat.write_timeout();
    let mut ticker = tokio::time::interval(heartbeat.interval());
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        let message = tokio::select! {
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    metrics::record_message(payload.len(), "outbound");
                    Message::Text(String::from_utf8_lossy(&payload).into_owned())
                }
                None => {
                    debug!(subscriber = %id, "Outbound buffer closed");
                    let _ = tokio::time::timeout(write_timeout, sink.send(Message::Close(None))).await;
                    break;
                }
            },
            _ = ticker.tick() => Message::Ping(Vec::new()),
        };

        match tokio::time::timeout(write_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(subscriber = %id, error = %e, "Write failed");
                break;
            }
            Err(_) => {
                warn!(subscriber = %id, "Write deadline elapsed");
                metrics::record_error("write_timeout");
                break;
            }
        }
    }
}
