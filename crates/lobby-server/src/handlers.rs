//! Connection handlers for Lobby server.
//!
//! This module handles the connection lifecycle and hands inbound frames to
//! the dispatcher.

use crate::config::Config;
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
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tenvis_lobby_core::{
    Connection, ConnectionId, DispatchOutcome, Dispatcher, IdentityLookup, MemoryIdentityStore,
    SensitiveFilter,
};
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

/// Shared server state.
pub struct AppState {
    /// The message dispatcher, owning the session registry and connection set.
    pub dispatcher: Dispatcher,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create app state, loading identities from the configured file.
    ///
    /// # Errors
    ///
    /// Returns an error if the identities file cannot be loaded.
    pub fn new(config: Config) -> Result<Self> {
        let store = match config.identities_path() {
            Some(path) => MemoryIdentityStore::from_file(&path)
                .with_context(|| format!("Failed to load identities: {}", path))?,
            None => {
                warn!("No identities file configured, every identify will be rejected");
                MemoryIdentityStore::new()
            }
        };

        Ok(Self::with_lookup(config, Arc::new(store)))
    }

    /// Create app state around an existing identity lookup.
    #[must_use]
    pub fn with_lookup(config: Config, lookup: Arc<dyn IdentityLookup>) -> Self {
        let filter = SensitiveFilter::new(config.presence.sensitive_fields.iter().cloned());
        Self {
            dispatcher: Dispatcher::new(lookup)
                .with_filter(filter)
                .with_max_event_size(config.limits.max_event_size),
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone())?);

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Bind and serve
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr).await?;

    info!("Lobby server listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, config.transport.websocket_path
    );

    serve(listener, state).await
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(&state.config.transport.websocket_path, get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serve on an already bound listener.
///
/// # Errors
///
/// Returns an error if serving fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    axum::serve(listener, build_router(state)).await?;
    Ok(())
}

/// Health report body.
fn health_report(state: &AppState) -> serde_json::Value {
    serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "connections": state.dispatcher.connections().len(),
        "sessions": state.dispatcher.registry().len(),
    })
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    axum::Json(health_report(&state))
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let active = state.dispatcher.connections().len();
    if active >= state.config.limits.max_connections {
        warn!(active, "Connection limit reached, rejecting upgrade");
        metrics::record_error("connection_limit");
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    }

    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Handle a WebSocket connection.
async fn handle_websocket(socket: WebSocket, state: Arc<AppState>) {
    // Record connection metrics
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (connection, mut outbox) = Connection::open();
    let connection_id = connection.id();
    state.dispatcher.connections().insert(connection);

    debug!(connection = %connection_id, "WebSocket connected");

    // Split the WebSocket
    let (mut sender, mut receiver) = socket.split();

    let mut heartbeat = tokio::time::interval(Duration::from_millis(
        state.config.heartbeat.interval_ms.max(1),
    ));
    // The first tick completes immediately
    heartbeat.tick().await;

    // Message processing loop
    loop {
        tokio::select! {
            biased;

            // Events queued for this connection by broadcasts
            Some(payload) = outbox.recv() => {
                metrics::record_message(payload.len(), "outbound");
                let text = String::from_utf8_lossy(&payload).into_owned();
                if sender.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }

            _ = heartbeat.tick() => {
                if sender.send(Message::Ping(Vec::new())).await.is_err() {
                    break;
                }
            }

            // Receive from WebSocket
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_frame(&state, connection_id, text.as_bytes()).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        handle_frame(&state, connection_id, &data).await;
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        // Ignore pongs
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!(connection = %connection_id, "Received close frame");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(connection = %connection_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => {
                        debug!(connection = %connection_id, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    // Cleanup: drop the connection and any session it still owns
    if let Some(user) = state.dispatcher.disconnect(connection_id) {
        debug!(connection = %connection_id, user = %user, "Session released on disconnect");
    }
    metrics::set_active_sessions(state.dispatcher.registry().len());

    debug!(connection = %connection_id, "WebSocket disconnected");
}

/// Handle an inbound frame.
async fn handle_frame(state: &AppState, connection_id: ConnectionId, frame: &[u8]) {
    metrics::record_message(frame.len(), "inbound");

    if frame.len() > state.config.limits.max_message_size {
        warn!(
            connection = %connection_id,
            size = frame.len(),
            max = state.config.limits.max_message_size,
            "Dropping oversized frame"
        );
        metrics::record_error("message_too_large");
        return;
    }

    let start = Instant::now();
    let outcome = state.dispatcher.on_message(connection_id, frame).await;
    metrics::record_latency(start.elapsed().as_secs_f64());
    metrics::record_dispatch(&outcome);

    if let DispatchOutcome::Joined { .. } = outcome {
        metrics::set_active_sessions(state.dispatcher.registry().len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lobby_protocol::{codec, Identity, ServerEvent, UserId};
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    type Client = tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn test_state() -> Arc<AppState> {
        let mut config = Config::default();
        config.metrics.enabled = false;

        let store = MemoryIdentityStore::with_identities([
            Identity::new("7", "alice")
                .with_attribute("email", "alice@example.com")
                .with_attribute("avatar", "alice.png"),
            Identity::new("8", "bob"),
        ]);

        Arc::new(AppState::with_lookup(config, Arc::new(store)))
    }

    async fn start(state: Arc<AppState>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, state));
        format!("ws://{addr}/ws")
    }

    async fn wait_for_connections(state: &AppState, count: usize) {
        tokio::time::timeout(TIMEOUT, async {
            while state.dispatcher.connections().len() != count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("connections were not tracked in time");
    }

    async fn next_event(client: &mut Client) -> ServerEvent {
        tokio::time::timeout(TIMEOUT, async {
            loop {
                match client.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        return codec::decode_event(text.as_bytes()).unwrap();
                    }
                    Some(Ok(_)) => continue,
                    other => panic!("connection ended: {other:?}"),
                }
            }
        })
        .await
        .expect("no event received in time")
    }

    async fn identify(client: &mut Client, frame: &str) {
        client.send(WsMessage::Text(frame.to_string())).await.unwrap();
    }

    #[test]
    fn test_health_report() {
        let state = test_state();
        let report = health_report(&state);
        assert_eq!(report["status"], "ok");
        assert_eq!(report["connections"], 0);
        assert_eq!(report["sessions"], 0);
    }

    #[tokio::test]
    async fn test_duplicate_session_over_websocket() {
        let state = test_state();
        let url = start(Arc::clone(&state)).await;

        let (mut a, _) = connect_async(&url).await.unwrap();
        let (mut b, _) = connect_async(&url).await.unwrap();
        wait_for_connections(&state, 2).await;

        identify(&mut a, r#"{"userId": 7}"#).await;
        for client in [&mut a, &mut b] {
            match next_event(client).await {
                ServerEvent::UserUpdate { data } => {
                    let alice = &data["7"];
                    assert_eq!(alice.username, "alice");
                    assert!(alice.attribute("email").is_none());
                    assert_eq!(alice.attribute("avatar").unwrap(), "alice.png");
                }
                other => panic!("expected userUpdate, got {other:?}"),
            }
        }
        let first_owner = state
            .dispatcher
            .registry()
            .get(&UserId::from("7"))
            .unwrap();

        identify(&mut b, r#"{"userId": "7"}"#).await;
        for client in [&mut a, &mut b] {
            assert_eq!(
                next_event(client).await,
                ServerEvent::duplicate_session(UserId::from("7"), first_owner)
            );
            match next_event(client).await {
                ServerEvent::UserUpdate { data } => assert_eq!(data.len(), 1),
                other => panic!("expected userUpdate, got {other:?}"),
            }
        }

        let owner = state
            .dispatcher
            .registry()
            .get(&UserId::from("7"))
            .unwrap();
        assert_ne!(owner, first_owner);

        // The evicted connection is left open by the hub
        a.close(None).await.unwrap();
        wait_for_connections(&state, 1).await;
        assert_eq!(
            state.dispatcher.registry().get(&UserId::from("7")),
            Some(owner)
        );
    }

    #[tokio::test]
    async fn test_malformed_and_unknown_frames_produce_nothing() {
        let state = test_state();
        let url = start(Arc::clone(&state)).await;

        let (mut a, _) = connect_async(&url).await.unwrap();
        wait_for_connections(&state, 1).await;

        identify(&mut a, "{}").await;
        identify(&mut a, r#"{"foo": 1}"#).await;
        identify(&mut a, r#"{"userId": 404}"#).await;
        // A valid identify afterwards is the first thing the client hears
        identify(&mut a, r#"{"userId": 8}"#).await;

        match next_event(&mut a).await {
            ServerEvent::UserUpdate { data } => {
                assert_eq!(data.keys().collect::<Vec<_>>(), vec!["8"]);
            }
            other => panic!("expected userUpdate, got {other:?}"),
        }
        assert_eq!(state.dispatcher.registry().len(), 1);
    }

    #[tokio::test]
    async fn test_disconnect_releases_session() {
        let state = test_state();
        let url = start(Arc::clone(&state)).await;

        let (mut a, _) = connect_async(&url).await.unwrap();
        wait_for_connections(&state, 1).await;
        identify(&mut a, r#"{"userId": 8}"#).await;
        next_event(&mut a).await;
        assert_eq!(state.dispatcher.registry().len(), 1);

        a.close(None).await.unwrap();
        wait_for_connections(&state, 0).await;
        assert!(state.dispatcher.registry().is_empty());
    }

    #[tokio::test]
    async fn test_roster_above_frame_limit_reaches_client() {
        let mut config = Config::default();
        config.metrics.enabled = false;
        let alice = Identity::new(7u64, "alice")
            .with_attribute("bio", "x".repeat(codec::MAX_FRAME_SIZE + 1024));
        let store = MemoryIdentityStore::with_identities([alice]);
        let state = Arc::new(AppState::with_lookup(config, Arc::new(store)));
        let url = start(Arc::clone(&state)).await;

        let (mut a, _) = connect_async(&url).await.unwrap();
        wait_for_connections(&state, 1).await;
        identify(&mut a, r#"{"userId": 7}"#).await;

        match next_event(&mut a).await {
            ServerEvent::UserUpdate { data } => {
                let bio = data["7"].attribute("bio").unwrap().as_str().unwrap();
                assert!(bio.len() > codec::MAX_FRAME_SIZE);
            }
            other => panic!("expected userUpdate, got {other:?}"),
        }
    }
}
