//! [`CockpitServer`] – HTTP + WebSocket access to the [`Dashboard`].
//!
//! Listens on `0.0.0.0:8080` (configurable via [`CockpitServer::with_port`]).
//!
//! * Regular HTTP requests → 200 OK with the current frame as JSON.
//! * WebSocket upgrades → frame stream plus upstream operator commands.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use ferment_middleware::EventBus;
use ferment_runtime::{Dashboard, Frame};
use ferment_types::{Event, EventPayload, FermentError, ModeCommand};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};

// ────────────────────────────────────────────────────────────────────────────
// Defaults and wire messages
// ────────────────────────────────────────────────────────────────────────────

/// Default TCP port for the cockpit server.
pub const DEFAULT_PORT: u16 = 8080;

/// Default period between pushed frames.
pub const DEFAULT_REFRESH: Duration = Duration::from_millis(1000);

/// Messages sent to WebSocket clients.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Outbound<'a> {
    Frame(&'a Frame),
    Alert(&'a Event),
    Command(&'a Event),
    Ack { command: ModeCommand },
    Error { message: String },
}

impl<'a> Outbound<'a> {
    /// Classify a bus event for clients.
    fn from_event(event: &'a Event) -> Self {
        match event.payload {
            EventPayload::CommandDispatched(_) => Outbound::Command(event),
            _ => Outbound::Alert(event),
        }
    }

    fn to_json(&self) -> Option<String> {
        serde_json::to_string(self)
            .map_err(|e| warn!(error = %e, "cockpit message serialization failed"))
            .ok()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Server builder
// ────────────────────────────────────────────────────────────────────────────

/// HTTP + WebSocket server exposing one [`Dashboard`] to any number of
/// browser clients.
pub struct CockpitServer {
    dashboard: Arc<Dashboard>,
    bus: Option<EventBus>,
    port: u16,
    refresh: Duration,
}

impl CockpitServer {
    /// Create a server for `dashboard` on the [`DEFAULT_PORT`].
    pub fn new(dashboard: Arc<Dashboard>) -> Self {
        Self {
            dashboard,
            bus: None,
            port: DEFAULT_PORT,
            refresh: DEFAULT_REFRESH,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Override the frame push period.
    pub fn with_refresh(mut self, refresh: Duration) -> Self {
        self.refresh = refresh;
        self
    }

    /// Forward every event on `bus` to WebSocket clients: dispatched
    /// commands as `command`, everything else as `alert`.
    pub fn with_events(mut self, bus: EventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    /// Bind the listener and start the frame ticker without accepting yet.
    ///
    /// # Errors
    ///
    /// [`FermentError::Connection`] if the TCP listener cannot bind.
    pub async fn bind(self) -> Result<BoundCockpit, FermentError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| FermentError::Connection(format!("cockpit bind error on {addr}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| FermentError::Connection(format!("cockpit local address: {e}")))?;

        let initial = Outbound::Frame(&self.dashboard.frame())
            .to_json()
            .unwrap_or_default();
        let (frames_tx, frames) = watch::channel(initial);
        let ticker = self.dashboard.on_tick(self.refresh, move |frame| {
            if let Some(json) = Outbound::Frame(frame).to_json() {
                frames_tx.send_replace(json);
            }
        });

        info!(%local_addr, "cockpit listening");
        Ok(BoundCockpit {
            listener,
            local_addr,
            ticker,
            shared: Arc::new(Shared {
                dashboard: self.dashboard,
                bus: self.bus,
                frames,
            }),
        })
    }

    /// Bind and serve until the process exits.
    pub async fn run(self) -> Result<(), FermentError> {
        self.bind().await?.serve().await
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Listener
// ────────────────────────────────────────────────────────────────────────────

struct Shared {
    dashboard: Arc<Dashboard>,
    bus: Option<EventBus>,
    frames: watch::Receiver<String>,
}

/// A bound cockpit listener, ready to [`serve`](BoundCockpit::serve).
pub struct BoundCockpit {
    listener: TcpListener,
    local_addr: SocketAddr,
    ticker: JoinHandle<()>,
    shared: Arc<Shared>,
}

impl BoundCockpit {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections forever, one task per client.
    pub async fn serve(self) -> Result<(), FermentError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&self.shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, shared).await {
                            debug!(%peer, error = %e, "cockpit client error");
                        }
                    });
                }
                Err(e) => warn!(error = %e, "cockpit accept error"),
            }
        }
    }
}

impl Drop for BoundCockpit {
    fn drop(&mut self) {
        self.ticker.abort();
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Connections
// ────────────────────────────────────────────────────────────────────────────

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), FermentError> {
    // `peek` leaves the request in the socket for the WebSocket handshake.
    let mut buf = [0u8; 1024];
    let n = stream
        .peek(&mut buf)
        .await
        .map_err(|e| FermentError::Connection(format!("peek error from {peer}: {e}")))?;

    if is_websocket_upgrade(&buf[..n]) {
        handle_ws(stream, peer, shared).await
    } else {
        serve_frame(stream, &shared.dashboard).await
    }
}

fn is_websocket_upgrade(head: &[u8]) -> bool {
    String::from_utf8_lossy(head).lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("upgrade:") && line.contains("websocket")
    })
}

async fn serve_frame(mut stream: TcpStream, dashboard: &Dashboard) -> Result<(), FermentError> {
    // Drain the request head so closing the socket sends FIN, not RST.
    let mut head = [0u8; 1024];
    let _ = stream.read(&mut head).await;

    let body = serde_json::to_string(&dashboard.frame())
        .map_err(|e| FermentError::Serialization(e.to_string()))?;
    let response = format!(
        "HTTP/1.1 200 OK\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Cache-Control: no-store\r\n\
         Connection: close\r\n\
         \r\n\
         {}",
        body.len(),
        body
    );
    stream
        .write_all(response.as_bytes())
        .await
        .map_err(|e| FermentError::Connection(format!("HTTP write error: {e}")))?;
    let _ = stream.shutdown().await;
    Ok(())
}

async fn handle_ws(
    stream: TcpStream,
    peer: SocketAddr,
    shared: Arc<Shared>,
) -> Result<(), FermentError> {
    let ws_stream = accept_async(stream)
        .await
        .map_err(|e| FermentError::Connection(format!("WS handshake from {peer}: {e}")))?;
    debug!(%peer, "cockpit client connected");

    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let mut frames = shared.frames.clone();
    frames.mark_changed();
    let mut events = shared.bus.as_ref().map(EventBus::subscribe);

    loop {
        tokio::select! {
            changed = frames.changed() => {
                if changed.is_err() {
                    break;
                }
                let json = frames.borrow_and_update().clone();
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break;
                }
            }
            event = next_event(&mut events) => {
                match event {
                    Ok(event) => {
                        if let Some(json) = Outbound::from_event(&event).to_json()
                            && ws_tx.send(Message::Text(json.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!(%peer, skipped = n, "cockpit client lagged"),
                    Err(RecvError::Closed) => break,
                }
            }
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_upstream_message(text.as_str(), &shared.dashboard).await;
                        if let Some(json) = reply
                            && ws_tx.send(Message::Text(json.into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    debug!(%peer, "cockpit client disconnected");
    Ok(())
}

async fn next_event(events: &mut Option<broadcast::Receiver<Event>>) -> Result<Event, RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Upstream commands
// ────────────────────────────────────────────────────────────────────────────

/// Decode an upstream client message into the command it requests.
///
/// | Topic | Payload | Command |
/// |---|---|---|
/// | `/mode` | `{"msg":{"command":"ROTI"}}` | the named command |
/// | `/stop` | anything | `STOP` |
///
/// `Ok(None)` for messages that are not commands at all (invalid JSON, other
/// topics); `Err` for a command message that cannot be honoured.
pub(crate) fn parse_upstream(text: &str) -> Result<Option<ModeCommand>, String> {
    let Ok(json) = serde_json::from_str::<Value>(text) else {
        return Ok(None);
    };

    match json.get("topic").and_then(Value::as_str).unwrap_or("") {
        "/stop" => Ok(Some(ModeCommand::Stop)),
        "/mode" => {
            let name = json
                .get("msg")
                .and_then(|m| m.get("command"))
                .and_then(Value::as_str)
                .ok_or_else(|| "missing msg.command".to_string())?;
            name.parse::<ModeCommand>()
                .map(Some)
                .map_err(|_| format!("unknown mode command '{}'", name.trim()))
        }
        _ => Ok(None),
    }
}

/// Handle one upstream message, returning the JSON reply to send, if any.
pub(crate) async fn handle_upstream_message(text: &str, dashboard: &Dashboard) -> Option<String> {
    let reply = match parse_upstream(text) {
        Ok(None) => return None,
        Ok(Some(command)) => match dashboard.on_command(command).await {
            Ok(()) => Outbound::Ack { command },
            Err(e) => Outbound::Error {
                message: e.to_string(),
            },
        },
        Err(message) => Outbound::Error { message },
    };
    reply.to_json()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferment_kernel::{HazardMonitor, ModeTracker, StateStore};
    use ferment_middleware::LoopbackTransport;
    use ferment_runtime::CommandDispatcher;

    fn rig() -> (Arc<LoopbackTransport>, Arc<StateStore>, Arc<Dashboard>) {
        rig_on(EventBus::default())
    }

    fn rig_on(bus: EventBus) -> (Arc<LoopbackTransport>, Arc<StateStore>, Arc<Dashboard>) {
        let (transport, _inbound) = LoopbackTransport::new(4);
        let transport = Arc::new(transport);
        let store = Arc::new(StateStore::new());
        let modes = Arc::new(ModeTracker::new());
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            "farm/sub/led",
            Arc::clone(&modes),
            bus,
        ));
        let dashboard = Arc::new(Dashboard::new(
            Arc::clone(&store),
            modes,
            Arc::new(HazardMonitor::with_max_temperature(40.0)),
            dispatcher,
            Duration::from_secs(30),
        ));
        (transport, store, dashboard)
    }

    #[test]
    fn builder_defaults_and_overrides() {
        let (_t, _s, dashboard) = rig();
        let server = CockpitServer::new(Arc::clone(&dashboard));
        assert_eq!(server.port(), DEFAULT_PORT);
        assert_eq!(server.refresh(), DEFAULT_REFRESH);

        let server = CockpitServer::new(dashboard)
            .with_port(9999)
            .with_refresh(Duration::from_millis(250));
        assert_eq!(server.port(), 9999);
        assert_eq!(server.refresh(), Duration::from_millis(250));
    }

    #[test]
    fn upgrade_header_detection_is_case_insensitive() {
        assert!(is_websocket_upgrade(
            b"GET / HTTP/1.1\r\nHost: x\r\nUpgrade: WebSocket\r\n\r\n"
        ));
        assert!(!is_websocket_upgrade(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n"));
    }

    #[test]
    fn upstream_mode_and_stop_are_parsed() {
        assert_eq!(
            parse_upstream(r#"{"topic":"/mode","msg":{"command":"ROTI"}}"#),
            Ok(Some(ModeCommand::Roti))
        );
        assert_eq!(
            parse_upstream(r#"{"topic":"/mode","msg":{"command":"yoghurt"}}"#),
            Ok(Some(ModeCommand::Yoghurt))
        );
        assert_eq!(parse_upstream(r#"{"topic":"/stop"}"#), Ok(Some(ModeCommand::Stop)));
    }

    #[test]
    fn upstream_noise_is_ignored() {
        assert_eq!(parse_upstream("not json at all"), Ok(None));
        assert_eq!(parse_upstream(r#"{"topic":"/unknown"}"#), Ok(None));
        assert_eq!(parse_upstream(r#"[1,2]"#), Ok(None));
    }

    #[test]
    fn upstream_bad_command_is_an_error() {
        assert!(parse_upstream(r#"{"topic":"/mode","msg":{"command":"KIMCHI"}}"#).is_err());
        assert!(parse_upstream(r#"{"topic":"/mode","msg":{}}"#).is_err());
    }

    #[tokio::test]
    async fn upstream_command_is_dispatched_and_acked() {
        let (transport, _store, dashboard) = rig();
        let reply = handle_upstream_message(r#"{"topic":"/mode","msg":{"command":"TEMPE"}}"#, &dashboard)
            .await
            .unwrap();

        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "ack");
        assert_eq!(reply["command"], "TEMPE");
        assert_eq!(transport.published()[0].payload, b"TEMPE");
    }

    #[tokio::test]
    async fn upstream_command_while_disconnected_reports_error() {
        let (transport, _store, dashboard) = rig();
        transport.set_connected(false);

        let reply = handle_upstream_message(r#"{"topic":"/stop"}"#, &dashboard)
            .await
            .unwrap();
        let reply: Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "error");
        assert!(reply["message"].as_str().unwrap().contains("Publish"));
    }

    #[tokio::test]
    async fn plain_http_returns_current_frame() {
        let (_transport, store, dashboard) = rig();
        store.apply_reading(&ferment_types::Reading {
            temperature: 27.0,
            humidity: 65.0,
            mode: "BIR".to_string(),
            target_min: 18.0,
            target_max: 22.0,
            timestamp: "11:00:00".to_string(),
        });

        let bound = CockpitServer::new(dashboard).with_port(0).bind().await.unwrap();
        let port = bound.local_addr().port();
        let server = tokio::spawn(bound.serve());

        let mut stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.write_all(b"GET / HTTP/1.1\r\nHost: localhost\r\n\r\n").await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        server.abort();

        assert!(response.starts_with("HTTP/1.1 200 OK"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let frame: Value = serde_json::from_str(body).unwrap();
        assert_eq!(frame["status"]["range"], "18-22 °C");
        assert_eq!(frame["freshness"]["state"], "live");
    }

    #[tokio::test]
    async fn websocket_streams_frames_and_acks_commands() {
        let (transport, _store, dashboard) = rig();
        let bound = CockpitServer::new(dashboard)
            .with_port(0)
            .with_refresh(Duration::from_millis(50))
            .bind()
            .await
            .unwrap();
        let port = bound.local_addr().port();
        let server = tokio::spawn(bound.serve());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/"))
            .await
            .unwrap();

        let first = ws.next().await.unwrap().unwrap();
        let first: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(first["type"], "frame");
        assert_eq!(first["freshness"]["state"], "no_data");

        ws.send(Message::Text(
            r#"{"topic":"/mode","msg":{"command":"BIR"}}"#.into(),
        ))
        .await
        .unwrap();

        let ack = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let msg = ws.next().await.unwrap().unwrap();
                let value: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
                if value["type"] != "frame" {
                    return value;
                }
            }
        })
        .await
        .unwrap();
        server.abort();

        assert_eq!(ack["type"], "ack");
        assert_eq!(transport.published()[0].payload, b"BIR");
    }

    #[tokio::test]
    async fn websocket_forwards_bus_events_by_kind() {
        let bus = EventBus::default();
        let (_transport, _store, dashboard) = rig_on(bus.clone());
        let bound = CockpitServer::new(Arc::clone(&dashboard))
            .with_port(0)
            .with_refresh(Duration::from_secs(60))
            .with_events(bus.clone())
            .bind()
            .await
            .unwrap();
        let port = bound.local_addr().port();
        let server = tokio::spawn(bound.serve());

        let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}/"))
            .await
            .unwrap();
        let first = ws.next().await.unwrap().unwrap();
        let first: Value = serde_json::from_str(first.to_text().unwrap()).unwrap();
        assert_eq!(first["type"], "frame");

        dashboard.on_command(ModeCommand::Roti).await.unwrap();
        bus.publish_to(
            ferment_middleware::Topic::Telemetry,
            Event::new("test", EventPayload::ReadingRejected {
                reason: "payload is not JSON".to_string(),
            }),
        )
        .unwrap();

        let mut kinds = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while kinds.len() < 2 {
                let msg = ws.next().await.unwrap().unwrap();
                let value: Value = serde_json::from_str(msg.to_text().unwrap()).unwrap();
                if value["type"] != "frame" {
                    kinds.push(value["type"].as_str().unwrap().to_string());
                }
            }
        })
        .await
        .unwrap();
        server.abort();

        assert_eq!(kinds, ["command", "alert"]);
    }
}
