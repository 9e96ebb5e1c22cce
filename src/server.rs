//! OCPP 1.6 WebSocket server
//!
//! Accepts charge-point connections at `ws://<host>:<port>/ocpp/{identity}`
//! (or `/{identity}`). Each connection gets its own task pair; inbound
//! frames for one charge point are handled strictly in arrival order by the
//! connection's own loop, so one slow charger never stalls another.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::dispatch::Dispatcher;
use crate::session::SharedSessionRegistry;
use crate::support::ShutdownSignal;

/// OCPP 1.6 WebSocket subprotocol name.
const OCPP_SUBPROTOCOL: &str = "ocpp1.6";

/// OCPP WebSocket server: accept loop plus per-connection lifecycle.
pub struct OcppServer {
    addr: String,
    registry: SharedSessionRegistry,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownSignal,
}

impl OcppServer {
    pub fn new(
        addr: String,
        registry: SharedSessionRegistry,
        dispatcher: Arc<Dispatcher>,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            addr,
            registry,
            dispatcher,
            shutdown,
        }
    }

    /// Bind and serve until shutdown. Failing to bind is the one fatal
    /// error; everything after that is connection-local.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(&self.addr).await?;

        info!("OCPP 1.6 Central System listening on ws://{}", self.addr);
        info!(
            "charge points connect to ws://{}/ocpp/{{charge_point_id}}",
            self.addr
        );

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_connection(stream, peer),
                        Err(e) => error!(error = %e, "accept failed"),
                    }
                }
                _ = self.shutdown.notified().wait() => {
                    info!(
                        connections = self.registry.connection_count(),
                        "OCPP server shutting down"
                    );
                    self.registry.close_all();
                    return Ok(());
                }
            }
        }
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let registry = self.registry.clone();
        let dispatcher = self.dispatcher.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, registry, dispatcher, shutdown).await {
                warn!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

/// Charge-point identity from the upgrade request path: the final path
/// segment of `/ocpp/{id}` or `/{id}`. None means the handshake is refused.
fn extract_identity(path: &str) -> Option<String> {
    let trimmed = path.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next()?;
    if segment.is_empty() {
        None
    } else {
        Some(segment.to_string())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: SharedSessionRegistry,
    dispatcher: Arc<Dispatcher>,
    shutdown: ShutdownSignal,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let mut identity: Option<String> = None;

    let ws_stream = tokio_tungstenite::accept_hdr_async(
        stream,
        |req: &Request, mut response: Response| {
            let path = req.uri().path();
            debug!(%peer, path, "websocket handshake");

            // An unidentifiable charge point is refused before any state
            // exists for it.
            match extract_identity(path) {
                Some(id) => identity = Some(id),
                None => {
                    warn!(%peer, path, "connect without charge point identity refused");
                    let mut refusal = ErrorResponse::new(Some("charge point identity required".into()));
                    *refusal.status_mut() = StatusCode::NOT_FOUND;
                    return Err(refusal);
                }
            }

            let offered = req
                .headers()
                .get("Sec-WebSocket-Protocol")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("");
            if offered.split(',').map(str::trim).any(|p| p == OCPP_SUBPROTOCOL) {
                response.headers_mut().insert(
                    "Sec-WebSocket-Protocol",
                    OCPP_SUBPROTOCOL.parse().expect("static header value"),
                );
            } else if !offered.is_empty() {
                warn!(%peer, offered, "client does not offer ocpp1.6");
            }

            Ok(response)
        },
    )
    .await?;

    // The callback ran, so a missing identity already failed the handshake.
    let identity = identity.expect("identity set during accepted handshake");
    info!(identity = identity.as_str(), %peer, "charge point connected");

    let (mut ws_sender, mut ws_receiver) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let evict = Arc::new(Notify::new());

    let registration = match registry.register(&identity, tx, evict.clone()) {
        Ok(registration) => registration,
        Err(e) => {
            // Reject-new policy: the prior session wins, this socket goes
            // away without touching charger state or telemetry.
            info!(identity = identity.as_str(), %peer, reason = %e, "connection refused");
            let _ = ws_sender.close().await;
            return Ok(());
        }
    };

    dispatcher.connection_opened(&identity).await;

    // Writer task: drains the registry channel onto the socket.
    let writer_identity = identity.clone();
    let send_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            debug!(identity = writer_identity.as_str(), frame = frame.as_str(), "send");
            if let Err(e) = ws_sender.send(Message::Text(frame)).await {
                warn!(identity = writer_identity.as_str(), error = %e, "send failed");
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Inbound loop, on this task: strict arrival order per connection.
    let shutdown_fut = shutdown.notified().wait();
    tokio::pin!(shutdown_fut);

    let close_reason = loop {
        tokio::select! {
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    debug!(identity = identity.as_str(), frame = text.as_str(), "recv");
                    registry.touch(&identity);
                    dispatcher.handle_inbound(&identity, &text).await;
                }
                Some(Ok(Message::Binary(data))) => {
                    warn!(identity = identity.as_str(), bytes = data.len(), "binary frame ignored");
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) => break "close frame",
                Some(Err(e)) => {
                    warn!(identity = identity.as_str(), error = %e, "websocket error");
                    break "transport error";
                }
                None => break "stream ended",
            },
            _ = evict.notified() => break "evicted by newer session",
            _ = &mut shutdown_fut => break "server shutdown",
        }
    };

    send_task.abort();

    // Only the session that still owns the identity downgrades the charger;
    // an evicted one must not clobber its replacement's state.
    if registry.unregister(&identity, registration.epoch) {
        dispatcher.connection_closed(&identity).await;
    }

    info!(identity = identity.as_str(), %peer, reason = close_reason, "charge point disconnected");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_from_ocpp_prefixed_path() {
        assert_eq!(extract_identity("/ocpp/CP-1").as_deref(), Some("CP-1"));
        assert_eq!(extract_identity("/ocpp/CP-1/").as_deref(), Some("CP-1"));
    }

    #[test]
    fn identity_from_bare_path() {
        assert_eq!(extract_identity("/CP-1").as_deref(), Some("CP-1"));
    }

    #[test]
    fn identity_is_the_final_segment() {
        assert_eq!(
            extract_identity("/tenant-a/ocpp/CP-42").as_deref(),
            Some("CP-42")
        );
    }

    #[test]
    fn empty_identity_is_refused() {
        assert_eq!(extract_identity("/"), None);
        assert_eq!(extract_identity(""), None);
        assert_eq!(extract_identity("///"), None);
    }
}
