//! Binary RPC transport server.
//!
//! # Responsibilities
//! - Accept TCP connections through the bounded listener
//! - Read framed calls, dispatch them, write framed replies
//! - Answer unknown method names with an application exception
//!
//! # Design Decisions
//! - One task per connection; calls on a connection are served in order
//! - A malformed message header closes the connection (framing is lost)
//! - Shutdown stops accepting, then waits briefly for open connections

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::{ApiResponse, Method, Protocol, SharedHandler};
use crate::binary::codec::{
    encode_exception, encode_reply, exception_kind, MessageType, Reader, WireResponse, METHOD_NAME,
};
use crate::binary::frame::{read_frame, write_frame};
use crate::config::TlsConfig;
use crate::error::{RuntimeError, TransportError};
use crate::lifecycle::signalled;
use crate::net::{ConnectionId, ConnectionTracker, Listener};
use crate::server::{ApiServer, Dispatcher, ServerLimits, Target};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 9090;

const DRAIN_DEADLINE: Duration = Duration::from_secs(5);

pub struct BinaryServer {
    id: usize,
    port: u16,
    limits: ServerLimits,
    dispatcher: Dispatcher,
}

impl BinaryServer {
    pub fn new(id: usize, hostname: Arc<str>) -> Self {
        Self {
            id,
            port: DEFAULT_PORT,
            limits: ServerLimits::default(),
            dispatcher: Dispatcher::new(Protocol::Binary, hostname),
        }
    }

    pub fn with_limits(mut self, limits: ServerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RuntimeError> {
        let id = self.id;
        let request_timeout = self.limits.request_timeout;
        let dispatcher = Arc::new(self.dispatcher);
        let tracker = ConnectionTracker::new();

        info!(
            server_id = id,
            protocol = %Protocol::Binary,
            address = %listener.local_addr()?,
            routes = dispatcher.routes().len(),
            "API server listening"
        );

        loop {
            tokio::select! {
                _ = signalled(&mut shutdown) => break,
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(server_id = id, error = %e, "Accept failed");
                            tokio::time::sleep(Duration::from_millis(10)).await;
                            continue;
                        }
                    };
                    let guard = tracker.track();
                    let dispatcher = Arc::clone(&dispatcher);
                    let conn_shutdown = shutdown.resubscribe();
                    tokio::spawn(async move {
                        let _permit = permit;
                        serve_connection(stream, peer, guard.id(), dispatcher, conn_shutdown, request_timeout)
                            .await;
                        drop(guard);
                    });
                }
            }
        }

        let remaining = tracker.drain(DRAIN_DEADLINE).await;
        info!(
            server_id = id,
            protocol = %Protocol::Binary,
            open_connections = remaining,
            "API server stopped"
        );
        Ok(())
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    conn_id: ConnectionId,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: broadcast::Receiver<()>,
    request_timeout: Duration,
) {
    debug!(connection_id = %conn_id, peer_addr = %peer, "Binary connection opened");
    let (mut reader, mut writer) = stream.split();

    loop {
        let frame = tokio::select! {
            _ = signalled(&mut shutdown) => break,
            frame = read_frame(&mut reader) => frame,
        };

        let payload = match frame {
            Ok(Some(payload)) => payload,
            Ok(None) => break,
            Err(e) => {
                debug!(connection_id = %conn_id, error = %e, "Read failed, closing");
                break;
            }
        };

        let out = match handle_call(&dispatcher, payload, request_timeout).await {
            Ok(Some(out)) => out,
            Ok(None) => continue,
            Err(e) => {
                warn!(connection_id = %conn_id, peer_addr = %peer, error = %e, "Malformed message, closing");
                break;
            }
        };

        if let Err(e) = write_frame(&mut writer, &out).await {
            debug!(connection_id = %conn_id, error = %e, "Write failed, closing");
            break;
        }
    }
}

/// Decode one call, dispatch it and encode the answer.
///
/// `Ok(None)` for oneway calls; `Err` when the header itself is unreadable.
async fn handle_call(
    dispatcher: &Dispatcher,
    payload: Bytes,
    request_timeout: Duration,
) -> Result<Option<Bytes>, TransportError> {
    let started = Instant::now();
    let mut reader = Reader::new(payload);
    let header = reader.message_begin()?;

    if !matches!(header.kind, MessageType::Call | MessageType::Oneway) {
        return Ok(Some(encode_exception(
            &header.name,
            header.seq_id,
            "invalid message type",
            exception_kind::INVALID_MESSAGE_TYPE,
        )));
    }
    if header.name != METHOD_NAME {
        return Ok(Some(encode_exception(
            &header.name,
            header.seq_id,
            &format!("Unknown function {}", header.name),
            exception_kind::UNKNOWN_METHOD,
        )));
    }

    let wire = match reader.call_args() {
        Ok(wire) => wire,
        Err(e) => {
            return Ok(Some(encode_exception(
                &header.name,
                header.seq_id,
                &e.to_string(),
                exception_kind::PROTOCOL_ERROR,
            )));
        }
    };

    let req = wire.into_request();
    let reply = match tokio::time::timeout(
        request_timeout,
        dispatcher.handle(req, Target::Lookup, started),
    )
    .await
    {
        Ok(reply) => reply,
        Err(_) => dispatcher.envelope(ApiResponse::error("request timed out"), started),
    };

    if header.kind == MessageType::Oneway {
        return Ok(None);
    }
    Ok(Some(encode_reply(header.seq_id, &WireResponse::from_reply(reply))))
}

#[async_trait]
impl ApiServer for BinaryServer {
    fn id(&self) -> usize {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Binary
    }

    fn hostname(&self) -> &str {
        self.dispatcher.hostname()
    }

    fn set_handler(
        &mut self,
        method: Method,
        pattern: &str,
        handler: SharedHandler,
    ) -> Result<(), RuntimeError> {
        self.dispatcher.add_route(method, pattern, handler)
    }

    fn pre_request(&mut self, handler: SharedHandler) {
        self.dispatcher.set_pre_handler(handler);
    }

    fn expose(&mut self, port: u16) {
        self.port = port;
    }

    fn expose_ssl(&mut self, _port: u16, _tls: TlsConfig) -> Result<(), RuntimeError> {
        Err(RuntimeError::configuration(
            "the binary transport does not support TLS",
        ))
    }

    async fn start(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> Result<(), RuntimeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = Listener::bind(addr, self.limits.max_connections)
            .await
            .map_err(std::io::Error::from)?;
        (*self).serve(listener, shutdown).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binary::codec::{decode_reply, encode_call, WireRequest};
    use crate::error::TransportError;

    fn server() -> BinaryServer {
        BinaryServer::new(1, Arc::from("bin-host"))
    }

    #[tokio::test]
    async fn unknown_method_gets_exception() {
        let s = server();
        let mut buf = bytes::BytesMut::new();
        bytes::BufMut::put_slice(&mut buf, &encode_call(9, &WireRequest::default()));
        // rename "call" to "cxll" in place
        let pos = buf.windows(4).position(|w| w == b"call").unwrap();
        buf[pos + 1] = b'x';

        let out = handle_call(&s.dispatcher, buf.freeze(), Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        match decode_reply(out, 9) {
            Err(TransportError::Remote(msg)) => assert!(msg.contains("cxll")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn ssl_is_rejected() {
        let mut s = server();
        let tls = TlsConfig {
            cert_path: "crt.pem".into(),
            key_path: "key.pem".into(),
        };
        assert!(matches!(
            s.expose_ssl(9443, tls),
            Err(RuntimeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn unmatched_call_is_not_found_reply() {
        let s = server();
        let req = WireRequest {
            path: "/missing".into(),
            method: "GET".into(),
            ..Default::default()
        };
        let out = handle_call(&s.dispatcher, encode_call(1, &req), Duration::from_secs(1))
            .await
            .unwrap()
            .unwrap();
        let resp = decode_reply(out, 1).unwrap();
        assert_eq!(resp.status, 404);
        assert_eq!(resp.error_code.as_deref(), Some("API_NOT_FOUND"));
        assert_eq!(resp.headers["X-Hostname"], "bin-host");
    }
}
