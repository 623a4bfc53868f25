//! Binary RPC client over pooled TCP connections.
//!
//! # Responsibilities
//! - Open framed TCP connections to one `host:port`
//! - Run each call through the retry policy and the connection pool
//! - Turn transport failures into `Error` envelopes

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::api::{ApiResponse, Method, Protocol};
use crate::binary::codec::{decode_reply, encode_call, WireRequest, WireResponse};
use crate::binary::frame::{read_frame, write_frame};
use crate::client::pool::{ConnectionPool, Connector, PoolOptions, RpcConnection};
use crate::client::{ApiClient, OutboundRequest};
use crate::config::ClientConfig;
use crate::error::TransportError;
use crate::observability::metrics::{self, outcome};
use crate::resilience::{with_timeout, RetryPolicy};

/// Opens TCP connections to a fixed address.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Conn = TcpRpcConnection;

    async fn connect(&self) -> Result<TcpRpcConnection, TransportError> {
        let stream = with_timeout(self.timeout, async {
            TcpStream::connect(&self.address)
                .await
                .map_err(|source| TransportError::Connect {
                    address: self.address.clone(),
                    source,
                })
        })
        .await?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!(address = %self.address, error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(TcpRpcConnection::new(stream, self.timeout))
    }

    fn target(&self) -> &str {
        &self.address
    }
}

/// One framed TCP connection. Calls on it are strictly sequential.
#[derive(Debug)]
pub struct TcpRpcConnection {
    stream: Option<TcpStream>,
    seq_id: i32,
    timeout: Duration,
}

impl TcpRpcConnection {
    pub fn new(stream: TcpStream, timeout: Duration) -> Self {
        Self {
            stream: Some(stream),
            seq_id: 0,
            timeout,
        }
    }
}

#[async_trait]
impl RpcConnection for TcpRpcConnection {
    fn is_open(&self) -> bool {
        let Some(stream) = &self.stream else {
            return false;
        };
        // Idle connections have nothing to read; EOF or stray bytes mean stale.
        let mut probe = [0u8; 1];
        match stream.try_read(&mut probe) {
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
            Ok(_) => false,
        }
    }

    async fn call(&mut self, req: &WireRequest) -> Result<WireResponse, TransportError> {
        self.seq_id = self.seq_id.wrapping_add(1);
        let seq_id = self.seq_id;
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        let payload = encode_call(seq_id, req);

        with_timeout(self.timeout, async {
            write_frame(&mut *stream, &payload).await?;
            let reply = read_frame(&mut *stream).await?.ok_or(TransportError::Closed)?;
            decode_reply(reply, seq_id)
        })
        .await
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
    }
}

/// Client for a peer speaking the binary transport.
pub struct BinaryClient<K: Connector = TcpConnector> {
    pool: ConnectionPool<K>,
    policy: RetryPolicy,
}

impl BinaryClient<TcpConnector> {
    pub fn from_config(config: &ClientConfig) -> Self {
        let connector = TcpConnector::new(config.address.clone(), config.timeout());
        let options = PoolOptions {
            capacity: config.max_connections.max(1),
            max_age: config.max_conn_age(),
            ..Default::default()
        };
        Self::with_connector(connector, options, RetryPolicy::from(config))
    }
}

impl<K: Connector> BinaryClient<K> {
    pub fn with_connector(connector: K, options: PoolOptions, policy: RetryPolicy) -> Self {
        Self {
            pool: ConnectionPool::new(connector, options),
            policy,
        }
    }

    pub fn pool(&self) -> &ConnectionPool<K> {
        &self.pool
    }

    /// Send one call with retries.
    pub async fn call(&self, wire: &WireRequest) -> Result<WireResponse, TransportError> {
        let pool = &self.pool;
        let result = self
            .policy
            .run(|attempt| async move {
                let result = pool.call(wire, !attempt.fresh).await;
                match &result {
                    Ok(_) => metrics::record_outbound_attempt(Protocol::Binary, outcome::SUCCESS),
                    Err(e) => {
                        debug!(attempt = attempt.number, error = %e, "Binary call attempt failed");
                        metrics::record_outbound_attempt(Protocol::Binary, outcome::RETRY);
                    }
                }
                result
            })
            .await;
        if let Err(e) = &result {
            metrics::record_outbound_attempt(Protocol::Binary, outcome::FAILURE);
            warn!(peer = %pool.connector().target(), path = %wire.path, error = %e, "Binary call failed");
        }
        result
    }
}

/// Build the wire request. GET and DELETE never carry content.
fn to_wire(req: &OutboundRequest) -> WireRequest {
    let content = match (&req.method, &req.body) {
        (Method::Get | Method::Delete, _) | (_, None) => String::new(),
        (_, Some(Value::String(text))) => text.clone(),
        (_, Some(body)) => body.to_string(),
    };
    WireRequest {
        path: req.path.clone(),
        params: req.params.clone(),
        headers: req.headers.clone(),
        method: req.method.as_str().to_string(),
        content,
    }
}

#[async_trait]
impl<K: Connector> ApiClient for BinaryClient<K> {
    async fn make_request(&self, req: &OutboundRequest) -> ApiResponse {
        let wire = to_wire(req);
        match self.call(&wire).await {
            Ok(resp) => resp
                .into_api_response()
                .unwrap_or_else(|e| ApiResponse::error(format!("Response Data Error: {}", e))),
            Err(e) => ApiResponse::error(format!("Endpoint error: {}", e)),
        }
    }

    fn protocol(&self) -> Protocol {
        Protocol::Binary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{handler_fn, ApiStatus};
    use crate::binary::BinaryServer;
    use crate::error::HandlerError;
    use crate::net::Listener;
    use crate::server::ApiServer;
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use tokio::sync::broadcast;

    async fn spawn_server() -> (SocketAddr, broadcast::Sender<()>) {
        let mut server = BinaryServer::new(1, Arc::from("peer"));
        server
            .set_route(
                "POST::/echo/:id",
                handler_fn(|req, res| {
                    Box::pin(async move {
                        let body: Value = if req.content_text().is_empty() {
                            Value::Null
                        } else {
                            req.content()?
                        };
                        res.respond(
                            ApiResponse::ok(req.var("id").to_string())
                                .with_data(vec![json!({"body": body, "q": req.param("q")})]),
                        )?;
                        Ok::<_, HandlerError>(())
                    })
                }),
            )
            .unwrap();
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 16).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = broadcast::channel(1);
        tokio::spawn(server.serve(listener, rx));
        (addr, tx)
    }

    fn client(addr: SocketAddr, max_retry: u32) -> BinaryClient {
        BinaryClient::from_config(&ClientConfig {
            name: "peer".into(),
            protocol: Protocol::Binary,
            address: addr.to_string(),
            timeout_ms: 1_000,
            max_retry,
            wait_to_retry_ms: 10,
            max_connections: 2,
            ..Default::default()
        })
    }

    #[test]
    fn get_and_delete_drop_content() {
        let mut get = OutboundRequest::new(Method::Get, "/x");
        get.body = Some(json!({"a": 1}));
        assert_eq!(to_wire(&get).content, "");

        let post = OutboundRequest::new(Method::Post, "/x").with_json(&json!({"a": 1})).unwrap();
        assert_eq!(to_wire(&post).content, r#"{"a":1}"#);
    }

    #[tokio::test]
    async fn round_trip_through_server() {
        let (addr, _shutdown) = spawn_server().await;
        let client = client(addr, 0);

        let req = OutboundRequest::new(Method::Post, "/echo/42")
            .with_param("q", "x")
            .with_json(&json!({"n": 1}))
            .unwrap();
        let resp = client.make_request(&req).await;
        assert_eq!(resp.status, ApiStatus::Ok);
        assert_eq!(resp.message, "42");
        assert_eq!(resp.data, Some(json!([{"body": {"n": 1}, "q": "x"}])));

        let again = client.make_request(&req).await;
        assert_eq!(again.status, ApiStatus::Ok);
        assert_eq!(client.pool().size(), 1);
    }

    #[tokio::test]
    async fn unknown_route_comes_back_not_found() {
        let (addr, _shutdown) = spawn_server().await;
        let resp = client(addr, 0)
            .make_request(&OutboundRequest::new(Method::Get, "/nope"))
            .await;
        assert_eq!(resp.status, ApiStatus::NotFound);
        assert_eq!(resp.error_code.as_deref(), Some("API_NOT_FOUND"));
    }

    #[tokio::test]
    async fn unreachable_peer_is_an_error_envelope() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let resp = client(addr, 1)
            .make_request(&OutboundRequest::new(Method::Get, "/x"))
            .await;
        assert_eq!(resp.status, ApiStatus::Error);
        assert!(resp.message.starts_with("Endpoint error: "), "{}", resp.message);
    }
}
