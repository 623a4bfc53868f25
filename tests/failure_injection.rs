//! Failure injection tests for the outbound clients.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc};

use rpc_runtime::api::{handler_fn, ApiResponse, ApiStatus, Method, Protocol};
use rpc_runtime::client::{
    ApiClient, ApiOption, BinaryClient, CallOptions, HttpClient, OutboundRequest, PoolOptions,
    ServiceClient, TcpConnector,
};
use rpc_runtime::config::ClientConfig;
use rpc_runtime::error::{ClientError, HandlerError};
use rpc_runtime::net::Listener;
use rpc_runtime::resilience::RetryPolicy;
use rpc_runtime::server::ApiServer;
use rpc_runtime::store::{DocumentStore, MemoryStore};
use rpc_runtime::BinaryServer;

mod common;
use common::MockResponse;

fn http_config(addr: SocketAddr, max_retry: u32, wait_ms: u64) -> ClientConfig {
    ClientConfig {
        name: "peer".into(),
        address: format!("http://{}", addr),
        timeout_ms: 1_000,
        max_retry,
        wait_to_retry_ms: wait_ms,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_refused_connection_exhausts_retries() {
    let addr = common::unused_addr().await;
    let store = Arc::new(MemoryStore::new());
    let mut config = http_config(addr, 2, 50);
    config.log_collection = Some("peer_log".into());
    let client = HttpClient::from_config(&config, Some(store.clone())).unwrap();

    let started = Instant::now();
    let err = client
        .make_http_request(
            &Method::Get,
            &HashMap::new(),
            &HashMap::new(),
            None,
            "/orders",
            &["order-1".to_string()],
        )
        .await
        .unwrap_err();

    assert!(started.elapsed() >= Duration::from_millis(100));
    match err {
        ClientError::Exhausted { url, attempts } => {
            assert_eq!(attempts, 3);
            assert!(url.ends_with("/orders"));
        }
        other => panic!("unexpected error {:?}", other),
    }

    assert!(common::wait_for_docs(store.as_ref(), "peer_log", 1).await);
    let docs = store.query("peer_log", &json!({"keys": "order-1"}), 0, 10).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0]["status"], "FAILED");
    assert_eq!(docs[0]["results"].as_array().unwrap().len(), 3);
    assert_eq!(docs[0]["retry_count"], 2);
}

#[tokio::test]
async fn test_server_errors_are_retried() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        let cc = cc.clone();
        async move {
            if cc.fetch_add(1, Ordering::SeqCst) < 2 {
                MockResponse::json(503, "unavailable")
            } else {
                MockResponse::json(200, r#"{"status":"OK","message":"done","data":[1]}"#)
            }
        }
    })
    .await;

    let client = HttpClient::from_config(&http_config(addr, 3, 10), None).unwrap();
    let resp = client.make_request(&OutboundRequest::new(Method::Get, "/x")).await;

    assert_eq!(resp.status, ApiStatus::Ok);
    assert_eq!(resp.message, "done");
    assert_eq!(call_count.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_client_errors_are_final() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        cc.fetch_add(1, Ordering::SeqCst);
        async { MockResponse::json(404, r#"{"message":"no such order"}"#) }
    })
    .await;

    let client = HttpClient::from_config(&http_config(addr, 3, 10), None).unwrap();
    let resp = client.make_request(&OutboundRequest::new(Method::Get, "/orders/9")).await;

    assert_eq!(resp.status, ApiStatus::NotFound);
    assert_eq!(resp.message, "no such order");
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_accept_http_error_stops_on_first_5xx() {
    let call_count = Arc::new(AtomicU32::new(0));
    let cc = call_count.clone();
    let addr = common::start_programmable_backend(move |_| {
        cc.fetch_add(1, Ordering::SeqCst);
        async { MockResponse::json(500, r#"{"message":"boom"}"#) }
    })
    .await;

    let client = HttpClient::from_config(&http_config(addr, 3, 10), None)
        .unwrap()
        .with_accept_http_error(true);
    let resp = client.make_request(&OutboundRequest::new(Method::Get, "/x")).await;

    assert_eq!(resp.status, ApiStatus::Error);
    assert_eq!(resp.message, "boom");
    assert_eq!(call_count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_exhausted_http_call_is_error_envelope() {
    let addr = common::start_mock_backend(502, "bad gateway").await;
    let client = HttpClient::from_config(&http_config(addr, 1, 10), None).unwrap();
    let resp = client.make_request(&OutboundRequest::new(Method::Get, "/x")).await;

    assert_eq!(resp.status, ApiStatus::Error);
    assert!(resp.message.starts_with("HTTP Endpoint Error: "), "{}", resp.message);
}

#[tokio::test]
async fn test_gzip_bodies_are_decoded() {
    let addr = common::start_programmable_backend(|req| async move {
        assert_eq!(req.header("accept-encoding"), Some("gzip"));
        MockResponse::gzip_json(200, r#"{"status":"OK","message":"zipped","data":[{"n":1}]}"#)
    })
    .await;

    let client = HttpClient::from_config(&http_config(addr, 0, 0), None).unwrap();
    let resp = client.make_request(&OutboundRequest::new(Method::Get, "/z")).await;

    assert_eq!(resp.status, ApiStatus::Ok);
    assert_eq!(resp.message, "zipped");
    assert_eq!(resp.data, Some(json!([{"n": 1}])));
}

#[tokio::test]
async fn test_only_x_headers_are_logged() {
    let addr = common::start_programmable_backend(|_| async {
        MockResponse::json(200, r#"{"status":"OK"}"#).with_header("X-Trace-Id", "abc")
    })
    .await;

    let store = Arc::new(MemoryStore::new());
    let mut config = http_config(addr, 0, 0);
    config.log_collection = Some("trace_log".into());
    let client = HttpClient::from_config(&config, Some(store.clone())).unwrap();
    client
        .make_http_request(&Method::Get, &HashMap::new(), &HashMap::new(), None, "/t", &[])
        .await
        .unwrap();

    assert!(common::wait_for_docs(store.as_ref(), "trace_log", 1).await);
    let docs = store.query("trace_log", &Value::Null, 0, 1).await.unwrap();
    let headers = docs[0]["results"][0]["resp_header"].as_object().unwrap();
    assert_eq!(headers["x-trace-id"], json!(["abc"]));
    assert!(!headers.contains_key("content-type"));
    assert_eq!(docs[0]["status"], "SUCCESS");
}

#[tokio::test]
async fn test_form_post_and_query_params() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let addr = common::start_programmable_backend(move |req| {
        let _ = tx.send(req);
        async { MockResponse::json(200, r#"{"status":"OK"}"#) }
    })
    .await;

    let client = ServiceClient::new(format!("http://{}", addr), Duration::from_secs(1)).unwrap();

    let form = CallOptions::merged([ApiOption::default()
        .header("Content-Type", "application/x-www-form-urlencoded")
        .param("user", "ann")]);
    client.call("POST::/login", &form).await.unwrap();
    let req = rx.recv().await.unwrap();
    assert_eq!(req.request_line, "POST /login HTTP/1.1");
    assert_eq!(req.body_text(), "user=ann");

    let query = CallOptions::merged([
        ApiOption::body(json!({"qty": 2})).var("id", "42"),
        ApiOption::default().paging(0, 5, false),
    ]);
    let (code, body): (u16, Value) = client.request("PUT::/orders/:var_id", &query).await.unwrap();
    assert_eq!(code, 200);
    assert_eq!(body["status"], "OK");
    let req = rx.recv().await.unwrap();
    assert!(req.request_line.starts_with("PUT /orders/42?"), "{}", req.request_line);
    assert!(req.request_line.contains("limit=5"));
    assert_eq!(req.header("content-type"), Some("application/json"));
    assert_eq!(serde_json::from_slice::<Value>(&req.body).unwrap(), json!({"qty": 2}));
}

async fn spawn_binary_peer(delay: Duration) -> (SocketAddr, broadcast::Sender<()>) {
    let mut server = BinaryServer::new(1, Arc::from("peer"));
    server
        .set_route(
            "GET::/slow/:id",
            handler_fn(move |req, res| {
                Box::pin(async move {
                    tokio::time::sleep(delay).await;
                    res.respond(ApiResponse::ok(req.var("id").to_string()))?;
                    Ok::<_, HandlerError>(())
                })
            }),
        )
        .unwrap();
    let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), 64).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = broadcast::channel(1);
    tokio::spawn(server.serve(listener, rx));
    (addr, tx)
}

#[tokio::test]
async fn test_pool_capacity_one_under_concurrency() {
    let (addr, _shutdown) = spawn_binary_peer(Duration::from_millis(20)).await;
    let client = Arc::new(BinaryClient::from_config(&ClientConfig {
        name: "peer".into(),
        protocol: Protocol::Binary,
        address: addr.to_string(),
        timeout_ms: 2_000,
        max_connections: 1,
        ..Default::default()
    }));

    let mut handles = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        handles.push(tokio::spawn(async move {
            client
                .make_request(&OutboundRequest::new(Method::Get, format!("/slow/{}", i)))
                .await
        }));
    }
    for (i, handle) in handles.into_iter().enumerate() {
        let resp = handle.await.unwrap();
        assert_eq!(resp.status, ApiStatus::Ok, "{}", resp.message);
        assert_eq!(resp.message, i.to_string());
    }
    assert!(client.pool().size() <= 1);
}

#[tokio::test]
async fn test_saturated_pool_falls_back_to_ephemeral_connection() {
    let (addr, _shutdown) = spawn_binary_peer(Duration::from_millis(150)).await;
    let client = Arc::new(BinaryClient::with_connector(
        TcpConnector::new(addr.to_string(), Duration::from_secs(2)),
        PoolOptions {
            capacity: 1,
            acquire_attempts: 2,
            acquire_interval: Duration::from_millis(1),
            ..Default::default()
        },
        RetryPolicy::new(0, Duration::ZERO),
    ));

    let first = tokio::spawn({
        let client = client.clone();
        async move { client.make_request(&OutboundRequest::new(Method::Get, "/slow/a")).await }
    });
    tokio::time::sleep(Duration::from_millis(30)).await;
    let second = client.make_request(&OutboundRequest::new(Method::Get, "/slow/b")).await;

    assert_eq!(second.status, ApiStatus::Ok, "{}", second.message);
    assert_eq!(first.await.unwrap().status, ApiStatus::Ok);
    assert_eq!(client.pool().size(), 1);
}

#[tokio::test]
async fn test_binary_peer_going_away_is_recovered() {
    let (addr, shutdown) = spawn_binary_peer(Duration::ZERO).await;
    let client = BinaryClient::from_config(&ClientConfig {
        name: "peer".into(),
        protocol: Protocol::Binary,
        address: addr.to_string(),
        timeout_ms: 500,
        max_retry: 1,
        wait_to_retry_ms: 10,
        ..Default::default()
    });

    let ok = client.make_request(&OutboundRequest::new(Method::Get, "/slow/1")).await;
    assert_eq!(ok.status, ApiStatus::Ok);

    let _ = shutdown.send(());
    tokio::time::sleep(Duration::from_millis(50)).await;

    let down = client.make_request(&OutboundRequest::new(Method::Get, "/slow/2")).await;
    assert_eq!(down.status, ApiStatus::Error);
    assert!(down.message.starts_with("Endpoint error: "), "{}", down.message);
    assert_eq!(client.pool().size(), 0);
}
