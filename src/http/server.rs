//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Compile the route table into an axum Router at start
//! - Wire up middleware (request ID, tracing, gzip, concurrency)
//! - Bound each request by the body limit and timeout, answering with envelopes
//! - Serve the plain port and, when exposed, the TLS port
//! - Route unmatched requests through the pre-handler to a NotFound envelope
//!
//! # Design Decisions
//! - The dispatcher is the router state; route closures only carry their handler
//! - Two patterns with the same shape but different parameter names are
//!   rejected at registration (axum cannot hold both)
//! - Methods outside the standard verbs are not routable over HTTP

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::extract::{Request as AxumRequest, State};
use axum::http::header::CONTENT_LENGTH;
use axum::routing::{on, MethodFilter};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::compression::CompressionLayer;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::api::{ApiResponse, ApiStatus, Method, Protocol, Reply, SharedHandler};
use crate::config::TlsConfig;
use crate::error::RuntimeError;
use crate::http::request::{adapt, bind_vars};
use crate::lifecycle::signalled;
use crate::net::tls::load_tls_config;
use crate::routing::{RoutePattern, Segment};
use crate::server::{ApiServer, Dispatcher, ServerLimits, Target};

/// Default listening port.
pub const DEFAULT_PORT: u16 = 8080;

const TLS_GRACE: Duration = Duration::from_secs(5);

/// HTTP transport server.
pub struct HttpServer {
    id: usize,
    port: u16,
    ssl: Option<(u16, TlsConfig)>,
    limits: ServerLimits,
    dispatcher: Dispatcher,
    /// First raw pattern registered for each shape (params blanked).
    shapes: HashMap<String, String>,
}

impl HttpServer {
    pub fn new(id: usize, hostname: Arc<str>) -> Self {
        Self {
            id,
            port: DEFAULT_PORT,
            ssl: None,
            limits: ServerLimits::default(),
            dispatcher: Dispatcher::new(Protocol::Http, hostname),
            shapes: HashMap::new(),
        }
    }

    pub fn with_limits(mut self, limits: ServerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ssl_port(&self) -> Option<u16> {
        self.ssl.as_ref().map(|(port, _)| *port)
    }

    /// Build the axum Router with all middleware layers.
    pub fn into_router(self) -> Router {
        let max_connections = self.limits.max_connections;
        let state = Arc::new(HttpState {
            dispatcher: self.dispatcher,
            request_timeout: self.limits.request_timeout,
            max_body_bytes: self.limits.max_body_bytes,
        });
        let mut router: Router<Arc<HttpState>> = Router::new();

        for route in state.dispatcher.routes().routes() {
            let Some(filter) = method_filter(&route.method) else {
                continue;
            };
            let path = route.pattern.to_axum_path();
            let pattern = route.pattern.clone();
            let handler = route.handler.clone();
            router = router.route(
                &path,
                on(
                    filter,
                    move |State(s): State<Arc<HttpState>>, req: AxumRequest| async move {
                        serve_request(s, Target::Handler(handler), Some(pattern), req).await
                    },
                ),
            );
        }

        router
            .fallback(fallback)
            .method_not_allowed_fallback(fallback)
            .with_state(state)
            .layer(CompressionLayer::new())
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(GlobalConcurrencyLimitLayer::new(max_connections))
    }

    /// Serve on an already bound listener until `shutdown` fires.
    pub async fn serve(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), RuntimeError> {
        let id = self.id;
        let ssl = self.ssl.clone();
        let routes = self.dispatcher.routes().len();
        let app = self.into_router();

        let tls_task = match ssl {
            Some((port, tls)) => {
                let config = load_tls_config(&tls).await?;
                let handle = axum_server::Handle::new();
                let stopper = handle.clone();
                let mut rx = shutdown.resubscribe();
                tokio::spawn(async move {
                    signalled(&mut rx).await;
                    stopper.graceful_shutdown(Some(TLS_GRACE));
                });

                let addr = SocketAddr::from(([0, 0, 0, 0], port));
                info!(server_id = id, protocol = "https", address = %addr, "API server listening");
                let service = app.clone().into_make_service_with_connect_info::<SocketAddr>();
                Some(tokio::spawn(
                    axum_server::bind_rustls(addr, config).handle(handle).serve(service),
                ))
            }
            None => None,
        };

        info!(
            server_id = id,
            protocol = %Protocol::Http,
            address = %listener.local_addr()?,
            routes,
            "API server listening"
        );

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { signalled(&mut shutdown).await })
        .await?;

        if let Some(task) = tls_task {
            task.await
                .map_err(|e| RuntimeError::Internal(format!("TLS listener task failed: {}", e)))??;
        }

        info!(server_id = id, protocol = %Protocol::Http, "API server stopped");
        Ok(())
    }
}

/// Router state shared by every route and the fallback.
struct HttpState {
    dispatcher: Dispatcher,
    request_timeout: Duration,
    max_body_bytes: usize,
}

async fn fallback(State(s): State<Arc<HttpState>>, req: AxumRequest) -> Reply {
    serve_request(s, Target::NotFound, None, req).await
}

async fn serve_request(
    state: Arc<HttpState>,
    target: Target,
    pattern: Option<RoutePattern>,
    req: AxumRequest,
) -> Reply {
    let started = Instant::now();
    let path = req.uri().path().to_string();
    match tokio::time::timeout(
        state.request_timeout,
        read_and_dispatch(&state, target, pattern, req, started),
    )
    .await
    {
        Ok(reply) => reply,
        Err(_) => {
            warn!(path = %path, timeout = ?state.request_timeout, "Request timed out");
            state
                .dispatcher
                .envelope(ApiResponse::error("request timed out"), started)
        }
    }
}

async fn read_and_dispatch(
    state: &HttpState,
    target: Target,
    pattern: Option<RoutePattern>,
    req: AxumRequest,
    started: Instant,
) -> Reply {
    let (parts, body) = req.into_parts();
    let limit = state.max_body_bytes;

    let declared = parts
        .headers
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok());
    if declared.is_some_and(|len| len > limit) {
        return state.dispatcher.envelope(
            ApiResponse::new(
                ApiStatus::Invalid,
                format!("request body exceeds {} bytes", limit),
            ),
            started,
        );
    }

    let body = match axum::body::to_bytes(body, limit).await {
        Ok(body) => body,
        Err(e) => {
            return state.dispatcher.envelope(
                ApiResponse::new(ApiStatus::Invalid, format!("unreadable request body: {}", e)),
                started,
            );
        }
    };

    let mut request = adapt(&parts, body);
    if let Some(pattern) = pattern.as_ref() {
        bind_vars(&mut request, pattern);
    }
    state.dispatcher.handle(request, target, started).await
}

fn method_filter(method: &Method) -> Option<MethodFilter> {
    Some(match method {
        Method::Get => MethodFilter::GET,
        Method::Post => MethodFilter::POST,
        Method::Put => MethodFilter::PUT,
        Method::Delete => MethodFilter::DELETE,
        Method::Patch => MethodFilter::PATCH,
        Method::Head => MethodFilter::HEAD,
        Method::Options => MethodFilter::OPTIONS,
        Method::Other(_) => return None,
    })
}

/// `/users/:id/orders` becomes `/users/:/orders`.
fn shape(pattern: &RoutePattern) -> String {
    let segments: Vec<&str> = pattern
        .segments()
        .iter()
        .map(|s| match s {
            Segment::Literal(lit) => lit.as_str(),
            Segment::Param(_) => ":",
        })
        .collect();
    segments.join("/")
}

#[async_trait]
impl ApiServer for HttpServer {
    fn id(&self) -> usize {
        self.id
    }

    fn protocol(&self) -> Protocol {
        Protocol::Http
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
        if method_filter(&method).is_none() {
            return Err(RuntimeError::configuration(format!(
                "method {} cannot be routed over HTTP",
                method
            )));
        }

        let parsed = RoutePattern::parse(pattern)?;
        let shape = shape(&parsed);
        match self.shapes.get(&shape) {
            Some(existing) if existing != parsed.raw() => {
                warn!(pattern = %parsed.raw(), existing = %existing, "Conflicting route pattern");
                return Err(RuntimeError::configuration(format!(
                    "pattern {} conflicts with {}",
                    parsed.raw(),
                    existing
                )));
            }
            Some(_) => {}
            None => {
                self.shapes.insert(shape, parsed.raw().to_string());
            }
        }

        self.dispatcher.add_route(method, pattern, handler)
    }

    fn pre_request(&mut self, handler: SharedHandler) {
        self.dispatcher.set_pre_handler(handler);
    }

    fn expose(&mut self, port: u16) {
        self.port = port;
    }

    fn expose_ssl(&mut self, port: u16, tls: TlsConfig) -> Result<(), RuntimeError> {
        self.ssl = Some((port, tls));
        Ok(())
    }

    async fn start(self: Box<Self>, shutdown: broadcast::Receiver<()>) -> Result<(), RuntimeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;
        (*self).serve(listener, shutdown).await
    }
}
