//! Dispatch core shared by both transports.
//!
//! # Responsibilities
//! - Run the pre-handler, then the selected route handler
//! - Turn "no response" outcomes into error envelopes
//! - Contain panics and report them as [`InternalError`]
//! - Record request metrics once per reply
//!
//! ```text
//! Request ──▶ pre-handler ──responded/err──▶ Reply
//!                  │
//!                  ▼
//!            route lookup ──none──▶ NotFound / API_NOT_FOUND
//!                  │
//!                  ▼
//!               handler ──▶ Reply
//! ```

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tracing::{debug, error, warn};

use crate::api::{ApiResponse, Method, Protocol, Reply, Request, Responder, SharedHandler};
use crate::error::RuntimeError;
use crate::observability::metrics;
use crate::routing::RouteTable;

/// A handler panicked while serving a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InternalError {
    pub message: String,
}

impl std::fmt::Display for InternalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "handler panicked: {}", self.message)
    }
}

impl std::error::Error for InternalError {}

impl From<InternalError> for RuntimeError {
    fn from(e: InternalError) -> Self {
        RuntimeError::Internal(e.message)
    }
}

/// What to run once the pre-handler lets the request through.
#[derive(Clone)]
pub enum Target {
    /// Resolve through the route table (binary transport).
    Lookup,
    /// Already resolved by the transport's own router (HTTP).
    Handler(SharedHandler),
    /// The transport found no route.
    NotFound,
}

pub struct Dispatcher {
    protocol: Protocol,
    hostname: Arc<str>,
    routes: RouteTable,
    pre_handler: Option<SharedHandler>,
}

impl Dispatcher {
    pub fn new(protocol: Protocol, hostname: Arc<str>) -> Self {
        Self {
            protocol,
            hostname,
            routes: RouteTable::new(),
            pre_handler: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn routes(&self) -> &RouteTable {
        &self.routes
    }

    pub fn add_route(
        &mut self,
        method: Method,
        pattern: &str,
        handler: SharedHandler,
    ) -> Result<(), RuntimeError> {
        self.routes.insert(method, pattern, handler)
    }

    /// Install the pre-handler. A second call replaces the first.
    pub fn set_pre_handler(&mut self, handler: SharedHandler) {
        if self.pre_handler.is_some() {
            debug!(protocol = %self.protocol, "Replacing pre-request handler");
        }
        self.pre_handler = Some(handler);
    }

    /// Reply for an envelope produced by the runtime itself.
    pub fn envelope(&self, response: ApiResponse, started: Instant) -> Reply {
        let responder = Responder::started_at(self.protocol, self.hostname.clone(), started);
        let status_code = response.status.code();
        responder.translate(response).unwrap_or_else(|_| Reply {
            status_code,
            headers: Default::default(),
            body: ApiResponse::internal_error(),
        })
    }

    /// Serve one request end to end. Never fails: panics become the
    /// internal-error envelope.
    pub async fn handle(&self, req: Request, target: Target, started: Instant) -> Reply {
        let method = req.method().to_string();
        let path = req.path().to_string();

        let reply = match self.dispatch(req, target, started).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    protocol = %self.protocol,
                    method = %method,
                    path = %path,
                    error = %e,
                    "Recovered from handler panic"
                );
                self.envelope(ApiResponse::internal_error(), started)
            }
        };

        debug!(
            protocol = %self.protocol,
            method = %method,
            path = %path,
            status = reply.status_code,
            "Request served"
        );
        metrics::record_request(self.protocol, reply.status_code, started);
        reply
    }

    /// Run the pipeline with the panic boundary in place.
    pub async fn dispatch(
        &self,
        req: Request,
        target: Target,
        started: Instant,
    ) -> Result<Reply, InternalError> {
        AssertUnwindSafe(self.run(req, target, started))
            .catch_unwind()
            .await
            .map_err(|panic| InternalError {
                message: panic_message(panic.as_ref()),
            })
    }

    async fn run(&self, mut req: Request, target: Target, started: Instant) -> Reply {
        let mut res = Responder::started_at(self.protocol, self.hostname.clone(), started);

        if let Some(pre) = &self.pre_handler {
            let outcome = pre.call(&mut req, &mut res).await;
            if let Some(reply) = res.take_reply() {
                return reply;
            }
            if let Err(e) = outcome {
                return self.envelope(
                    ApiResponse::error(format!("PreRequest error: {}", e)),
                    started,
                );
            }
        }

        let handler = match target {
            Target::Handler(h) => h,
            Target::NotFound => return self.not_found(&req, started),
            Target::Lookup => match self.routes.lookup(req.method(), req.path()) {
                Some(found) => {
                    let handler = found.route.handler.clone();
                    for (name, value) in found.vars {
                        req.set_var(name, value);
                    }
                    handler
                }
                None => return self.not_found(&req, started),
            },
        };

        let outcome = handler.call(&mut req, &mut res).await;
        match (res.take_reply(), outcome) {
            (Some(reply), _) => reply,
            (None, Err(e)) => {
                warn!(
                    protocol = %self.protocol,
                    path = %req.path(),
                    error = %e,
                    "Handler failed without responding"
                );
                self.envelope(ApiResponse::error(e.message()), started)
            }
            (None, Ok(())) => {
                self.envelope(ApiResponse::error("handler produced no response"), started)
            }
        }
    }

    fn not_found(&self, req: &Request, started: Instant) -> Reply {
        self.envelope(
            ApiResponse::not_found(req.method().as_str(), req.path()),
            started,
        )
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
