//! Responder: the single exit point for a handler's answer.
//!
//! # Responsibilities
//! - Reject envelopes whose `data` is not an array
//! - Move extra headers out of the envelope into the reply
//! - Stamp `X-Execution-Time` and `X-Hostname`
//! - Map the neutral status onto the transport's native code
//!
//! The transport adapter takes the finished [`Reply`] and writes it to the
//! wire exactly once.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::api::{ApiResponse, Protocol};
use crate::error::RespondError;

pub const X_EXECUTION_TIME: &str = "X-Execution-Time";
pub const X_HOSTNAME: &str = "X-Hostname";

/// A translated response, ready for the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Native status code (HTTP status, or the binary envelope's status field).
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: ApiResponse,
}

#[derive(Debug)]
pub struct Responder {
    started: Instant,
    hostname: Arc<str>,
    protocol: Protocol,
    reply: Option<Reply>,
}

impl Responder {
    pub fn new(protocol: Protocol, hostname: Arc<str>) -> Self {
        Self::started_at(protocol, hostname, Instant::now())
    }

    /// Responder whose execution clock started at `started`.
    pub fn started_at(protocol: Protocol, hostname: Arc<str>, started: Instant) -> Self {
        Self {
            started,
            hostname,
            protocol,
            reply: None,
        }
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    /// Translate `response` into the reply for this request.
    ///
    /// A later call replaces the earlier reply.
    pub fn respond(&mut self, response: ApiResponse) -> Result<(), RespondError> {
        self.reply = Some(self.translate(response)?);
        Ok(())
    }

    /// Build the reply for `response` without recording it.
    pub fn translate(&self, mut response: ApiResponse) -> Result<Reply, RespondError> {
        if matches!(&response.data, Some(data) if !data.is_array()) {
            return Err(RespondError::DataNotSequence);
        }

        let mut headers = response.headers.take().unwrap_or_default();
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        headers.insert(X_EXECUTION_TIME.to_string(), format!("{:.4} ms", elapsed_ms));
        headers.insert(X_HOSTNAME.to_string(), self.hostname.to_string());

        Ok(Reply {
            status_code: response.status.code(),
            headers,
            body: response,
        })
    }

    pub fn has_responded(&self) -> bool {
        self.reply.is_some()
    }

    pub fn reply(&self) -> Option<&Reply> {
        self.reply.as_ref()
    }

    pub fn take_reply(&mut self) -> Option<Reply> {
        self.reply.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiStatus;
    use serde_json::json;

    fn responder() -> Responder {
        Responder::new(Protocol::Http, Arc::from("node-1"))
    }

    #[test]
    fn rejects_scalar_data() {
        let mut res = responder();
        let mut resp = ApiResponse::ok("x");
        resp.data = Some(json!({"id": 1}));
        assert_eq!(res.respond(resp), Err(RespondError::DataNotSequence));
        assert!(!res.has_responded());
    }

    #[test]
    fn moves_headers_and_stamps_diagnostics() {
        let mut res = responder();
        let resp = ApiResponse::new(ApiStatus::Existed, "dup").with_header("X-Trace", "abc");
        res.respond(resp).unwrap();

        let reply = res.reply().unwrap();
        assert_eq!(reply.status_code, 409);
        assert_eq!(reply.headers["X-Trace"], "abc");
        assert_eq!(reply.headers[X_HOSTNAME], "node-1");
        assert!(reply.headers[X_EXECUTION_TIME].ends_with(" ms"));
        assert!(reply.body.headers.is_none());
    }

    #[test]
    fn execution_time_has_four_decimals() {
        let mut res = responder();
        res.respond(ApiResponse::ok("")).unwrap();
        let value = &res.reply().unwrap().headers[X_EXECUTION_TIME];
        let number = value.trim_end_matches(" ms");
        let decimals = number.split('.').nth(1).unwrap();
        assert_eq!(decimals.len(), 4);
    }

    #[test]
    fn repeated_respond_differs_only_in_execution_time() {
        let resp = ApiResponse::ok("same")
            .with_data(vec![json!({"a": 1})])
            .with_header("X-Extra", "1");

        let mut res = responder();
        res.respond(resp.clone()).unwrap();
        let first = res.take_reply().unwrap();
        res.respond(resp).unwrap();
        let second = res.take_reply().unwrap();

        assert_eq!(first.status_code, second.status_code);
        assert_eq!(first.body, second.body);
        let strip = |r: &Reply| {
            let mut h = r.headers.clone();
            h.remove(X_EXECUTION_TIME);
            h
        };
        assert_eq!(strip(&first), strip(&second));
    }
}
