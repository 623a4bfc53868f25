//! Request adaptation.
//!
//! # Responsibilities
//! - Turn an axum request into the neutral [`Request`]
//! - Decode the query string into unique-key params
//! - Bind path variables from the matched pattern
//!
//! # Design Decisions
//! - Header names arrive lowercased; repeated headers are joined with ", "
//! - The body is buffered once; text and JSON decoding stay lazy

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::ConnectInfo;
use axum::http::request::Parts;
use bytes::Bytes;

use crate::api::{Method, Protocol, Request};
use crate::routing::matcher;
use crate::routing::pattern::{split_segments, RoutePattern};

/// Header carrying the request id set by the middleware stack.
pub const X_REQUEST_ID: &str = "x-request-id";

/// Build the neutral request from the request head and its buffered body.
pub fn adapt(parts: &Parts, body: Bytes) -> Request {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in parts.headers.iter() {
        let Ok(value) = value.to_str() else {
            continue;
        };
        headers
            .entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    let params: HashMap<String, String> = parts
        .uri
        .query()
        .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
        .unwrap_or_default();

    let mut req = Request::new(Method::from(&parts.method), parts.uri.path())
        .with_protocol(Protocol::Http)
        .with_params(params)
        .with_headers(headers)
        .with_body(body);

    if let Some(ConnectInfo(peer)) = parts.extensions.get::<ConnectInfo<SocketAddr>>() {
        req = req.with_peer(*peer);
    }
    req
}

/// Bind `pattern`'s parameters against the request path.
pub fn bind_vars(req: &mut Request, pattern: &RoutePattern) {
    let input: Vec<&str> = split_segments(req.path()).collect();
    if let Some(candidate) = matcher::score(pattern, &input) {
        for (name, value) in candidate.vars {
            req.set_var(name, value);
        }
    }
}
