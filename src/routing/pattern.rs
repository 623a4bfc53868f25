//! Route patterns and descriptors.
//!
//! # Responsibilities
//! - Validate `/literal/:param` patterns before registration
//! - Parse `METHOD::/path` descriptors
//! - Substitute `:var_<name>` tokens in outbound descriptors
//!
//! # Design Decisions
//! - Patterns are split on `/` exactly like inbound paths, so the leading
//!   empty segment lines up on both sides
//! - Wildcards and brace syntax are rejected; `:name` is the only parameter form

use std::collections::{HashMap, HashSet};

use crate::api::Method;
use crate::error::RuntimeError;

/// Separator between method and path in a descriptor.
pub const DESCRIPTOR_SEPARATOR: &str = "::";

/// Prefix of substitutable tokens in outbound descriptors.
pub const VAR_TOKEN_PREFIX: &str = ":var_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    Param(String),
}

/// A validated route pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutePattern {
    raw: String,
    segments: Vec<Segment>,
}

impl RoutePattern {
    pub fn parse(raw: &str) -> Result<Self, RuntimeError> {
        if raw.is_empty() {
            return Err(RuntimeError::configuration("route pattern is empty"));
        }
        if !raw.starts_with('/') {
            return Err(RuntimeError::configuration(format!(
                "route pattern must start with '/': {}",
                raw
            )));
        }
        if let Some(c) = raw.chars().find(|c| matches!(c, '{' | '}' | '*')) {
            return Err(RuntimeError::configuration(format!(
                "unsupported character '{}' in route pattern {}",
                c, raw
            )));
        }

        let mut seen = HashSet::new();
        let mut segments = Vec::new();
        for part in split_segments(raw) {
            match part.strip_prefix(':') {
                Some("") => {
                    return Err(RuntimeError::configuration(format!(
                        "empty parameter name in route pattern {}",
                        raw
                    )));
                }
                Some(name) => {
                    if !seen.insert(name) {
                        return Err(RuntimeError::configuration(format!(
                            "duplicate parameter '{}' in route pattern {}",
                            name, raw
                        )));
                    }
                    segments.push(Segment::Param(name.to_string()));
                }
                None => segments.push(Segment::Literal(part.to_string())),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the pattern has no parameter segments.
    pub fn is_literal(&self) -> bool {
        self.segments
            .iter()
            .all(|s| matches!(s, Segment::Literal(_)))
    }

    /// Path in axum's syntax (`:id` → `{id}`).
    pub fn to_axum_path(&self) -> String {
        self.segments
            .iter()
            .map(|s| match s {
                Segment::Literal(l) => l.clone(),
                Segment::Param(p) => format!("{{{}}}", p),
            })
            .collect::<Vec<_>>()
            .join("/")
    }
}

/// Split a path on `/`, keeping empty segments.
pub fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/')
}

/// Parse `GET::/users/:id` into its method and path.
pub fn parse_descriptor(descriptor: &str) -> Result<(Method, String), RuntimeError> {
    let mut parts = descriptor.split(DESCRIPTOR_SEPARATOR);
    match (parts.next(), parts.next(), parts.next()) {
        (Some(method), Some(path), None) if !method.is_empty() && !path.is_empty() => {
            Ok((Method::from(method), path.to_string()))
        }
        _ => Err(RuntimeError::configuration(format!(
            "invalid route descriptor '{}', expected METHOD::/path",
            descriptor
        ))),
    }
}

/// Replace every `:var_<name>` token with its value from `vars`.
pub fn substitute_vars(descriptor: &str, vars: &HashMap<String, String>) -> String {
    // Longest names first so `:var_id` never eats into `:var_id2`.
    let mut names: Vec<_> = vars.iter().collect();
    names.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut out = descriptor.to_string();
    for (name, value) in names {
        out = out.replace(&format!("{}{}", VAR_TOKEN_PREFIX, name), value);
    }
    out
}
