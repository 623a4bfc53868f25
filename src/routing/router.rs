//! Route table and lookup.
//!
//! # Responsibilities
//! - Store routes keyed by identity `(method, raw pattern)`
//! - Resolve an inbound `(method, path)` to a handler plus bound variables
//! - Return an explicit no-match rather than a silent default
//!
//! # Design Decisions
//! - Registration order is kept; it is the final tie-break
//! - Literal patterns are also indexed in a map so exact hits skip the scan
//! - Immutable once a server starts (shared behind `Arc`, no locks)

use std::collections::HashMap;

use tracing::warn;

use crate::api::{Method, SharedHandler};
use crate::error::RuntimeError;
use crate::routing::matcher;
use crate::routing::pattern::RoutePattern;

#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub pattern: RoutePattern,
    pub handler: SharedHandler,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("pattern", &self.pattern.raw())
            .finish()
    }
}

/// Result of a successful lookup.
#[derive(Debug)]
pub struct RouteMatch<'a> {
    pub route: &'a Route,
    pub vars: HashMap<String, String>,
}

#[derive(Debug, Default, Clone)]
pub struct RouteTable {
    routes: Vec<Route>,
    index: HashMap<(Method, String), usize>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. Re-registering an identity replaces its handler.
    pub fn insert(
        &mut self,
        method: Method,
        pattern: &str,
        handler: SharedHandler,
    ) -> Result<(), RuntimeError> {
        let pattern = RoutePattern::parse(pattern)?;
        let key = (method.clone(), pattern.raw().to_string());

        if let Some(&idx) = self.index.get(&key) {
            warn!(
                method = %method,
                pattern = %pattern.raw(),
                "Route registered twice, replacing handler"
            );
            self.routes[idx].handler = handler;
            return Ok(());
        }

        self.index.insert(key, self.routes.len());
        self.routes.push(Route {
            method,
            pattern,
            handler,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Resolve `method` + `path` to a route.
    pub fn lookup(&self, method: &Method, path: &str) -> Option<RouteMatch<'_>> {
        if let Some(&idx) = self.index.get(&(method.clone(), path.to_string())) {
            let route = &self.routes[idx];
            if route.pattern.is_literal() {
                return Some(RouteMatch {
                    route,
                    vars: HashMap::new(),
                });
            }
        }

        let candidates: Vec<&Route> = self
            .routes
            .iter()
            .filter(|r| &r.method == method)
            .collect();

        matcher::select(candidates.iter().map(|r| &r.pattern), path).map(|(idx, vars)| {
            RouteMatch {
                route: candidates[idx],
                vars,
            }
        })
    }
}
