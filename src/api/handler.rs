//! Handler seam shared by both transports.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;

use crate::api::{Request, Responder};
use crate::error::HandlerError;

/// Application logic bound to a route, or run as the pre-handler.
///
/// A handler answers by calling [`Responder::respond`]. Returning `Err`
/// without responding yields an `Error` envelope carrying the error text.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    async fn call(&self, req: &mut Request, res: &mut Responder) -> Result<(), HandlerError>;
}

pub type SharedHandler = Arc<dyn Handler>;

/// Handler backed by a closure returning a boxed future.
pub struct FnHandler<F> {
    f: F,
}

#[async_trait]
impl<F> Handler for FnHandler<F>
where
    F: for<'a> Fn(&'a mut Request, &'a mut Responder) -> BoxFuture<'a, Result<(), HandlerError>>
        + Send
        + Sync
        + 'static,
{
    async fn call(&self, req: &mut Request, res: &mut Responder) -> Result<(), HandlerError> {
        (self.f)(req, res).await
    }
}

/// Wrap a closure as a shared handler.
///
/// ```ignore
/// let echo = handler_fn(|req, res| Box::pin(async move {
///     res.respond(ApiResponse::ok("").with_data(vec![req.content_text().to_string()]))?;
///     Ok(())
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> SharedHandler
where
    F: for<'a> Fn(&'a mut Request, &'a mut Responder) -> BoxFuture<'a, Result<(), HandlerError>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnHandler { f })
}
