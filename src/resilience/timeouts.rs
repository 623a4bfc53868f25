//! Timeout enforcement.
//!
//! Wraps a fallible network future with a deadline; expiry becomes
//! [`TransportError::Timeout`], which the retry logic treats as transient.

use std::future::Future;
use std::time::Duration;

use crate::error::TransportError;

pub async fn with_timeout<T, F>(limit: Duration, fut: F) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| TransportError::Timeout(limit))?
}
