//! Supervisor boundary for handler execution.

use crate::{Error, Result};
use std::future::Future;

/// Runs a unit of work so that an unexpected fault, including a panic,
/// surfaces as a typed [`Error::Internal`] instead of unwinding into caller
/// code. The original fault is captured in the error message and logged for
/// diagnostics.
///
/// Meant for the outermost dispatch boundary around untrusted handler code;
/// ordinary `Err` results pass through untouched.
pub async fn supervise<T>(work: impl Future<Output = Result<T>> + Send + 'static) -> Result<T>
where
    T: Send + 'static,
{
    match tokio::spawn(work).await {
        Ok(result) => result,
        Err(join_err) => {
            if join_err.is_panic() {
                let payload = join_err.into_panic();
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(panic = %message, "supervised operation panicked");
                Err(Error::internal(format!("operation panicked: {message}")))
            } else {
                Err(Error::Cancelled)
            }
        }
    }
}
