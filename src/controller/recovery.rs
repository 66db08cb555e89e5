//! Panic recovery for reconcile calls.
//!
//! A panic inside one reconciliation must not take its worker down with it.
//! The panic is captured, logged, and turned into `Error::Internal`, which
//! the queue then retries with backoff like any other failure.

use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use crate::types::{Error, Result};

/// Await `future`, converting a panic into an error.
pub async fn with_recovery<F, T>(future: F, operation_name: &str) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => {
            let panic_msg = extract_panic_message(payload.as_ref());
            tracing::error!(
                operation = operation_name,
                panic = %panic_msg,
                "panic recovered"
            );
            Err(Error::internal(format!(
                "panic in {operation_name}: {panic_msg}"
            )))
        }
    }
}

fn extract_panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic (no message)".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_with_recovery_success() {
        let result = with_recovery(async { Ok(42) }, "test_operation").await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_with_recovery_preserves_error() {
        let result: Result<()> = with_recovery(
            async { Err(Error::conflict("status.state")) },
            "test_operation",
        )
        .await;
        assert!(matches!(result, Err(Error::Conflict(_))));
    }

    #[tokio::test]
    async fn test_with_recovery_panic_str() {
        async fn explode() -> Result<()> {
            panic!("test panic")
        }

        let result = with_recovery(explode(), "reconcile").await;

        let err = result.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        let msg = err.to_string();
        assert!(msg.contains("panic in reconcile"));
        assert!(msg.contains("test panic"));
    }

    #[tokio::test]
    async fn test_with_recovery_panic_string() {
        async fn explode(detail: String) -> Result<()> {
            panic!("{detail} panic message")
        }

        let result = with_recovery(explode("dynamic".to_string()), "reconcile").await;
        assert!(result.unwrap_err().to_string().contains("dynamic panic message"));
    }

    #[test]
    fn test_extract_panic_message_unknown_payload() {
        let payload: Box<dyn Any + Send> = Box::new(7_u32);
        assert_eq!(
            extract_panic_message(payload.as_ref()),
            "unknown panic (no message)"
        );
    }
}
