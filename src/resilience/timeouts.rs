//! Timeout enforcement for downstream handoffs.
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Timeout errors are distinct from transport rejections
//! - A timed-out handoff is never retried here; the caller records it once
//!   and surfaces it

use std::future::Future;
use std::time::Duration;

use crate::transport::TransportError;

/// Run a transport call under a deadline.
///
/// `operation` names the call in the resulting error (e.g., "enqueue").
pub async fn with_deadline<T, F>(
    operation: &'static str,
    deadline: Duration,
    call: F,
) -> Result<T, TransportError>
where
    F: Future<Output = Result<T, TransportError>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(
                operation,
                deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX),
                "Handoff timed out"
            );
            Err(TransportError::Timeout {
                operation,
                after: deadline,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_completes_within_deadline() {
        let result = with_deadline("enqueue", Duration::from_millis(50), async {
            Ok::<_, TransportError>(7)
        })
        .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out() {
        let result: Result<(), _> = with_deadline("submit_job", Duration::from_millis(50), async {
            std::future::pending::<()>().await;
            Ok(())
        })
        .await;

        match result {
            Err(TransportError::Timeout { operation, after }) => {
                assert_eq!(operation, "submit_job");
                assert_eq!(after, Duration::from_millis(50));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_passes_through_rejection() {
        let result: Result<(), _> = with_deadline("enqueue", Duration::from_secs(1), async {
            Err(TransportError::Rejected("queue does not exist".into()))
        })
        .await;
        assert!(matches!(result, Err(TransportError::Rejected(_))));
    }
}
