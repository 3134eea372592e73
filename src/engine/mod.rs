//! Learning progression and gamification engine.
//!
//! Request flow: quiz grading (if any), then the tracker writes the status
//! transition and asks the ledger for an award inside one store
//! transaction. The resolver and streak calculator serve the read side.

pub mod ledger;
pub mod overview;
pub mod quiz;
pub mod status;
pub mod streak;
pub mod tracker;
pub mod unlock;

use std::future::Future;

use crate::error::EngineError;

/// Re-runs `op` while the store reports a transient conflict, at most
/// `max_retries` extra times.
pub async fn retry_on_conflict<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Err(e) if e.is_retryable() => {
                if attempts > max_retries {
                    tracing::error!(attempts, error = %e, "store conflict persisted");
                    return Err(EngineError::Conflict { attempts });
                }
                tracing::warn!(attempts, error = %e, "store conflict, retrying");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_conflicts_then_succeeds() {
        let calls = AtomicU32::new(0);
        let out = retry_on_conflict(3, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(EngineError::Store(StoreError::Conflict("busy".into())))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let err = retry_on_conflict(2, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(EngineError::Store(StoreError::Conflict("busy".into()))) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::Conflict { attempts: 3 }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = retry_on_conflict(5, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(EngineError::EmptyQuiz(uuid::Uuid::nil())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::EmptyQuiz(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
