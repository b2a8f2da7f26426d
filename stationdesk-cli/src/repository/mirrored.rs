//! Primary-fatal, secondary-best-effort writes

use std::future::Future;

use anyhow::Result;

use crate::store::lookups::EnsureReport;
use crate::store::{OperationResult, SyncReport};

/// Whether a primary outcome should be repeated on the mirror
pub trait Mirrorable {
    fn should_mirror(&self) -> bool;
}

impl Mirrorable for OperationResult {
    fn should_mirror(&self) -> bool {
        self.success
    }
}

impl Mirrorable for SyncReport {
    fn should_mirror(&self) -> bool {
        true
    }
}

impl Mirrorable for EnsureReport {
    fn should_mirror(&self) -> bool {
        true
    }
}

impl Mirrorable for () {
    fn should_mirror(&self) -> bool {
        true
    }
}

/// Runs a write against the primary backend and, if it succeeded, against
/// the mirror.
///
/// A primary error is returned as-is and the mirror is not touched. A mirror
/// error or declined mirror outcome is logged and dropped; the caller always
/// gets the primary outcome.
#[derive(Debug, Clone)]
pub struct MirroredWrite {
    operation: String,
}

impl MirroredWrite {
    pub fn new(operation: impl Into<String>) -> Self {
        MirroredWrite {
            operation: operation.into(),
        }
    }

    pub async fn run<T, S, P, M>(&self, primary: P, mirror: Option<M>) -> Result<T>
    where
        T: Mirrorable,
        S: Mirrorable,
        P: Future<Output = Result<T>>,
        M: Future<Output = Result<S>>,
    {
        let outcome = primary.await?;

        let Some(mirror) = mirror else {
            return Ok(outcome);
        };
        if !outcome.should_mirror() {
            log::debug!("{}: primary declined, mirror skipped", self.operation);
            return Ok(outcome);
        }

        match mirror.await {
            Ok(mirrored) if mirrored.should_mirror() => {
                log::debug!("{}: mirrored", self.operation)
            }
            Ok(_) => log::warn!("{}: mirror declined the write", self.operation),
            Err(e) => log::warn!("{}: mirror write failed: {:#}", self.operation, e),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_mirror_failure_is_swallowed() {
        let result = MirroredWrite::new("create")
            .run(
                async { Ok(OperationResult::ok("written")) },
                Some(async { Err::<(), _>(anyhow!("mirror down")) }),
            )
            .await
            .unwrap();
        assert_eq!(result, OperationResult::ok("written"));
    }

    #[tokio::test]
    async fn test_declined_mirror_keeps_primary_outcome() {
        let calls = AtomicUsize::new(0);
        let result = MirroredWrite::new("create")
            .run(
                async { Ok(OperationResult::ok("Created station S1")) },
                Some(async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(OperationResult::failed("Station S1 already exists"))
                }),
            )
            .await
            .unwrap();
        assert_eq!(result, OperationResult::ok("Created station S1"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_primary_failure_propagates_and_skips_mirror() {
        let calls = AtomicUsize::new(0);
        let err = MirroredWrite::new("create")
            .run(
                async { Err::<OperationResult, _>(anyhow!("disk full")) },
                Some(async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_declined_primary_is_not_mirrored() {
        let calls = AtomicUsize::new(0);
        let result = MirroredWrite::new("append")
            .run(
                async { Ok(OperationResult::failed("Station ID is required")) },
                Some(async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_successful_write_reaches_mirror() {
        let calls = AtomicUsize::new(0);
        MirroredWrite::new("sync")
            .run(
                async { Ok(SyncReport::default()) },
                Some(async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
