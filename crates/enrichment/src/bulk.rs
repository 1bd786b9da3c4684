//! Bulk enrichment runner.
//!
//! One registry lookup per organization, strictly sequential, with a fixed
//! inter-call delay to stay under the registry's rate limit. The cancel token
//! is checked before every iteration; progress is pushed to an observer after
//! every step so a caller can render a progress bar.

use std::future::Future;
use std::time::Duration;

use funil_contacts::OrganizationId;

use crate::cancel::CancelToken;

/// Default pause between consecutive registry calls.
pub const INTER_CALL_DELAY: Duration = Duration::from_millis(500);

/// One organization queued for enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichTarget {
    pub id: OrganizationId,
    pub name: String,
    /// Bare 14-digit CNPJ.
    pub cnpj: String,
}

/// A failed lookup, kept for the final report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichmentFailure {
    pub id: OrganizationId,
    pub name: String,
    pub message: String,
}

/// Running/final state of a bulk enrichment.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct EnrichmentProgress {
    /// Number of organizations processed so far.
    pub current: usize,
    pub total: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub errors: Vec<EnrichmentFailure>,
    pub cancelled: bool,
}

/// Bulk enrichment configuration.
#[derive(Debug, Clone)]
pub struct BulkEnrichment {
    delay: Duration,
}

impl Default for BulkEnrichment {
    fn default() -> Self {
        Self {
            delay: INTER_CALL_DELAY,
        }
    }
}

impl BulkEnrichment {
    pub fn with_delay(delay: Duration) -> Self {
        Self { delay }
    }

    /// Run the loop to completion (or cancellation).
    ///
    /// `lookup` performs the registry call *and* applies the update for one
    /// organization; the runner only sequences, paces and counts. There is no
    /// retry and no rollback of updates already applied.
    pub async fn run<F, Fut, E>(
        &self,
        targets: Vec<EnrichTarget>,
        mut lookup: F,
        token: &CancelToken,
        mut on_progress: impl FnMut(&EnrichmentProgress),
    ) -> EnrichmentProgress
    where
        F: FnMut(&EnrichTarget) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: core::fmt::Display,
    {
        let mut progress = EnrichmentProgress {
            total: targets.len(),
            ..Default::default()
        };

        for (index, target) in targets.iter().enumerate() {
            if token.is_cancelled() {
                progress.cancelled = true;
                break;
            }

            if index > 0 && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            match lookup(target).await {
                Ok(()) => progress.success_count += 1,
                Err(err) => {
                    tracing::warn!(
                        organization = %target.name,
                        cnpj = %target.cnpj,
                        error = %err,
                        "enrichment lookup failed"
                    );
                    progress.error_count += 1;
                    progress.errors.push(EnrichmentFailure {
                        id: target.id,
                        name: target.name.clone(),
                        message: err.to_string(),
                    });
                }
            }

            progress.current = index + 1;
            on_progress(&progress);
        }

        progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use funil_core::RecordId;

    fn targets(n: usize) -> Vec<EnrichTarget> {
        (0..n)
            .map(|i| EnrichTarget {
                id: OrganizationId::new(RecordId::new()),
                name: format!("Org {}", i + 1),
                cnpj: format!("{:014}", i + 1),
            })
            .collect()
    }

    #[tokio::test]
    async fn counts_success_and_failure_per_target() {
        let runner = BulkEnrichment::with_delay(Duration::ZERO);
        let token = CancelToken::new();
        let items = targets(3);

        let progress = runner
            .run(
                items.clone(),
                |t| {
                    let fail = t.name == "Org 2";
                    async move {
                        if fail {
                            Err("registry returned 404")
                        } else {
                            Ok(())
                        }
                    }
                },
                &token,
                |_| {},
            )
            .await;

        assert_eq!(progress.success_count, 2);
        assert_eq!(progress.error_count, 1);
        assert_eq!(progress.errors.len(), 1);
        assert_eq!(progress.errors[0].name, "Org 2");
        assert_eq!(progress.errors[0].id, items[1].id);
        assert_eq!(progress.current, 3);
        assert_eq!(progress.total, 3);
        assert!(!progress.cancelled);
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_call() {
        let runner = BulkEnrichment::with_delay(Duration::ZERO);
        let token = CancelToken::new();
        let cancel_after_first = token.clone();

        let progress = runner
            .run(
                targets(3),
                |_| async { Ok::<(), String>(()) },
                &token,
                |p| {
                    if p.current == 1 {
                        cancel_after_first.cancel();
                    }
                },
            )
            .await;

        assert!(progress.cancelled);
        assert_eq!(progress.current, 1);
        assert_eq!(progress.success_count, 1);
        assert_eq!(progress.total, 3);
    }

    #[tokio::test]
    async fn progress_observer_sees_every_step() {
        let runner = BulkEnrichment::with_delay(Duration::ZERO);
        let token = CancelToken::new();
        let mut seen = Vec::new();

        runner
            .run(
                targets(3),
                |_| async { Ok::<(), String>(()) },
                &token,
                |p| seen.push(p.current),
            )
            .await;

        assert_eq!(seen, vec![1, 2, 3]);
    }
}
