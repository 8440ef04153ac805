//! Startup sweep over every open pull request of the watched repositories.

use serde::Serialize;
use tracing::{error, info, warn};

use crate::forge::RepoRef;
use crate::pipeline::Reconciler;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BackfillSummary {
    /// Repositories whose open pull requests were listed.
    pub repositories: usize,
    pub pull_requests: usize,
    /// Repository listings, review loads or forge mutations that failed.
    pub failures: usize,
}

/// Reconcile every open pull request, one repository and one PR at a time.
///
/// A failure is logged and skipped; the sweep always runs to the end.
pub async fn backfill(reconciler: &Reconciler, repos: &[RepoRef]) -> BackfillSummary {
    let mut summary = BackfillSummary::default();

    for repo in repos {
        let pull_requests = match reconciler
            .forge()
            .list_open_pull_requests(&repo.owner, &repo.repo)
            .await
        {
            Ok(prs) => prs,
            Err(e) => {
                error!("[{}] Failed to list open pull requests: {:#}", repo, e);
                summary.failures += 1;
                continue;
            }
        };

        summary.repositories += 1;
        info!("[{}] Backfilling {} open pull request(s)", repo, pull_requests.len());

        for snapshot in &pull_requests {
            summary.pull_requests += 1;
            match reconciler.run(snapshot).await {
                Ok(report) if report.is_clean() => {}
                Ok(report) => {
                    warn!(
                        "[{}] {} forge call(s) failed for \"{}\" (#{})",
                        repo,
                        report.failures.len(),
                        snapshot.title,
                        snapshot.number
                    );
                    summary.failures += report.failures.len();
                }
                Err(e) => {
                    error!("{:#}", e);
                    summary.failures += 1;
                }
            }
        }
    }

    info!(
        "Backfill finished: {} repositories, {} pull requests, {} failures",
        summary.repositories, summary.pull_requests, summary.failures
    );
    summary
}
