//! Load → reconcile → classify → apply, for one pull request.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use lgtm_core::{classify, reconcile, Classification, Verdict};
use tokio::sync::OwnedMutexGuard;
use tracing::info;

use crate::applier::{apply, ApplyReport};
use crate::forge::{Forge, PullRequestSnapshot};

/// Unique identifier for a pull request across repositories
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PullRequestId {
    pub repo_owner: String,
    pub repo_name: String,
    pub pr_number: u64,
}

impl From<&PullRequestSnapshot> for PullRequestId {
    fn from(snapshot: &PullRequestSnapshot) -> Self {
        Self {
            repo_owner: snapshot.owner.clone(),
            repo_name: snapshot.repo_name.clone(),
            pr_number: snapshot.number,
        }
    }
}

/// Per-PR async locks so that two deliveries for the same pull request
/// never interleave their label mutations.
///
/// Entries are removed once nobody holds or waits on them.
#[derive(Default)]
pub struct PrLocks {
    locks: Mutex<HashMap<PullRequestId, Arc<tokio::sync::Mutex<()>>>>,
}

impl PrLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(self: &Arc<Self>, id: PullRequestId) -> PrGuard {
        let entry = {
            let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
            locks.entry(id.clone()).or_default().clone()
        };
        let guard = entry.lock_owned().await;
        PrGuard {
            locks: Arc::clone(self),
            id,
            guard: Some(guard),
        }
    }

    /// Number of pull requests with a run in flight.
    pub fn in_flight(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }
}

pub struct PrGuard {
    locks: Arc<PrLocks>,
    id: PullRequestId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for PrGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.locks.lock().unwrap_or_else(|p| p.into_inner());
        // Only the map still references the mutex: no holder, no waiter.
        if locks
            .get(&self.id)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            locks.remove(&self.id);
        }
    }
}

/// Runs the reconciliation pipeline. Cheap to clone.
#[derive(Clone)]
pub struct Reconciler {
    forge: Arc<dyn Forge>,
    locks: Arc<PrLocks>,
}

impl Reconciler {
    pub fn new(forge: Arc<dyn Forge>) -> Self {
        Self {
            forge,
            locks: Arc::new(PrLocks::new()),
        }
    }

    pub fn forge(&self) -> &dyn Forge {
        self.forge.as_ref()
    }

    /// Load the review history and compute verdict and classification
    /// without touching the pull request.
    pub async fn evaluate(
        &self,
        snapshot: &PullRequestSnapshot,
    ) -> Result<(Verdict, Classification)> {
        let reviews = self
            .forge
            .list_reviews(&snapshot.owner, &snapshot.repo_name, snapshot.number)
            .await
            .with_context(|| {
                format!(
                    "[{}] Failed to load reviews for \"{}\" (#{})",
                    snapshot.repo_slug(),
                    snapshot.title,
                    snapshot.number
                )
            })?;

        let verdict = reconcile(&reviews, &snapshot.requested_reviewers);
        let classification = classify(&verdict);
        Ok((verdict, classification))
    }

    /// Reconcile one pull request end to end.
    ///
    /// Returns an error only if the review history could not be loaded, in
    /// which case nothing was mutated. Mutation failures are in the report.
    pub async fn run(&self, snapshot: &PullRequestSnapshot) -> Result<ApplyReport> {
        let (_classification, report) = self.run_classified(snapshot).await?;
        Ok(report)
    }

    /// Like `run`, also returning the classification that was applied.
    pub async fn run_classified(
        &self,
        snapshot: &PullRequestSnapshot,
    ) -> Result<(Classification, ApplyReport)> {
        let _guard = self.locks.lock(PullRequestId::from(snapshot)).await;

        let (_verdict, classification) = self.evaluate(snapshot).await?;

        let current: Vec<&str> = snapshot
            .current_labels
            .iter()
            .map(|l| l.name.as_str())
            .filter(|name| lgtm_core::is_lgtm_label(name))
            .collect();
        info!(
            "[{}] \"{}\" (#{}) state: {}, message: {}, target_label: {}, current_labels: {:?}",
            snapshot.repo_slug(),
            snapshot.title,
            snapshot.number,
            classification.status_state,
            classification.status_message,
            classification.desired_label,
            current
        );

        let report = apply(self.forge.as_ref(), snapshot, &classification).await;
        Ok((classification, report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{ForgeCall, InMemoryForge, Label};
    use lgtm_core::{RequestedReviewer, ReviewRecord, ReviewState, StatusState, UserId};
    use std::time::Duration;

    fn snapshot(number: u64, labels: &[&str]) -> PullRequestSnapshot {
        PullRequestSnapshot {
            number,
            title: format!("PR {number}"),
            head_sha: format!("sha{number}"),
            owner: "octo".to_string(),
            repo_name: "widgets".to_string(),
            current_labels: labels
                .iter()
                .enumerate()
                .map(|(i, name)| Label {
                    id: i as u64 + 1,
                    name: name.to_string(),
                })
                .collect(),
            requested_reviewers: vec![],
        }
    }

    #[tokio::test]
    async fn test_two_approvals_end_to_end() {
        let forge = Arc::new(InMemoryForge::new());
        let pr = snapshot(1, &["lgtm/need 2"]);
        forge.add_pull_request(pr.clone());
        forge.set_reviews(
            "octo",
            "widgets",
            1,
            vec![
                ReviewRecord::new(1, "alice", ReviewState::Approved),
                ReviewRecord::new(2, "bob", ReviewState::Approved),
            ],
        );
        let reconciler = Reconciler::new(forge.clone());

        let report = reconciler.run(&pr).await.unwrap();

        assert!(report.is_clean());
        let mutations = forge.mutations();
        assert_eq!(mutations.len(), 3);
        assert!(matches!(
            &mutations[0],
            ForgeCall::RemoveLabel { label, .. } if label == "lgtm/need 2"
        ));
        assert!(matches!(
            &mutations[1],
            ForgeCall::AddLabels { labels, .. } if labels == &vec!["lgtm/done".to_string()]
        ));
        assert!(matches!(
            &mutations[2],
            ForgeCall::CreateCommitStatus { state: StatusState::Success, .. }
        ));
        assert_eq!(
            forge.pull_request_labels("octo", "widgets", 1),
            vec!["lgtm/done".to_string()]
        );
    }

    #[tokio::test]
    async fn test_second_run_makes_no_label_changes() {
        let forge = Arc::new(InMemoryForge::new());
        forge.add_pull_request(snapshot(1, &["lgtm/need 2"]));
        forge.set_reviews(
            "octo",
            "widgets",
            1,
            vec![ReviewRecord::new(1, "alice", ReviewState::Approved)],
        );
        let reconciler = Reconciler::new(forge.clone());

        let first = forge.list_open_pull_requests("octo", "widgets").await.unwrap();
        reconciler.run(&first[0]).await.unwrap();
        forge.clear_calls();

        let second = forge.list_open_pull_requests("octo", "widgets").await.unwrap();
        let report = reconciler.run(&second[0]).await.unwrap();

        assert_eq!(report.label_changes(), 0);
        assert!(!forge.calls().iter().any(ForgeCall::is_label_mutation));
    }

    #[tokio::test]
    async fn test_requested_reviewer_drops_back_to_need_one() {
        let forge = Arc::new(InMemoryForge::new());
        let mut pr = snapshot(1, &["lgtm/done"]);
        pr.requested_reviewers = vec![RequestedReviewer::User(UserId::from("alice"))];
        forge.set_reviews(
            "octo",
            "widgets",
            1,
            vec![
                ReviewRecord::new(1, "alice", ReviewState::Approved),
                ReviewRecord::new(2, "bob", ReviewState::Approved),
            ],
        );
        let reconciler = Reconciler::new(forge.clone());

        let (verdict, classification) = reconciler.evaluate(&pr).await.unwrap();

        assert_eq!(verdict.approvers.len(), 1);
        assert_eq!(classification.desired_label, lgtm_core::LgtmLabel::NeedOne);
    }

    #[tokio::test]
    async fn test_run_classified_returns_applied_classification() {
        let forge = Arc::new(InMemoryForge::new());
        let pr = snapshot(4, &[]);
        forge.add_pull_request(pr.clone());
        forge.set_reviews(
            "octo",
            "widgets",
            4,
            vec![ReviewRecord::new(1, "carol", ReviewState::ChangesRequested)],
        );
        let reconciler = Reconciler::new(forge.clone());

        let (classification, report) = reconciler.run_classified(&pr).await.unwrap();

        assert_eq!(classification.desired_label, lgtm_core::LgtmLabel::Blocked);
        assert_eq!(classification.status_message, "Blocked by carol");
        assert_eq!(report.added.as_deref(), Some("lgtm/blocked"));
        let reviews_loaded = forge
            .calls()
            .iter()
            .filter(|c| matches!(c, ForgeCall::ListReviews { .. }))
            .count();
        assert_eq!(reviews_loaded, 1);
    }

    #[tokio::test]
    async fn test_review_load_failure_mutates_nothing() {
        let forge = Arc::new(InMemoryForge::new());
        forge.fail_when(|call| matches!(call, ForgeCall::ListReviews { .. }));
        let reconciler = Reconciler::new(forge.clone());

        let err = reconciler.run(&snapshot(3, &["lgtm/need 2"])).await.unwrap_err();

        assert!(err.to_string().contains("Failed to load reviews"));
        assert!(forge.mutations().is_empty());
    }

    #[tokio::test]
    async fn test_locks_serialize_same_pull_request() {
        let locks = Arc::new(PrLocks::new());
        let id = PullRequestId::from(&snapshot(1, &[]));

        let first = locks.lock(id.clone()).await;
        let waiter = {
            let locks = locks.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
        assert_eq!(locks.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_locks_allow_different_pull_requests() {
        let locks = Arc::new(PrLocks::new());
        let _one = locks.lock(PullRequestId::from(&snapshot(1, &[]))).await;
        let _two = locks.lock(PullRequestId::from(&snapshot(2, &[]))).await;

        assert_eq!(locks.in_flight(), 2);
    }
}
