//! In-memory forge implementation.
//!
//! Stores pull requests, reviews and labels in memory, records every call in
//! order, and can be told to fail selected calls. Label mutations are applied
//! to the stored pull requests so repeated runs observe their own effects.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use lgtm_core::{ReviewRecord, StatusState};

use super::{Forge, Label, PullRequestSnapshot};

/// A recorded call against the forge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForgeCall {
    AuthenticatedUser,
    ListLabels {
        owner: String,
        repo: String,
    },
    AddLabels {
        owner: String,
        repo: String,
        issue_number: u64,
        labels: Vec<String>,
    },
    RemoveLabel {
        owner: String,
        repo: String,
        issue_number: u64,
        label: String,
    },
    CreateCommitStatus {
        owner: String,
        repo: String,
        sha: String,
        state: StatusState,
        description: String,
        context: String,
    },
    ListOpenPullRequests {
        owner: String,
        repo: String,
    },
    ListReviews {
        owner: String,
        repo: String,
        pr_number: u64,
    },
}

impl ForgeCall {
    /// True for calls that change state on the forge.
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            Self::AddLabels { .. } | Self::RemoveLabel { .. } | Self::CreateCommitStatus { .. }
        )
    }

    pub fn is_label_mutation(&self) -> bool {
        matches!(self, Self::AddLabels { .. } | Self::RemoveLabel { .. })
    }
}

type RepoKey = (String, String);
type FailurePredicate = Box<dyn Fn(&ForgeCall) -> bool + Send + Sync>;

#[derive(Default)]
struct Inner {
    login: String,
    pull_requests: HashMap<RepoKey, Vec<PullRequestSnapshot>>,
    reviews: HashMap<(String, String, u64), Vec<ReviewRecord>>,
    labels: HashMap<RepoKey, Vec<Label>>,
    next_label_id: u64,
    calls: Vec<ForgeCall>,
    failures: Vec<FailurePredicate>,
}

#[derive(Default)]
pub struct InMemoryForge {
    inner: Mutex<Inner>,
}

fn key(owner: &str, repo: &str) -> RepoKey {
    (owner.to_string(), repo.to_string())
}

impl InMemoryForge {
    pub fn new() -> Self {
        let forge = Self::default();
        forge.lock().login = "lgtm-bot".to_string();
        forge.lock().next_label_id = 1000;
        forge
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A panicking test thread must not hide the calls recorded so far.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register an open pull request.
    pub fn add_pull_request(&self, snapshot: PullRequestSnapshot) {
        let mut inner = self.lock();
        inner
            .pull_requests
            .entry(key(&snapshot.owner, &snapshot.repo_name))
            .or_default()
            .push(snapshot);
    }

    /// Replace the review history of a pull request.
    pub fn set_reviews(&self, owner: &str, repo: &str, pr_number: u64, reviews: Vec<ReviewRecord>) {
        self.lock()
            .reviews
            .insert((owner.to_string(), repo.to_string(), pr_number), reviews);
    }

    pub fn set_labels(&self, owner: &str, repo: &str, labels: Vec<Label>) {
        self.lock().labels.insert(key(owner, repo), labels);
    }

    /// Make every call matching `predicate` fail. The call is still recorded.
    pub fn fail_when(&self, predicate: impl Fn(&ForgeCall) -> bool + Send + Sync + 'static) {
        self.lock().failures.push(Box::new(predicate));
    }

    pub fn calls(&self) -> Vec<ForgeCall> {
        self.lock().calls.clone()
    }

    pub fn mutations(&self) -> Vec<ForgeCall> {
        self.calls().into_iter().filter(ForgeCall::is_mutation).collect()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Current labels of a stored pull request.
    pub fn pull_request_labels(&self, owner: &str, repo: &str, number: u64) -> Vec<String> {
        self.lock()
            .pull_requests
            .get(&key(owner, repo))
            .and_then(|prs| prs.iter().find(|pr| pr.number == number))
            .map(|pr| pr.current_labels.iter().map(|l| l.name.clone()).collect())
            .unwrap_or_default()
    }

    fn record(&self, call: ForgeCall) -> Result<()> {
        let mut inner = self.lock();
        let fails = inner.failures.iter().any(|predicate| predicate(&call));
        inner.calls.push(call.clone());
        if fails {
            return Err(anyhow!("injected failure for {:?}", call));
        }
        Ok(())
    }
}

#[async_trait]
impl Forge for InMemoryForge {
    async fn authenticated_user(&self) -> Result<String> {
        self.record(ForgeCall::AuthenticatedUser)?;
        Ok(self.lock().login.clone())
    }

    async fn list_labels(&self, owner: &str, repo: &str) -> Result<Vec<Label>> {
        self.record(ForgeCall::ListLabels {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })?;
        Ok(self
            .lock()
            .labels
            .get(&key(owner, repo))
            .cloned()
            .unwrap_or_default())
    }

    async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        labels: &[String],
    ) -> Result<()> {
        self.record(ForgeCall::AddLabels {
            owner: owner.to_string(),
            repo: repo.to_string(),
            issue_number,
            labels: labels.to_vec(),
        })?;

        let mut inner = self.lock();
        let mut next_id = inner.next_label_id;
        if let Some(pr) = inner
            .pull_requests
            .get_mut(&key(owner, repo))
            .and_then(|prs| prs.iter_mut().find(|pr| pr.number == issue_number))
        {
            for name in labels {
                if !pr.current_labels.iter().any(|l| &l.name == name) {
                    pr.current_labels.push(Label {
                        id: next_id,
                        name: name.clone(),
                    });
                    next_id += 1;
                }
            }
        }
        inner.next_label_id = next_id;
        Ok(())
    }

    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        label: &Label,
    ) -> Result<()> {
        self.record(ForgeCall::RemoveLabel {
            owner: owner.to_string(),
            repo: repo.to_string(),
            issue_number,
            label: label.name.clone(),
        })?;

        let mut inner = self.lock();
        if let Some(pr) = inner
            .pull_requests
            .get_mut(&key(owner, repo))
            .and_then(|prs| prs.iter_mut().find(|pr| pr.number == issue_number))
        {
            pr.current_labels.retain(|l| l.name != label.name);
        }
        Ok(())
    }

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: StatusState,
        description: &str,
        context: &str,
    ) -> Result<()> {
        self.record(ForgeCall::CreateCommitStatus {
            owner: owner.to_string(),
            repo: repo.to_string(),
            sha: sha.to_string(),
            state,
            description: description.to_string(),
            context: context.to_string(),
        })
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestSnapshot>> {
        self.record(ForgeCall::ListOpenPullRequests {
            owner: owner.to_string(),
            repo: repo.to_string(),
        })?;
        Ok(self
            .lock()
            .pull_requests
            .get(&key(owner, repo))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<ReviewRecord>> {
        self.record(ForgeCall::ListReviews {
            owner: owner.to_string(),
            repo: repo.to_string(),
            pr_number,
        })?;
        Ok(self
            .lock()
            .reviews
            .get(&(owner.to_string(), repo.to_string(), pr_number))
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(id: u64, name: &str) -> Label {
        Label {
            id,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_labels_are_scoped_to_their_repository() {
        let forge = InMemoryForge::new();
        forge.set_labels(
            "octo",
            "widgets",
            vec![label(3, "lgtm/done"), label(4, "lgtm/need 1")],
        );

        let widgets = forge.list_labels("octo", "widgets").await.unwrap();
        let gadgets = forge.list_labels("octo", "gadgets").await.unwrap();

        assert_eq!(widgets, vec![label(3, "lgtm/done"), label(4, "lgtm/need 1")]);
        assert!(gadgets.is_empty());
        assert_eq!(forge.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_injected_failure_is_still_recorded() {
        let forge = InMemoryForge::new();
        forge.fail_when(|call| matches!(call, ForgeCall::ListLabels { .. }));

        assert!(forge.list_labels("octo", "widgets").await.is_err());
        assert_eq!(
            forge.calls(),
            vec![ForgeCall::ListLabels {
                owner: "octo".to_string(),
                repo: "widgets".to_string(),
            }]
        );
        assert!(forge.mutations().is_empty());
    }
}
