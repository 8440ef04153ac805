//! Forge abstraction.
//!
//! This module defines the `Forge` trait covering the handful of REST
//! operations the bot needs, plus the transient types passed across it.
//! `ForgeClient` talks to a real GitHub or Gitea instance; `InMemoryForge`
//! backs the tests.

mod client;
mod memory;
mod middleware;
pub mod wire;

pub use client::ForgeClient;
pub use memory::{ForgeCall, InMemoryForge};
pub use middleware::LoggingMiddleware;

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use lgtm_core::{RequestedReviewer, ReviewRecord, StatusState};
use serde::{Deserialize, Serialize};

/// Which forge API and event schema we are talking to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForgeDialect {
    #[default]
    GitHub,
    Gitea,
}

impl FromStr for ForgeDialect {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "github" => Ok(Self::GitHub),
            "gitea" | "forgejo" => Ok(Self::Gitea),
            other => Err(anyhow!(
                "unknown forge dialect '{}' (expected 'github' or 'gitea')",
                other
            )),
        }
    }
}

impl fmt::Display for ForgeDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GitHub => f.write_str("github"),
            Self::Gitea => f.write_str("gitea"),
        }
    }
}

/// A watched repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
}

impl RepoRef {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
        }
    }

    /// Exact owner and name match.
    pub fn matches(&self, owner: &str, repo: &str) -> bool {
        self.owner == owner && self.repo == repo
    }
}

impl FromStr for RepoRef {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some((owner, repo)) = s.trim().split_once('/') else {
            bail!("repository '{}' must be written as owner/repo", s);
        };
        if owner.is_empty() || repo.is_empty() || repo.contains('/') {
            bail!("repository '{}' must be written as owner/repo", s);
        }
        Ok(Self::new(owner, repo))
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repo)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label {
    /// Forge-assigned; Gitea addresses labels by id.
    pub id: u64,
    pub name: String,
}

/// Everything the pipeline needs to know about a pull request.
///
/// Built fresh from a webhook payload or a listing on every run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestSnapshot {
    pub number: u64,
    pub title: String,
    pub head_sha: String,
    pub owner: String,
    pub repo_name: String,
    pub current_labels: Vec<Label>,
    pub requested_reviewers: Vec<RequestedReviewer>,
}

impl PullRequestSnapshot {
    pub fn repo_slug(&self) -> String {
        format!("{}/{}", self.owner, self.repo_name)
    }
}

/// The forge operations the bot depends on.
///
/// Listing operations follow every page before returning.
#[async_trait]
pub trait Forge: Send + Sync {
    /// Login of the account behind the configured token.
    async fn authenticated_user(&self) -> Result<String>;

    async fn list_labels(&self, owner: &str, repo: &str) -> Result<Vec<Label>>;

    async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        labels: &[String],
    ) -> Result<()>;

    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        label: &Label,
    ) -> Result<()>;

    async fn create_commit_status(
        &self,
        owner: &str,
        repo: &str,
        sha: &str,
        state: StatusState,
        description: &str,
        context: &str,
    ) -> Result<()>;

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestSnapshot>>;

    /// All reviews of a pull request.
    ///
    /// Returned in the forge's order, which both forges document as oldest
    /// first. Callers rely on this being chronological and never re-sort.
    async fn list_reviews(&self, owner: &str, repo: &str, pr_number: u64)
        -> Result<Vec<ReviewRecord>>;
}
