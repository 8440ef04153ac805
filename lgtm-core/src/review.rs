//! Review history replay.
//!
//! A pull request's verdict is not a count of approvals: it is the result of
//! replaying every review in the order the forge returned it, so that a later
//! review from the same author supersedes an earlier one.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// A forge login. Ordered so verdict sets render deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The state of a single submitted review, shared by both forge dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReviewState {
    Approved,
    /// Gitea spells this `REQUEST_CHANGES`.
    ChangesRequested,
    Commented,
    Dismissed,
    Pending,
}

impl ReviewState {
    /// Map a forge wire value onto the shared enum.
    ///
    /// Values that carry no approval signal (including ones neither dialect
    /// documents today) collapse to `Pending`.
    pub fn from_wire(value: &str) -> Self {
        match value {
            "APPROVED" => Self::Approved,
            "CHANGES_REQUESTED" | "REQUEST_CHANGES" => Self::ChangesRequested,
            "COMMENTED" | "COMMENT" => Self::Commented,
            "DISMISSED" => Self::Dismissed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub id: u64,
    /// Absent for deleted ("ghost") accounts.
    pub author: Option<UserId>,
    pub state: ReviewState,
    /// Gitea marks dismissed reviews with a flag instead of a state.
    pub dismissed: bool,
}

impl ReviewRecord {
    pub fn new(id: u64, author: impl Into<UserId>, state: ReviewState) -> Self {
        Self {
            id,
            author: Some(author.into()),
            state,
            dismissed: false,
        }
    }
}

/// A reviewer whose review is still requested on the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestedReviewer {
    User(UserId),
    /// Matched by team name; membership is not expanded.
    Team(String),
}

impl RequestedReviewer {
    fn identity(&self) -> &str {
        match self {
            Self::User(user) => user.as_str(),
            Self::Team(name) => name,
        }
    }
}

/// Who currently approves and who currently blocks.
///
/// The two sets never share a member.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verdict {
    pub approvers: BTreeSet<UserId>,
    pub blockers: BTreeSet<UserId>,
}

/// Replay `history` and return the resulting verdict.
///
/// `history` must be in chronological order; it is never re-sorted. Every
/// reviewer in `requested` loses a previously counted approval until they
/// approve again.
pub fn reconcile(history: &[ReviewRecord], requested: &[RequestedReviewer]) -> Verdict {
    let mut verdict = Verdict::default();

    for review in history {
        let Some(author) = &review.author else {
            debug!("Ignoring review {} with no author", review.id);
            continue;
        };

        match review.state {
            ReviewState::Approved => {
                verdict.blockers.remove(author);
                verdict.approvers.insert(author.clone());
            }
            ReviewState::ChangesRequested => {
                verdict.approvers.remove(author);
                verdict.blockers.insert(author.clone());
            }
            ReviewState::Dismissed => {
                verdict.approvers.remove(author);
                verdict.blockers.remove(author);
            }
            ReviewState::Commented | ReviewState::Pending => {}
        }

        if review.dismissed {
            verdict.approvers.remove(author);
            verdict.blockers.remove(author);
        }
    }

    for reviewer in requested {
        verdict.approvers.retain(|user| user.as_str() != reviewer.identity());
    }

    verdict
}
