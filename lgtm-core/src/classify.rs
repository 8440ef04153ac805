//! Turning a verdict into the status, message and label shown on a PR.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::review::Verdict;

/// Approvals needed before a PR is considered done.
pub const REQUIRED_APPROVALS: usize = 2;

/// Prefix reserved for the labels this crate manages.
pub const LABEL_PREFIX: &str = "lgtm/";

/// Commit status state, serialized the way both forges expect it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
}

impl StatusState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

impl fmt::Display for StatusState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The fixed label vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LgtmLabel {
    Blocked,
    NeedTwo,
    NeedOne,
    Done,
}

impl LgtmLabel {
    pub const ALL: [LgtmLabel; 4] = [Self::Blocked, Self::NeedTwo, Self::NeedOne, Self::Done];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blocked => "lgtm/blocked",
            Self::NeedTwo => "lgtm/need 2",
            Self::NeedOne => "lgtm/need 1",
            Self::Done => "lgtm/done",
        }
    }
}

impl fmt::Display for LgtmLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns true if `name` belongs to the managed `lgtm/` namespace.
pub fn is_lgtm_label(name: &str) -> bool {
    name.starts_with(LABEL_PREFIX)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub status_state: StatusState,
    pub status_message: String,
    pub desired_label: LgtmLabel,
}

/// Classify a verdict. Blockers always win over any number of approvals.
pub fn classify(verdict: &Verdict) -> Classification {
    if !verdict.blockers.is_empty() {
        // BTreeSet iteration is already sorted.
        let names: Vec<&str> = verdict.blockers.iter().map(|u| u.as_str()).collect();
        return Classification {
            status_state: StatusState::Failure,
            status_message: format!("Blocked by {}", names.join(", ")),
            desired_label: LgtmLabel::Blocked,
        };
    }

    match verdict.approvers.len() {
        0 => Classification {
            status_state: StatusState::Pending,
            status_message: "Needs two more approvals".to_string(),
            desired_label: LgtmLabel::NeedTwo,
        },
        n if n < REQUIRED_APPROVALS => Classification {
            status_state: StatusState::Pending,
            status_message: "Needs one more approval".to_string(),
            desired_label: LgtmLabel::NeedOne,
        },
        n => Classification {
            status_state: StatusState::Success,
            status_message: format!("Approved by {} people", n),
            desired_label: LgtmLabel::Done,
        },
    }
}
