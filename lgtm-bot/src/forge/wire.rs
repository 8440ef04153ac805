//! JSON shapes shared by the REST API and webhook payloads.
//!
//! Both dialects agree on these field names closely enough that one set of
//! types covers them; the differences are absorbed with defaults and aliases.

use lgtm_core::{RequestedReviewer, ReviewRecord, ReviewState, StatusState, UserId};
use serde::{Deserialize, Serialize};

use super::{Label, PullRequestSnapshot};

#[derive(Debug, Deserialize, Clone)]
pub struct User {
    pub login: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Repository {
    pub name: String,
    pub owner: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LabelPayload {
    pub id: u64,
    pub name: String,
}

impl From<LabelPayload> for Label {
    fn from(label: LabelPayload) -> Self {
        Label {
            id: label.id,
            name: label.name,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HeadRef {
    pub sha: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BaseRef {
    pub repo: Repository,
}

/// An entry of `requested_reviewers`: users carry a login, teams a name.
#[derive(Debug, Deserialize, Clone)]
pub struct RequestedReviewerPayload {
    pub login: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TeamPayload {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct PullRequest {
    pub number: u64,
    #[serde(default)]
    pub title: String,
    pub head: HeadRef,
    pub base: BaseRef,
    #[serde(default)]
    pub labels: Option<Vec<LabelPayload>>,
    #[serde(default)]
    pub requested_reviewers: Option<Vec<RequestedReviewerPayload>>,
    #[serde(default, alias = "requested_reviewers_teams")]
    pub requested_teams: Option<Vec<TeamPayload>>,
}

impl PullRequest {
    pub fn into_snapshot(self) -> PullRequestSnapshot {
        let mut requested_reviewers = Vec::new();
        for reviewer in self.requested_reviewers.unwrap_or_default() {
            match (reviewer.login, reviewer.name) {
                (Some(login), _) => requested_reviewers.push(RequestedReviewer::User(login.into())),
                (None, Some(name)) => requested_reviewers.push(RequestedReviewer::Team(name)),
                (None, None) => {}
            }
        }
        requested_reviewers.extend(
            self.requested_teams
                .unwrap_or_default()
                .into_iter()
                .map(|team| RequestedReviewer::Team(team.name)),
        );

        PullRequestSnapshot {
            number: self.number,
            title: self.title,
            head_sha: self.head.sha,
            owner: self.base.repo.owner.login,
            repo_name: self.base.repo.name,
            current_labels: self
                .labels
                .unwrap_or_default()
                .into_iter()
                .map(Label::from)
                .collect(),
            requested_reviewers,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Review {
    pub id: u64,
    pub user: Option<User>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub dismissed: bool,
}

impl From<Review> for ReviewRecord {
    fn from(review: Review) -> Self {
        ReviewRecord {
            id: review.id,
            author: review.user.map(|u| UserId(u.login)),
            state: ReviewState::from_wire(&review.state),
            dismissed: review.dismissed,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CreateStatusRequest<'a> {
    pub state: StatusState,
    pub description: &'a str,
    pub context: &'a str,
}

#[derive(Debug, Serialize)]
pub struct AddLabelsByName<'a> {
    pub labels: &'a [String],
}

#[derive(Debug, Serialize)]
pub struct AddLabelsById {
    pub labels: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pull_request_json() -> serde_json::Value {
        json!({
            "number": 42,
            "title": "Add widget",
            "head": { "sha": "abc123", "ref": "feature" },
            "base": {
                "ref": "main",
                "repo": { "name": "widgets", "owner": { "login": "octo", "id": 1 } }
            },
            "labels": [
                { "id": 10, "name": "lgtm/need 2" },
                { "id": 11, "name": "bug" }
            ],
            "requested_reviewers": [ { "login": "alice", "id": 5 } ],
            "requested_teams": [ { "name": "core", "slug": "core" } ]
        })
    }

    #[test]
    fn test_github_pull_request_into_snapshot() {
        let pr: PullRequest = serde_json::from_value(pull_request_json()).unwrap();
        let snapshot = pr.into_snapshot();

        assert_eq!(snapshot.number, 42);
        assert_eq!(snapshot.head_sha, "abc123");
        assert_eq!(snapshot.repo_slug(), "octo/widgets");
        assert_eq!(snapshot.current_labels.len(), 2);
        assert_eq!(snapshot.current_labels[0].id, 10);
        assert_eq!(
            snapshot.requested_reviewers,
            vec![
                RequestedReviewer::User(UserId::from("alice")),
                RequestedReviewer::Team("core".to_string()),
            ]
        );
    }

    #[test]
    fn test_gitea_pull_request_with_null_lists() {
        let pr: PullRequest = serde_json::from_value(json!({
            "number": 3,
            "title": "Fix",
            "head": { "sha": "def456" },
            "base": { "repo": { "name": "r", "owner": { "login": "o", "username": "o" } } },
            "labels": null,
            "requested_reviewers": null
        }))
        .unwrap();
        let snapshot = pr.into_snapshot();

        assert!(snapshot.current_labels.is_empty());
        assert!(snapshot.requested_reviewers.is_empty());
    }

    #[test]
    fn test_review_with_ghost_author() {
        let review: Review = serde_json::from_value(json!({
            "id": 9,
            "user": null,
            "state": "APPROVED"
        }))
        .unwrap();
        let record = ReviewRecord::from(review);

        assert_eq!(record.author, None);
        assert_eq!(record.state, ReviewState::Approved);
        assert!(!record.dismissed);
    }

    #[test]
    fn test_gitea_review_dismissed_flag() {
        let review: Review = serde_json::from_value(json!({
            "id": 9,
            "user": { "login": "bob" },
            "state": "REQUEST_CHANGES",
            "dismissed": true
        }))
        .unwrap();
        let record = ReviewRecord::from(review);

        assert_eq!(record.state, ReviewState::ChangesRequested);
        assert!(record.dismissed);
    }
}
