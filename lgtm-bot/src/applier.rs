//! Label and commit-status reconciliation.
//!
//! `plan` is pure: it compares the labels currently on a pull request with
//! the classification and describes the mutations as `Effect`s. `execute` is
//! the boundary with the forge. Removals run concurrently and are joined
//! before the add and the status call, and every failure ends up in the
//! returned `ApplyReport`.

use futures_util::future::join_all;
use lgtm_core::{is_lgtm_label, Classification, StatusState};
use serde::Serialize;
use tracing::{error, info};

use crate::forge::{Forge, Label, PullRequestSnapshot};

/// Commit status context owned by this service.
pub const STATUS_CONTEXT: &str = concat!(env!("CARGO_PKG_NAME"), "/lgtm");

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    RemoveLabel {
        label: Label,
    },
    AddLabel {
        name: String,
    },
    SetStatus {
        sha: String,
        state: StatusState,
        description: String,
        context: String,
    },
}

/// Compute the mutations that bring `snapshot` in line with `classification`.
///
/// Always ends with exactly one `SetStatus`.
pub fn plan(snapshot: &PullRequestSnapshot, classification: &Classification) -> Vec<Effect> {
    let desired = classification.desired_label.as_str();
    let current_lgtm: Vec<&Label> = snapshot
        .current_labels
        .iter()
        .filter(|label| is_lgtm_label(&label.name))
        .collect();

    let mut effects: Vec<Effect> = current_lgtm
        .iter()
        .filter(|label| label.name != desired)
        .map(|label| Effect::RemoveLabel {
            label: (*label).clone(),
        })
        .collect();

    if !current_lgtm.iter().any(|label| label.name == desired) {
        effects.push(Effect::AddLabel {
            name: desired.to_string(),
        });
    }

    effects.push(Effect::SetStatus {
        sha: snapshot.head_sha.clone(),
        state: classification.status_state,
        description: classification.status_message.clone(),
        context: STATUS_CONTEXT.to_string(),
    });

    effects
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApplyFailure {
    pub operation: String,
    pub message: String,
}

/// Outcome of one `execute` run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    pub removed: Vec<String>,
    pub added: Option<String>,
    pub status_set: bool,
    pub failures: Vec<ApplyFailure>,
}

impl ApplyReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Number of label changes that actually succeeded.
    pub fn label_changes(&self) -> usize {
        self.removed.len() + usize::from(self.added.is_some())
    }

    fn fail(&mut self, operation: String, err: &anyhow::Error) {
        self.failures.push(ApplyFailure {
            operation,
            message: format!("{:#}", err),
        });
    }
}

/// Execute `effects` against the forge.
///
/// Nothing is retried.
pub async fn execute(
    forge: &dyn Forge,
    snapshot: &PullRequestSnapshot,
    effects: Vec<Effect>,
) -> ApplyReport {
    let repo = snapshot.repo_slug();
    let mut report = ApplyReport::default();

    let mut removals = Vec::new();
    let mut additions = Vec::new();
    let mut statuses = Vec::new();
    for effect in effects {
        match effect {
            Effect::RemoveLabel { label } => removals.push(label),
            Effect::AddLabel { name } => additions.push(name),
            Effect::SetStatus {
                sha,
                state,
                description,
                context,
            } => statuses.push((sha, state, description, context)),
        }
    }

    let results = join_all(removals.iter().map(|label| async move {
        let result = forge
            .remove_label(
                &snapshot.owner,
                &snapshot.repo_name,
                snapshot.number,
                label,
            )
            .await;
        (label, result)
    }))
    .await;

    for (label, result) in results {
        match result {
            Ok(()) => {
                info!(
                    "[{}] Removed {} from \"{}\" (#{})",
                    repo, label.name, snapshot.title, snapshot.number
                );
                report.removed.push(label.name.clone());
            }
            Err(e) => {
                error!(
                    "[{}] Failed to remove {} from \"{}\" (#{}): {:#}",
                    repo, label.name, snapshot.title, snapshot.number, e
                );
                report.fail(format!("remove label {}", label.name), &e);
            }
        }
    }

    for name in additions {
        match forge
            .add_labels(
                &snapshot.owner,
                &snapshot.repo_name,
                snapshot.number,
                std::slice::from_ref(&name),
            )
            .await
        {
            Ok(()) => {
                info!(
                    "[{}] Add label: {} in \"{}\" (#{})",
                    repo, name, snapshot.title, snapshot.number
                );
                report.added = Some(name);
            }
            Err(e) => {
                error!(
                    "[{}] Failed to add label: {} in \"{}\" (#{}): {:#}",
                    repo, name, snapshot.title, snapshot.number, e
                );
                report.fail(format!("add label {}", name), &e);
            }
        }
    }

    for (sha, state, description, context) in statuses {
        match forge
            .create_commit_status(
                &snapshot.owner,
                &snapshot.repo_name,
                &sha,
                state,
                &description,
                &context,
            )
            .await
        {
            Ok(()) => {
                info!(
                    "[{}] Set commit status in \"{}\" (#{})",
                    repo, snapshot.title, snapshot.number
                );
                report.status_set = true;
            }
            Err(e) => {
                error!(
                    "[{}] Failed to set commit status in \"{}\" (#{}): {:#}",
                    repo, snapshot.title, snapshot.number, e
                );
                report.fail("create commit status".to_string(), &e);
            }
        }
    }

    report
}

/// Plan and execute in one step.
pub async fn apply(
    forge: &dyn Forge,
    snapshot: &PullRequestSnapshot,
    classification: &Classification,
) -> ApplyReport {
    execute(forge, snapshot, plan(snapshot, classification)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forge::{ForgeCall, InMemoryForge};
    use lgtm_core::LgtmLabel;

    fn label(id: u64, name: &str) -> Label {
        Label {
            id,
            name: name.to_string(),
        }
    }

    fn snapshot(labels: Vec<Label>) -> PullRequestSnapshot {
        PullRequestSnapshot {
            number: 12,
            title: "Add widget".to_string(),
            head_sha: "abc123".to_string(),
            owner: "octo".to_string(),
            repo_name: "widgets".to_string(),
            current_labels: labels,
            requested_reviewers: vec![],
        }
    }

    fn done() -> Classification {
        Classification {
            status_state: StatusState::Success,
            status_message: "Approved by 2 people".to_string(),
            desired_label: LgtmLabel::Done,
        }
    }

    #[test]
    fn test_plan_replaces_stale_label() {
        let effects = plan(&snapshot(vec![label(1, "lgtm/need 2")]), &done());

        assert_eq!(
            effects,
            vec![
                Effect::RemoveLabel {
                    label: label(1, "lgtm/need 2")
                },
                Effect::AddLabel {
                    name: "lgtm/done".to_string()
                },
                Effect::SetStatus {
                    sha: "abc123".to_string(),
                    state: StatusState::Success,
                    description: "Approved by 2 people".to_string(),
                    context: "lgtm-bot/lgtm".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_plan_ignores_labels_outside_namespace() {
        let effects = plan(
            &snapshot(vec![label(1, "bug"), label(2, "lgtm/done")]),
            &done(),
        );

        assert_eq!(effects.len(), 1);
        assert!(matches!(effects[0], Effect::SetStatus { .. }));
    }

    #[test]
    fn test_plan_removes_every_stale_lgtm_label() {
        let effects = plan(
            &snapshot(vec![
                label(1, "lgtm/need 1"),
                label(2, "lgtm/blocked"),
                label(3, "lgtm/done"),
            ]),
            &done(),
        );

        let removed: Vec<_> = effects
            .iter()
            .filter_map(|e| match e {
                Effect::RemoveLabel { label } => Some(label.name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(removed, vec!["lgtm/need 1", "lgtm/blocked"]);
        assert!(!effects.iter().any(|e| matches!(e, Effect::AddLabel { .. })));
    }

    #[tokio::test]
    async fn test_apply_end_to_end_calls() {
        let forge = InMemoryForge::new();
        let pr = snapshot(vec![label(1, "lgtm/need 2")]);

        let report = apply(&forge, &pr, &done()).await;

        assert!(report.is_clean());
        assert_eq!(report.removed, vec!["lgtm/need 2".to_string()]);
        assert_eq!(report.added.as_deref(), Some("lgtm/done"));
        assert!(report.status_set);
        assert_eq!(
            forge.mutations(),
            vec![
                ForgeCall::RemoveLabel {
                    owner: "octo".to_string(),
                    repo: "widgets".to_string(),
                    issue_number: 12,
                    label: "lgtm/need 2".to_string(),
                },
                ForgeCall::AddLabels {
                    owner: "octo".to_string(),
                    repo: "widgets".to_string(),
                    issue_number: 12,
                    labels: vec!["lgtm/done".to_string()],
                },
                ForgeCall::CreateCommitStatus {
                    owner: "octo".to_string(),
                    repo: "widgets".to_string(),
                    sha: "abc123".to_string(),
                    state: StatusState::Success,
                    description: "Approved by 2 people".to_string(),
                    context: STATUS_CONTEXT.to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_removal_does_not_stop_the_rest() {
        let forge = InMemoryForge::new();
        forge.fail_when(|call| {
            matches!(call, ForgeCall::RemoveLabel { label, .. } if label == "lgtm/need 1")
        });
        let pr = snapshot(vec![label(1, "lgtm/need 1"), label(2, "lgtm/blocked")]);

        let report = apply(&forge, &pr, &done()).await;

        assert_eq!(report.removed, vec!["lgtm/blocked".to_string()]);
        assert_eq!(report.added.as_deref(), Some("lgtm/done"));
        assert!(report.status_set);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, "remove label lgtm/need 1");
    }

    #[tokio::test]
    async fn test_status_is_set_even_when_labels_fail() {
        let forge = InMemoryForge::new();
        forge.fail_when(ForgeCall::is_label_mutation);
        let pr = snapshot(vec![label(1, "lgtm/need 2")]);

        let report = apply(&forge, &pr, &done()).await;

        assert!(report.status_set);
        assert_eq!(report.label_changes(), 0);
        assert_eq!(report.failures.len(), 2);
        assert!(forge
            .calls()
            .iter()
            .any(|c| matches!(c, ForgeCall::CreateCommitStatus { .. })));
    }

    #[tokio::test]
    async fn test_status_failure_is_reported() {
        let forge = InMemoryForge::new();
        forge.fail_when(|call| matches!(call, ForgeCall::CreateCommitStatus { .. }));
        let pr = snapshot(vec![label(1, "lgtm/done")]);

        let report = apply(&forge, &pr, &done()).await;

        assert!(!report.status_set);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].operation, "create commit status");
    }
}
