//! Translation of forge-specific webhook events into canonical events.
//!
//! GitHub sends pre-split event names (`pull_request`, `pull_request_review`)
//! with GitHub action names. Gitea sends a family of `pull_request*` event
//! names that all carry an `action` such as `synchronized` or `reviewed`.
//! Everything downstream of this module only sees `CanonicalEvent`.

use axum::http::HeaderMap;

use crate::forge::ForgeDialect;

pub const GITHUB_DELIVERY_HEADER: &str = "x-github-delivery";
pub const GITHUB_EVENT_HEADER: &str = "x-github-event";
pub const GITEA_DELIVERY_HEADER: &str = "x-gitea-delivery";
pub const GITEA_EVENT_HEADER: &str = "x-gitea-event";

/// Pull-request activity that can change the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalEvent {
    Opened,
    Synchronized,
    ReviewRequested,
    ReviewRequestRemoved,
    Reviewed,
}

/// Gitea's split review events; all of them carry an `action`.
const GITEA_PULL_REQUEST_EVENTS: &[&str] = &[
    "pull_request",
    "pull_request_approved",
    "pull_request_rejected",
    "pull_request_comment",
    "pull_request_review_approved",
    "pull_request_review_rejected",
    "pull_request_review_comment",
    "pull_request_review_request",
];

/// Identity of a delivery taken from its headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryHeaders {
    pub delivery_id: String,
    pub event_name: String,
    pub dialect: ForgeDialect,
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
}

impl DeliveryHeaders {
    /// Read delivery id and event name. Gitea also sends the GitHub headers,
    /// so the presence of `x-gitea-event` decides the dialect.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let dialect = if header(headers, GITEA_EVENT_HEADER).is_some() {
            ForgeDialect::Gitea
        } else {
            ForgeDialect::GitHub
        };

        let (event_name, delivery_id) = match dialect {
            ForgeDialect::Gitea => (
                header(headers, GITEA_EVENT_HEADER),
                header(headers, GITEA_DELIVERY_HEADER)
                    .or_else(|| header(headers, GITHUB_DELIVERY_HEADER)),
            ),
            ForgeDialect::GitHub => (
                header(headers, GITHUB_EVENT_HEADER),
                header(headers, GITHUB_DELIVERY_HEADER),
            ),
        };

        Some(Self {
            delivery_id: delivery_id?.to_string(),
            event_name: event_name?.to_string(),
            dialect,
        })
    }
}

/// Whether an event name can ever translate to a canonical event.
///
/// Used to skip parsing bodies of events we never handle.
pub fn is_candidate(dialect: ForgeDialect, event_name: &str) -> bool {
    match dialect {
        ForgeDialect::GitHub => matches!(event_name, "pull_request" | "pull_request_review"),
        ForgeDialect::Gitea => GITEA_PULL_REQUEST_EVENTS.contains(&event_name),
    }
}

/// Translate an event name plus action. `None` means "not ours, drop it".
pub fn translate(
    dialect: ForgeDialect,
    event_name: &str,
    action: Option<&str>,
) -> Option<CanonicalEvent> {
    match dialect {
        ForgeDialect::GitHub => match (event_name, action) {
            ("pull_request", Some("opened")) => Some(CanonicalEvent::Opened),
            ("pull_request", Some("synchronize")) => Some(CanonicalEvent::Synchronized),
            ("pull_request", Some("review_requested")) => Some(CanonicalEvent::ReviewRequested),
            ("pull_request", Some("review_request_removed")) => {
                Some(CanonicalEvent::ReviewRequestRemoved)
            }
            // submitted, edited and dismissed all change the history.
            ("pull_request_review", _) => Some(CanonicalEvent::Reviewed),
            _ => None,
        },
        ForgeDialect::Gitea => {
            if !GITEA_PULL_REQUEST_EVENTS.contains(&event_name) {
                return None;
            }
            match action? {
                "opened" => Some(CanonicalEvent::Opened),
                "synchronized" => Some(CanonicalEvent::Synchronized),
                "reviewed" => Some(CanonicalEvent::Reviewed),
                "review_requested" => Some(CanonicalEvent::ReviewRequested),
                "review_request_removed" => Some(CanonicalEvent::ReviewRequestRemoved),
                _ => None,
            }
        }
    }
}
