pub mod applier;
pub mod backfill;
pub mod config;
pub mod event;
pub mod forge;
pub mod pipeline;
pub mod webhook;

pub use applier::{ApplyFailure, ApplyReport, STATUS_CONTEXT};
pub use backfill::{backfill, BackfillSummary};
pub use forge::{Forge, ForgeClient, ForgeDialect, InMemoryForge, PullRequestSnapshot, RepoRef};
pub use pipeline::{PullRequestId, Reconciler};

/// Shared state of the webhook listener.
pub struct AppState {
    pub reconciler: Reconciler,
    pub webhook_secret: String,
    /// Only events for these repositories trigger reconciliation.
    pub repos: Vec<RepoRef>,
}
