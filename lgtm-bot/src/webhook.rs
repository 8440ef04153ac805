use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::{Body, Bytes},
    extract::{Request, State},
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::any,
    Router,
};
use base64::{engine::general_purpose, Engine as _};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, error, info, warn};

use crate::event::{is_candidate, translate, DeliveryHeaders};
use crate::forge::wire;
use crate::forge::PullRequestSnapshot;
use crate::AppState;

pub const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// GitHub caps webhook payloads at 25 MB.
const MAX_WEBHOOK_BODY: usize = 25 * 1024 * 1024;

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookResponse {
    pub message: String,
}

/// Why a delivery was turned away. Every rejection is a 400.
#[derive(Debug, thiserror::Error)]
pub enum Rejection {
    #[error("Bad path")]
    BadPath,
    #[error("Missing signature")]
    MissingSignature,
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid webhook")]
    InvalidWebhook,
    /// First line of whatever went wrong while handling the event.
    #[error("{0}")]
    Handler(String),
}

impl Rejection {
    fn handler(err: &anyhow::Error) -> Self {
        Self::Handler(first_line(&format!("{:#}", err)))
    }
}

impl IntoResponse for Rejection {
    fn into_response(self) -> Response {
        let body = WebhookResponse {
            message: self.to_string(),
        };
        (StatusCode::BAD_REQUEST, Json(body)).into_response()
    }
}

fn first_line(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

#[derive(Debug, Deserialize)]
struct ActionEnvelope {
    action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PullRequestEvent {
    pull_request: wire::PullRequest,
    repository: wire::Repository,
}

type HmacSha256 = Hmac<Sha256>;

/// Accepts `sha256=<hex>`, bare hex, or base64.
fn decode_signature(signature: &str) -> Option<Vec<u8>> {
    let value = signature.trim();
    let value = value.strip_prefix("sha256=").unwrap_or(value);
    hex::decode(value)
        .ok()
        .or_else(|| general_purpose::STANDARD.decode(value).ok())
}

fn verify_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_bytes) = decode_signature(signature) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Use constant-time verification
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn read_body(body: Body) -> Result<Bytes, Rejection> {
    axum::body::to_bytes(body, MAX_WEBHOOK_BODY)
        .await
        .map_err(|e| Rejection::Handler(first_line(&e.to_string())))
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, Rejection> {
    if request.method() != Method::POST {
        return Err(Rejection::BadPath);
    }

    let (parts, body) = request.into_parts();

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(Rejection::MissingSignature)?
        .to_string();

    let bytes = read_body(body).await?;

    if !verify_signature(&state.webhook_secret, &bytes, &signature) {
        warn!("Invalid webhook signature");
        return Err(Rejection::InvalidSignature);
    }

    let request = Request::from_parts(parts, Body::from(bytes));
    Ok(next.run(request).await)
}

/// Decide whether a verified delivery should trigger reconciliation.
///
/// `Ok(None)` means the delivery is fine but not ours to act on.
fn route_event(
    state: &AppState,
    delivery: &DeliveryHeaders,
    body: &[u8],
) -> anyhow::Result<Option<PullRequestSnapshot>> {
    if !is_candidate(delivery.dialect, &delivery.event_name) {
        debug!(
            "Ignoring {} event (delivery {})",
            delivery.event_name, delivery.delivery_id
        );
        return Ok(None);
    }

    let envelope: ActionEnvelope =
        serde_json::from_slice(body).context("Failed to parse webhook payload")?;

    let Some(event) = translate(
        delivery.dialect,
        &delivery.event_name,
        envelope.action.as_deref(),
    ) else {
        debug!(
            "Ignoring {} event with action {:?} (delivery {})",
            delivery.event_name, envelope.action, delivery.delivery_id
        );
        return Ok(None);
    };

    let payload: PullRequestEvent =
        serde_json::from_slice(body).context("Failed to parse pull request payload")?;

    let owner = &payload.repository.owner.login;
    let repo = &payload.repository.name;
    if !state.repos.iter().any(|r| r.matches(owner, repo)) {
        info!(
            "Ignoring {:?} for {}/{}: repository is not configured",
            event, owner, repo
        );
        return Ok(None);
    }

    info!(
        "Delivery {}: {:?} on {}/{} #{}",
        delivery.delivery_id, event, owner, repo, payload.pull_request.number
    );
    Ok(Some(payload.pull_request.into_snapshot()))
}

pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> Result<Json<WebhookResponse>, Rejection> {
    let (parts, body) = request.into_parts();

    let delivery =
        DeliveryHeaders::from_headers(&parts.headers).ok_or(Rejection::InvalidWebhook)?;
    let bytes = read_body(body).await?;

    let snapshot = route_event(&state, &delivery, &bytes).map_err(|e| {
        warn!("Rejecting delivery {}: {:#}", delivery.delivery_id, e);
        Rejection::handler(&e)
    })?;

    if let Some(snapshot) = snapshot {
        let reconciler = state.reconciler.clone();
        let delivery_id = delivery.delivery_id;

        tokio::spawn(async move {
            match reconciler.run(&snapshot).await {
                Ok(report) if report.is_clean() => {}
                Ok(report) => warn!(
                    "Delivery {}: {} forge call(s) failed for {} #{}",
                    delivery_id,
                    report.failures.len(),
                    snapshot.repo_slug(),
                    snapshot.number
                ),
                Err(e) => error!("Delivery {}: {:#}", delivery_id, e),
            }
        });
    }

    Ok(Json(WebhookResponse {
        message: "Webhook received".to_string(),
    }))
}

async fn bad_path() -> Rejection {
    Rejection::BadPath
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhooks", any(receive_webhook))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
        .fallback(bad_path)
}
