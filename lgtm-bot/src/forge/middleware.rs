use std::time::Instant;

use axum::http;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use tracing::{debug, warn};

/// Logs every outgoing forge call with its status and latency.
///
/// Only method, URL and status are logged; the token lives in a header and
/// never reaches the log.
pub struct LoggingMiddleware;

#[async_trait::async_trait]
impl Middleware for LoggingMiddleware {
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        let method = req.method().clone();
        let url = req.url().clone();
        let started = Instant::now();

        let response = next.run(req, extensions).await;

        let elapsed_ms = started.elapsed().as_millis();
        match &response {
            Ok(resp) => debug!(
                "{} {} -> {} ({} ms)",
                method,
                url,
                resp.status(),
                elapsed_ms
            ),
            Err(err) => warn!("{} {} failed after {} ms: {}", method, url, elapsed_ms, err),
        }

        response
    }
}
