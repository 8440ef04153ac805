use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use lgtm_core::{ReviewRecord, StatusState};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::{error, info};

use super::middleware::LoggingMiddleware;
use super::wire::{self, AddLabelsById, AddLabelsByName, CreateStatusRequest};
use super::{Forge, ForgeDialect, Label, PullRequestSnapshot};

const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Gitea reports the size of a listing in this header.
const TOTAL_COUNT_HEADER: &str = "x-total-count";

/// REST client for a GitHub or Gitea instance.
#[derive(Clone)]
pub struct ForgeClient {
    client: ClientWithMiddleware,
    base_url: String,
    token: String,
    dialect: ForgeDialect,
}

impl ForgeClient {
    /// `base_url` is the API root, e.g. `https://api.github.com` or
    /// `https://gitea.example.com/api/v1`.
    pub fn new(base_url: &str, token: String, dialect: ForgeDialect) -> Result<Self> {
        let reqwest_client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        let client = ClientBuilder::new(reqwest_client)
            .with(LoggingMiddleware)
            .build();

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
            dialect,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorization(&self) -> String {
        match self.dialect {
            ForgeDialect::GitHub => format!("Bearer {}", self.token),
            ForgeDialect::Gitea => format!("token {}", self.token),
        }
    }

    fn accept(&self) -> &'static str {
        match self.dialect {
            ForgeDialect::GitHub => "application/vnd.github+json",
            ForgeDialect::Gitea => "application/json",
        }
    }

    fn page_size(&self) -> usize {
        match self.dialect {
            ForgeDialect::GitHub => 100,
            ForgeDialect::Gitea => 50,
        }
    }

    fn page_size_param(&self) -> &'static str {
        match self.dialect {
            ForgeDialect::GitHub => "per_page",
            ForgeDialect::Gitea => "limit",
        }
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(AUTHORIZATION, self.authorization())
            .header(ACCEPT, self.accept())
    }

    /// Send a request and turn any non-2xx status into an error carrying the body.
    async fn send(&self, builder: RequestBuilder, operation: &str) -> Result<reqwest::Response> {
        let response = self
            .authorized(builder)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", operation))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("Forge API error during {}: {} - {}", operation, status, error_text);
            return Err(anyhow!(
                "Forge API error during {}: {} - {}",
                operation,
                status,
                error_text
            ));
        }

        Ok(response)
    }

    /// Fetch every page of a listing endpoint.
    ///
    /// With an `x-total-count` header the listing ends once that many items
    /// have arrived. Gitea may clamp `limit` below the requested size, so a
    /// short page alone is not the end there. Without the header a short page
    /// ends the listing. An empty page always does.
    async fn get_all_pages<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
        operation: &str,
    ) -> Result<Vec<T>> {
        let page_size = self.page_size();
        let page_size_value = page_size.to_string();
        let mut items = Vec::new();
        let mut page: u32 = 1;

        loop {
            let page_value = page.to_string();
            let builder = self
                .client
                .get(self.url(path))
                .query(query)
                .query(&[
                    ("page", page_value.as_str()),
                    (self.page_size_param(), page_size_value.as_str()),
                ]);

            let response = self.send(builder, operation).await?;
            let total: Option<usize> = response
                .headers()
                .get(TOTAL_COUNT_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());

            let batch: Vec<T> = response
                .json()
                .await
                .with_context(|| format!("Failed to parse {} response", operation))?;
            let batch_len = batch.len();
            items.extend(batch);

            let done = match total {
                Some(total) => items.len() >= total,
                None => batch_len < page_size,
            };
            if batch_len == 0 || done {
                break;
            }
            page += 1;
        }

        Ok(items)
    }
}

#[async_trait]
impl Forge for ForgeClient {
    async fn authenticated_user(&self) -> Result<String> {
        let response = self
            .send(self.client.get(self.url("/user")), "get authenticated user")
            .await?;
        let user: wire::User = response
            .json()
            .await
            .context("Failed to parse authenticated user response")?;
        Ok(user.login)
    }

    async fn list_labels(&self, owner: &str, repo: &str) -> Result<Vec<Label>> {
        let path = format!("/repos/{}/{}/labels", owner, repo);
        let labels: Vec<wire::LabelPayload> =
            self.get_all_pages(&path, &[], "list labels").await?;
        Ok(labels.into_iter().map(Label::from).collect())
    }

    async fn add_labels(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        labels: &[String],
    ) -> Result<()> {
        let url = self.url(&format!(
            "/repos/{}/{}/issues/{}/labels",
            owner, repo, issue_number
        ));

        let builder = match self.dialect {
            ForgeDialect::GitHub => self.client.post(&url).json(&AddLabelsByName { labels }),
            ForgeDialect::Gitea => {
                // Gitea wants label ids, so resolve names against the repo's labels.
                let known = self.list_labels(owner, repo).await?;
                let ids = labels
                    .iter()
                    .map(|name| {
                        known
                            .iter()
                            .find(|label| &label.name == name)
                            .map(|label| label.id)
                            .ok_or_else(|| {
                                anyhow!("label '{}' does not exist in {}/{}", name, owner, repo)
                            })
                    })
                    .collect::<Result<Vec<u64>>>()?;
                self.client.post(&url).json(&AddLabelsById { labels: ids })
            }
        };

        self.send(builder, "add labels").await?;
        Ok(())
    }

    async fn remove_label(
        &self,
        owner: &str,
        repo: &str,
        issue_number: u64,
        label: &Label,
    ) -> Result<()> {
        let key = match self.dialect {
            ForgeDialect::GitHub => urlencoding::encode(&label.name).into_owned(),
            ForgeDialect::Gitea => label.id.to_string(),
        };
        let url = self.url(&format!(
            "/repos/{}/{}/issues/{}/labels/{}",
            owner, repo, issue_number, key
        ));

        self.send(self.client.delete(&url), "remove label").await?;
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
        let url = self.url(&format!("/repos/{}/{}/statuses/{}", owner, repo, sha));
        let body = CreateStatusRequest {
            state,
            description,
            context,
        };

        self.send(self.client.post(&url).json(&body), "create commit status")
            .await?;
        Ok(())
    }

    async fn list_open_pull_requests(
        &self,
        owner: &str,
        repo: &str,
    ) -> Result<Vec<PullRequestSnapshot>> {
        info!("Listing open pull requests in {}/{}", owner, repo);

        let path = format!("/repos/{}/{}/pulls", owner, repo);
        let pulls: Vec<wire::PullRequest> = self
            .get_all_pages(&path, &[("state", "open")], "list pull requests")
            .await?;
        Ok(pulls.into_iter().map(wire::PullRequest::into_snapshot).collect())
    }

    async fn list_reviews(
        &self,
        owner: &str,
        repo: &str,
        pr_number: u64,
    ) -> Result<Vec<ReviewRecord>> {
        let path = format!("/repos/{}/{}/pulls/{}/reviews", owner, repo, pr_number);
        let reviews: Vec<wire::Review> = self.get_all_pages(&path, &[], "list reviews").await?;
        Ok(reviews.into_iter().map(ReviewRecord::from).collect())
    }
}
