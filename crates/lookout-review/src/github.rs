use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use lookout_core::{
    FileDiff, GeneratedReview, GitHubConfig, InstallationToken, LookoutError, PullRequestMeta,
    ReviewEvent,
};
use octocrab::service::middleware::retry::RetryConfig;
use serde::de::DeserializeOwned;

/// Page size for the pull request files listing.
pub const PER_PAGE: usize = 100;

/// Reads pull request metadata and changed files.
#[async_trait]
pub trait PullRequestSource: Send + Sync {
    async fn fetch_pull_request(
        &self,
        repo: &str,
        pr_number: u64,
        token: &InstallationToken,
    ) -> Result<PullRequestMeta, LookoutError>;

    /// Up to `limit` changed files, in the order the platform returns them.
    async fn fetch_pull_files(
        &self,
        repo: &str,
        pr_number: u64,
        token: &InstallationToken,
        limit: usize,
    ) -> Result<Vec<FileDiff>, LookoutError>;
}

/// Posts a finished review back to the pull request.
#[async_trait]
pub trait ReviewPublisher: Send + Sync {
    async fn publish(
        &self,
        repo: &str,
        pr_number: u64,
        token: &InstallationToken,
        body: &str,
        event: ReviewEvent,
    ) -> Result<(), LookoutError>;
}

/// Drain a 1-based paginated listing until `limit` items are collected or
/// a short page marks the end of the data.
///
/// Pages are requested strictly one after another. The result is truncated
/// to `limit` and keeps the order the pages came in.
///
/// # Errors
///
/// Propagates the first error returned by `fetch_page`.
pub async fn collect_pages<T, F, Fut>(limit: usize, mut fetch_page: F) -> Result<Vec<T>, LookoutError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Vec<T>, LookoutError>>,
{
    let mut items = Vec::new();
    let mut page = 1;
    while items.len() < limit {
        let batch = fetch_page(page).await?;
        let batch_len = batch.len();
        items.extend(batch);
        if batch_len < PER_PAGE {
            break;
        }
        page += 1;
    }
    items.truncate(limit);
    Ok(items)
}

/// GitHub REST client acting on behalf of an app installation.
///
/// Reads go through `reqwest`; the review itself is created with `octocrab`.
/// Every call takes the installation token explicitly so nothing is shared
/// between pipeline runs.
pub struct GitHubClient {
    http: reqwest::Client,
    api_base_url: String,
}

impl GitHubClient {
    /// Create a client from the `[github]` section.
    ///
    /// # Errors
    ///
    /// Returns [`LookoutError::Config`] if the HTTP client cannot be built.
    ///
    /// # Examples
    ///
    /// ```
    /// use lookout_core::GitHubConfig;
    /// use lookout_review::github::GitHubClient;
    ///
    /// let client = GitHubClient::new(&GitHubConfig::default()).unwrap();
    /// ```
    pub fn new(config: &GitHubConfig) -> Result<Self, LookoutError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent("lookout")
            .build()
            .map_err(|e| LookoutError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            http,
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
        token: &InstallationToken,
    ) -> Result<T, LookoutError> {
        let response = self
            .http
            .get(url)
            .query(query)
            .header("Authorization", format!("token {}", token.as_str()))
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| LookoutError::Fetch(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LookoutError::Fetch(format!(
                "GitHub API error {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| LookoutError::Fetch(format!("failed to parse response from {url}: {e}")))
    }

    fn octocrab(&self, token: &InstallationToken) -> Result<octocrab::Octocrab, LookoutError> {
        octocrab::Octocrab::builder()
            .base_uri(self.api_base_url.as_str())
            .map_err(|e| LookoutError::Publish(format!("invalid API base URL: {e}")))?
            .personal_token(token.as_str().to_string())
            .add_retry_config(RetryConfig::None)
            .build()
            .map_err(|e| LookoutError::Publish(format!("failed to create GitHub client: {e}")))
    }
}

#[async_trait]
impl PullRequestSource for GitHubClient {
    async fn fetch_pull_request(
        &self,
        repo: &str,
        pr_number: u64,
        token: &InstallationToken,
    ) -> Result<PullRequestMeta, LookoutError> {
        let url = format!("{}/repos/{repo}/pulls/{pr_number}", self.api_base_url);
        self.get_json(&url, &[], token).await
    }

    async fn fetch_pull_files(
        &self,
        repo: &str,
        pr_number: u64,
        token: &InstallationToken,
        limit: usize,
    ) -> Result<Vec<FileDiff>, LookoutError> {
        let url = format!("{}/repos/{repo}/pulls/{pr_number}/files", self.api_base_url);
        collect_pages(limit, |page| {
            let url = url.clone();
            async move {
                let query = [
                    ("per_page", PER_PAGE.to_string()),
                    ("page", page.to_string()),
                ];
                self.get_json::<Vec<FileDiff>>(&url, &query, token).await
            }
        })
        .await
    }
}

#[async_trait]
impl ReviewPublisher for GitHubClient {
    async fn publish(
        &self,
        repo: &str,
        pr_number: u64,
        token: &InstallationToken,
        body: &str,
        event: ReviewEvent,
    ) -> Result<(), LookoutError> {
        let route = format!("/repos/{repo}/pulls/{pr_number}/reviews");
        let payload = serde_json::json!({
            "body": body,
            "event": event,
        });

        let _response: serde_json::Value = self
            .octocrab(token)?
            .post(route, Some(&payload))
            .await
            .map_err(|e| LookoutError::Publish(format!("failed to post review: {e}")))?;

        Ok(())
    }
}

/// Render the Markdown body posted as the pull request review.
///
/// # Examples
///
/// ```
/// use lookout_core::GeneratedReview;
/// use lookout_review::github::format_review_body;
///
/// let body = format_review_body(&GeneratedReview {
///     summary: "Looks fine.".into(),
///     comments: vec![],
/// });
/// assert!(body.ends_with("- No blocking issues found."));
/// ```
pub fn format_review_body(review: &GeneratedReview) -> String {
    let mut lines = vec![
        "## AI Code Review Summary".to_string(),
        review.summary.clone(),
        String::new(),
        "### Findings".to_string(),
    ];
    if review.comments.is_empty() {
        lines.push("- No blocking issues found.".to_string());
    }
    for comment in &review.comments {
        lines.push(format!(
            "- **{}** {}: {}",
            comment.severity.label(),
            comment.file_path,
            comment.message
        ));
    }
    lines.join("\n")
}

/// Parse a PR reference string (`owner/repo#number`) into the repository
/// full name and the PR number.
///
/// # Errors
///
/// Returns [`LookoutError::Validation`] if the format is invalid.
///
/// # Examples
///
/// ```
/// use lookout_review::github::parse_pr_reference;
///
/// let (repo, num) = parse_pr_reference("octocat/hello-world#42").unwrap();
/// assert_eq!(repo, "octocat/hello-world");
/// assert_eq!(num, 42);
/// ```
pub fn parse_pr_reference(pr_ref: &str) -> Result<(String, u64), LookoutError> {
    let invalid = || {
        LookoutError::Validation(format!(
            "invalid PR reference '{pr_ref}', expected owner/repo#number"
        ))
    };
    let (owner_repo, number_str) = pr_ref.split_once('#').ok_or_else(invalid)?;
    let (owner, repo) = owner_repo.split_once('/').ok_or_else(invalid)?;
    if owner.is_empty() || repo.is_empty() {
        return Err(invalid());
    }
    let number: u64 = number_str
        .parse()
        .map_err(|_| LookoutError::Validation(format!("invalid PR number: {number_str}")))?;
    Ok((owner_repo.to_string(), number))
}
