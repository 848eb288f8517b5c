use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use patchwise_core::{
    ChangedFile, ExistingReview, ExistingReviewComment, PatchwiseError, PullRequest,
    PullRequestRef, ReviewComment, ReviewEvent,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::tree::{folder_tree, TreeOptions};

const USER_AGENT: &str = concat!("patchwise/", env!("CARGO_PKG_VERSION"));

/// Page size for paginated list endpoints.
const PER_PAGE: usize = 100;

/// Stop paginating after this many pages (GitHub caps PR files at 3000).
const MAX_PAGES: usize = 30;

/// Read access to the pull request and its repository.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    /// Pull request metadata.
    async fn pull_request(&self) -> Result<PullRequest, PatchwiseError>;

    /// Files changed by the pull request, in the order GitHub lists them.
    async fn changed_files(&self) -> Result<Vec<ChangedFile>, PatchwiseError>;

    /// Repository README, `None` if the repository has none.
    async fn readme(&self) -> Result<Option<String>, PatchwiseError>;

    /// File content at `git_ref`, `None` if the file does not exist there.
    async fn file_content(&self, path: &str, git_ref: &str)
        -> Result<Option<String>, PatchwiseError>;

    /// Indented listing of the checked-out workspace.
    async fn folder_tree(&self) -> Result<String, PatchwiseError>;

    /// Reviews already submitted on the pull request.
    async fn reviews(&self) -> Result<Vec<ExistingReview>, PatchwiseError>;

    /// Inline review comments, oldest first.
    async fn review_comments(&self) -> Result<Vec<ExistingReviewComment>, PatchwiseError>;
}

/// Write access: posting the review and thread replies.
#[async_trait]
pub trait ReviewSubmitter: Send + Sync {
    /// Create one review on the pull request.
    async fn submit_review(&self, review: &ReviewSubmission) -> Result<(), PatchwiseError>;

    /// Reply on the thread started by `comment_id`.
    async fn reply_to_comment(&self, comment_id: u64, body: &str) -> Result<(), PatchwiseError>;
}

/// Payload of the create-review call.
///
/// Serializes to the body GitHub expects.
///
/// # Examples
///
/// ```
/// use patchwise_core::{ReviewComment, ReviewEvent};
/// use patchwise_review::github::ReviewSubmission;
///
/// let review = ReviewSubmission {
///     commit_id: "abc123".into(),
///     body: "Looks mostly good".into(),
///     event: ReviewEvent::Comment,
///     comments: vec![ReviewComment { path: "a.rs".into(), position: 2, body: "nit".into() }],
/// };
/// let json = serde_json::to_value(&review).unwrap();
/// assert_eq!(json["event"], "COMMENT");
/// assert_eq!(json["comments"][0]["position"], 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReviewSubmission {
    /// Head commit the review is anchored to.
    pub commit_id: String,
    /// Review summary.
    pub body: String,
    /// Review verdict.
    pub event: ReviewEvent,
    /// Inline comments.
    pub comments: Vec<ReviewComment>,
}

/// GitHub REST client bound to one pull request.
///
/// Reads go through `reqwest` with raw media types where useful; writes go
/// through `octocrab`.
///
/// # Examples
///
/// ```
/// use patchwise_review::github::parse_pr_reference;
///
/// let pr = parse_pr_reference("rust-lang/rust#12345").unwrap();
/// assert_eq!(pr.owner, "rust-lang");
/// assert_eq!(pr.repo, "rust");
/// assert_eq!(pr.number, 12345);
/// ```
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
    api_url: String,
    pr: PullRequestRef,
    workspace: PathBuf,
    tree: TreeOptions,
}

impl GitHubClient {
    /// Create a client for `pr` against the API at `api_url`.
    ///
    /// `workspace` is the checked-out repository used for the folder tree.
    ///
    /// # Errors
    ///
    /// Returns [`PatchwiseError::GitHub`] if a client cannot be built.
    pub fn new(
        pr: PullRequestRef,
        token: &str,
        api_url: &str,
        workspace: PathBuf,
        tree: TreeOptions,
    ) -> Result<Self, PatchwiseError> {
        let api_url = api_url.trim_end_matches('/').to_string();

        let octocrab = octocrab::Octocrab::builder()
            .base_uri(api_url.as_str())
            .map_err(|e| PatchwiseError::GitHub(format!("invalid API url '{api_url}': {e}")))?
            .personal_token(token.to_string())
            .build()
            .map_err(|e| PatchwiseError::GitHub(format!("failed to create GitHub client: {e}")))?;

        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PatchwiseError::GitHub(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            octocrab,
            http,
            token: token.to_string(),
            api_url,
            pr,
            workspace,
            tree,
        })
    }

    fn repo_url(&self) -> String {
        format!("{}/repos/{}/{}", self.api_url, self.pr.owner, self.pr.repo)
    }

    fn pulls_url(&self) -> String {
        format!("{}/pulls/{}", self.repo_url(), self.pr.number)
    }

    async fn get(
        &self,
        url: reqwest::Url,
        accept: &str,
    ) -> Result<Option<reqwest::Response>, PatchwiseError> {
        debug!(%url, "GET");
        let response = self
            .http
            .get(url.clone())
            .header("Accept", accept)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("X-GitHub-Api-Version", "2022-11-28")
            .send()
            .await
            .map_err(|e| PatchwiseError::GitHub(format!("request to {url} failed: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(PatchwiseError::GitHub(format!(
                "GitHub API error {status} for {url}: {body}"
            )));
        }
        Ok(Some(response))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, PatchwiseError> {
        let url = parse_url(url)?;
        let response = self
            .get(url.clone(), "application/vnd.github+json")
            .await?
            .ok_or_else(|| PatchwiseError::GitHub(format!("{url} not found")))?;
        response
            .json()
            .await
            .map_err(|e| PatchwiseError::GitHub(format!("failed to decode {url}: {e}")))
    }

    async fn get_raw(&self, url: reqwest::Url) -> Result<Option<String>, PatchwiseError> {
        let Some(response) = self.get(url.clone(), "application/vnd.github.raw").await? else {
            return Ok(None);
        };
        let text = response
            .text()
            .await
            .map_err(|e| PatchwiseError::GitHub(format!("failed to read {url}: {e}")))?;
        Ok(Some(text))
    }

    async fn get_paginated<T: DeserializeOwned>(&self, url: &str) -> Result<Vec<T>, PatchwiseError> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let page_url = format!("{url}?per_page={PER_PAGE}&page={page}");
            let batch: Vec<T> = self.get_json(&page_url).await?;
            let done = batch.len() < PER_PAGE;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

#[async_trait]
impl ContextProvider for GitHubClient {
    async fn pull_request(&self) -> Result<PullRequest, PatchwiseError> {
        let wire: WirePullRequest = self.get_json(&self.pulls_url()).await?;
        Ok(wire.into())
    }

    async fn changed_files(&self) -> Result<Vec<ChangedFile>, PatchwiseError> {
        let files: Vec<ChangedFile> = self
            .get_paginated(&format!("{}/files", self.pulls_url()))
            .await?;
        info!(pr = %self.pr, files = files.len(), "fetched changed files");
        Ok(files)
    }

    async fn readme(&self) -> Result<Option<String>, PatchwiseError> {
        let url = parse_url(&format!("{}/readme", self.repo_url()))?;
        self.get_raw(url).await
    }

    async fn file_content(
        &self,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, PatchwiseError> {
        let mut url = parse_url(&format!("{}/contents", self.repo_url()))?;
        url.path_segments_mut()
            .map_err(|_| PatchwiseError::GitHub(format!("cannot build contents url for {path}")))?
            .extend(path.split('/').filter(|s| !s.is_empty()));
        url.query_pairs_mut().append_pair("ref", git_ref);
        self.get_raw(url).await
    }

    async fn folder_tree(&self) -> Result<String, PatchwiseError> {
        folder_tree(&self.workspace, self.tree)
    }

    async fn reviews(&self) -> Result<Vec<ExistingReview>, PatchwiseError> {
        let wire: Vec<WireReview> = self
            .get_paginated(&format!("{}/reviews", self.pulls_url()))
            .await?;
        Ok(wire.into_iter().map(Into::into).collect())
    }

    async fn review_comments(&self) -> Result<Vec<ExistingReviewComment>, PatchwiseError> {
        let wire: Vec<WireReviewComment> = self
            .get_paginated(&format!("{}/comments", self.pulls_url()))
            .await?;
        let mut comments: Vec<ExistingReviewComment> = wire.into_iter().map(Into::into).collect();
        comments.sort_by_key(|c| (c.created_at, c.id));
        Ok(comments)
    }
}

#[async_trait]
impl ReviewSubmitter for GitHubClient {
    async fn submit_review(&self, review: &ReviewSubmission) -> Result<(), PatchwiseError> {
        let route = format!(
            "/repos/{}/{}/pulls/{}/reviews",
            self.pr.owner, self.pr.repo, self.pr.number
        );
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(review))
            .await
            .map_err(|e| PatchwiseError::GitHub(format!("failed to post review: {e}")))?;

        info!(
            pr = %self.pr,
            event = %review.event,
            comments = review.comments.len(),
            "review submitted"
        );
        Ok(())
    }

    async fn reply_to_comment(&self, comment_id: u64, body: &str) -> Result<(), PatchwiseError> {
        let route = format!(
            "/repos/{}/{}/pulls/{}/comments/{comment_id}/replies",
            self.pr.owner, self.pr.repo, self.pr.number
        );
        let payload = serde_json::json!({ "body": body });
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&payload))
            .await
            .map_err(|e| {
                PatchwiseError::GitHub(format!("failed to reply to comment {comment_id}: {e}"))
            })?;

        info!(pr = %self.pr, comment_id, "reply posted");
        Ok(())
    }
}

/// Submitter for `--dry-run`: prints the review as markdown instead of posting.
#[derive(Debug, Default)]
pub struct StdoutSubmitter;

#[async_trait]
impl ReviewSubmitter for StdoutSubmitter {
    async fn submit_review(&self, review: &ReviewSubmission) -> Result<(), PatchwiseError> {
        println!("{}", render_review_markdown(review));
        Ok(())
    }

    async fn reply_to_comment(&self, comment_id: u64, body: &str) -> Result<(), PatchwiseError> {
        println!("### Reply to comment {comment_id}\n\n{body}\n");
        Ok(())
    }
}

/// Render a review for terminal or step-summary output.
///
/// # Examples
///
/// ```
/// use patchwise_core::{ReviewComment, ReviewEvent};
/// use patchwise_review::github::{render_review_markdown, ReviewSubmission};
///
/// let review = ReviewSubmission {
///     commit_id: "abc".into(),
///     body: "Summary".into(),
///     event: ReviewEvent::Comment,
///     comments: vec![ReviewComment { path: "src/a.rs".into(), position: 3, body: "Rename".into() }],
/// };
/// let md = render_review_markdown(&review);
/// assert!(md.contains("`src/a.rs` position 3"));
/// assert!(md.contains("COMMENT"));
/// ```
pub fn render_review_markdown(review: &ReviewSubmission) -> String {
    let mut out = format!("{}\n**Event:** {}\n", review.body.trim_end(), review.event);
    for comment in &review.comments {
        out.push_str(&format!(
            "\n#### `{}` position {}\n\n{}\n",
            comment.path, comment.position, comment.body
        ));
    }
    out
}

/// Parse a PR reference string (`owner/repo#number`) into its components.
///
/// # Errors
///
/// Returns [`PatchwiseError::Config`] if the format is invalid.
///
/// # Examples
///
/// ```
/// use patchwise_review::github::parse_pr_reference;
///
/// let pr = parse_pr_reference("octocat/hello-world#42").unwrap();
/// assert_eq!(pr.to_string(), "octocat/hello-world#42");
/// assert!(parse_pr_reference("octocat/hello-world").is_err());
/// ```
pub fn parse_pr_reference(pr_ref: &str) -> Result<PullRequestRef, PatchwiseError> {
    let invalid = || {
        PatchwiseError::Config(format!(
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
        .map_err(|_| PatchwiseError::Config(format!("invalid PR number: {number_str}")))?;
    Ok(PullRequestRef::new(owner, repo, number))
}

fn parse_url(url: &str) -> Result<reqwest::Url, PatchwiseError> {
    reqwest::Url::parse(url).map_err(|e| PatchwiseError::GitHub(format!("invalid url '{url}': {e}")))
}

#[derive(Deserialize)]
struct WireUser {
    login: String,
}

fn login(user: Option<WireUser>) -> String {
    user.map(|u| u.login).unwrap_or_else(|| "ghost".into())
}

#[derive(Deserialize)]
struct WireCommit {
    sha: String,
    #[serde(rename = "ref", default)]
    git_ref: String,
}

#[derive(Deserialize)]
struct WirePullRequest {
    number: u64,
    title: String,
    body: Option<String>,
    user: Option<WireUser>,
    head: WireCommit,
    base: WireCommit,
}

impl From<WirePullRequest> for PullRequest {
    fn from(w: WirePullRequest) -> Self {
        Self {
            number: w.number,
            title: w.title,
            body: w.body,
            author: login(w.user),
            head_sha: w.head.sha,
            base_sha: w.base.sha,
            base_ref: w.base.git_ref,
        }
    }
}

#[derive(Deserialize)]
struct WireReview {
    id: u64,
    user: Option<WireUser>,
    state: String,
    body: Option<String>,
}

impl From<WireReview> for ExistingReview {
    fn from(w: WireReview) -> Self {
        Self {
            id: w.id,
            author: login(w.user),
            state: w.state,
            body: w.body,
        }
    }
}

#[derive(Deserialize)]
struct WireReviewComment {
    id: u64,
    in_reply_to_id: Option<u64>,
    user: Option<WireUser>,
    path: String,
    position: Option<u32>,
    body: String,
    created_at: DateTime<Utc>,
}

impl From<WireReviewComment> for ExistingReviewComment {
    fn from(w: WireReviewComment) -> Self {
        Self {
            id: w.id,
            in_reply_to_id: w.in_reply_to_id,
            author: login(w.user),
            path: w.path,
            position: w.position,
            body: w.body,
            created_at: w.created_at,
        }
    }
}
