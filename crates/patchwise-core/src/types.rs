use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a file in a pull request, as reported by the GitHub files API.
///
/// # Examples
///
/// ```
/// use patchwise_core::FileStatus;
///
/// let s: FileStatus = serde_json::from_str("\"renamed\"").unwrap();
/// assert_eq!(s, FileStatus::Renamed);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// New file.
    Added,
    /// Existing file changed in place.
    #[default]
    Modified,
    /// File removed.
    Removed,
    /// File moved, possibly with changes.
    Renamed,
    /// File copied from another path.
    Copied,
    /// Only metadata changed.
    Changed,
    /// File present in both versions without changes.
    Unchanged,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FileStatus::Added => "added",
            FileStatus::Modified => "modified",
            FileStatus::Removed => "removed",
            FileStatus::Renamed => "renamed",
            FileStatus::Copied => "copied",
            FileStatus::Changed => "changed",
            FileStatus::Unchanged => "unchanged",
        };
        f.write_str(s)
    }
}

/// A file changed by the pull request under review.
///
/// `patch` is absent for binary files and for diffs GitHub considers too
/// large to render.
///
/// # Examples
///
/// ```
/// use patchwise_core::{ChangedFile, FileStatus};
///
/// let file = ChangedFile {
///     filename: "src/lib.rs".into(),
///     previous_filename: None,
///     status: FileStatus::Modified,
///     additions: 3,
///     deletions: 1,
///     patch: Some("@@ -1,2 +1,4 @@\n fn a() {}\n+fn b() {}".into()),
/// };
/// assert!(!file.is_rename());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangedFile {
    /// Path in the head commit.
    pub filename: String,
    /// Path in the base commit, for renames.
    #[serde(default)]
    pub previous_filename: Option<String>,
    /// Change classification.
    #[serde(default)]
    pub status: FileStatus,
    /// Lines added.
    #[serde(default)]
    pub additions: u64,
    /// Lines removed.
    #[serde(default)]
    pub deletions: u64,
    /// Unified diff hunks for this file, starting at the first `@@` header.
    #[serde(default)]
    pub patch: Option<String>,
}

impl ChangedFile {
    /// Returns `true` if the file was renamed in this pull request.
    pub fn is_rename(&self) -> bool {
        self.previous_filename
            .as_deref()
            .is_some_and(|prev| prev != self.filename)
    }
}

/// A single inline review comment anchored to a diff-position.
///
/// `position` counts lines from the first hunk header of the file's patch:
/// the line right below that header is position 1. It is not a source line
/// number.
///
/// # Examples
///
/// ```
/// use patchwise_core::ReviewComment;
///
/// let comment = ReviewComment {
///     path: "src/auth.rs".into(),
///     position: 3,
///     body: "Consider renaming this variable".into(),
/// };
/// let json = serde_json::to_value(&comment).unwrap();
/// assert_eq!(json["position"], 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewComment {
    /// File the comment belongs to.
    pub path: String,
    /// Diff-position inside the file's patch.
    pub position: u32,
    /// Comment text (markdown).
    pub body: String,
}

/// Overall action attached to a submitted review.
///
/// # Examples
///
/// ```
/// use patchwise_core::ReviewEvent;
///
/// assert_eq!(ReviewEvent::RequestChanges.to_string(), "REQUEST_CHANGES");
/// assert_eq!(
///     serde_json::to_string(&ReviewEvent::Comment).unwrap(),
///     "\"COMMENT\""
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewEvent {
    /// Block the merge until the comments are addressed.
    RequestChanges,
    /// Approve the pull request.
    Approve,
    /// Leave comments without an explicit verdict.
    Comment,
}

impl fmt::Display for ReviewEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReviewEvent::RequestChanges => write!(f, "REQUEST_CHANGES"),
            ReviewEvent::Approve => write!(f, "APPROVE"),
            ReviewEvent::Comment => write!(f, "COMMENT"),
        }
    }
}

/// Supported model providers.
///
/// # Examples
///
/// ```
/// use patchwise_core::Provider;
///
/// let p: Provider = "OpenAI".parse().unwrap();
/// assert_eq!(p, Provider::OpenAi);
/// assert_eq!(p.api_key_env(), "OPENAI_API_KEY");
/// assert!("gemini".parse::<Provider>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// OpenAI chat completions API.
    #[serde(rename = "openai")]
    OpenAi,
    /// Anthropic messages API.
    Anthropic,
}

impl Provider {
    /// Environment variable consulted when the action input is empty.
    pub fn api_key_env(self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    /// Name of the action input carrying this provider's key.
    pub fn api_key_input(self) -> &'static str {
        match self {
            Provider::OpenAi => "openai_api_key",
            Provider::Anthropic => "anthropic_api_key",
        }
    }

    /// Default API base URL.
    pub fn default_base_url(self) -> &'static str {
        match self {
            Provider::OpenAi => "https://api.openai.com",
            Provider::Anthropic => "https://api.anthropic.com",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::OpenAi => write!(f, "openai"),
            Provider::Anthropic => write!(f, "anthropic"),
        }
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "anthropic" => Ok(Provider::Anthropic),
            other => Err(format!(
                "unknown ai_provider '{other}', expected 'openai' or 'anthropic'"
            )),
        }
    }
}

/// Whether a run produces a fresh review or answers follow-ups on existing threads.
///
/// # Examples
///
/// ```
/// use patchwise_core::RunMode;
///
/// assert_eq!("reply".parse::<RunMode>().unwrap(), RunMode::Reply);
/// assert_eq!(RunMode::default(), RunMode::Review);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Review every changed file and submit one review.
    #[default]
    Review,
    /// Reply to review threads where a human answered the bot.
    Reply,
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Review => write!(f, "review"),
            RunMode::Reply => write!(f, "reply"),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "review" => Ok(RunMode::Review),
            "reply" => Ok(RunMode::Reply),
            other => Err(format!("unknown mode '{other}', expected 'review' or 'reply'")),
        }
    }
}

/// Identifies a pull request on GitHub.
///
/// # Examples
///
/// ```
/// use patchwise_core::PullRequestRef;
///
/// let pr = PullRequestRef::new("octocat", "hello-world", 42);
/// assert_eq!(pr.to_string(), "octocat/hello-world#42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl PullRequestRef {
    /// Create a reference from its parts.
    pub fn new(owner: impl Into<String>, repo: impl Into<String>, number: u64) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            number,
        }
    }
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

/// Pull request metadata used for prompting and review submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Pull request number.
    pub number: u64,
    /// Title.
    pub title: String,
    /// Description, if any.
    #[serde(default)]
    pub body: Option<String>,
    /// Author login.
    pub author: String,
    /// Head commit SHA; reviews are anchored to it.
    pub head_sha: String,
    /// Base commit SHA.
    pub base_sha: String,
    /// Base branch name.
    pub base_ref: String,
}

/// A review already submitted on the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingReview {
    /// Review id.
    pub id: u64,
    /// Reviewer login.
    pub author: String,
    /// Review state (`APPROVED`, `COMMENTED`, ...).
    pub state: String,
    /// Review body.
    #[serde(default)]
    pub body: Option<String>,
}

/// An inline review comment already present on the pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExistingReviewComment {
    /// Comment id.
    pub id: u64,
    /// Id of the thread's first comment, when this is a reply.
    #[serde(default)]
    pub in_reply_to_id: Option<u64>,
    /// Commenter login.
    pub author: String,
    /// File path.
    pub path: String,
    /// Diff-position, if still applicable to the current diff.
    #[serde(default)]
    pub position: Option<u32>,
    /// Comment text.
    pub body: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl ExistingReviewComment {
    /// Id of the comment that starts this comment's thread.
    pub fn thread_id(&self) -> u64 {
        self.in_reply_to_id.unwrap_or(self.id)
    }
}

/// A reply to post on an existing review thread.
///
/// # Examples
///
/// ```
/// use patchwise_core::ThreadReply;
///
/// let reply = ThreadReply { comment_id: 7, body: "Good point, fixed upstream.".into() };
/// assert_eq!(reply.comment_id, 7);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadReply {
    /// Id of the thread's first comment.
    pub comment_id: u64,
    /// Reply text.
    pub body: String,
}
