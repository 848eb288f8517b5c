//! Repository tools bound during per-file review.

use std::sync::Arc;

use async_trait::async_trait;
use patchwise_core::{ChangedFile, PatchwiseError};
use patchwise_difflens::parser::parse_patch;
use schemars::JsonSchema;
use serde::Deserialize;

use super::TypedTool;
use crate::github::ContextProvider;
use crate::prompt::{truncate_chars, truncate_patch};

/// Parameters for the repository tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct PathParams {
    /// Repository-relative path.
    #[schemars(description = "Repository-relative file path, e.g. src/main.rs")]
    pub path: String,
}

/// `get_file_content`: a file at the pull request's head commit.
pub struct GetFileContent {
    context: Arc<dyn ContextProvider>,
    git_ref: String,
    limit: usize,
}

impl GetFileContent {
    /// Read files through `context` at `git_ref`, truncated to `limit` characters.
    pub fn new(context: Arc<dyn ContextProvider>, git_ref: impl Into<String>, limit: usize) -> Self {
        Self {
            context,
            git_ref: git_ref.into(),
            limit,
        }
    }
}

#[async_trait]
impl TypedTool for GetFileContent {
    type Input = PathParams;
    const NAME: &'static str = "get_file_content";

    fn description(&self) -> &str {
        "Get the full content of a file in the repository at the pull request's head commit."
    }

    async fn run(&self, input: PathParams) -> Result<String, PatchwiseError> {
        let path = input.path.trim().trim_start_matches('/');
        let content = self
            .context
            .file_content(path, &self.git_ref)
            .await?
            .ok_or_else(|| PatchwiseError::tool(Self::NAME, format!("{path} not found")))?;
        Ok(truncate_chars(&content, self.limit))
    }
}

/// `get_diff_patch`: the position-annotated patch of a changed file.
pub struct GetDiffPatch {
    files: Arc<Vec<ChangedFile>>,
    limit: usize,
}

impl GetDiffPatch {
    /// Serve patches from `files`. The raw patch is cut to `limit`
    /// characters on a line boundary before it is annotated.
    pub fn new(files: Arc<Vec<ChangedFile>>, limit: usize) -> Self {
        Self { files, limit }
    }
}

#[async_trait]
impl TypedTool for GetDiffPatch {
    type Input = PathParams;
    const NAME: &'static str = "get_diff_patch";

    fn description(&self) -> &str {
        "Get the diff patch of another file changed in this pull request. \
         The left column is the diff position."
    }

    async fn run(&self, input: PathParams) -> Result<String, PatchwiseError> {
        let path = input.path.trim().trim_start_matches('/');
        let file = self
            .files
            .iter()
            .find(|f| f.filename == path || f.previous_filename.as_deref() == Some(path))
            .ok_or_else(|| {
                PatchwiseError::tool(Self::NAME, format!("{path} is not changed in this PR"))
            })?;
        let patch = file
            .patch
            .as_deref()
            .ok_or_else(|| PatchwiseError::tool(Self::NAME, format!("{path} has no textual patch")))?;
        let patch = truncate_patch(patch, self.limit);
        match parse_patch(&patch) {
            Ok(parsed) => Ok(parsed.annotated()),
            Err(_) => Ok(patch),
        }
    }
}
