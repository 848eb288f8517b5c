use crate::types::Provider;

/// Errors that can occur across patchwise.
///
/// Configuration errors are raised before any network call. Collaborator
/// errors (`GitHub`, `Llm`) abort the run. `Tool` and `Validation` errors are
/// normally absorbed at the tool boundary and only surface when a whole step
/// cannot make progress.
///
/// # Examples
///
/// ```
/// use patchwise_core::PatchwiseError;
///
/// let err = PatchwiseError::Config("missing github_token".into());
/// assert!(err.to_string().contains("missing github_token"));
/// ```
#[derive(Debug, thiserror::Error, miette::Diagnostic)]
pub enum PatchwiseError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    #[diagnostic(code(patchwise::io))]
    Io(#[from] std::io::Error),

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    #[diagnostic(
        code(patchwise::config),
        help("check the action inputs in your workflow file or .patchwise.toml")
    )]
    Config(String),

    /// No credentials for the selected model provider.
    #[error("configuration error: no API key configured for provider '{provider}'")]
    #[diagnostic(
        code(patchwise::config::api_key),
        help("set the `{input}` action input or the {env_var} environment variable")
    )]
    MissingApiKey {
        /// Provider selected by `ai_provider`.
        provider: Provider,
        /// Name of the action input carrying the key.
        input: &'static str,
        /// Fallback environment variable.
        env_var: &'static str,
    },

    /// The workflow was not triggered by a pull request.
    #[error("configuration error: not a pull request event (got '{0}')")]
    #[diagnostic(
        code(patchwise::config::event),
        help("run this action on `pull_request` or `pull_request_target` events, or pass --pr owner/repo#N")
    )]
    NotPullRequest(String),

    /// GitHub API failure.
    #[error("GitHub error: {0}")]
    #[diagnostic(code(patchwise::github))]
    GitHub(String),

    /// LLM API or response error.
    #[error("LLM error: {0}")]
    #[diagnostic(code(patchwise::llm))]
    Llm(String),

    /// A tool executor failed.
    #[error("tool '{tool}' failed: {message}")]
    #[diagnostic(code(patchwise::tool))]
    Tool {
        /// Name of the failing tool.
        tool: String,
        /// Failure detail.
        message: String,
    },

    /// Tool arguments or structured output did not match the declared schema.
    #[error("validation error: {0}")]
    #[diagnostic(code(patchwise::validation))]
    Validation(String),

    /// Diff or payload parsing failure.
    #[error("parse error: {0}")]
    #[diagnostic(code(patchwise::parse))]
    Parse(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    #[diagnostic(code(patchwise::serialization))]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    #[diagnostic(code(patchwise::toml))]
    Toml(#[from] toml::de::Error),
}

impl PatchwiseError {
    /// Build a [`PatchwiseError::Tool`] for `tool`.
    pub fn tool(tool: &str, message: impl Into<String>) -> Self {
        Self::Tool {
            tool: tool.to_string(),
            message: message.into(),
        }
    }

    /// Returns `true` for errors raised while validating configuration.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::PatchwiseError;
    ///
    /// assert!(PatchwiseError::NotPullRequest("push".into()).is_config());
    /// assert!(!PatchwiseError::Llm("timeout".into()).is_config());
    /// ```
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingApiKey { .. } | Self::NotPullRequest(_)
        )
    }
}
