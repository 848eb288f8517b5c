use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::PatchwiseError;
use crate::types::{Provider, RunMode};

/// Top-level configuration loaded from `.patchwise.toml`.
///
/// Supports layered resolution: action inputs / CLI flags > local config > defaults.
/// Call [`PatchwiseConfig::apply_inputs`] to overlay inputs and
/// [`PatchwiseConfig::validate`] before any network call.
///
/// # Examples
///
/// ```
/// use patchwise_core::PatchwiseConfig;
///
/// let config = PatchwiseConfig::default();
/// assert_eq!(config.review.content_limit, 10_000);
/// assert_eq!(config.review.patch_limit, 10_000);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatchwiseConfig {
    /// GitHub connection settings.
    #[serde(default)]
    pub github: GitHubConfig,
    /// LLM provider settings.
    #[serde(default)]
    pub llm: LlmConfig,
    /// Review behavior settings.
    #[serde(default)]
    pub review: ReviewConfig,
    /// External knowledge tool settings.
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl PatchwiseConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`PatchwiseError::Io`] if the file cannot be read, or
    /// [`PatchwiseError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use patchwise_core::PatchwiseConfig;
    /// use std::path::Path;
    ///
    /// let config = PatchwiseConfig::from_file(Path::new(".patchwise.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, PatchwiseError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`PatchwiseError::Toml`] if parsing fails.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::PatchwiseConfig;
    ///
    /// let toml = r#"
    /// [review]
    /// content_limit = 4000
    /// "#;
    /// let config = PatchwiseConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.review.content_limit, 4000);
    /// assert_eq!(config.review.patch_limit, 10_000);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, PatchwiseError> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    /// Overlay action inputs on top of the file configuration.
    ///
    /// Empty or whitespace-only inputs are treated as unset, which is how the
    /// Actions runner passes optional inputs that were not provided. Only the
    /// API key of the selected provider is taken. When `ai_provider` selects a
    /// different provider than the file, the file's `api_key` and `base_url`
    /// are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`PatchwiseError::Config`] if `ai_provider` or `mode` cannot be parsed.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::{ActionInputs, PatchwiseConfig, Provider};
    ///
    /// let inputs = ActionInputs {
    ///     ai_provider: Some("anthropic".into()),
    ///     anthropic_api_key: Some("sk-ant".into()),
    ///     openai_api_key: Some("".into()),
    ///     ..ActionInputs::default()
    /// };
    /// let config = PatchwiseConfig::default().apply_inputs(inputs).unwrap();
    /// assert_eq!(config.llm.provider, Some(Provider::Anthropic));
    /// assert_eq!(config.llm.api_key.as_deref(), Some("sk-ant"));
    /// ```
    pub fn apply_inputs(mut self, inputs: ActionInputs) -> Result<Self, PatchwiseError> {
        if let Some(token) = non_empty(inputs.github_token) {
            self.github.token = Some(token);
        }
        if let Some(provider) = non_empty(inputs.ai_provider) {
            let provider: Provider = provider.parse().map_err(PatchwiseError::Config)?;
            // a file key or endpoint belongs to the file's provider only
            if self.llm.provider != Some(provider) {
                self.llm.api_key = None;
                self.llm.base_url = None;
            }
            self.llm.provider = Some(provider);
        }
        if let Some(model) = non_empty(inputs.ai_provider_model) {
            self.llm.model = Some(model);
        }
        if let Some(context) = non_empty(inputs.project_context) {
            self.review.project_context = Some(context);
        }
        if let Some(mode) = non_empty(inputs.mode) {
            self.review.mode = mode.parse().map_err(PatchwiseError::Config)?;
        }
        if let Some(key) = non_empty(inputs.tavily_api_key) {
            self.tools.tavily_api_key = Some(key);
        }

        let provider_key = match self.llm.provider {
            Some(Provider::OpenAi) => non_empty(inputs.openai_api_key),
            Some(Provider::Anthropic) => non_empty(inputs.anthropic_api_key),
            None => None,
        };
        if let Some(key) = provider_key {
            self.llm.api_key = Some(key);
        }

        Ok(self)
    }

    /// Check that everything needed for a run is present.
    ///
    /// This performs no I/O and must pass before any collaborator is built.
    ///
    /// # Errors
    ///
    /// Returns [`PatchwiseError::Config`] for a missing token, provider, model
    /// or project context, and [`PatchwiseError::MissingApiKey`] when the
    /// selected provider has no key.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::PatchwiseConfig;
    ///
    /// let err = PatchwiseConfig::default().validate().unwrap_err();
    /// assert!(err.is_config());
    /// ```
    pub fn validate(&self) -> Result<(), PatchwiseError> {
        if self.github.token.as_deref().is_none_or(str::is_empty) {
            return Err(PatchwiseError::Config("missing required input github_token".into()));
        }
        let Some(provider) = self.llm.provider else {
            return Err(PatchwiseError::Config("missing required input ai_provider".into()));
        };
        if self.llm.model.as_deref().is_none_or(str::is_empty) {
            return Err(PatchwiseError::Config(
                "missing required input ai_provider_model".into(),
            ));
        }
        if self.llm.api_key.as_deref().is_none_or(str::is_empty) {
            return Err(PatchwiseError::MissingApiKey {
                provider,
                input: provider.api_key_input(),
                env_var: provider.api_key_env(),
            });
        }
        if self.review.project_context.as_deref().is_none_or(str::is_empty) {
            return Err(PatchwiseError::Config(
                "missing required input project_context".into(),
            ));
        }
        if self.review.content_limit == 0 || self.review.patch_limit == 0 {
            return Err(PatchwiseError::Config(
                "content_limit and patch_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Raw action inputs as read from `INPUT_*` variables or CLI flags.
///
/// Every field is optional here; [`PatchwiseConfig::validate`] decides which
/// ones are required.
#[derive(Debug, Clone, Default)]
pub struct ActionInputs {
    /// `github_token` input.
    pub github_token: Option<String>,
    /// `ai_provider` input (`openai` or `anthropic`).
    pub ai_provider: Option<String>,
    /// `ai_provider_model` input.
    pub ai_provider_model: Option<String>,
    /// `project_context` input: business-domain description for the reviewer.
    pub project_context: Option<String>,
    /// `openai_api_key` input.
    pub openai_api_key: Option<String>,
    /// `anthropic_api_key` input.
    pub anthropic_api_key: Option<String>,
    /// `tavily_api_key` input, enables web search.
    pub tavily_api_key: Option<String>,
    /// `mode` input (`review` or `reply`).
    pub mode: Option<String>,
}

/// GitHub connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Token used for all API calls. Never read from or written to TOML.
    #[serde(skip)]
    pub token: Option<String>,
    /// REST API base URL (default: `https://api.github.com`).
    pub api_url: Option<String>,
}

impl GitHubConfig {
    /// API base URL without a trailing slash.
    ///
    /// # Examples
    ///
    /// ```
    /// use patchwise_core::GitHubConfig;
    ///
    /// let config = GitHubConfig {
    ///     api_url: Some("https://ghe.example.com/api/v3/".into()),
    ///     ..GitHubConfig::default()
    /// };
    /// assert_eq!(config.api_url(), "https://ghe.example.com/api/v3");
    /// assert_eq!(GitHubConfig::default().api_url(), "https://api.github.com");
    /// ```
    pub fn api_url(&self) -> &str {
        self.api_url
            .as_deref()
            .map(|u| u.trim_end_matches('/'))
            .unwrap_or("https://api.github.com")
    }
}

/// LLM provider configuration.
///
/// # Examples
///
/// ```
/// use patchwise_core::LlmConfig;
///
/// let config = LlmConfig::default();
/// assert_eq!(config.temperature, 0.1);
/// assert_eq!(config.max_retries, 2);
/// assert!(config.provider.is_none());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider (`"openai"` or `"anthropic"`).
    pub provider: Option<Provider>,
    /// Model identifier.
    pub model: Option<String>,
    /// API key for the provider. Never written back to TOML.
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// Custom base URL for API requests.
    pub base_url: Option<String>,
    /// Sampling temperature (default: 0.1).
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Maximum output tokens per response (default: 4096).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    /// Retries on 429/5xx before a call fails (default: 2).
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Per-request timeout in seconds (default: 120).
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_temperature() -> f64 {
    0.1
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_max_retries() -> u32 {
    2
}

fn default_timeout_secs() -> u64 {
    120
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            api_key: None,
            base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Review behavior configuration.
///
/// # Examples
///
/// ```
/// use patchwise_core::{ReviewConfig, RunMode};
///
/// let config = ReviewConfig::default();
/// assert_eq!(config.mode, RunMode::Review);
/// assert_eq!(config.max_tool_rounds, 3);
/// assert_eq!(config.bot_login, "github-actions[bot]");
/// assert!(!config.request_changes);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewConfig {
    /// Review the whole PR or answer follow-ups on existing threads.
    #[serde(default)]
    pub mode: RunMode,
    /// Business-domain description given to the reviewer.
    pub project_context: Option<String>,
    /// Character budget for file content in prompts (default: 10000).
    #[serde(default = "default_limit")]
    pub content_limit: usize,
    /// Character budget for diff patches in prompts (default: 10000).
    #[serde(default = "default_limit")]
    pub patch_limit: usize,
    /// Tool-calling rounds allowed per file before moving on (default: 3).
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,
    /// Additional glob patterns to skip before sending to the LLM.
    #[serde(default)]
    pub skip_patterns: Vec<String>,
    /// Additional file extensions to skip before sending to the LLM.
    #[serde(default)]
    pub skip_extensions: Vec<String>,
    /// Submit `REQUEST_CHANGES` instead of `COMMENT` when comments exist.
    #[serde(default)]
    pub request_changes: bool,
    /// Submit `APPROVE` when no comments were produced.
    #[serde(default)]
    pub approve_when_clean: bool,
    /// Login the action posts as; used to find threads awaiting a reply.
    #[serde(default = "default_bot_login")]
    pub bot_login: String,
    /// Depth of the folder tree shown to the model (default: 3).
    #[serde(default = "default_tree_depth")]
    pub tree_depth: usize,
    /// Maximum entries in the folder tree (default: 400).
    #[serde(default = "default_tree_max_entries")]
    pub tree_max_entries: usize,
}

fn default_limit() -> usize {
    10_000
}

fn default_max_tool_rounds() -> usize {
    3
}

fn default_bot_login() -> String {
    "github-actions[bot]".into()
}

fn default_tree_depth() -> usize {
    3
}

fn default_tree_max_entries() -> usize {
    400
}

impl Default for ReviewConfig {
    fn default() -> Self {
        Self {
            mode: RunMode::default(),
            project_context: None,
            content_limit: default_limit(),
            patch_limit: default_limit(),
            max_tool_rounds: default_max_tool_rounds(),
            skip_patterns: Vec::new(),
            skip_extensions: Vec::new(),
            request_changes: false,
            approve_when_clean: false,
            bot_login: default_bot_login(),
            tree_depth: default_tree_depth(),
            tree_max_entries: default_tree_max_entries(),
        }
    }
}

/// External knowledge tool configuration.
///
/// # Examples
///
/// ```
/// use patchwise_core::ToolsConfig;
///
/// let config = ToolsConfig::default();
/// assert!(config.tavily_api_key.is_none());
/// assert_eq!(config.max_results, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Tavily key; web search is only offered when set.
    #[serde(skip_serializing)]
    pub tavily_api_key: Option<String>,
    /// Web search endpoint.
    #[serde(default = "default_web_search_url")]
    pub web_search_url: String,
    /// MediaWiki API endpoint.
    #[serde(default = "default_wikipedia_url")]
    pub wikipedia_url: String,
    /// StackExchange API base.
    #[serde(default = "default_stack_exchange_url")]
    pub stack_exchange_url: String,
    /// Results returned per knowledge query (default: 3).
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

fn default_web_search_url() -> String {
    "https://api.tavily.com/search".into()
}

fn default_wikipedia_url() -> String {
    "https://en.wikipedia.org/w/api.php".into()
}

fn default_stack_exchange_url() -> String {
    "https://api.stackexchange.com/2.3".into()
}

fn default_max_results() -> usize {
    3
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            tavily_api_key: None,
            web_search_url: default_web_search_url(),
            wikipedia_url: default_wikipedia_url(),
            stack_exchange_url: default_stack_exchange_url(),
            max_results: default_max_results(),
        }
    }
}
