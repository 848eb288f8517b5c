//! Tools the model can call during a review.
//!
//! Two repository tools (`get_file_content`, `get_diff_patch`) and up to
//! three knowledge tools (`web_search`, `wikipedia`, `stack_exchange`) are
//! executable. `review_comment` and `reply` are response tools: the model
//! calls them to return structured output and the pipeline reads their
//! arguments instead of executing anything.

pub mod knowledge;
pub mod repo;

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use patchwise_core::PatchwiseError;
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::llm::{ChatMessage, ToolCall, ToolDefinition};

/// Text returned to the model when a tool executor fails.
pub const TOOL_FAILURE_SENTINEL: &str = "NOT_FOUND";

/// Name of the response tool used for inline review comments.
pub const REVIEW_COMMENT_TOOL: &str = "review_comment";

/// Name of the response tool used for thread replies.
pub const REPLY_TOOL: &str = "reply";

/// A callable function exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Name the model uses to call the tool.
    fn name(&self) -> &str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn input_schema(&self) -> Value;

    /// Run the tool with raw model arguments.
    ///
    /// # Errors
    ///
    /// [`PatchwiseError::Validation`] when the arguments do not match the
    /// schema; any other error means the executor failed.
    async fn call(&self, args: Value) -> Result<String, PatchwiseError>;
}

/// A tool with a typed input; implements [`Tool`] through a blanket impl.
///
/// Arguments are validated by deserializing them into `Input`, and the
/// advertised schema is generated from the same type.
#[async_trait]
pub trait TypedTool: Send + Sync {
    /// Argument type.
    type Input: DeserializeOwned + JsonSchema + Send;

    /// Name the model uses to call the tool.
    const NAME: &'static str;

    /// Description shown to the model.
    fn description(&self) -> &str;

    /// Execute with validated input.
    async fn run(&self, input: Self::Input) -> Result<String, PatchwiseError>;
}

#[async_trait]
impl<T: TypedTool> Tool for T {
    fn name(&self) -> &str {
        T::NAME
    }

    fn description(&self) -> &str {
        TypedTool::description(self)
    }

    fn input_schema(&self) -> Value {
        schema_for_input::<T::Input>()
    }

    async fn call(&self, args: Value) -> Result<String, PatchwiseError> {
        let input = parse_arguments::<T::Input>(T::NAME, args)?;
        self.run(input).await
    }
}

/// Generate the JSON Schema advertised for an input type.
///
/// The `$schema` and `title` keys are dropped; providers only need the
/// object shape.
///
/// # Examples
///
/// ```
/// use patchwise_review::tools::{schema_for_input, ReviewCommentArgs};
///
/// let schema = schema_for_input::<ReviewCommentArgs>();
/// assert_eq!(schema["type"], "object");
/// assert!(schema["properties"]["position"].is_object());
/// assert!(schema.get("$schema").is_none());
/// ```
pub fn schema_for_input<I: JsonSchema>() -> Value {
    let mut schema = serde_json::to_value(schemars::schema_for!(I)).unwrap_or_default();
    if let Some(obj) = schema.as_object_mut() {
        obj.remove("$schema");
        obj.remove("title");
    }
    schema
}

/// Deserialize raw model arguments into `I`.
///
/// # Errors
///
/// Returns [`PatchwiseError::Validation`] naming the tool when the
/// arguments do not fit.
///
/// # Examples
///
/// ```
/// use patchwise_review::tools::{parse_arguments, ReviewCommentArgs};
/// use serde_json::json;
///
/// let args = json!({ "comment": "Use a constant", "position": 3 });
/// let parsed: ReviewCommentArgs = parse_arguments("review_comment", args).unwrap();
/// assert_eq!(parsed.position, 3);
///
/// let err = parse_arguments::<ReviewCommentArgs>("review_comment", json!({ "position": -1 }));
/// assert!(err.is_err());
/// ```
pub fn parse_arguments<I: DeserializeOwned>(tool: &str, args: Value) -> Result<I, PatchwiseError> {
    serde_json::from_value(args)
        .map_err(|e| PatchwiseError::Validation(format!("invalid arguments for {tool}: {e}")))
}

/// Parameters for the `review_comment` response tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct ReviewCommentArgs {
    /// Review comment text.
    #[schemars(description = "Review comment in markdown: the problem and a concrete suggestion")]
    pub comment: String,
    /// Diff-position the comment applies to.
    #[schemars(
        description = "Diff position from the left column of the annotated patch, not a source line number"
    )]
    pub position: u32,
}

/// Parameters for the `reply` response tool.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, JsonSchema)]
pub struct ReplyArgs {
    /// Reply text.
    #[schemars(description = "Reply to post on the review thread, in markdown")]
    pub body: String,
}

/// Definition of the `review_comment` response tool.
pub fn review_comment_definition() -> ToolDefinition {
    ToolDefinition {
        name: REVIEW_COMMENT_TOOL.into(),
        description: "Leave one inline review comment on the file under review. \
                      Call once per issue; do not call when the change is fine."
            .into(),
        parameters: schema_for_input::<ReviewCommentArgs>(),
    }
}

/// Definition of the `reply` response tool.
pub fn reply_definition() -> ToolDefinition {
    ToolDefinition {
        name: REPLY_TOOL.into(),
        description: "Post a reply on the review thread. Do not call if no reply is needed.".into(),
        parameters: schema_for_input::<ReplyArgs>(),
    }
}

/// How a tool call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolStatus {
    /// The executor returned a result.
    Ok,
    /// The executor failed; content is the sentinel.
    Failed,
    /// Arguments did not match the tool's schema.
    Invalid,
    /// No tool with that name is registered.
    Unknown,
}

/// Result of dispatching one [`ToolCall`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    /// Id of the originating call.
    pub call_id: String,
    /// Tool name as requested.
    pub name: String,
    /// Text fed back to the model.
    pub content: String,
    /// Outcome classification.
    pub status: ToolStatus,
}

impl ToolOutcome {
    /// Convert into the tool message appended to the conversation.
    pub fn into_message(self) -> ChatMessage {
        ChatMessage::tool_result(self.call_id, self.content)
    }
}

/// Ordered set of executable tools, looked up by name.
///
/// # Examples
///
/// ```
/// use patchwise_review::tools::ToolRegistry;
///
/// let registry = ToolRegistry::new();
/// assert!(registry.is_empty());
/// assert!(registry.definitions().is_empty());
/// ```
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool, replacing any previous tool with the same name.
    pub fn register(&mut self, tool: impl Tool + 'static) {
        let tool: Arc<dyn Tool> = Arc::new(tool);
        match self.tools.iter_mut().find(|t| t.name() == tool.name()) {
            Some(existing) => *existing = tool,
            None => self.tools.push(tool),
        }
    }

    /// Builder form of [`ToolRegistry::register`].
    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(tool);
        self
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.iter().find(|t| t.name() == name)
    }

    /// Registered tool names, in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions to bind to a model call.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .map(|t| ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.input_schema(),
            })
            .collect()
    }

    /// Run a single call. Never fails: every error becomes an outcome.
    pub async fn dispatch(&self, call: &ToolCall) -> ToolOutcome {
        let outcome = |content: String, status| ToolOutcome {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content,
            status,
        };

        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "model requested an unknown tool");
            return outcome(format!("unknown tool '{}'", call.name), ToolStatus::Unknown);
        };

        match tool.call(call.arguments.clone()).await {
            Ok(content) => {
                debug!(tool = %call.name, bytes = content.len(), "tool call succeeded");
                outcome(content, ToolStatus::Ok)
            }
            Err(PatchwiseError::Validation(message)) => {
                warn!(tool = %call.name, "{message}");
                outcome(message, ToolStatus::Invalid)
            }
            Err(e) => {
                warn!(tool = %call.name, error = %e, "tool call failed");
                outcome(TOOL_FAILURE_SENTINEL.to_string(), ToolStatus::Failed)
            }
        }
    }

    /// Run several calls concurrently; outcomes keep the request order.
    pub async fn dispatch_all(&self, calls: &[ToolCall]) -> Vec<ToolOutcome> {
        join_all(calls.iter().map(|call| self.dispatch(call))).await
    }
}
