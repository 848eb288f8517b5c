//! Knowledge tools bound during the knowledge-update step.
//!
//! `web_search` (Tavily) is only offered when an API key is configured;
//! `wikipedia` and `stack_exchange` use public endpoints.

use std::fmt::Write;
use std::time::Duration;

use async_trait::async_trait;
use patchwise_core::{PatchwiseError, ToolsConfig};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ToolRegistry, TypedTool};

const USER_AGENT: &str = concat!("patchwise/", env!("CARGO_PKG_VERSION"), " (pull request reviewer)");

/// Parameters for the knowledge tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct QueryParams {
    /// Search query.
    #[schemars(description = "Search query, e.g. 'tokio 1.40 breaking changes'")]
    pub query: String,
}

/// Build the knowledge tool set from configuration.
///
/// # Errors
///
/// Returns [`PatchwiseError::Tool`] if the HTTP client cannot be built.
///
/// # Examples
///
/// ```
/// use patchwise_core::ToolsConfig;
/// use patchwise_review::tools::knowledge::knowledge_tools;
///
/// let registry = knowledge_tools(&ToolsConfig::default()).unwrap();
/// assert_eq!(registry.names(), vec!["wikipedia", "stack_exchange"]);
///
/// let with_key = ToolsConfig { tavily_api_key: Some("tvly-key".into()), ..ToolsConfig::default() };
/// let registry = knowledge_tools(&with_key).unwrap();
/// assert_eq!(registry.names(), vec!["web_search", "wikipedia", "stack_exchange"]);
/// ```
pub fn knowledge_tools(config: &ToolsConfig) -> Result<ToolRegistry, PatchwiseError> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|e| PatchwiseError::tool("knowledge", format!("failed to create HTTP client: {e}")))?;

    let mut registry = ToolRegistry::new();
    if let Some(key) = config.tavily_api_key.as_deref().filter(|k| !k.trim().is_empty()) {
        registry.register(WebSearch {
            http: http.clone(),
            url: config.web_search_url.clone(),
            api_key: key.to_string(),
            max_results: config.max_results,
        });
    }
    registry.register(Wikipedia {
        http: http.clone(),
        url: config.wikipedia_url.clone(),
        max_results: config.max_results,
    });
    registry.register(StackExchange {
        http,
        url: config.stack_exchange_url.trim_end_matches('/').to_string(),
        max_results: config.max_results,
    });
    Ok(registry)
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    tool: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, PatchwiseError> {
    let response = request
        .send()
        .await
        .map_err(|e| PatchwiseError::tool(tool, format!("request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PatchwiseError::tool(tool, format!("API error {status}: {body}")));
    }
    response
        .json()
        .await
        .map_err(|e| PatchwiseError::tool(tool, format!("failed to parse response: {e}")))
}

/// `web_search`: Tavily search.
pub struct WebSearch {
    http: reqwest::Client,
    url: String,
    api_key: String,
    max_results: usize,
}

#[derive(Serialize)]
struct TavilyRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
}

#[derive(Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Deserialize)]
struct TavilyResult {
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait]
impl TypedTool for WebSearch {
    type Input = QueryParams;
    const NAME: &'static str = "web_search";

    fn description(&self) -> &str {
        "Search the web for current information: release notes, advisories, documentation."
    }

    async fn run(&self, input: QueryParams) -> Result<String, PatchwiseError> {
        let request = self.http.post(&self.url).json(&TavilyRequest {
            api_key: &self.api_key,
            query: &input.query,
            max_results: self.max_results,
            search_depth: "basic",
        });
        let response: TavilyResponse = fetch_json(Self::NAME, request).await?;
        if response.results.is_empty() {
            return Err(PatchwiseError::tool(Self::NAME, "no results"));
        }

        let mut out = String::new();
        for r in response.results.iter().take(self.max_results) {
            let _ = writeln!(out, "## {}\n{}\n\n{}\n", r.title, r.url, r.content.trim());
        }
        Ok(out)
    }
}

/// `wikipedia`: article introductions from the MediaWiki search API.
pub struct Wikipedia {
    http: reqwest::Client,
    url: String,
    max_results: usize,
}

#[derive(Deserialize)]
struct WikiResponse {
    query: Option<WikiQuery>,
}

#[derive(Deserialize)]
struct WikiQuery {
    #[serde(default)]
    pages: Vec<WikiPage>,
}

#[derive(Deserialize)]
struct WikiPage {
    title: String,
    #[serde(default)]
    index: u32,
    #[serde(default)]
    extract: String,
}

#[async_trait]
impl TypedTool for Wikipedia {
    type Input = QueryParams;
    const NAME: &'static str = "wikipedia";

    fn description(&self) -> &str {
        "Look up background on a concept, algorithm, protocol or domain term on Wikipedia."
    }

    async fn run(&self, input: QueryParams) -> Result<String, PatchwiseError> {
        let limit = self.max_results.to_string();
        let request = self.http.get(&self.url).query(&[
            ("action", "query"),
            ("format", "json"),
            ("formatversion", "2"),
            ("generator", "search"),
            ("gsrsearch", input.query.as_str()),
            ("gsrlimit", limit.as_str()),
            ("prop", "extracts"),
            ("exintro", "1"),
            ("explaintext", "1"),
        ]);
        let response: WikiResponse = fetch_json(Self::NAME, request).await?;

        // a search with no hits has no `query` object at all
        let mut pages = response.query.map(|q| q.pages).unwrap_or_default();
        if pages.is_empty() {
            return Err(PatchwiseError::tool(Self::NAME, "no results"));
        }
        pages.sort_by_key(|p| p.index);

        let mut out = String::new();
        for page in pages {
            let _ = writeln!(out, "## {}\n\n{}\n", page.title, page.extract.trim());
        }
        Ok(out)
    }
}

/// `stack_exchange`: question excerpts from Stack Overflow.
pub struct StackExchange {
    http: reqwest::Client,
    url: String,
    max_results: usize,
}

#[derive(Deserialize)]
struct ExcerptResponse {
    #[serde(default)]
    items: Vec<Excerpt>,
}

#[derive(Deserialize)]
struct Excerpt {
    title: String,
    #[serde(default)]
    excerpt: String,
    question_id: u64,
    #[serde(default)]
    is_answered: bool,
}

#[async_trait]
impl TypedTool for StackExchange {
    type Input = QueryParams;
    const NAME: &'static str = "stack_exchange";

    fn description(&self) -> &str {
        "Search Stack Overflow for known pitfalls and accepted solutions."
    }

    async fn run(&self, input: QueryParams) -> Result<String, PatchwiseError> {
        let pagesize = self.max_results.to_string();
        let request = self
            .http
            .get(format!("{}/search/excerpts", self.url))
            .query(&[
                ("order", "desc"),
                ("sort", "relevance"),
                ("q", input.query.as_str()),
                ("site", "stackoverflow"),
                ("pagesize", pagesize.as_str()),
            ]);
        let response: ExcerptResponse = fetch_json(Self::NAME, request).await?;
        if response.items.is_empty() {
            return Err(PatchwiseError::tool(Self::NAME, "no results"));
        }

        let mut out = String::new();
        for item in response.items.iter().take(self.max_results) {
            let answered = if item.is_answered { " (answered)" } else { "" };
            let _ = writeln!(
                out,
                "## {}{answered}\nhttps://stackoverflow.com/q/{}\n\n{}\n",
                strip_markup(&item.title),
                item.question_id,
                strip_markup(item.excerpt.trim())
            );
        }
        Ok(out)
    }
}

/// Remove highlight spans and decode the entities the excerpt API emits.
fn strip_markup(text: &str) -> String {
    text.replace("<span class=\"highlight\">", "")
        .replace("</span>", "")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strip_markup_removes_highlights() {
        let raw = "use <span class=\"highlight\">Arc</span>&lt;Mutex&gt; &amp; &quot;clone&quot;";
        assert_eq!(strip_markup(raw), "use Arc<Mutex> & \"clone\"");
    }

    #[test]
    fn blank_tavily_key_disables_web_search() {
        let config = ToolsConfig {
            tavily_api_key: Some("  ".into()),
            ..ToolsConfig::default()
        };
        let registry = knowledge_tools(&config).unwrap();
        assert!(registry.get("web_search").is_none());
        assert_eq!(registry.len(), 2);
    }
}
