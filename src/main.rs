use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Parser;
use miette::{Diagnostic, IntoDiagnostic, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use patchwise_core::{ActionInputs, PatchwiseConfig, PatchwiseError, PullRequestRef};
use patchwise_review::action;
use patchwise_review::github::{parse_pr_reference, GitHubClient, ReviewSubmitter, StdoutSubmitter};
use patchwise_review::llm::{ChatModel, LlmClient};
use patchwise_review::pipeline::{ReviewAgent, RunReport};
use patchwise_review::tools::knowledge::knowledge_tools;
use patchwise_review::tree::TreeOptions;

#[derive(Parser)]
#[command(
    name = "patchwise",
    version,
    about = "LLM pull request reviewer for GitHub Actions",
    long_about = "Reviews the pull request that triggered the workflow and posts inline comments.\n\n\
                   Every input can be passed as a flag or through the INPUT_* variables the\n\
                   Actions runner sets.\n\n\
                   Examples:\n  \
                     patchwise                                  Run inside a pull_request workflow\n  \
                     patchwise --pr owner/repo#12 --dry-run     Review locally, print instead of posting\n  \
                     patchwise --pr owner/repo#12 --mode reply  Answer open review threads"
)]
struct Cli {
    /// Token used for GitHub API calls (falls back to GITHUB_TOKEN)
    #[arg(long, env = "INPUT_GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Model provider: openai or anthropic
    #[arg(long, env = "INPUT_AI_PROVIDER")]
    ai_provider: Option<String>,

    /// Model identifier, e.g. gpt-4o or claude-sonnet-4-5
    #[arg(long, env = "INPUT_AI_PROVIDER_MODEL")]
    ai_provider_model: Option<String>,

    /// Business-domain description handed to the reviewer
    #[arg(long, env = "INPUT_PROJECT_CONTEXT")]
    project_context: Option<String>,

    /// OpenAI API key (falls back to OPENAI_API_KEY)
    #[arg(long, env = "INPUT_OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// Anthropic API key (falls back to ANTHROPIC_API_KEY)
    #[arg(long, env = "INPUT_ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Tavily API key; enables the web_search tool
    #[arg(long, env = "INPUT_TAVILY_API_KEY", hide_env_values = true)]
    tavily_api_key: Option<String>,

    /// review (whole pull request) or reply (answer open threads)
    #[arg(long, env = "INPUT_MODE")]
    mode: Option<String>,

    /// Path to configuration file (default: .patchwise.toml)
    #[arg(long, env = "INPUT_CONFIG")]
    config: Option<PathBuf>,

    /// Review this pull request instead of the one in the event payload
    #[arg(long, value_name = "OWNER/REPO#N")]
    pr: Option<String>,

    /// Print the review instead of posting it
    #[arg(long)]
    dry_run: bool,

    /// Enable debug logging
    #[arg(long, short)]
    verbose: bool,
}

impl Cli {
    fn inputs(&self) -> ActionInputs {
        ActionInputs {
            github_token: non_blank(self.github_token.clone()).or_else(|| env("GITHUB_TOKEN")),
            ai_provider: self.ai_provider.clone(),
            ai_provider_model: self.ai_provider_model.clone(),
            project_context: self.project_context.clone(),
            openai_api_key: non_blank(self.openai_api_key.clone())
                .or_else(|| env("OPENAI_API_KEY")),
            anthropic_api_key: non_blank(self.anthropic_api_key.clone())
                .or_else(|| env("ANTHROPIC_API_KEY")),
            tavily_api_key: self.tavily_api_key.clone(),
            mode: self.mode.clone(),
        }
    }
}

fn env(key: &str) -> Option<String> {
    non_blank(std::env::var(key).ok())
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(false)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(&cli).await {
        Ok(report) => {
            info!("{report}");
            Ok(())
        }
        Err(err) => {
            // one annotation for the run; miette renders the details to stderr
            println!("{}", action::error_command(&annotation(&err)));
            Err(err.into())
        }
    }
}

fn init_tracing(verbose: bool) {
    let debug = verbose || std::env::var("RUNNER_DEBUG").is_ok_and(|v| v == "1");
    let default = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn annotation(err: &PatchwiseError) -> String {
    match err.help() {
        Some(help) => format!("{err}\nhelp: {help}"),
        None => err.to_string(),
    }
}

fn load_config(cli: &Cli) -> Result<PatchwiseConfig, PatchwiseError> {
    // the runner passes unset inputs as empty strings
    let explicit = cli.config.as_ref().filter(|p| !p.as_os_str().is_empty());
    let config = match explicit {
        Some(path) => PatchwiseConfig::from_file(path)?,
        None => {
            let default_path = Path::new(".patchwise.toml");
            if default_path.exists() {
                PatchwiseConfig::from_file(default_path)?
            } else {
                PatchwiseConfig::default()
            }
        }
    };
    let mut config = config.apply_inputs(cli.inputs())?;
    if config.github.api_url.is_none() {
        config.github.api_url = env("GITHUB_API_URL");
    }
    config.validate()?;
    Ok(config)
}

fn resolve_pull_request(cli: &Cli) -> Result<PullRequestRef, PatchwiseError> {
    match cli.pr.as_deref() {
        Some(pr) => parse_pr_reference(pr),
        None => action::detect_pull_request(|key| std::env::var(key).ok()),
    }
}

async fn run(cli: &Cli) -> Result<RunReport, PatchwiseError> {
    let config = load_config(cli)?;
    let pr = resolve_pull_request(cli)?;

    let workspace = match env("GITHUB_WORKSPACE") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    let tree = TreeOptions {
        max_depth: config.review.tree_depth,
        max_entries: config.review.tree_max_entries,
    };
    // validate() guarantees the token is present
    let token = config.github.token.clone().unwrap_or_default();

    let model: Arc<dyn ChatModel> = Arc::new(LlmClient::new(&config.llm)?);
    let github = Arc::new(GitHubClient::new(
        pr.clone(),
        &token,
        config.github.api_url(),
        workspace,
        tree,
    )?);
    let submitter: Arc<dyn ReviewSubmitter> = if cli.dry_run {
        Arc::new(StdoutSubmitter)
    } else {
        github.clone()
    };
    let knowledge = knowledge_tools(&config.tools)?;

    info!(
        %pr,
        mode = %config.review.mode,
        model = model.model(),
        dry_run = cli.dry_run,
        tools = ?knowledge.names(),
        "starting review"
    );

    let agent = ReviewAgent::new(model, github, submitter, knowledge, config.review);
    let report = agent.run().await?;

    publish(&report);
    Ok(report)
}

/// Write action outputs and the job summary. Failures here are not fatal.
fn publish(report: &RunReport) {
    let event = report
        .event
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_default();
    let outputs = [
        ("comments", report.comments.len().to_string()),
        ("event", event),
    ];
    for (name, value) in outputs {
        if let Err(e) = action::set_output(name, &value) {
            println!("{}", action::warning_command(&format!("failed to set output {name}: {e}")));
        }
    }
    if let Err(e) = action::append_step_summary(&report.to_markdown()) {
        warn!("failed to write step summary: {e}");
    }
}
