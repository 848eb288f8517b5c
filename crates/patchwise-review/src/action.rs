//! GitHub Actions runtime glue: event detection and workflow commands.

use std::io::Write;
use std::path::Path;

use patchwise_core::{PatchwiseError, PullRequestRef};
use serde_json::Value;

/// Events that carry a pull request in their payload.
pub const PULL_REQUEST_EVENTS: &[&str] = &[
    "pull_request",
    "pull_request_target",
    "pull_request_review",
    "pull_request_review_comment",
];

const OUTPUT_DELIMITER: &str = "PATCHWISE_EOF";

/// Find the pull request the workflow run was triggered for.
///
/// `lookup` resolves environment variables; production code passes
/// `|k| std::env::var(k).ok()`. Reads `GITHUB_EVENT_NAME`,
/// `GITHUB_REPOSITORY` and the payload at `GITHUB_EVENT_PATH`.
///
/// # Errors
///
/// Returns [`PatchwiseError::NotPullRequest`] for any other event and
/// [`PatchwiseError::Config`] when the runner environment is incomplete.
///
/// # Examples
///
/// ```
/// use patchwise_review::action::detect_pull_request;
///
/// let err = detect_pull_request(|key| match key {
///     "GITHUB_EVENT_NAME" => Some("push".to_string()),
///     _ => None,
/// })
/// .unwrap_err();
/// assert!(err.to_string().contains("not a pull request event"));
/// ```
pub fn detect_pull_request(
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<PullRequestRef, PatchwiseError> {
    let event = lookup("GITHUB_EVENT_NAME").unwrap_or_default();
    if !PULL_REQUEST_EVENTS.contains(&event.as_str()) {
        let shown = if event.is_empty() { "none" } else { event.as_str() };
        return Err(PatchwiseError::NotPullRequest(shown.to_string()));
    }

    let repository = lookup("GITHUB_REPOSITORY")
        .ok_or_else(|| PatchwiseError::Config("GITHUB_REPOSITORY is not set".into()))?;
    let (owner, repo) = repository
        .split_once('/')
        .filter(|(o, r)| !o.is_empty() && !r.is_empty())
        .ok_or_else(|| {
            PatchwiseError::Config(format!("GITHUB_REPOSITORY '{repository}' is not owner/repo"))
        })?;

    let event_path = lookup("GITHUB_EVENT_PATH")
        .ok_or_else(|| PatchwiseError::Config("GITHUB_EVENT_PATH is not set".into()))?;
    let payload: Value = serde_json::from_str(&std::fs::read_to_string(&event_path)?)?;
    let number = payload
        .pointer("/pull_request/number")
        .or_else(|| payload.get("number"))
        .and_then(Value::as_u64)
        .ok_or_else(|| PatchwiseError::NotPullRequest(format!("{event} without pull_request")))?;

    Ok(PullRequestRef::new(owner, repo, number))
}

/// Escape a message for a workflow command.
///
/// # Examples
///
/// ```
/// use patchwise_review::action::escape_data;
///
/// assert_eq!(escape_data("50% done\nnext"), "50%25 done%0Anext");
/// ```
pub fn escape_data(s: &str) -> String {
    s.replace('%', "%25").replace('\r', "%0D").replace('\n', "%0A")
}

/// `::error::` annotation line.
pub fn error_command(message: &str) -> String {
    format!("::error::{}", escape_data(message))
}

/// `::warning::` annotation line.
pub fn warning_command(message: &str) -> String {
    format!("::warning::{}", escape_data(message))
}

/// Append `name=value` to the file at `GITHUB_OUTPUT`, if set.
///
/// # Errors
///
/// Returns [`PatchwiseError::Io`] if the file cannot be written.
pub fn set_output(name: &str, value: &str) -> Result<(), PatchwiseError> {
    match std::env::var_os("GITHUB_OUTPUT") {
        Some(path) => write_output(Path::new(&path), name, value),
        None => Ok(()),
    }
}

/// Append an output using the multi-line delimiter syntax.
///
/// # Errors
///
/// Returns [`PatchwiseError::Io`] if the file cannot be written, or
/// [`PatchwiseError::Validation`] if the value contains the delimiter.
pub fn write_output(path: &Path, name: &str, value: &str) -> Result<(), PatchwiseError> {
    if value.contains(OUTPUT_DELIMITER) {
        return Err(PatchwiseError::Validation(format!(
            "output {name} contains the reserved delimiter"
        )));
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{name}<<{OUTPUT_DELIMITER}\n{value}\n{OUTPUT_DELIMITER}")?;
    Ok(())
}

/// Append markdown to the job summary at `GITHUB_STEP_SUMMARY`, if set.
///
/// # Errors
///
/// Returns [`PatchwiseError::Io`] if the file cannot be written.
pub fn append_step_summary(markdown: &str) -> Result<(), PatchwiseError> {
    let Some(path) = std::env::var_os("GITHUB_STEP_SUMMARY") else {
        return Ok(());
    };
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{markdown}")?;
    Ok(())
}
