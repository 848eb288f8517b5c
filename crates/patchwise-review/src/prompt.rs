use std::fmt::Write;

use patchwise_core::{ChangedFile, ExistingReview, ExistingReviewComment, PullRequest};

const SYSTEM_PROMPT: &str = "\
You are Patchwise, an experienced code reviewer working on a GitHub pull request. \
Your job is to find genuine bugs, security issues, and significant problems in the changes, \
and to explain them the way a senior engineer on this team would.

Rules:
- Only comment on issues you are confident about
- Anchor every comment to a diff position from the annotated patch, never a source line number
- Do not speculate about code you cannot see; use the tools to read more when needed
- Do not comment on generated code, vendored code, or changes that are correct
- Keep comments short: the problem, then a concrete suggestion";

const KNOWLEDGE_PROMPT: &str = "\
Before reviewing individual files, fill any gaps in your knowledge that matter for this \
pull request: library and framework versions, recent API changes, security advisories, \
and best practices for the technologies involved. Use the available tools for anything you \
are unsure about. If you already know enough, answer briefly without calling tools.";

/// Truncate `s` to at most `limit` characters.
///
/// Counts characters, not bytes, so multi-byte text is never split. No
/// marker is appended, which makes the operation idempotent.
///
/// # Examples
///
/// ```
/// use patchwise_review::prompt::truncate_chars;
///
/// assert_eq!(truncate_chars("héllo", 2), "hé");
/// assert_eq!(truncate_chars("short", 100), "short");
/// let once = truncate_chars("abcdef", 3);
/// assert_eq!(truncate_chars(&once, 3), once);
/// ```
pub fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((byte_idx, _)) => s[..byte_idx].to_string(),
        None => s.to_string(),
    }
}

/// Truncate a raw patch to at most `limit` characters on a line boundary.
///
/// A patch within the limit is returned whole. Otherwise the cut falls back
/// to the last complete line, so no half-written diff line is ever
/// annotated or anchored to.
///
/// # Examples
///
/// ```
/// use patchwise_review::prompt::truncate_patch;
///
/// let patch = "@@ -1 +1 @@\n-old\n+new";
/// assert_eq!(truncate_patch(patch, 21), patch);
/// assert_eq!(truncate_patch(patch, 19), "@@ -1 +1 @@\n-old\n");
/// ```
pub fn truncate_patch(patch: &str, limit: usize) -> String {
    let cut = truncate_chars(patch, limit);
    if cut.len() == patch.len() {
        return cut;
    }
    match cut.rfind('\n') {
        Some(end) => cut[..=end].to_string(),
        None => String::new(),
    }
}

/// Build the system prompt shared by every step.
///
/// # Examples
///
/// ```
/// use patchwise_review::prompt::build_system_prompt;
///
/// assert!(build_system_prompt().contains("diff position"));
/// ```
pub fn build_system_prompt() -> String {
    SYSTEM_PROMPT.to_string()
}

/// Everything the input-understanding prompt is assembled from.
pub struct InputContext<'a> {
    /// Pull request metadata.
    pub pull_request: &'a PullRequest,
    /// Repository README, when one exists.
    pub readme: Option<&'a str>,
    /// Listing of the checked-out workspace.
    pub folder_tree: &'a str,
    /// Files changed by the pull request.
    pub files: &'a [ChangedFile],
    /// Reviews already submitted.
    pub reviews: &'a [ExistingReview],
    /// Inline comments already present.
    pub comments: &'a [ExistingReviewComment],
    /// Business-domain description from the configuration.
    pub project_context: &'a str,
    /// Character budget for the README.
    pub content_limit: usize,
}

/// Build the prompt asking the model to understand the repository and the PR.
///
/// The model is asked for the framework, the coding style, the intent of
/// the change, and the business-domain context.
pub fn build_input_prompt(ctx: &InputContext<'_>) -> String {
    let pr = ctx.pull_request;
    let mut prompt = String::new();

    let _ = writeln!(prompt, "## Project context\n\n{}\n", ctx.project_context.trim());

    let _ = writeln!(prompt, "## README\n");
    match ctx.readme {
        Some(readme) if !readme.trim().is_empty() => {
            let _ = writeln!(prompt, "{}\n", truncate_chars(readme, ctx.content_limit));
        }
        _ => prompt.push_str("(no README)\n\n"),
    }

    let _ = writeln!(prompt, "## Folder structure\n\n```\n{}```\n", ctx.folder_tree);

    let _ = writeln!(prompt, "## Pull request #{}: {}\n", pr.number, pr.title);
    let _ = writeln!(prompt, "Author: {}", pr.author);
    let _ = writeln!(prompt, "Base branch: {}\n", pr.base_ref);
    if let Some(body) = pr.body.as_deref().filter(|b| !b.trim().is_empty()) {
        let _ = writeln!(prompt, "{}\n", body.trim());
    }

    let _ = writeln!(prompt, "## Changed files\n");
    for file in ctx.files {
        let _ = write!(
            prompt,
            "- {} `{}` (+{}/-{})",
            file.status, file.filename, file.additions, file.deletions
        );
        if let Some(prev) = file.previous_filename.as_deref().filter(|_| file.is_rename()) {
            let _ = write!(prompt, " renamed from `{prev}`");
        }
        prompt.push('\n');
    }
    prompt.push('\n');

    if !ctx.reviews.is_empty() || !ctx.comments.is_empty() {
        let _ = writeln!(prompt, "## Existing review activity\n");
        for review in ctx.reviews {
            let _ = write!(prompt, "- review by {} ({})", review.author, review.state);
            if let Some(body) = review.body.as_deref().filter(|b| !b.trim().is_empty()) {
                let _ = write!(prompt, ": {}", body.trim());
            }
            prompt.push('\n');
        }
        for comment in ctx.comments {
            let _ = writeln!(
                prompt,
                "- {} on `{}`: {}",
                comment.author,
                comment.path,
                comment.body.trim()
            );
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Summarize, in a few short paragraphs:\n\
         1. The framework and main libraries the project uses\n\
         2. The coding style and conventions visible in the repository\n\
         3. What this pull request is trying to achieve\n\
         4. The business domain and what matters most for correctness in it\n",
    );

    prompt
}

/// Build the instruction for the knowledge-update step.
pub fn build_knowledge_prompt() -> String {
    KNOWLEDGE_PROMPT.to_string()
}

/// Build the prompt for reviewing one file.
///
/// `content` is the file at the head commit (`None` when it could not be
/// fetched) and is truncated to `content_limit` here. `annotated_patch` is
/// the patch with its diff-position column, already cut with
/// [`truncate_patch`] before it was annotated.
///
/// # Examples
///
/// ```
/// use patchwise_core::{ChangedFile, FileStatus};
/// use patchwise_review::prompt::build_file_prompt;
///
/// let file = ChangedFile {
///     filename: "src/auth.rs".into(),
///     previous_filename: None,
///     status: FileStatus::Modified,
///     additions: 1,
///     deletions: 0,
///     patch: None,
/// };
/// let prompt = build_file_prompt(&file, None, "   1 | +let x = 1;\n", 100);
/// assert!(prompt.contains("src/auth.rs"));
/// assert!(prompt.contains("content unavailable"));
/// ```
pub fn build_file_prompt(
    file: &ChangedFile,
    content: Option<&str>,
    annotated_patch: &str,
    content_limit: usize,
) -> String {
    let mut prompt = format!("## Review `{}`\n\n", file.filename);
    if let Some(prev) = file.previous_filename.as_deref().filter(|_| file.is_rename()) {
        let _ = writeln!(prompt, "Renamed from `{prev}`.\n");
    }

    prompt.push_str("### File content at head\n\n");
    match content {
        Some(text) => {
            let _ = writeln!(prompt, "```\n{}\n```\n", truncate_chars(text, content_limit));
        }
        None => prompt.push_str("(content unavailable)\n\n"),
    }

    let _ = writeln!(
        prompt,
        "### Patch\n\nThe left column is the diff position.\n\n```diff\n{annotated_patch}```\n"
    );

    prompt.push_str(
        "Call `review_comment` once for every issue worth raising, using the diff position \
         from the left column. If the changes in this file are fine, reply briefly without \
         calling it. You may call `get_file_content` or `get_diff_patch` to look at related \
         files first.",
    );
    prompt
}

/// Build the prompt asking for a reply on an existing review thread.
///
/// `thread` is ordered oldest first.
pub fn build_reply_prompt(thread: &[ExistingReviewComment], bot_login: &str) -> String {
    let mut prompt = String::new();
    if let Some(first) = thread.first() {
        let _ = writeln!(prompt, "## Review thread on `{}`\n", first.path);
    }
    for comment in thread {
        let who = if comment.author == bot_login {
            "you".to_string()
        } else {
            comment.author.clone()
        };
        let _ = writeln!(prompt, "**{who}**: {}\n", comment.body.trim());
    }
    prompt.push_str(
        "Someone answered your review comment. If a reply is useful (a clarification, an \
         acknowledgement that the concern is resolved, or a corrected suggestion), call \
         `reply` with it. Otherwise answer without calling the tool.",
    );
    prompt
}

/// Body of the submitted review.
///
/// # Examples
///
/// ```
/// use patchwise_review::prompt::review_body;
///
/// assert!(review_body(0, 2, 1).contains("No issues found"));
/// assert!(review_body(3, 2, 0).contains("3 comments"));
/// ```
pub fn review_body(comments: usize, files_reviewed: usize, files_skipped: usize) -> String {
    let mut body = String::from("## Patchwise review\n\n");
    if comments == 0 {
        body.push_str("No issues found in the reviewed changes.\n\n");
    } else {
        let plural = if comments == 1 { "" } else { "s" };
        let _ = writeln!(body, "Left {comments} comment{plural} on the changes.\n");
    }
    let _ = writeln!(
        body,
        "Files reviewed: {files_reviewed}, skipped: {files_skipped}"
    );
    body
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use patchwise_core::FileStatus;

    use super::*;

    fn pull_request() -> PullRequest {
        PullRequest {
            number: 7,
            title: "Add refund endpoint".into(),
            body: Some("Adds POST /refunds".into()),
            author: "alice".into(),
            head_sha: "abc".into(),
            base_sha: "def".into(),
            base_ref: "main".into(),
        }
    }

    fn file(name: &str) -> ChangedFile {
        ChangedFile {
            filename: name.into(),
            previous_filename: None,
            status: FileStatus::Modified,
            additions: 4,
            deletions: 1,
            patch: Some("@@ -1 +1 @@\n-a\n+b".into()),
        }
    }

    fn comment(id: u64, author: &str, body: &str) -> ExistingReviewComment {
        ExistingReviewComment {
            id,
            in_reply_to_id: None,
            author: author.into(),
            path: "src/refund.rs".into(),
            position: Some(2),
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn truncate_counts_characters() {
        let s = "日本語テキスト";
        assert_eq!(truncate_chars(s, 3), "日本語");
        assert_eq!(truncate_chars(s, 0), "");
        assert_eq!(truncate_chars("", 5), "");
    }

    #[test]
    fn truncate_is_idempotent() {
        let long = "x".repeat(50);
        for input in ["", "a", "hello world", "ünïcödé strïng", long.as_str()] {
            for limit in [0, 1, 5, 10, 100] {
                let once = truncate_chars(input, limit);
                assert_eq!(truncate_chars(&once, limit), once);
                assert!(once.chars().count() <= limit);
            }
        }
    }

    #[test]
    fn input_prompt_includes_all_sections() {
        let pr = pull_request();
        let files = vec![file("src/refund.rs")];
        let comments = vec![comment(1, "bob", "Is this idempotent?")];
        let prompt = build_input_prompt(&InputContext {
            pull_request: &pr,
            readme: Some("# Payments"),
            folder_tree: "src/\n  refund.rs\n",
            files: &files,
            reviews: &[],
            comments: &comments,
            project_context: "Card payments for small merchants",
            content_limit: 1000,
        });
        assert!(prompt.contains("Card payments for small merchants"));
        assert!(prompt.contains("# Payments"));
        assert!(prompt.contains("refund.rs"));
        assert!(prompt.contains("#7: Add refund endpoint"));
        assert!(prompt.contains("modified `src/refund.rs` (+4/-1)"));
        assert!(prompt.contains("Is this idempotent?"));
        assert!(prompt.contains("business domain"));
    }

    #[test]
    fn input_prompt_truncates_readme() {
        let pr = pull_request();
        let readme = "r".repeat(500);
        let prompt = build_input_prompt(&InputContext {
            pull_request: &pr,
            readme: Some(&readme),
            folder_tree: "",
            files: &[],
            reviews: &[],
            comments: &[],
            project_context: "ctx",
            content_limit: 10,
        });
        assert!(prompt.contains(&"r".repeat(10)));
        assert!(!prompt.contains(&"r".repeat(11)));
    }

    #[test]
    fn file_prompt_mentions_rename_and_truncates() {
        let mut f = file("src/new.rs");
        f.previous_filename = Some("src/old.rs".into());
        f.status = FileStatus::Renamed;
        let content = "c".repeat(100);
        let prompt = build_file_prompt(&f, Some(&content), "   1 | +x\n", 20);
        assert!(prompt.contains("Renamed from `src/old.rs`"));
        assert!(prompt.contains(&"c".repeat(20)));
        assert!(!prompt.contains(&"c".repeat(21)));
        assert!(prompt.contains("   1 | +x\n```"));
    }

    #[test]
    fn patch_at_exact_limit_is_kept_whole() {
        let patch = "@@ -1 +1 @@\n-old\n+new";
        assert_eq!(patch.chars().count(), 21);
        assert_eq!(truncate_patch(patch, 21), patch);
        assert_eq!(truncate_patch(patch, 100), patch);
    }

    #[test]
    fn patch_truncation_drops_partial_line() {
        let patch = "@@ -1,2 +1,2 @@\n-old one\n+new one\n context";
        assert_eq!(truncate_patch(patch, 30), "@@ -1,2 +1,2 @@\n-old one\n");
        assert_eq!(truncate_patch(patch, 5), "");
        for limit in [0, 5, 16, 25, 30, 40] {
            let cut = truncate_patch(patch, limit);
            assert!(cut.chars().count() <= limit);
            assert!(cut.is_empty() || cut.ends_with('\n'));
        }
    }

    #[test]
    fn reply_prompt_marks_bot_comments() {
        let thread = vec![
            comment(1, "github-actions[bot]", "Missing error handling"),
            comment(2, "alice", "Handled by the caller"),
        ];
        let prompt = build_reply_prompt(&thread, "github-actions[bot]");
        assert!(prompt.contains("**you**: Missing error handling"));
        assert!(prompt.contains("**alice**: Handled by the caller"));
        assert!(prompt.contains("`reply`"));
    }

    #[test]
    fn review_body_pluralizes() {
        assert!(review_body(1, 1, 0).contains("1 comment on"));
        assert!(review_body(2, 1, 0).contains("2 comments on"));
    }
}
