use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use patchwise_core::{
    ChangedFile, ExistingReviewComment, PatchwiseError, PullRequest, ReviewComment, ReviewConfig,
    ReviewEvent, RunMode, ThreadReply,
};
use patchwise_difflens::filter::FileFilter;
use patchwise_difflens::parser::{parse_patch, FilePatch};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::github::{ContextProvider, ReviewSubmission, ReviewSubmitter};
use crate::llm::{ChatMessage, ChatModel, ToolCall, ToolDefinition};
use crate::prompt::{self, InputContext};
use crate::state::{ConversationState, StateDelta};
use crate::tools::repo::{GetDiffPatch, GetFileContent};
use crate::tools::{
    parse_arguments, reply_definition, review_comment_definition, ReplyArgs, ReviewCommentArgs,
    ToolRegistry, REPLY_TOOL, REVIEW_COMMENT_TOOL,
};

/// A step of the review pipeline.
///
/// Review mode runs `InputUnderstanding → KnowledgeUpdate → ReviewGeneration
/// → Submit → Done`; reply mode swaps `ReviewGeneration` for
/// `ReplyGeneration`. An error in any step ends the run.
///
/// # Examples
///
/// ```
/// use patchwise_core::RunMode;
/// use patchwise_review::pipeline::Stage;
///
/// let mut stage = Stage::InputUnderstanding;
/// let mut visited = vec![stage];
/// while stage != Stage::Done {
///     stage = stage.next(RunMode::Reply);
///     visited.push(stage);
/// }
/// assert_eq!(visited[2], Stage::ReplyGeneration);
/// assert_eq!(visited.len(), 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Stage {
    /// Gather repository and PR context and let the model summarize it.
    InputUnderstanding,
    /// Let the model consult the knowledge tools.
    KnowledgeUpdate,
    /// Review each changed file.
    ReviewGeneration,
    /// Answer open review threads.
    ReplyGeneration,
    /// Post the review or the replies.
    Submit,
    /// Terminal state.
    Done,
}

impl Stage {
    /// The step that follows this one in `mode`.
    pub fn next(self, mode: RunMode) -> Stage {
        match self {
            Stage::InputUnderstanding => Stage::KnowledgeUpdate,
            Stage::KnowledgeUpdate => match mode {
                RunMode::Review => Stage::ReviewGeneration,
                RunMode::Reply => Stage::ReplyGeneration,
            },
            Stage::ReviewGeneration | Stage::ReplyGeneration => Stage::Submit,
            Stage::Submit | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::InputUnderstanding => "input-understanding",
            Stage::KnowledgeUpdate => "knowledge-update",
            Stage::ReviewGeneration => "review-generation",
            Stage::ReplyGeneration => "reply-generation",
            Stage::Submit => "submit",
            Stage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Choose the review event for a finished review.
///
/// # Examples
///
/// ```
/// use patchwise_core::{ReviewConfig, ReviewEvent};
/// use patchwise_review::pipeline::decide_event;
///
/// let config = ReviewConfig::default();
/// assert_eq!(decide_event(2, &config), ReviewEvent::Comment);
/// assert_eq!(decide_event(0, &config), ReviewEvent::Comment);
///
/// let strict = ReviewConfig { request_changes: true, approve_when_clean: true, ..config };
/// assert_eq!(decide_event(2, &strict), ReviewEvent::RequestChanges);
/// assert_eq!(decide_event(0, &strict), ReviewEvent::Approve);
/// ```
pub fn decide_event(comment_count: usize, config: &ReviewConfig) -> ReviewEvent {
    match (comment_count, config.request_changes, config.approve_when_clean) {
        (0, _, true) => ReviewEvent::Approve,
        (0, _, false) => ReviewEvent::Comment,
        (_, true, _) => ReviewEvent::RequestChanges,
        (_, false, _) => ReviewEvent::Comment,
    }
}

/// A changed file that never reached the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkippedFile {
    /// File path.
    pub path: String,
    /// Why it was skipped.
    pub reason: String,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    /// Mode the run executed in.
    pub mode: RunMode,
    /// Model identifier.
    pub model: String,
    /// Files sent to the model.
    pub files_reviewed: usize,
    /// Files filtered out before any model call.
    pub files_skipped: Vec<SkippedFile>,
    /// `review_comment` calls dropped for a bad position or malformed arguments.
    pub dropped_comments: usize,
    /// Comments submitted.
    pub comments: Vec<ReviewComment>,
    /// Replies posted.
    pub replies: Vec<ThreadReply>,
    /// Event of the submitted review; `None` in reply mode.
    pub event: Option<ReviewEvent>,
}

impl RunReport {
    fn new(mode: RunMode, model: &str) -> Self {
        Self {
            mode,
            model: model.to_string(),
            files_reviewed: 0,
            files_skipped: Vec::new(),
            dropped_comments: 0,
            comments: Vec::new(),
            replies: Vec::new(),
            event: None,
        }
    }

    /// Render the report as markdown, for the job summary.
    pub fn to_markdown(&self) -> String {
        let mut out = String::from("# Patchwise\n\n");
        out.push_str(&format!(
            "**Mode:** {} | **Model:** {} | **Files reviewed:** {} | **Skipped:** {}\n\n",
            self.mode,
            self.model,
            self.files_reviewed,
            self.files_skipped.len()
        ));
        match self.mode {
            RunMode::Review => {
                if let Some(event) = self.event {
                    out.push_str(&format!("**Event:** {event}\n\n"));
                }
                if self.comments.is_empty() {
                    out.push_str("No issues found.\n");
                } else {
                    out.push_str("| File | Position | Comment |\n|---|---|---|\n");
                    for c in &self.comments {
                        let first_line = c.body.lines().next().unwrap_or_default();
                        out.push_str(&format!(
                            "| `{}` | {} | {} |\n",
                            c.path,
                            c.position,
                            first_line.replace('|', "\\|")
                        ));
                    }
                }
            }
            RunMode::Reply => {
                out.push_str(&format!("Posted {} replies.\n", self.replies.len()));
            }
        }
        if !self.files_skipped.is_empty() {
            out.push_str("\n<details><summary>Skipped files</summary>\n\n");
            for s in &self.files_skipped {
                out.push_str(&format!("- `{}`: {}\n", s.path, s.reason));
            }
            out.push_str("\n</details>\n");
        }
        out
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} run: {} files reviewed, {} skipped, {} comments, {} replies",
            self.mode,
            self.files_reviewed,
            self.files_skipped.len(),
            self.comments.len(),
            self.replies.len()
        )?;
        if let Some(event) = self.event {
            write!(f, ", event {event}")?;
        }
        Ok(())
    }
}

/// Pull request data gathered during input understanding.
struct Gathered {
    pull_request: PullRequest,
    files: Arc<Vec<ChangedFile>>,
    comments: Vec<ExistingReviewComment>,
}

/// What one file's review produced.
struct FileReview {
    comments: Vec<ReviewComment>,
    invalid: usize,
}

/// Drives a run through the [`Stage`] machine.
///
/// Collaborators are built once by the caller and shared by every step.
pub struct ReviewAgent {
    model: Arc<dyn ChatModel>,
    context: Arc<dyn ContextProvider>,
    submitter: Arc<dyn ReviewSubmitter>,
    knowledge: ToolRegistry,
    config: ReviewConfig,
}

impl ReviewAgent {
    /// Create an agent from its collaborators.
    pub fn new(
        model: Arc<dyn ChatModel>,
        context: Arc<dyn ContextProvider>,
        submitter: Arc<dyn ReviewSubmitter>,
        knowledge: ToolRegistry,
        config: ReviewConfig,
    ) -> Self {
        Self {
            model,
            context,
            submitter,
            knowledge,
            config,
        }
    }

    /// Run every step and submit the result.
    ///
    /// # Errors
    ///
    /// Any model or GitHub failure aborts the run and nothing further is
    /// submitted. Returns [`PatchwiseError::Validation`] when every reviewed
    /// file produced only malformed or out-of-range comments.
    pub async fn run(&self) -> Result<RunReport, PatchwiseError> {
        let mode = self.config.mode;
        let mut report = RunReport::new(mode, self.model.model());
        let mut state = ConversationState::default();
        let mut gathered: Option<Gathered> = None;
        let mut stage = Stage::InputUnderstanding;

        while stage != Stage::Done {
            info!(%stage, "starting step");
            let delta = match stage {
                Stage::InputUnderstanding => {
                    let (delta, data) = self.understand_input().await?;
                    gathered = Some(data);
                    delta
                }
                Stage::KnowledgeUpdate => self.update_knowledge(&state).await?,
                Stage::ReviewGeneration => {
                    self.generate_review(&state, require(&gathered)?, &mut report)
                        .await?
                }
                Stage::ReplyGeneration => {
                    self.generate_replies(&state, require(&gathered)?).await?
                }
                Stage::Submit => {
                    self.submit(&state, require(&gathered)?, &mut report).await?;
                    StateDelta::default()
                }
                Stage::Done => break,
            };
            debug!(
                %stage,
                messages = delta.messages.len(),
                comments = delta.comments.len(),
                replies = delta.replies.len(),
                "step finished"
            );
            state = state.apply(delta);
            stage = stage.next(mode);
        }

        info!("{report}");
        Ok(report)
    }

    async fn understand_input(&self) -> Result<(StateDelta, Gathered), PatchwiseError> {
        let pull_request = self.context.pull_request().await?;
        let files = self.context.changed_files().await?;
        let readme = self.context.readme().await?;
        let folder_tree = self.context.folder_tree().await?;
        let reviews = self.context.reviews().await?;
        let comments = self.context.review_comments().await?;
        info!(
            pr = pull_request.number,
            files = files.len(),
            reviews = reviews.len(),
            comments = comments.len(),
            "gathered pull request context"
        );

        let prompt = prompt::build_input_prompt(&InputContext {
            pull_request: &pull_request,
            readme: readme.as_deref(),
            folder_tree: &folder_tree,
            files: &files,
            reviews: &reviews,
            comments: &comments,
            project_context: self.config.project_context.as_deref().unwrap_or_default(),
            content_limit: self.config.content_limit,
        });

        let messages = vec![
            ChatMessage::system(prompt::build_system_prompt()),
            ChatMessage::user(prompt),
        ];
        let response = self.model.invoke(&messages, &[]).await?;

        let mut delta = messages;
        delta.push(response);
        Ok((
            StateDelta::messages(delta),
            Gathered {
                pull_request,
                files: Arc::new(files),
                comments,
            },
        ))
    }

    async fn update_knowledge(&self, state: &ConversationState) -> Result<StateDelta, PatchwiseError> {
        let instruction = ChatMessage::user(prompt::build_knowledge_prompt());
        let mut messages = state.messages().to_vec();
        messages.push(instruction.clone());

        let definitions = self.knowledge.definitions();
        let response = self
            .model
            .invoke(&messages, &definitions)
            .await?;

        let outcomes = self.knowledge.dispatch_all(&response.tool_calls).await;
        info!(
            tools = ?self.knowledge.names(),
            calls = outcomes.len(),
            "knowledge update finished"
        );

        let mut delta = vec![instruction, response];
        delta.extend(outcomes.into_iter().map(|o| o.into_message()));
        Ok(StateDelta::messages(delta))
    }

    async fn generate_review(
        &self,
        state: &ConversationState,
        gathered: &Gathered,
        report: &mut RunReport,
    ) -> Result<StateDelta, PatchwiseError> {
        let head_sha = &gathered.pull_request.head_sha;
        let filter = FileFilter::from_config(&self.config);
        let repo_tools = ToolRegistry::new()
            .with(GetFileContent::new(
                self.context.clone(),
                head_sha.clone(),
                self.config.content_limit,
            ))
            .with(GetDiffPatch::new(
                gathered.files.clone(),
                self.config.patch_limit,
            ));

        let mut comments = Vec::new();
        let mut reviews = Vec::new();

        for file in gathered.files.iter() {
            if let Some(reason) = filter.check(file) {
                info!(file = %file.filename, %reason, "skipping file");
                report.files_skipped.push(SkippedFile {
                    path: file.filename.clone(),
                    reason: reason.to_string(),
                });
                continue;
            }
            // cut the raw patch so the annotated listing and the position check agree
            let raw = file
                .patch
                .as_deref()
                .map(|p| prompt::truncate_patch(p, self.config.patch_limit));
            let patch = match raw.as_deref().map(parse_patch) {
                Some(Ok(patch)) => patch,
                Some(Err(e)) => {
                    warn!(file = %file.filename, error = %e, "skipping file with unparseable patch");
                    report.files_skipped.push(SkippedFile {
                        path: file.filename.clone(),
                        reason: "unparseable patch".into(),
                    });
                    continue;
                }
                None => continue,
            };

            let content = match self.context.file_content(&file.filename, head_sha).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(file = %file.filename, error = %e, "file content unavailable");
                    None
                }
            };

            let prompt = prompt::build_file_prompt(
                file,
                content.as_deref(),
                &patch.annotated(),
                self.config.content_limit,
            );
            let review = self
                .review_file(state.messages(), file, &patch, prompt, &repo_tools)
                .await?;
            info!(
                file = %file.filename,
                comments = review.comments.len(),
                dropped = review.invalid,
                "file reviewed"
            );
            report.files_reviewed += 1;
            report.dropped_comments += review.invalid;
            comments.extend(review.comments.iter().cloned());
            reviews.push(review);
        }

        let all_invalid =
            !reviews.is_empty() && reviews.iter().all(|r| r.comments.is_empty() && r.invalid > 0);
        if all_invalid {
            return Err(PatchwiseError::Validation(format!(
                "model returned only invalid review comments for all {} reviewed files",
                reviews.len()
            )));
        }

        let summary = ChatMessage::assistant(format!(
            "Reviewed {} files ({} skipped) and left {} comments.",
            report.files_reviewed,
            report.files_skipped.len(),
            comments.len()
        ));
        Ok(StateDelta {
            messages: vec![summary],
            comments,
            replies: Vec::new(),
        })
    }

    /// Review one file, letting the model call repository tools for up to
    /// `max_tool_rounds` rounds before it must answer.
    async fn review_file(
        &self,
        history: &[ChatMessage],
        file: &ChangedFile,
        patch: &FilePatch,
        prompt: String,
        repo_tools: &ToolRegistry,
    ) -> Result<FileReview, PatchwiseError> {
        let mut with_tools = repo_tools.definitions();
        with_tools.push(review_comment_definition());
        let final_round = vec![review_comment_definition()];

        // per-file exchanges stay local; only the resulting comments reach the shared state
        let mut messages = history.to_vec();
        messages.push(ChatMessage::user(prompt));

        let mut review = FileReview {
            comments: Vec::new(),
            invalid: 0,
        };

        for round in 0..=self.config.max_tool_rounds {
            let tools: &[ToolDefinition] = if round < self.config.max_tool_rounds {
                &with_tools
            } else {
                &final_round
            };
            let response = self.model.invoke(&messages, tools).await?;

            let (answers, lookups): (Vec<&ToolCall>, Vec<&ToolCall>) = response
                .tool_calls
                .iter()
                .partition(|c| c.name == REVIEW_COMMENT_TOOL);

            for call in &answers {
                match validate_comment(call, file, patch) {
                    Ok(comment) if review.comments.contains(&comment) => {}
                    Ok(comment) => review.comments.push(comment),
                    Err(e) => {
                        warn!(file = %file.filename, error = %e, "dropping review comment");
                        review.invalid += 1;
                    }
                }
            }

            if !answers.is_empty() {
                if !lookups.is_empty() {
                    debug!(
                        file = %file.filename,
                        ignored = lookups.len(),
                        "ignoring tool calls sent alongside review comments"
                    );
                }
                break;
            }
            if lookups.is_empty() {
                break;
            }

            debug!(file = %file.filename, round, calls = lookups.len(), "running repository tools");
            let mut outcomes = Vec::with_capacity(lookups.len());
            for call in lookups {
                outcomes.push(repo_tools.dispatch(call).await);
            }
            messages.push(response.clone());
            messages.extend(outcomes.into_iter().map(|o| o.into_message()));
        }

        Ok(review)
    }

    async fn generate_replies(
        &self,
        state: &ConversationState,
        gathered: &Gathered,
    ) -> Result<StateDelta, PatchwiseError> {
        let bot = self.config.bot_login.as_str();
        let threads = threads_awaiting_reply(&gathered.comments, bot);
        info!(threads = threads.len(), "threads awaiting a reply");

        let tools = [reply_definition()];
        let mut replies = Vec::new();
        for (thread_id, thread) in threads {
            let mut messages = state.messages().to_vec();
            messages.push(ChatMessage::user(prompt::build_reply_prompt(&thread, bot)));
            let response = self
                .model
                .invoke(&messages, &tools)
                .await?;

            let reply = response
                .tool_calls
                .iter()
                .filter(|c| c.name == REPLY_TOOL)
                .find_map(|c| match parse_arguments::<ReplyArgs>(REPLY_TOOL, c.arguments.clone()) {
                    Ok(args) if !args.body.trim().is_empty() => Some(args.body),
                    Ok(_) => None,
                    Err(e) => {
                        warn!(thread_id, error = %e, "dropping reply");
                        None
                    }
                });
            match reply {
                Some(body) => replies.push(ThreadReply {
                    comment_id: thread_id,
                    body,
                }),
                None => debug!(thread_id, "model declined to reply"),
            }
        }

        let summary = ChatMessage::assistant(format!("Prepared {} thread replies.", replies.len()));
        Ok(StateDelta {
            messages: vec![summary],
            comments: Vec::new(),
            replies,
        })
    }

    async fn submit(
        &self,
        state: &ConversationState,
        gathered: &Gathered,
        report: &mut RunReport,
    ) -> Result<(), PatchwiseError> {
        match self.config.mode {
            RunMode::Review => {
                let comments = state.comments().to_vec();
                let event = decide_event(comments.len(), &self.config);
                let body = prompt::review_body(
                    comments.len(),
                    report.files_reviewed,
                    report.files_skipped.len(),
                );
                let submission = ReviewSubmission {
                    commit_id: gathered.pull_request.head_sha.clone(),
                    body,
                    event,
                    comments,
                };
                self.submitter.submit_review(&submission).await?;
                report.event = Some(event);
                report.comments = submission.comments;
            }
            RunMode::Reply => {
                for reply in state.replies() {
                    self.submitter
                        .reply_to_comment(reply.comment_id, &reply.body)
                        .await?;
                }
                report.replies = state.replies().to_vec();
            }
        }
        Ok(())
    }
}

fn require(gathered: &Option<Gathered>) -> Result<&Gathered, PatchwiseError> {
    gathered.as_ref().ok_or_else(|| {
        PatchwiseError::Validation("pipeline step ran before input understanding".into())
    })
}

fn validate_comment(
    call: &ToolCall,
    file: &ChangedFile,
    patch: &FilePatch,
) -> Result<ReviewComment, PatchwiseError> {
    let args: ReviewCommentArgs = parse_arguments(REVIEW_COMMENT_TOOL, call.arguments.clone())?;
    if args.comment.trim().is_empty() {
        return Err(PatchwiseError::Validation("empty comment".into()));
    }
    if !patch.is_commentable(args.position) {
        return Err(PatchwiseError::Validation(format!(
            "position {} is not a commentable line ({patch})",
            args.position
        )));
    }
    Ok(ReviewComment {
        path: file.filename.clone(),
        position: args.position,
        body: args.comment.trim().to_string(),
    })
}

/// Group review comments into threads and keep those awaiting the bot.
///
/// A thread awaits a reply when the bot commented in it and the latest
/// comment is by someone else. Threads are returned by id; comments inside
/// a thread keep their input order.
///
/// # Examples
///
/// ```
/// use chrono::Utc;
/// use patchwise_core::ExistingReviewComment;
/// use patchwise_review::pipeline::threads_awaiting_reply;
///
/// let bot = ExistingReviewComment {
///     id: 1, in_reply_to_id: None, author: "bot".into(), path: "a.rs".into(),
///     position: Some(2), body: "Missing check".into(), created_at: Utc::now(),
/// };
/// let human = ExistingReviewComment {
///     id: 2, in_reply_to_id: Some(1), author: "alice".into(), body: "Why?".into(), ..bot.clone()
/// };
/// let threads = threads_awaiting_reply(&[bot, human], "bot");
/// assert_eq!(threads.len(), 1);
/// assert_eq!(threads[0].0, 1);
/// ```
pub fn threads_awaiting_reply(
    comments: &[ExistingReviewComment],
    bot_login: &str,
) -> Vec<(u64, Vec<ExistingReviewComment>)> {
    let mut threads: BTreeMap<u64, Vec<ExistingReviewComment>> = BTreeMap::new();
    for comment in comments {
        threads
            .entry(comment.thread_id())
            .or_default()
            .push(comment.clone());
    }

    threads
        .into_iter()
        .filter(|(_, thread)| {
            let bot_took_part = thread.iter().any(|c| c.author == bot_login);
            let last_is_other = thread.last().is_some_and(|c| c.author != bot_login);
            bot_took_part && last_is_other
        })
        .collect()
}
