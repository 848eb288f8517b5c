use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use patchwise_core::{
    ChangedFile, ExistingReview, ExistingReviewComment, FileStatus, PatchwiseError, PullRequest,
    ReviewComment, ReviewConfig, ReviewEvent, RunMode,
};
use patchwise_review::github::{ContextProvider, ReviewSubmission, ReviewSubmitter};
use patchwise_review::llm::{ChatMessage, ChatModel, Role, ToolCall, ToolDefinition};
use patchwise_review::pipeline::ReviewAgent;
use patchwise_review::tools::{ToolRegistry, TypedTool, TOOL_FAILURE_SENTINEL};
use serde::Deserialize;
use serde_json::json;

/// Model that replays canned responses and records every request.
#[derive(Default)]
struct ScriptedModel {
    responses: Mutex<VecDeque<ChatMessage>>,
    requests: Mutex<Vec<(Vec<ChatMessage>, Vec<String>)>>,
}

impl ScriptedModel {
    fn new(responses: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn requests(&self) -> Vec<(Vec<ChatMessage>, Vec<String>)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatMessage, PatchwiseError> {
        let names = tools.iter().map(|t| t.name.clone()).collect();
        self.requests
            .lock()
            .unwrap()
            .push((messages.to_vec(), names));
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PatchwiseError::Llm("script exhausted".into()))
    }
}

struct FakeRepo {
    files: Vec<ChangedFile>,
    contents: HashMap<String, String>,
    comments: Vec<ExistingReviewComment>,
}

impl FakeRepo {
    fn new(files: Vec<ChangedFile>) -> Arc<Self> {
        let contents = files
            .iter()
            .map(|f| (f.filename.clone(), format!("// full content of {}", f.filename)))
            .collect();
        Arc::new(Self {
            files,
            contents,
            comments: Vec::new(),
        })
    }
}

#[async_trait]
impl ContextProvider for FakeRepo {
    async fn pull_request(&self) -> Result<PullRequest, PatchwiseError> {
        Ok(PullRequest {
            number: 12,
            title: "Rename variables".into(),
            body: Some("Cleanup".into()),
            author: "alice".into(),
            head_sha: "head123".into(),
            base_sha: "base456".into(),
            base_ref: "main".into(),
        })
    }

    async fn changed_files(&self) -> Result<Vec<ChangedFile>, PatchwiseError> {
        Ok(self.files.clone())
    }

    async fn readme(&self) -> Result<Option<String>, PatchwiseError> {
        Ok(Some("# Demo service".into()))
    }

    async fn file_content(
        &self,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, PatchwiseError> {
        assert_eq!(git_ref, "head123");
        Ok(self.contents.get(path).cloned())
    }

    async fn folder_tree(&self) -> Result<String, PatchwiseError> {
        Ok("src/\n  a.rs\n  b.rs\n".into())
    }

    async fn reviews(&self) -> Result<Vec<ExistingReview>, PatchwiseError> {
        Ok(Vec::new())
    }

    async fn review_comments(&self) -> Result<Vec<ExistingReviewComment>, PatchwiseError> {
        Ok(self.comments.clone())
    }
}

#[derive(Default)]
struct RecordingSubmitter {
    reviews: Mutex<Vec<ReviewSubmission>>,
    replies: Mutex<Vec<(u64, String)>>,
}

#[async_trait]
impl ReviewSubmitter for RecordingSubmitter {
    async fn submit_review(&self, review: &ReviewSubmission) -> Result<(), PatchwiseError> {
        self.reviews.lock().unwrap().push(review.clone());
        Ok(())
    }

    async fn reply_to_comment(&self, comment_id: u64, body: &str) -> Result<(), PatchwiseError> {
        self.replies
            .lock()
            .unwrap()
            .push((comment_id, body.to_string()));
        Ok(())
    }
}

#[derive(Deserialize, schemars::JsonSchema)]
struct Query {
    #[allow(dead_code)]
    query: String,
}

/// Knowledge tool whose backend is always down.
struct OfflineWiki;

#[async_trait]
impl TypedTool for OfflineWiki {
    type Input = Query;
    const NAME: &'static str = "wikipedia";

    fn description(&self) -> &str {
        "Look up a topic"
    }

    async fn run(&self, _input: Query) -> Result<String, PatchwiseError> {
        Err(PatchwiseError::tool("wikipedia", "connection refused"))
    }
}

fn changed(name: &str, patch: Option<&str>) -> ChangedFile {
    ChangedFile {
        filename: name.into(),
        previous_filename: None,
        status: FileStatus::Modified,
        additions: 2,
        deletions: 1,
        patch: patch.map(str::to_string),
    }
}

const PATCH_A: &str = "@@ -1,3 +1,4 @@\n fn main() {\n-    let x = 1;\n+    let value = 1;\n+    println!(\"{value}\");\n }";
const PATCH_B: &str = "@@ -5,2 +5,2 @@\n fn helper() {\n-    todo!()\n+    42\n }";

fn tool_call(id: &str, name: &str, arguments: serde_json::Value) -> ToolCall {
    ToolCall {
        id: id.into(),
        name: name.into(),
        arguments,
    }
}

fn calls(content: &str, calls: Vec<ToolCall>) -> ChatMessage {
    ChatMessage {
        role: Role::Assistant,
        content: content.into(),
        tool_calls: calls,
        tool_call_id: None,
    }
}

fn review_config() -> ReviewConfig {
    ReviewConfig {
        project_context: Some("Internal tooling".into()),
        ..ReviewConfig::default()
    }
}

fn agent(
    model: Arc<ScriptedModel>,
    repo: Arc<FakeRepo>,
    submitter: Arc<RecordingSubmitter>,
    knowledge: ToolRegistry,
    config: ReviewConfig,
) -> ReviewAgent {
    ReviewAgent::new(model, repo, submitter, knowledge, config)
}

#[tokio::test]
async fn two_files_one_comment() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("A small Rust CLI; the PR renames variables."),
        calls("", vec![tool_call("k1", "wikipedia", json!({ "query": "naming" }))]),
        calls(
            "",
            vec![tool_call(
                "c1",
                "review_comment",
                json!({ "comment": "Consider renaming this variable", "position": 3 }),
            )],
        ),
        ChatMessage::assistant("No issues in this file."),
    ]);
    let repo = FakeRepo::new(vec![
        changed("src/a.rs", Some(PATCH_A)),
        changed("src/b.rs", Some(PATCH_B)),
    ]);
    let submitter = Arc::new(RecordingSubmitter::default());

    let report = agent(
        model.clone(),
        repo,
        submitter.clone(),
        ToolRegistry::new().with(OfflineWiki),
        review_config(),
    )
    .run()
    .await
    .unwrap();

    let reviews = submitter.reviews.lock().unwrap().clone();
    assert_eq!(reviews.len(), 1);
    assert_eq!(reviews[0].event, ReviewEvent::Comment);
    assert_eq!(reviews[0].commit_id, "head123");
    assert_eq!(
        reviews[0].comments,
        vec![ReviewComment {
            path: "src/a.rs".into(),
            position: 3,
            body: "Consider renaming this variable".into(),
        }]
    );
    assert_eq!(report.files_reviewed, 2);
    assert_eq!(report.event, Some(ReviewEvent::Comment));

    let requests = model.requests();
    assert_eq!(requests.len(), 4);
    // input understanding binds no tools; knowledge binds the registry
    assert!(requests[0].1.is_empty());
    assert_eq!(requests[1].1, vec!["wikipedia"]);
    assert!(requests[2].1.contains(&"review_comment".to_string()));
    assert!(requests[2].1.contains(&"get_file_content".to_string()));

    // the failing knowledge tool was fed back as the sentinel
    let file_a_messages = &requests[2].0;
    let tool_msg = file_a_messages
        .iter()
        .find(|m| m.tool_call_id.as_deref() == Some("k1"))
        .unwrap();
    assert_eq!(tool_msg.content, TOOL_FAILURE_SENTINEL);

    // file B does not see file A's exchange
    let file_b_messages = &requests[3].0;
    assert!(file_b_messages
        .iter()
        .all(|m| !m.content.contains("Review `src/a.rs`")));
    assert!(file_b_messages
        .last()
        .unwrap()
        .content
        .contains("Review `src/b.rs`"));
}

#[tokio::test]
async fn each_step_extends_the_previous_conversation() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("nothing to look up"),
        ChatMessage::assistant("fine"),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    agent(
        model.clone(),
        repo,
        submitter,
        ToolRegistry::new(),
        review_config(),
    )
    .run()
    .await
    .unwrap();

    let requests = model.requests();
    let input = &requests[0].0;
    let knowledge = &requests[1].0;
    let review = &requests[2].0;
    assert_eq!(input.len(), 2);
    assert_eq!(input[0].role, Role::System);
    assert!(knowledge.starts_with(input));
    assert_eq!(knowledge[2].content, "summary");
    assert!(review.starts_with(knowledge));
}

#[tokio::test]
async fn skipped_files_never_reach_the_model() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        ChatMessage::assistant("fine"),
    ]);
    let mut removed = changed("src/old.rs", Some("@@ -1 +0,0 @@\n-gone"));
    removed.status = FileStatus::Removed;
    let repo = FakeRepo::new(vec![
        changed("Cargo.lock", Some("@@ -1 +1 @@\n-a\n+b")),
        changed("assets/logo.png", None),
        removed,
        changed("src/a.rs", Some(PATCH_A)),
    ]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let report = agent(
        model.clone(),
        repo,
        submitter.clone(),
        ToolRegistry::new(),
        review_config(),
    )
    .run()
    .await
    .unwrap();

    assert_eq!(model.requests().len(), 3);
    assert_eq!(report.files_reviewed, 1);
    assert_eq!(report.files_skipped.len(), 3);
    let reviews = submitter.reviews.lock().unwrap();
    assert!(reviews[0].comments.is_empty());
    assert_eq!(reviews[0].event, ReviewEvent::Comment);
    assert!(reviews[0].body.contains("No issues found"));
}

#[tokio::test]
async fn repository_tools_are_fed_back_before_commenting() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![
                tool_call("t1", "get_file_content", json!({ "path": "src/b.rs" })),
                tool_call("t2", "get_file_content", json!({ "path": "src/missing.rs" })),
            ],
        ),
        calls(
            "",
            vec![tool_call(
                "c1",
                "review_comment",
                json!({ "comment": "helper() now returns 42; callers expect a Result", "position": 2 }),
            )],
        ),
    ]);
    let repo = FakeRepo::new(vec![
        changed("src/a.rs", Some(PATCH_A)),
        changed("src/b.rs", None),
    ]);
    let submitter = Arc::new(RecordingSubmitter::default());
    agent(
        model.clone(),
        repo,
        submitter.clone(),
        ToolRegistry::new(),
        review_config(),
    )
    .run()
    .await
    .unwrap();

    let requests = model.requests();
    assert_eq!(requests.len(), 4);
    let second_round = &requests[3].0;
    let results: Vec<&ChatMessage> = second_round
        .iter()
        .filter(|m| m.tool_call_id.is_some())
        .collect();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].content, "// full content of src/b.rs");
    assert_eq!(results[1].content, TOOL_FAILURE_SENTINEL);

    let reviews = submitter.reviews.lock().unwrap();
    assert_eq!(reviews[0].comments.len(), 1);
    assert_eq!(reviews[0].comments[0].position, 2);
}

#[tokio::test]
async fn tool_rounds_are_bounded() {
    let lookup = || {
        calls(
            "",
            vec![tool_call("t", "get_diff_patch", json!({ "path": "src/a.rs" }))],
        )
    };
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        lookup(),
        lookup(),
        ChatMessage::assistant("fine after all"),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let config = ReviewConfig {
        max_tool_rounds: 2,
        ..review_config()
    };
    agent(model.clone(), repo, submitter, ToolRegistry::new(), config)
        .run()
        .await
        .unwrap();

    let requests = model.requests();
    assert_eq!(requests.len(), 5);
    // the last round only offers the response tool
    assert_eq!(requests[4].1, vec!["review_comment"]);
}

#[tokio::test]
async fn out_of_range_comments_are_dropped() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![
                tool_call("c1", "review_comment", json!({ "comment": "hunk header", "position": 0 })),
                tool_call("c2", "review_comment", json!({ "comment": "valid", "position": 4 })),
                tool_call("c3", "review_comment", json!({ "comment": "past the end", "position": 99 })),
            ],
        ),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let config = ReviewConfig {
        request_changes: true,
        ..review_config()
    };
    let report = agent(model, repo, submitter.clone(), ToolRegistry::new(), config)
        .run()
        .await
        .unwrap();

    assert_eq!(report.dropped_comments, 2);
    let reviews = submitter.reviews.lock().unwrap();
    assert_eq!(reviews[0].comments.len(), 1);
    assert_eq!(reviews[0].comments[0].position, 4);
    assert_eq!(reviews[0].event, ReviewEvent::RequestChanges);
}

#[tokio::test]
async fn patch_at_exact_limit_reaches_the_prompt_whole() {
    let patch = "@@ -1 +1 @@\n-old\n+new";
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![tool_call("c1", "review_comment", json!({ "comment": "why new?", "position": 2 }))],
        ),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(patch))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let config = ReviewConfig {
        patch_limit: patch.chars().count(),
        ..review_config()
    };
    let report = agent(model.clone(), repo, submitter.clone(), ToolRegistry::new(), config)
        .run()
        .await
        .unwrap();

    let requests = model.requests();
    let file_prompt = &requests[2].0.last().unwrap().content;
    assert!(file_prompt.contains("   1 | -old"));
    assert!(file_prompt.contains("   2 | +new"));
    assert_eq!(report.dropped_comments, 0);
    assert_eq!(submitter.reviews.lock().unwrap()[0].comments[0].position, 2);
}

#[tokio::test]
async fn truncated_patch_bounds_comment_positions() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![
                tool_call("c1", "review_comment", json!({ "comment": "kept", "position": 2 })),
                tool_call("c2", "review_comment", json!({ "comment": "cut off", "position": 4 })),
            ],
        ),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    // keeps the header and the first two diff lines
    let config = ReviewConfig {
        patch_limit: 50,
        ..review_config()
    };
    let report = agent(model.clone(), repo, submitter.clone(), ToolRegistry::new(), config)
        .run()
        .await
        .unwrap();

    let requests = model.requests();
    let file_prompt = &requests[2].0.last().unwrap().content;
    assert!(file_prompt.contains("   2 | -    let x = 1;"));
    assert!(!file_prompt.contains("let value"));
    assert_eq!(report.dropped_comments, 1);
    let reviews = submitter.reviews.lock().unwrap();
    assert_eq!(reviews[0].comments.len(), 1);
    assert_eq!(reviews[0].comments[0].body, "kept");
}

#[tokio::test]
async fn lookups_sent_with_comments_end_the_file() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![
                tool_call("r1", "get_file_content", json!({ "path": "src/a.rs" })),
                tool_call("c1", "review_comment", json!({ "comment": "shadowed", "position": 3 })),
            ],
        ),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    agent(model.clone(), repo, submitter.clone(), ToolRegistry::new(), review_config())
        .run()
        .await
        .unwrap();

    // no follow-up request carries the lookup result
    assert_eq!(model.requests().len(), 3);
    let reviews = submitter.reviews.lock().unwrap();
    assert_eq!(reviews[0].comments.len(), 1);
    assert_eq!(reviews[0].comments[0].body, "shadowed");
}

#[tokio::test]
async fn only_invalid_output_fails_the_run() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![tool_call("c1", "review_comment", json!({ "comment": "bad", "line": 3 }))],
        ),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let err = agent(model, repo, submitter.clone(), ToolRegistry::new(), review_config())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PatchwiseError::Validation(_)));
    assert!(submitter.reviews.lock().unwrap().is_empty());
}

#[tokio::test]
async fn model_failure_aborts_without_submission() {
    let model = ScriptedModel::new(vec![ChatMessage::assistant("summary")]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let err = agent(model, repo, submitter.clone(), ToolRegistry::new(), review_config())
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PatchwiseError::Llm(_)));
    assert!(submitter.reviews.lock().unwrap().is_empty());
}

#[tokio::test]
async fn clean_review_can_approve() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        ChatMessage::assistant("fine"),
    ]);
    let repo = FakeRepo::new(vec![changed("src/a.rs", Some(PATCH_A))]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let config = ReviewConfig {
        approve_when_clean: true,
        ..review_config()
    };
    agent(model, repo, submitter.clone(), ToolRegistry::new(), config)
        .run()
        .await
        .unwrap();
    assert_eq!(
        submitter.reviews.lock().unwrap()[0].event,
        ReviewEvent::Approve
    );
}

fn thread_comment(id: u64, reply_to: Option<u64>, author: &str, minute: u32) -> ExistingReviewComment {
    ExistingReviewComment {
        id,
        in_reply_to_id: reply_to,
        author: author.into(),
        path: "src/a.rs".into(),
        position: Some(3),
        body: format!("comment {id} by {author}"),
        created_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, minute, 0).unwrap(),
    }
}

fn reply_repo() -> Arc<FakeRepo> {
    let mut repo = FakeRepo {
        files: vec![changed("src/a.rs", Some(PATCH_A))],
        contents: HashMap::new(),
        comments: Vec::new(),
    };
    repo.comments = vec![
        thread_comment(100, None, "github-actions[bot]", 0),
        thread_comment(101, Some(100), "alice", 5),
        thread_comment(200, None, "bob", 10),
    ];
    Arc::new(repo)
}

#[tokio::test]
async fn reply_mode_answers_open_threads() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        calls(
            "",
            vec![tool_call(
                "r1",
                "reply",
                json!({ "body": "Thanks, that addresses it." }),
            )],
        ),
    ]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let config = ReviewConfig {
        mode: RunMode::Reply,
        ..review_config()
    };
    let report = agent(
        model.clone(),
        reply_repo(),
        submitter.clone(),
        ToolRegistry::new(),
        config,
    )
    .run()
    .await
    .unwrap();

    assert_eq!(
        *submitter.replies.lock().unwrap(),
        vec![(100, "Thanks, that addresses it.".to_string())]
    );
    assert!(submitter.reviews.lock().unwrap().is_empty());
    assert_eq!(report.replies.len(), 1);
    assert!(report.event.is_none());

    let requests = model.requests();
    assert_eq!(requests[2].1, vec!["reply"]);
    let prompt = &requests[2].0.last().unwrap().content;
    assert!(prompt.contains("**you**: comment 100"));
    assert!(prompt.contains("**alice**: comment 101"));
}

#[tokio::test]
async fn reply_mode_without_replies_submits_nothing() {
    let model = ScriptedModel::new(vec![
        ChatMessage::assistant("summary"),
        ChatMessage::assistant("ok"),
        ChatMessage::assistant("No reply needed."),
    ]);
    let submitter = Arc::new(RecordingSubmitter::default());
    let config = ReviewConfig {
        mode: RunMode::Reply,
        ..review_config()
    };
    agent(model, reply_repo(), submitter.clone(), ToolRegistry::new(), config)
        .run()
        .await
        .unwrap();

    assert!(submitter.replies.lock().unwrap().is_empty());
    assert!(submitter.reviews.lock().unwrap().is_empty());
}
