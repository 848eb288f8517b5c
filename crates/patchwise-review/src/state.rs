use patchwise_core::{ReviewComment, ThreadReply};
use serde::Serialize;

use crate::llm::ChatMessage;

/// Append-only state carried between pipeline steps.
///
/// Steps never mutate the state; they return a [`StateDelta`] that
/// [`ConversationState::apply`] appends. The state before a step is
/// therefore always a prefix of the state after it.
///
/// # Examples
///
/// ```
/// use patchwise_review::llm::ChatMessage;
/// use patchwise_review::state::{ConversationState, StateDelta};
///
/// let state = ConversationState::default()
///     .apply(StateDelta::messages(vec![ChatMessage::user("hello")]));
/// assert_eq!(state.messages().len(), 1);
/// assert!(state.comments().is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationState {
    messages: Vec<ChatMessage>,
    comments: Vec<ReviewComment>,
    replies: Vec<ThreadReply>,
}

impl ConversationState {
    /// Conversation so far, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Review comments accumulated so far.
    pub fn comments(&self) -> &[ReviewComment] {
        &self.comments
    }

    /// Thread replies accumulated so far.
    pub fn replies(&self) -> &[ThreadReply] {
        &self.replies
    }

    /// Append a step's output.
    pub fn apply(mut self, delta: StateDelta) -> Self {
        self.messages.extend(delta.messages);
        self.comments.extend(delta.comments);
        self.replies.extend(delta.replies);
        self
    }

    /// Returns `true` if every list in `self` is a prefix of the same list in `other`.
    pub fn is_prefix_of(&self, other: &ConversationState) -> bool {
        other.messages.starts_with(&self.messages)
            && other.comments.starts_with(&self.comments)
            && other.replies.starts_with(&self.replies)
    }
}

/// What a single step adds to the state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateDelta {
    /// Messages to append.
    pub messages: Vec<ChatMessage>,
    /// Review comments to append.
    pub comments: Vec<ReviewComment>,
    /// Thread replies to append.
    pub replies: Vec<ThreadReply>,
}

impl StateDelta {
    /// A delta carrying only messages.
    pub fn messages(messages: Vec<ChatMessage>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    /// Returns `true` if applying this delta changes nothing.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.comments.is_empty() && self.replies.is_empty()
    }
}
