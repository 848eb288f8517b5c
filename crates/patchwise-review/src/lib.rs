//! LLM review agent for GitHub pull requests.
//!
//! Provides the model client, the tool registry, the GitHub collaborator,
//! prompt construction, the append-only conversation state, and the
//! pipeline driver that ties them together.

pub mod action;
pub mod github;
pub mod llm;
pub mod pipeline;
pub mod prompt;
pub mod state;
pub mod tools;
pub mod tree;
