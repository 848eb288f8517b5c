//! Core types, configuration, and error handling for patchwise.
//!
//! This crate provides the shared foundation used by the other patchwise crates:
//! - [`PatchwiseError`]: unified error type using `thiserror` and `miette`
//! - [`PatchwiseConfig`]: configuration loaded from `.patchwise.toml` and action inputs
//! - Shared types: [`ChangedFile`], [`ReviewComment`], [`ReviewEvent`], [`Provider`],
//!   [`PullRequestRef`], [`ExistingReviewComment`], [`ThreadReply`]

mod config;
mod error;
mod types;

pub use config::{
    ActionInputs, GitHubConfig, LlmConfig, PatchwiseConfig, ReviewConfig, ToolsConfig,
};
pub use error::PatchwiseError;
pub use types::{
    ChangedFile, ExistingReview, ExistingReviewComment, FileStatus, Provider, PullRequest,
    PullRequestRef, ReviewComment, ReviewEvent, RunMode, ThreadReply,
};

/// A convenience `Result` type for patchwise operations.
pub type Result<T> = std::result::Result<T, PatchwiseError>;
