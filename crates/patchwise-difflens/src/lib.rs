//! Patch parsing, diff-position mapping, and pre-LLM file filtering.

pub mod filter;
pub mod parser;
