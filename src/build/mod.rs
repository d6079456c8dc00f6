//! Grammar fetching and building.
//!
//! This module acquires tree-sitter grammar sources from git repositories and
//! compiles them into dynamic libraries that the host can load at runtime.

mod compile;
mod fetch;

use std::path::PathBuf;

pub use compile::compile;
pub use fetch::{FetchBackend, GitBackend, default_remote, ensure_fetched};
use thiserror::Error;

/// Errors that can occur while ensuring a grammar is fetched and built.
#[derive(Debug, Error)]
pub enum EnsureError {
	#[error("git is not available on PATH")]
	GitNotAvailable,
	#[error("missing or malformed grammar.json at {path}: {reason}")]
	GrammarMetadata { path: PathBuf, reason: String },
	#[error("no parser.c found in {0}")]
	NoParserSource(PathBuf),
	#[error("compilation failed: {0}")]
	Compilation(String),
	#[error("git command failed: {0}")]
	GitCommand(String),
	#[error("failed to download {url}: {reason}")]
	Download { url: String, reason: String },
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

/// Result type for ensure operations.
pub type Result<T> = std::result::Result<T, EnsureError>;
