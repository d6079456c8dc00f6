// Grammar operations must use tracing, not stderr
#![deny(clippy::print_stderr)]

//! On-demand tree-sitter grammar provisioning.
//!
//! This crate makes sure a native, dynamically-loadable parser library for a
//! given language exists at a well-known location, fetching and compiling the
//! grammar source when it does not.
//!
//! # Architecture
//!
//! * [`artifact`]: Artifact naming, runtime directories, dynamic loading, and
//!   the native readiness probe
//! * [`registry`]: User-extensible mapping from language ids to fetch strategies
//! * [`build`]: Grammar source fetching and compilation into shared libraries
//! * [`ready`]: The readiness decorator that triggers ensure-on-miss
//!
//! # Flow
//!
//! A host asks [`ReadinessProbe::is_ready`] through an [`EnsureInterceptor`].
//! When the wrapped native probe reports not-ready, the interceptor looks the
//! language up in its [`EnsureRegistry`], runs one fetch-and-build attempt
//! (clone or update the grammar repository, compile `parser.c` plus any
//! scanner into `libtree-sitter-<name>.<ext>`), and re-checks. Build failures
//! never propagate to the host; they are logged and the language simply stays
//! not-ready.

pub mod artifact;
pub mod build;
pub mod ready;
pub mod registry;

pub use artifact::{
	ArtifactError, ArtifactProbe, LoadedGrammar, artifact_dir, cache_dir, library_file_name,
	load_grammar, runtime_dir,
};
pub use build::{
	EnsureError, FetchBackend, GitBackend, compile, default_remote, ensure_fetched,
};
pub use ready::{EnsureInterceptor, ReadinessProbe};
pub use registry::{EnsureRegistry, GrammarSource};
