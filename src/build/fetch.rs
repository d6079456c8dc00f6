//! Grammar source acquisition.
//!
//! The actual version-control work is behind [`FetchBackend`], with
//! [`GitBackend`] shelling out to the `git` CLI. [`ensure_fetched`] is the
//! orchestration: resolve the remote, notice stale build records, acquire the
//! source, and run the compiler as the post-acquisition step.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use super::compile::compile;
use super::{EnsureError, Result};
use crate::artifact::{cache_dir, runtime_dir};
use crate::ready::ReadinessProbe;
use crate::registry::GrammarSource;

/// Marker recording that the last build from this checkout succeeded.
const BUILD_RECORD: &str = ".build-ok";

/// External source-acquisition mechanism.
///
/// Implementations own a local cache of checkouts and a per-language record
/// of whether the last post-fetch build succeeded. The trait exists so tests
/// can substitute a backend that serves prepared source trees.
pub trait FetchBackend {
	/// Clones or updates the source for `language` from `remote`, returning
	/// the checkout root.
	fn ensure_source(&self, language: &str, remote: &str) -> Result<PathBuf>;

	/// Whether the last build from this backend's checkout succeeded.
	fn build_succeeded(&self, language: &str) -> bool;

	/// Records a successful build.
	fn record_build(&self, language: &str) -> Result<()>;

	/// Drops the success record so the next ensure attempt rebuilds.
	fn invalidate(&self, language: &str);
}

impl<B: FetchBackend + ?Sized> FetchBackend for &B {
	fn ensure_source(&self, language: &str, remote: &str) -> Result<PathBuf> {
		(**self).ensure_source(language, remote)
	}

	fn build_succeeded(&self, language: &str) -> bool {
		(**self).build_succeeded(language)
	}

	fn record_build(&self, language: &str) -> Result<()> {
		(**self).record_build(language)
	}

	fn invalidate(&self, language: &str) {
		(**self).invalidate(language)
	}
}

/// Fetch backend shelling out to the `git` CLI.
///
/// Checkouts live under `<cache dir>/sources/<language>`; the build record is
/// a marker file next to each checkout's contents.
#[derive(Debug, Clone)]
pub struct GitBackend {
	sources_dir: PathBuf,
}

impl GitBackend {
	/// Backend storing checkouts in the default cache location.
	pub fn new() -> Self {
		let sources_dir = cache_dir()
			.unwrap_or_else(runtime_dir)
			.join("sources");
		Self { sources_dir }
	}

	/// Backend storing checkouts under an explicit directory.
	pub fn at(sources_dir: impl Into<PathBuf>) -> Self {
		Self {
			sources_dir: sources_dir.into(),
		}
	}

	fn checkout_dir(&self, language: &str) -> PathBuf {
		self.sources_dir.join(language)
	}
}

impl Default for GitBackend {
	fn default() -> Self {
		Self::new()
	}
}

impl FetchBackend for GitBackend {
	fn ensure_source(&self, language: &str, remote: &str) -> Result<PathBuf> {
		ensure_git_available()?;

		let checkout = self.checkout_dir(language);
		fs::create_dir_all(&checkout)?;

		if is_valid_git_repo(&checkout) {
			update_existing_repo(&checkout, language)?;
		} else {
			clone_fresh(&checkout, language, remote)?;
		}

		Ok(checkout)
	}

	fn build_succeeded(&self, language: &str) -> bool {
		self.checkout_dir(language).join(BUILD_RECORD).exists()
	}

	fn record_build(&self, language: &str) -> Result<()> {
		let checkout = self.checkout_dir(language);
		fs::create_dir_all(&checkout)?;
		fs::write(checkout.join(BUILD_RECORD), b"")?;
		Ok(())
	}

	fn invalidate(&self, language: &str) {
		let _ = fs::remove_file(self.checkout_dir(language).join(BUILD_RECORD));
	}
}

/// Returns the conventional repository locator for a language:
/// `https://github.com/tree-sitter/tree-sitter-<language>`.
pub fn default_remote(language: &str) -> String {
	format!("https://github.com/tree-sitter/tree-sitter-{language}")
}

/// Ensures the grammar source for `language` is present and built.
///
/// For hosted sources this resolves the remote (falling back to
/// [`default_remote`]), invalidates a stale success record (one claiming a
/// past build whose artifact the native `probe` can no longer see), delegates
/// acquisition to the `backend`, and compiles into `destination` unless the
/// record shows the checkout is already built. Local sources are compiled
/// directly from their path on every call.
///
/// `probe` must be the undecorated native predicate: handing an
/// ensure-wrapping probe in here would recurse.
///
/// # Errors
///
/// Propagates fetch errors ([`EnsureError::GitNotAvailable`],
/// [`EnsureError::GitCommand`], [`EnsureError::Io`]) and compiler errors
/// unmodified.
pub fn ensure_fetched<P, B>(
	language: &str,
	source: &GrammarSource,
	probe: &P,
	backend: &B,
	destination: &Path,
) -> Result<()>
where
	P: ReadinessProbe + ?Sized,
	B: FetchBackend + ?Sized,
{
	match source {
		GrammarSource::Local { path } => {
			compile(Some(path), Some(destination))?;
			Ok(())
		}
		GrammarSource::Hosted { remote, subpath } => {
			let remote = remote
				.clone()
				.unwrap_or_else(|| default_remote(language));

			// A recorded success with a missing artifact means the library
			// was removed out-of-band; the record must not mask the rebuild.
			if backend.build_succeeded(language) && !probe.is_ready(language, true) {
				info!(grammar = language, "stale build record, forcing a rebuild");
				backend.invalidate(language);
			}

			let checkout = backend.ensure_source(language, &remote)?;

			if backend.build_succeeded(language) {
				return Ok(());
			}

			let grammar_root = match subpath {
				Some(sub) => checkout.join(sub),
				None => checkout,
			};
			compile(Some(&grammar_root), Some(destination))?;
			backend.record_build(language)?;
			Ok(())
		}
	}
}

/// Check if git is available on PATH.
fn ensure_git_available() -> Result<()> {
	Command::new("git")
		.arg("--version")
		.output()
		.map_err(|_| EnsureError::GitNotAvailable)?;
	Ok(())
}

fn is_valid_git_repo(dir: &Path) -> bool {
	dir.join(".git").join("HEAD").exists()
}

fn update_existing_repo(checkout: &Path, language: &str) -> Result<()> {
	info!(grammar = language, "Updating grammar source");
	run_git(checkout, &["fetch", "--depth", "1", "origin"])?;
	run_git(checkout, &["checkout", "--force", "FETCH_HEAD"])?;
	Ok(())
}

fn clone_fresh(checkout: &Path, language: &str, remote: &str) -> Result<()> {
	if checkout.exists() {
		fs::remove_dir_all(checkout)?;
	}

	info!(grammar = language, remote = remote, "Cloning grammar source");
	git_clone(remote, checkout)
}

fn git_clone(remote: &str, dest: &Path) -> Result<()> {
	let output = Command::new("git")
		.args(["clone", "--depth", "1", "--single-branch", remote])
		.arg(dest)
		.output()
		.map_err(|e| EnsureError::GitCommand(e.to_string()))?;

	if output.status.success() {
		Ok(())
	} else {
		Err(EnsureError::GitCommand(
			String::from_utf8_lossy(&output.stderr).into(),
		))
	}
}

fn run_git(dir: &Path, args: &[&str]) -> Result<()> {
	let output = Command::new("git")
		.args(args)
		.current_dir(dir)
		.output()
		.map_err(|e| EnsureError::GitCommand(e.to_string()))?;

	if output.status.success() {
		Ok(())
	} else {
		Err(EnsureError::GitCommand(
			String::from_utf8_lossy(&output.stderr).into(),
		))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_remote_convention() {
		assert_eq!(
			default_remote("python"),
			"https://github.com/tree-sitter/tree-sitter-python"
		);
	}

	#[test]
	fn test_build_record_round_trip() {
		let dir = tempfile::tempdir().unwrap();
		let backend = GitBackend::at(dir.path());

		assert!(!backend.build_succeeded("mini"));
		backend.record_build("mini").unwrap();
		assert!(backend.build_succeeded("mini"));

		backend.invalidate("mini");
		assert!(!backend.build_succeeded("mini"));
	}

	#[test]
	fn test_invalidate_without_record_is_harmless() {
		let dir = tempfile::tempdir().unwrap();
		let backend = GitBackend::at(dir.path());
		backend.invalidate("never-recorded");
	}

	#[test]
	fn test_fresh_checkout_dir_is_not_a_repo() {
		let dir = tempfile::tempdir().unwrap();
		assert!(!is_valid_git_repo(dir.path()));
	}
}
