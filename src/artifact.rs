//! Artifact naming, storage directories, and dynamic loading.
//!
//! Compiled grammars are shared libraries named `libtree-sitter-<name>` with
//! the platform suffix, stored in a single well-known directory under the
//! host's data root. This module locates that directory, loads artifacts via
//! `dlopen`, and provides the native readiness probe the ensure machinery
//! wraps.
//!
//! # Runtime Directory
//!
//! All runtime data lives in `~/.local/share/grammar-ensure/` by default
//! (`%LOCALAPPDATA%` on Windows). Set `GRAMMAR_ENSURE_RUNTIME` to relocate it,
//! e.g. during development or in tests.

use std::ffi::c_void;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::ready::ReadinessProbe;

/// Errors that can occur when loading a compiled grammar.
#[derive(Error, Debug)]
pub enum ArtifactError {
	/// Grammar library not present in the artifact directory.
	#[error("grammar not found: {0}")]
	NotFound(String),

	/// Failed to load the dynamic library.
	#[error("failed to load grammar library: {0}")]
	LoadError(String),

	/// Grammar library exists but doesn't export the expected symbol.
	#[error("grammar library missing language function: {0}")]
	MissingSymbol(String),

	/// Filesystem I/O error.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}

/// Entry-point signature exported by every compiled grammar.
type LanguageFn = unsafe extern "C" fn() -> *const c_void;

/// A grammar loaded from a shared library.
///
/// Keeps the library mapped for as long as the value lives; the language
/// pointer is only valid while this handle exists.
pub struct LoadedGrammar {
	_library: libloading::Library,
	language: *const c_void,
}

impl LoadedGrammar {
	/// Raw language pointer as returned by the grammar's entry point.
	pub fn language(&self) -> *const c_void {
		self.language
	}
}

/// Loads a grammar by name from the artifact directory.
///
/// Returns [`ArtifactError::NotFound`] when no library file exists for the
/// name. This performs no fetching or building; see
/// [`EnsureInterceptor`](crate::ready::EnsureInterceptor) for the on-demand
/// variant.
pub fn load_grammar(name: &str) -> Result<LoadedGrammar, ArtifactError> {
	let lib_path = artifact_dir().join(library_file_name(name));

	if !lib_path.exists() {
		return Err(ArtifactError::NotFound(name.to_string()));
	}

	load_grammar_from_path(&lib_path, name)
}

/// Loads a grammar from a specific library path.
fn load_grammar_from_path(path: &Path, name: &str) -> Result<LoadedGrammar, ArtifactError> {
	// SAFETY: Loading a tree-sitter grammar from a dynamic library. The
	// library's init sections are trusted, as is its language entry point.
	unsafe {
		let library = libloading::Library::new(path)
			.map_err(|e| ArtifactError::LoadError(format!("{}: {}", path.display(), e)))?;

		let symbol = language_symbol(name);
		let entry: libloading::Symbol<LanguageFn> = library
			.get(symbol.as_bytes())
			.map_err(|_| ArtifactError::MissingSymbol(symbol.clone()))?;

		let language = entry();
		Ok(LoadedGrammar {
			language,
			_library: library,
		})
	}
}

/// Native readiness predicate: a language is ready when its artifact exists
/// and loads cleanly.
///
/// With `quiet` set, failures produce no diagnostics; otherwise they are
/// logged at warn level.
#[derive(Debug, Default, Clone, Copy)]
pub struct ArtifactProbe;

impl ReadinessProbe for ArtifactProbe {
	fn is_ready(&self, language: &str, quiet: bool) -> bool {
		match load_grammar(language) {
			Ok(_) => true,
			Err(e) => {
				if !quiet {
					warn!(grammar = language, error = %e, "grammar is not ready");
				}
				false
			}
		}
	}
}

/// Returns the platform-specific library filename for a grammar.
pub fn library_file_name(name: &str) -> String {
	format!("libtree-sitter-{name}.{}", library_extension())
}

/// Returns the entry-point symbol name exported by a grammar library.
fn language_symbol(name: &str) -> String {
	format!("tree_sitter_{}", name.replace('-', "_"))
}

/// Get the library file extension for the current platform.
#[cfg(target_os = "windows")]
fn library_extension() -> &'static str {
	"dll"
}

#[cfg(target_os = "macos")]
fn library_extension() -> &'static str {
	"dylib"
}

#[cfg(all(unix, not(target_os = "macos")))]
fn library_extension() -> &'static str {
	"so"
}

/// Returns the primary runtime directory: `~/.local/share/grammar-ensure/`.
pub fn runtime_dir() -> PathBuf {
	if let Ok(runtime) = std::env::var("GRAMMAR_ENSURE_RUNTIME") {
		return PathBuf::from(runtime);
	}

	data_local_dir()
		.map(|d| d.join("grammar-ensure"))
		.unwrap_or_else(|| PathBuf::from("."))
}

/// Returns the directory compiled grammar libraries are placed in.
pub fn artifact_dir() -> PathBuf {
	runtime_dir().join("grammars")
}

/// Returns the cache directory: `~/.cache/grammar-ensure/`.
pub fn cache_dir() -> Option<PathBuf> {
	#[cfg(unix)]
	{
		std::env::var_os("XDG_CACHE_HOME")
			.map(PathBuf::from)
			.or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".cache")))
			.map(|p| p.join("grammar-ensure"))
	}
	#[cfg(windows)]
	{
		std::env::var_os("LOCALAPPDATA")
			.map(|p| PathBuf::from(p).join("grammar-ensure").join("cache"))
	}
	#[cfg(not(any(unix, windows)))]
	{
		None
	}
}

/// Returns the platform-specific local data directory.
fn data_local_dir() -> Option<PathBuf> {
	#[cfg(unix)]
	{
		std::env::var_os("XDG_DATA_HOME")
			.map(PathBuf::from)
			.or_else(|| {
				std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".local").join("share"))
			})
	}
	#[cfg(windows)]
	{
		std::env::var_os("LOCALAPPDATA").map(PathBuf::from)
	}
	#[cfg(not(any(unix, windows)))]
	{
		None
	}
}
