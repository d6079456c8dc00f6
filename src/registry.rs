//! The ensure registry: which grammars this crate knows how to obtain.
//!
//! Maps language ids to a fetch strategy. The registry is plain owned data:
//! the embedding host constructs one (usually via
//! [`EnsureRegistry::with_defaults`]), adjusts it with
//! [`EnsureRegistry::register`], and hands it to the interceptor.

use std::collections::HashMap;
use std::path::PathBuf;

/// Where and how a grammar's source is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GrammarSource {
	/// A git-hosted grammar repository.
	///
	/// `remote` overrides the default locator derived from the language id
	/// (see [`default_remote`](crate::build::default_remote)). `subpath`
	/// selects a directory within the checkout for grammars that live in a
	/// monorepo.
	Hosted {
		remote: Option<String>,
		subpath: Option<String>,
	},
	/// A grammar source tree already on disk; never fetched.
	Local { path: PathBuf },
}

impl GrammarSource {
	/// Hosted at the conventional location derived from the language id.
	pub fn hosted() -> Self {
		GrammarSource::Hosted {
			remote: None,
			subpath: None,
		}
	}
}

/// Default grammars, mapped by the upstream organization's naming convention.
///
/// Entries are `(language, remote override, subpath)`. The typescript family
/// shares one repository with per-dialect subdirectories.
const DEFAULT_GRAMMARS: &[(&str, Option<&str>, Option<&str>)] = &[
	("bash", None, None),
	("c", None, None),
	("cpp", None, None),
	("css", None, None),
	("go", None, None),
	("html", None, None),
	("java", None, None),
	("javascript", None, None),
	("json", None, None),
	("python", None, None),
	("ruby", None, None),
	("rust", None, None),
	(
		"typescript",
		Some("https://github.com/tree-sitter/tree-sitter-typescript"),
		Some("typescript"),
	),
	(
		"tsx",
		Some("https://github.com/tree-sitter/tree-sitter-typescript"),
		Some("tsx"),
	),
];

/// Mapping from language id to fetch strategy.
///
/// A missing entry is not an error: it means this crate has no way to obtain
/// that grammar, and the ensure machinery leaves the language alone.
#[derive(Debug, Clone, Default)]
pub struct EnsureRegistry {
	entries: HashMap<String, GrammarSource>,
}

impl EnsureRegistry {
	/// An empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// A registry seeded with the standard grammar table.
	pub fn with_defaults() -> Self {
		let mut registry = Self::new();
		for (language, remote, subpath) in DEFAULT_GRAMMARS {
			registry.register(
				*language,
				GrammarSource::Hosted {
					remote: remote.map(str::to_string),
					subpath: subpath.map(str::to_string),
				},
			);
		}
		registry
	}

	/// Looks up the fetch strategy for a language.
	pub fn lookup(&self, language: &str) -> Option<&GrammarSource> {
		self.entries.get(language)
	}

	/// Registers a grammar source, replacing any existing entry.
	pub fn register(&mut self, language: impl Into<String>, source: GrammarSource) {
		self.entries.insert(language.into(), source);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_lookup_miss_is_none() {
		let registry = EnsureRegistry::new();
		assert!(registry.lookup("nonexistent-language").is_none());
	}

	#[test]
	fn test_register_overrides() {
		let mut registry = EnsureRegistry::with_defaults();
		registry.register(
			"python",
			GrammarSource::Local {
				path: PathBuf::from("/srv/grammars/python"),
			},
		);

		assert!(matches!(
			registry.lookup("python"),
			Some(GrammarSource::Local { .. })
		));
	}

	#[test]
	fn test_typescript_family_shares_repository() {
		let registry = EnsureRegistry::with_defaults();

		let Some(GrammarSource::Hosted {
			remote: ts_remote,
			subpath: ts_subpath,
		}) = registry.lookup("typescript")
		else {
			panic!("typescript should be a hosted grammar");
		};
		let Some(GrammarSource::Hosted {
			remote: tsx_remote,
			subpath: tsx_subpath,
		}) = registry.lookup("tsx")
		else {
			panic!("tsx should be a hosted grammar");
		};

		assert_eq!(ts_remote, tsx_remote);
		assert_ne!(ts_subpath, tsx_subpath);
	}

	#[test]
	fn test_defaults_include_common_grammars() {
		let registry = EnsureRegistry::with_defaults();
		for language in ["python", "rust", "json"] {
			assert_eq!(registry.lookup(language), Some(&GrammarSource::hosted()));
		}
	}
}
