//! Readiness queries with ensure-on-miss.
//!
//! [`EnsureInterceptor`] decorates a native [`ReadinessProbe`]: when the
//! probe reports a language not-ready, the interceptor runs one
//! fetch-and-build attempt for it and asks again. Build failures never reach
//! the caller; a language that cannot be built simply stays not-ready and the
//! reason lands in the log.

use std::path::PathBuf;

use tracing::warn;

use crate::artifact::{ArtifactProbe, artifact_dir};
use crate::build::{FetchBackend, GitBackend, ensure_fetched};
use crate::registry::EnsureRegistry;

/// Predicate answering whether a language's grammar is present and loadable.
///
/// `quiet` suppresses diagnostics for the expected not-yet-built case; probes
/// honor it when the answer is negative.
pub trait ReadinessProbe {
	fn is_ready(&self, language: &str, quiet: bool) -> bool;
}

impl<P: ReadinessProbe + ?Sized> ReadinessProbe for &P {
	fn is_ready(&self, language: &str, quiet: bool) -> bool {
		(**self).is_ready(language, quiet)
	}
}

/// Decorator around a native readiness probe that fetches and builds missing
/// grammars on first miss.
///
/// Construction is explicit composition: hand in the undecorated probe, a
/// registry, and (optionally) a backend and destination, and use the
/// interceptor wherever a [`ReadinessProbe`] is expected. The fetch path
/// always receives the inner probe directly, so a build procedure that
/// queries readiness cannot re-enter the interceptor.
pub struct EnsureInterceptor<P = ArtifactProbe, B = GitBackend> {
	probe: P,
	registry: EnsureRegistry,
	backend: B,
	destination: PathBuf,
}

impl<P: ReadinessProbe> EnsureInterceptor<P, GitBackend> {
	/// Interceptor with the git backend and the default artifact directory.
	pub fn new(probe: P, registry: EnsureRegistry) -> Self {
		Self::with_backend(probe, registry, GitBackend::new(), artifact_dir())
	}
}

impl Default for EnsureInterceptor<ArtifactProbe, GitBackend> {
	/// Interceptor over the artifact-loading probe with the default registry.
	fn default() -> Self {
		Self::new(ArtifactProbe, EnsureRegistry::with_defaults())
	}
}

impl<P: ReadinessProbe, B: FetchBackend> EnsureInterceptor<P, B> {
	/// Interceptor with an explicit backend and artifact destination.
	pub fn with_backend(
		probe: P,
		registry: EnsureRegistry,
		backend: B,
		destination: impl Into<PathBuf>,
	) -> Self {
		Self {
			probe,
			registry,
			backend,
			destination: destination.into(),
		}
	}

	/// The registry, for registering or overriding grammar sources.
	pub fn registry_mut(&mut self) -> &mut EnsureRegistry {
		&mut self.registry
	}
}

impl<P: ReadinessProbe, B: FetchBackend> ReadinessProbe for EnsureInterceptor<P, B> {
	/// Answers the native probe, attempting at most one fetch-and-build when
	/// it reports not-ready and the registry has an entry for the language.
	///
	/// Never panics and never surfaces ensure errors: the final answer is
	/// always the native probe's verdict after the attempt, with the caller's
	/// `quiet` preference applied only to that final check.
	fn is_ready(&self, language: &str, quiet: bool) -> bool {
		if self.probe.is_ready(language, true) {
			return true;
		}

		if let Some(source) = self.registry.lookup(language) {
			if let Err(e) = ensure_fetched(
				language,
				source,
				&self.probe,
				&self.backend,
				&self.destination,
			) {
				warn!(grammar = language, error = %e, "automatic grammar build failed");
			}
		}

		self.probe.is_ready(language, quiet)
	}
}

#[cfg(test)]
mod tests {
	use std::path::PathBuf;
	use std::sync::Mutex;

	use super::*;
	use crate::build::{EnsureError, Result};
	use crate::registry::GrammarSource;

	struct StaticProbe {
		ready: bool,
	}

	impl ReadinessProbe for StaticProbe {
		fn is_ready(&self, _language: &str, _quiet: bool) -> bool {
			self.ready
		}
	}

	/// Backend that refuses every fetch and counts the attempts.
	struct RefusingBackend {
		attempts: Mutex<usize>,
	}

	impl RefusingBackend {
		fn new() -> Self {
			Self {
				attempts: Mutex::new(0),
			}
		}

		fn attempts(&self) -> usize {
			*self.attempts.lock().unwrap()
		}
	}

	impl FetchBackend for RefusingBackend {
		fn ensure_source(&self, _language: &str, _remote: &str) -> Result<PathBuf> {
			*self.attempts.lock().unwrap() += 1;
			Err(EnsureError::GitCommand("mock fetch refused".into()))
		}

		fn build_succeeded(&self, _language: &str) -> bool {
			false
		}

		fn record_build(&self, _language: &str) -> Result<()> {
			Ok(())
		}

		fn invalidate(&self, _language: &str) {}
	}

	fn hosted_registry(language: &str) -> EnsureRegistry {
		let mut registry = EnsureRegistry::new();
		registry.register(language, GrammarSource::hosted());
		registry
	}

	#[test]
	fn test_ready_language_skips_ensure() {
		let backend = RefusingBackend::new();
		let interceptor = EnsureInterceptor::with_backend(
			StaticProbe { ready: true },
			hosted_registry("mini"),
			&backend,
			"/nonexistent",
		);

		assert!(interceptor.is_ready("mini", true));
		assert_eq!(backend.attempts(), 0);
	}

	#[test]
	fn test_registry_miss_is_a_silent_no_op() {
		let backend = RefusingBackend::new();
		let interceptor = EnsureInterceptor::with_backend(
			StaticProbe { ready: false },
			EnsureRegistry::new(),
			&backend,
			"/nonexistent",
		);

		assert!(!interceptor.is_ready("nonexistent-language", true));
		assert_eq!(backend.attempts(), 0);
	}

	#[test]
	fn test_failed_ensure_is_demoted() {
		let backend = RefusingBackend::new();
		let interceptor = EnsureInterceptor::with_backend(
			StaticProbe { ready: false },
			hosted_registry("mini"),
			&backend,
			"/nonexistent",
		);

		// Returns normally rather than propagating the backend failure.
		assert!(!interceptor.is_ready("mini", true));
		assert_eq!(backend.attempts(), 1);
	}

	#[test]
	fn test_at_most_one_attempt_per_call() {
		let backend = RefusingBackend::new();
		let interceptor = EnsureInterceptor::with_backend(
			StaticProbe { ready: false },
			hosted_registry("mini"),
			&backend,
			"/nonexistent",
		);

		assert!(!interceptor.is_ready("mini", true));
		assert_eq!(backend.attempts(), 1);

		assert!(!interceptor.is_ready("mini", true));
		assert_eq!(backend.attempts(), 2);
	}

	#[test]
	fn test_registry_mut_allows_overrides() {
		let mut interceptor = EnsureInterceptor::with_backend(
			StaticProbe { ready: true },
			EnsureRegistry::new(),
			RefusingBackend::new(),
			"/nonexistent",
		);

		interceptor
			.registry_mut()
			.register("mini", GrammarSource::hosted());
		assert!(interceptor.is_ready("mini", true));
	}
}
