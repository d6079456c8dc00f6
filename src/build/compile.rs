//! Grammar compilation into dynamic libraries.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use super::{EnsureError, Result};
use crate::artifact::{artifact_dir, library_file_name};

/// Pinned upstream providing the module header and language-stub template
/// that grammar builds expect next to their sources.
const SUPPORT_BASE_URL: &str = "https://raw.githubusercontent.com/casouri/tree-sitter-module/v2.2";

/// Support files fetched into the compilation working directory.
const SUPPORT_FILES: [&str; 2] = ["tree-sitter-module.h", "tree-sitter-lang.in"];

/// Network timeout for support-file downloads.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30);

/// Grammar metadata read from `grammar.json`.
#[derive(Debug, Deserialize)]
struct GrammarMetadata {
	name: String,
}

/// Returns the first compiler from `candidates` that executes successfully.
fn find_compiler<'a>(candidates: &[&'a str]) -> Option<&'a str> {
	candidates.iter().copied().find(|name| {
		Command::new(name)
			.arg("--version")
			.stdout(Stdio::null())
			.stderr(Stdio::null())
			.status()
			.is_ok()
	})
}

/// Resolves C and C++ compilers, preferring environment variables then probing common names.
///
/// On Unix, probes `cc`, `clang`, `gcc`. On Windows, probes `cl`, `clang-cl`, `clang`, `gcc`.
/// Returns `None` for a compiler if neither the environment variable nor any candidate is found.
fn resolve_compilers() -> (Option<&'static str>, Option<&'static str>) {
	static COMPILERS: OnceLock<(Option<&'static str>, Option<&'static str>)> = OnceLock::new();
	*COMPILERS.get_or_init(|| {
		#[cfg(unix)]
		const CC_CANDIDATES: &[&str] = &["cc", "clang", "gcc"];
		#[cfg(unix)]
		const CXX_CANDIDATES: &[&str] = &["c++", "clang++", "g++"];
		#[cfg(windows)]
		const CC_CANDIDATES: &[&str] = &["cl", "clang-cl", "clang", "gcc"];
		#[cfg(windows)]
		const CXX_CANDIDATES: &[&str] = &["cl", "clang-cl", "clang++", "g++"];
		#[cfg(not(any(unix, windows)))]
		const CC_CANDIDATES: &[&str] = &["cc", "clang", "gcc"];
		#[cfg(not(any(unix, windows)))]
		const CXX_CANDIDATES: &[&str] = &["c++", "clang++", "g++"];

		let cc = std::env::var("CC")
			.ok()
			.map(|s| s.leak() as &str)
			.or_else(|| find_compiler(CC_CANDIDATES));
		let cxx = std::env::var("CXX")
			.ok()
			.map(|s| s.leak() as &str)
			.or_else(|| find_compiler(CXX_CANDIDATES));
		(cc, cxx)
	})
}

/// Compiles a grammar source tree into a dynamic library.
///
/// `source` is the grammar root (defaults to the current directory; relative
/// paths resolve against it). Compilation happens in its `src/` subdirectory,
/// which must hold `grammar.json` and `parser.c`. The artifact lands in
/// `destination` (defaults to [`artifact_dir`]), created on demand, named
/// `libtree-sitter-<name>` with the platform suffix. Returns the artifact
/// path.
///
/// A `scanner.cc` in the working directory selects the C++ compiler;
/// otherwise a `scanner.c` is included with the C compiler; with neither, the
/// grammar is built from `parser.c` alone.
///
/// Safe to invoke repeatedly: support files already present are left alone
/// and an existing artifact is overwritten.
///
/// # Errors
///
/// * [`EnsureError::GrammarMetadata`] if `grammar.json` is missing or has no
///   usable `name` field.
/// * [`EnsureError::NoParserSource`] if `parser.c` is absent.
/// * [`EnsureError::Download`] if a support file cannot be fetched.
/// * [`EnsureError::Compilation`] if the compiler exits non-zero; the message
///   is the compiler's own combined output.
pub fn compile(source: Option<&Path>, destination: Option<&Path>) -> Result<PathBuf> {
	let destination = match destination {
		Some(dir) => absolute(dir)?,
		None => artifact_dir(),
	};
	fs::create_dir_all(&destination)?;

	let source = match source {
		Some(dir) => absolute(dir)?,
		None => std::env::current_dir()?,
	};
	let workdir = source.join("src");

	let name = read_grammar_name(&workdir)?;

	if !workdir.join("parser.c").exists() {
		return Err(EnsureError::NoParserSource(workdir));
	}

	fetch_support_files(&workdir)?;

	let scanner_cc = workdir.join("scanner.cc");
	let scanner_c = workdir.join("scanner.c");
	let needs_cxx = scanner_cc.exists();

	let (cc, cxx) = resolve_compilers();
	let compiler = if needs_cxx {
		cxx.ok_or_else(|| {
			EnsureError::Compilation(format!(
				"C++ compiler required for {name} but none found. \
				 Install clang++/g++ or set CXX env var."
			))
		})?
	} else {
		cc.ok_or_else(|| {
			EnsureError::Compilation(
				"C compiler required but none found. Install clang/gcc or set CC env var.".into(),
			)
		})?
	};

	let lib_path = destination.join(library_file_name(&name));

	info!(grammar = %name, lib_path = %lib_path.display(), "Compiling grammar");
	link_shared_library(&workdir, &lib_path, compiler, needs_cxx, &scanner_cc, &scanner_c)?;

	tracing::debug!(grammar = %name, lib_path = %lib_path.display(), "Successfully compiled grammar");
	Ok(lib_path)
}

/// Resolves a path against the current directory if it is relative.
fn absolute(path: &Path) -> Result<PathBuf> {
	if path.is_absolute() {
		Ok(path.to_path_buf())
	} else {
		Ok(std::env::current_dir()?.join(path))
	}
}

/// Reads the grammar's declared name from `grammar.json` in `workdir`.
fn read_grammar_name(workdir: &Path) -> Result<String> {
	let path = workdir.join("grammar.json");
	let text = fs::read_to_string(&path).map_err(|e| EnsureError::GrammarMetadata {
		path: path.clone(),
		reason: e.to_string(),
	})?;

	let metadata: GrammarMetadata =
		serde_json::from_str(&text).map_err(|e| EnsureError::GrammarMetadata {
			path: path.clone(),
			reason: e.to_string(),
		})?;

	if metadata.name.is_empty() {
		return Err(EnsureError::GrammarMetadata {
			path,
			reason: "empty name field".into(),
		});
	}

	Ok(metadata.name)
}

/// Downloads the support files into `workdir`, skipping any that already exist.
fn fetch_support_files(workdir: &Path) -> Result<()> {
	fetch_support_files_from(SUPPORT_BASE_URL, workdir)
}

fn fetch_support_files_from(base_url: &str, workdir: &Path) -> Result<()> {
	for file in SUPPORT_FILES {
		let dest = workdir.join(file);
		if support_file_present(&dest) {
			continue;
		}

		let url = format!("{base_url}/{file}");
		tracing::debug!(url = %url, "Downloading grammar support file");
		download_to_file(&url, &dest)?;
	}

	Ok(())
}

/// A zero-byte stub never counts as present; it gets refetched.
fn support_file_present(dest: &Path) -> bool {
	fs::metadata(dest).is_ok_and(|m| m.len() > 0)
}

/// Download a URL and write the body to a file.
///
/// The body lands under a temporary name and is renamed into place once fully
/// written, so `dest` only ever holds a complete download.
fn download_to_file(url: &str, dest: &Path) -> Result<()> {
	let response = http_agent()
		.get(url)
		.call()
		.map_err(|e| EnsureError::Download {
			url: url.to_owned(),
			reason: e.to_string(),
		})?;

	let partial = dest.with_extension("part");
	let mut file = fs::File::create(&partial)?;
	let copied = std::io::copy(&mut response.into_body().as_reader(), &mut file);
	drop(file);

	match copied {
		Ok(_) => {
			fs::rename(&partial, dest)?;
			Ok(())
		}
		Err(e) => {
			let _ = fs::remove_file(&partial);
			Err(e.into())
		}
	}
}

/// Shared `ureq` agent with request timeout configuration.
fn http_agent() -> &'static ureq::Agent {
	static AGENT: OnceLock<ureq::Agent> = OnceLock::new();
	AGENT.get_or_init(|| {
		let config = ureq::Agent::config_builder()
			.timeout_global(Some(DOWNLOAD_TIMEOUT))
			.build();
		ureq::Agent::new_with_config(config)
	})
}

/// Links source files into a shared library using the system compiler.
fn link_shared_library(
	workdir: &Path,
	lib_path: &Path,
	compiler: &str,
	needs_cxx: bool,
	scanner_cc: &Path,
	scanner_c: &Path,
) -> Result<()> {
	#[cfg(unix)]
	{
		let mut cmd = Command::new(compiler);
		cmd.args(["-shared", "-fPIC", "-O3", "-fno-exceptions"])
			.arg("-I")
			.arg(workdir)
			.arg("-o")
			.arg(lib_path)
			.arg(workdir.join("parser.c"));

		if needs_cxx {
			cmd.args(["-std=c++14", "-lstdc++"]).arg(scanner_cc);
		} else if scanner_c.exists() {
			cmd.arg(scanner_c);
		}

		#[cfg(target_os = "linux")]
		cmd.arg("-Wl,-z,relro,-z,now");

		run_compiler(cmd)
	}

	#[cfg(windows)]
	{
		let mut cmd = Command::new(compiler);
		cmd.args(["/nologo", "/LD", "/O2", "/utf-8"])
			.arg(format!("/I{}", workdir.display()))
			.arg(format!("/Fe:{}", lib_path.display()))
			.arg(workdir.join("parser.c"));

		if needs_cxx {
			cmd.arg("/std:c++14").arg(scanner_cc);
		} else if scanner_c.exists() {
			cmd.arg(scanner_c);
		}

		run_compiler(cmd)
	}
}

/// Runs the compiler, preserving its combined output as the diagnostic.
fn run_compiler(mut cmd: Command) -> Result<()> {
	let output = cmd
		.output()
		.map_err(|e| EnsureError::Compilation(e.to_string()))?;

	if output.status.success() {
		Ok(())
	} else {
		let mut diagnostic = String::from_utf8_lossy(&output.stdout).into_owned();
		diagnostic.push_str(&String::from_utf8_lossy(&output.stderr));
		Err(EnsureError::Compilation(diagnostic))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn workdir_with_grammar_json(contents: &str) -> tempfile::TempDir {
		let dir = tempfile::tempdir().unwrap();
		fs::write(dir.path().join("grammar.json"), contents).unwrap();
		dir
	}

	#[test]
	fn test_read_grammar_name() {
		let dir = workdir_with_grammar_json(r#"{"name": "mini", "rules": {}}"#);
		assert_eq!(read_grammar_name(dir.path()).unwrap(), "mini");
	}

	#[test]
	fn test_missing_grammar_json_is_metadata_error() {
		let dir = tempfile::tempdir().unwrap();
		let err = read_grammar_name(dir.path()).unwrap_err();
		assert!(matches!(err, EnsureError::GrammarMetadata { .. }));
	}

	#[test]
	fn test_grammar_json_without_name_is_metadata_error() {
		let dir = workdir_with_grammar_json(r#"{"rules": {}}"#);
		let err = read_grammar_name(dir.path()).unwrap_err();
		assert!(matches!(err, EnsureError::GrammarMetadata { .. }));
	}

	#[test]
	fn test_empty_name_is_metadata_error() {
		let dir = workdir_with_grammar_json(r#"{"name": ""}"#);
		let err = read_grammar_name(dir.path()).unwrap_err();
		assert!(matches!(err, EnsureError::GrammarMetadata { .. }));
	}

	/// Serves one canned HTTP response on a local port.
	fn serve_once(body: &'static str) -> (String, std::thread::JoinHandle<()>) {
		use std::io::{Read, Write};

		let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
		let addr = listener.local_addr().unwrap();
		let handle = std::thread::spawn(move || {
			let (mut stream, _) = listener.accept().unwrap();
			let mut request = [0u8; 1024];
			let _ = stream.read(&mut request);
			let response = format!(
				"HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
				body.len(),
				body
			);
			let _ = stream.write_all(response.as_bytes());
		});
		(format!("http://{addr}"), handle)
	}

	#[test]
	fn test_truncated_support_file_is_refetched() {
		let dir = tempfile::tempdir().unwrap();
		// The state an interrupted download used to leave behind.
		fs::write(dir.path().join("tree-sitter-module.h"), "").unwrap();
		fs::write(dir.path().join("tree-sitter-lang.in"), "// placeholder").unwrap();

		let (base_url, server) = serve_once("// repaired");
		fetch_support_files_from(&base_url, dir.path()).unwrap();
		server.join().unwrap();

		let contents = fs::read_to_string(dir.path().join("tree-sitter-module.h")).unwrap();
		assert_eq!(contents, "// repaired");
		assert!(!dir.path().join("tree-sitter-module.part").exists());
	}

	#[test]
	fn test_failed_download_leaves_nothing_behind() {
		let dir = tempfile::tempdir().unwrap();
		let dest = dir.path().join("tree-sitter-module.h");

		// Grab a free port and release it, so nothing answers the request.
		let port = {
			let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
			listener.local_addr().unwrap().port()
		};
		let url = format!("http://127.0.0.1:{port}/tree-sitter-module.h");
		let err = download_to_file(&url, &dest).unwrap_err();
		assert!(matches!(err, EnsureError::Download { .. }));
		assert!(!dest.exists());
		assert!(!dir.path().join("tree-sitter-module.part").exists());
	}

	#[test]
	fn test_existing_support_files_are_not_refetched() {
		let dir = tempfile::tempdir().unwrap();
		for file in SUPPORT_FILES {
			fs::write(dir.path().join(file), "// placeholder").unwrap();
		}

		// No network access happens when both files are present.
		fetch_support_files(dir.path()).unwrap();

		for file in SUPPORT_FILES {
			let contents = fs::read_to_string(dir.path().join(file)).unwrap();
			assert_eq!(contents, "// placeholder");
		}
	}

	#[test]
	fn test_compile_without_parser_source() {
		let root = tempfile::tempdir().unwrap();
		let workdir = root.path().join("src");
		fs::create_dir_all(&workdir).unwrap();
		fs::write(workdir.join("grammar.json"), r#"{"name": "mini"}"#).unwrap();

		let dest = tempfile::tempdir().unwrap();
		let err = compile(Some(root.path()), Some(dest.path())).unwrap_err();
		assert!(matches!(err, EnsureError::NoParserSource(_)));
	}
}
