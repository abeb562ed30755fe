//! Recursive descent over `Atffile` manifests, running every test program
//! it (or a command-line override) names.

use std::io::Write;

use atf_core::cancel::CancelToken;
use atf_core::config::Config;
use atf_core::error::AtfError;
use atf_core::fs::{file_kind, FileKind};
use atf_core::model::{Tcr, TestCaseMeta};
use atf_core::Path;
use atf_format::{read_manifest, read_tp_list, Manifest, TpSpec, TranscriptWriter};
use atf_process::{exec, wait_with_timeout, SpawnRequest, StreamSpec};

use crate::executor::run_case;

/// One resolved test program reachable from the root manifest, with the
/// lexical configuration scope that was active when it was discovered.
struct Entry {
    program: Path,
    config: Config,
}

/// Walk `root_manifest_path`, running every test case of every reachable
/// test program. `cli_program_overrides`, if non-empty, replaces the root
/// manifest's own `tp`/`tp-glob` list with an explicit set of program paths.
pub async fn run_suite<W: Write>(
    root_manifest_path: &Path,
    host_config: &Config,
    cli_overrides: &Config,
    cli_program_overrides: &[Path],
    cancel: &CancelToken,
    transcript: &mut TranscriptWriter<W>,
) -> Result<bool, AtfError> {
    let entries = discover(
        root_manifest_path,
        host_config,
        cli_overrides,
        cli_program_overrides,
    )?;

    transcript
        .write_tps_count(entries.len())
        .map_err(|e| AtfError::FsError(e.to_string()))?;

    let mut all_passed = true;

    for entry in entries {
        if cancel.is_cancelled() {
            transcript
                .start_test_program(entry.program.as_str(), 0)
                .map_err(|e| AtfError::FsError(e.to_string()))?;
            transcript
                .end_test_program(entry.program.as_str(), Some("Run was interrupted"))
                .map_err(|e| AtfError::FsError(e.to_string()))?;
            all_passed = false;
            continue;
        }

        let cases = match list_cases(&entry.program, &entry.config, cancel).await {
            Ok(cases) => cases,
            Err(messages) => {
                transcript
                    .start_test_program(entry.program.as_str(), 0)
                    .map_err(|e| AtfError::FsError(e.to_string()))?;
                transcript
                    .end_test_program(
                        entry.program.as_str(),
                        Some(&format!(
                            "Invalid format for test case list: {}",
                            messages.join("; ")
                        )),
                    )
                    .map_err(|e| AtfError::FsError(e.to_string()))?;
                all_passed = false;
                continue;
            }
        };

        transcript
            .start_test_program(entry.program.as_str(), cases.len())
            .map_err(|e| AtfError::FsError(e.to_string()))?;

        for case in &cases {
            if cancel.is_cancelled() {
                let interrupted = Tcr::Failed("Run was interrupted".to_string());
                transcript
                    .start_test_case(&case.ident)
                    .map_err(|e| AtfError::FsError(e.to_string()))?;
                transcript
                    .end_test_case(&case.ident, &interrupted)
                    .map_err(|e| AtfError::FsError(e.to_string()))?;
                all_passed = false;
                continue;
            }

            let status = run_case(&entry.program, case, &entry.config, cancel, transcript).await?;
            if status.tcr.is_failed() {
                all_passed = false;
            }
        }

        transcript
            .end_test_program(entry.program.as_str(), None)
            .map_err(|e| AtfError::FsError(e.to_string()))?;
    }

    Ok(all_passed)
}

/// Dry traversal: resolve every test program reachable from the manifest
/// tree without running anything, restoring the lexical config scope on
/// return from each subdirectory exactly as the real walk does.
fn discover(
    manifest_path: &Path,
    host_config: &Config,
    cli_overrides: &Config,
    cli_program_overrides: &[Path],
) -> Result<Vec<Entry>, AtfError> {
    let dir = manifest_path.parent();
    let manifest = parse_manifest(manifest_path)?;

    let mut scope = Config::layered(host_config, &manifest.conf, cli_overrides);
    if let Some(suite) = &manifest.test_suite {
        scope.set("atf_suite", suite.clone());
    }

    let mut entries = Vec::new();
    let programs: Vec<Path> = if cli_program_overrides.is_empty() {
        resolve_tp_specs(&dir, &manifest.tps)?
    } else {
        cli_program_overrides.to_vec()
    };

    for program in programs {
        let kind = file_kind(&program).unwrap_or(FileKind::Unknown);
        if kind == FileKind::Directory {
            let nested_manifest = program.join("Atffile")?;
            entries.extend(discover(
                &nested_manifest,
                &scope,
                &Config::new(),
                &[],
            )?);
        } else {
            entries.push(Entry {
                program,
                config: scope.clone(),
            });
        }
    }

    Ok(entries)
}

fn resolve_tp_specs(dir: &Path, tps: &[TpSpec]) -> Result<Vec<Path>, AtfError> {
    let mut out = Vec::new();
    for spec in tps {
        match spec {
            TpSpec::Literal(name) => out.push(dir.join(name)?),
            // Glob expansion against the filesystem is an external
            // collaborator's job; a pre-resolved name is treated
            // identically to a literal `tp`, so an un-expanded pattern here
            // simply yields no matches rather than failing the walk.
            TpSpec::Glob(_) => {}
        }
    }
    Ok(out)
}

fn parse_manifest(path: &Path) -> Result<Manifest, AtfError> {
    let file = std::fs::File::open(path.as_std_path())
        .map_err(|e| AtfError::FsError(format!("{path}: {e}")))?;
    let mut reader = std::io::BufReader::new(file);
    read_manifest(&mut reader, path.as_str())
        .map_err(|errors| AtfError::ConfigError(format!(
            "{path}: {}",
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )))
}

/// Obtain a test program's case list by invoking it in listing mode.
/// Returns the list of per-line parse-error messages instead of an
/// [`AtfError`] so the caller can fold them into the unified "Invalid format
/// for test case list: …" transcript reason.
async fn list_cases(
    program: &Path,
    config: &Config,
    cancel: &CancelToken,
) -> Result<Vec<TestCaseMeta>, Vec<String>> {
    let dir = program.parent();
    let mut args = vec!["-l".to_string(), format!("-s{}", dir.as_str())];
    for (key, value) in config.iter() {
        args.push(format!("-v{key}={value}"));
    }

    let request = SpawnRequest {
        program: program.clone(),
        args,
        cwd: dir.clone(),
        env: vec![],
        stdout: StreamSpec::Capture,
        stderr: StreamSpec::Inherit,
    };

    let mut child = exec(&request).map_err(|e| vec![e.to_string()])?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| vec!["no stdout handle for listing child".to_string()])?;

    let mut reader = std::io::BufReader::new(SyncStdout(stdout));
    let cases = read_tp_list(&mut reader, program.as_str())
        .map_err(|errors| errors.iter().map(ToString::to_string).collect::<Vec<_>>())?;

    let disposition = wait_with_timeout(child, 30, cancel)
        .await
        .map_err(|e| vec![e.to_string()])?;
    if !matches!(disposition, atf_core::ExitDisposition::Exited(0)) {
        return Err(vec![format!("listing exited with {disposition:?}")]);
    }

    Ok(cases)
}

/// Adapts a piped [`tokio::process::ChildStdout`] to the blocking
/// [`std::io::Read`] the header/line parsers expect; listing output is read
/// to completion before the parser returns, so blocking here only ever
/// blocks on data the child is actively producing.
struct SyncStdout(tokio::process::ChildStdout);

impl std::io::Read for SyncStdout {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        use std::os::unix::io::AsRawFd;
        let fd = self.0.as_raw_fd();
        loop {
            let n = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
            if n >= 0 {
                return Ok(n as usize);
            }
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                std::thread::sleep(std::time::Duration::from_millis(5));
                continue;
            }
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err);
        }
    }
}
