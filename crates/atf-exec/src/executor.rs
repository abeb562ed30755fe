//! Drives a single test case through both its phases and reconciles the
//! result.

use std::io::Write;

use atf_core::cancel::CancelToken;
use atf_core::config::Config;
use atf_core::error::AtfError;
use atf_core::model::{ExitDisposition, RunStatus, TestCaseMeta, Tcr};
use atf_core::{Path, TempDir};
use atf_format::{read_tc_result, TranscriptWriter};
use atf_process::{drain_and_wait, exec, OutputLine, SpawnRequest, StreamSpec};

use crate::requirements;

const FALLBACK_WORKDIR_BASE: &str = "/tmp";

/// `atf_workdir` if configured, else `$TMPDIR`, else `/tmp`.
fn workdir_base(config: &Config) -> String {
    if let Some(v) = config.get("atf_workdir") {
        return v.to_string();
    }
    std::env::var("TMPDIR").unwrap_or_else(|_| FALLBACK_WORKDIR_BASE.to_string())
}

/// Run one test case (`meta`) belonging to `program`, reporting every
/// transcript event through `transcript` as it happens.
///
/// A setup or spawn failure (work directory creation, missing results file,
/// fork/exec failure) never aborts the walk: it is reported as a `Failed`
/// case for this `meta` alone, and the caller moves on to the next one.
pub async fn run_case<W: Write>(
    program: &Path,
    meta: &TestCaseMeta,
    config: &Config,
    cancel: &CancelToken,
    transcript: &mut TranscriptWriter<W>,
) -> Result<RunStatus, AtfError> {
    transcript
        .start_test_case(&meta.ident)
        .map_err(|e| AtfError::FsError(e.to_string()))?;

    if let Some(tcr) = requirements::check(meta, config) {
        transcript
            .end_test_case(&meta.ident, &tcr)
            .map_err(|e| AtfError::FsError(e.to_string()))?;
        return Ok(RunStatus {
            tcr,
            disposition: ExitDisposition::Exited(0),
        });
    }

    let base = workdir_base(config);
    let template = format!("{}/atf-{}-XXXXXX", base.trim_end_matches('/'), meta.ident);
    let workdir = match TempDir::new(&template) {
        Ok(w) => w,
        Err(e) => return finish_failed(meta, format!("Could not create a work directory: {e}"), transcript),
    };
    let results_path = match workdir.path().join("results") {
        Ok(p) => p,
        Err(e) => return finish_failed(meta, format!("Could not create a work directory: {e}"), transcript),
    };
    let program_dir = program.parent();

    let mut extra_args = Vec::new();
    for (key, value) in config.iter() {
        extra_args.push(format!("-v{key}={value}"));
    }

    let body_disposition = match run_phase(
        program,
        &program_dir,
        workdir.path(),
        &results_path,
        &extra_args,
        &meta.ident,
        "body",
        meta.timeout,
        cancel,
        transcript,
    )
    .await
    {
        Ok(disposition) => disposition,
        Err(e) => return finish_failed(meta, format!("Could not run the test case: {e}"), transcript),
    };

    let mut tcr = reconcile(body_disposition, meta.timeout, &results_path);

    if meta.has_cleanup {
        match run_phase(
            program,
            &program_dir,
            workdir.path(),
            &results_path,
            &extra_args,
            &meta.ident,
            "cleanup",
            meta.timeout,
            cancel,
            transcript,
        )
        .await
        {
            Ok(cleanup_disposition) => {
                let cleanup_failed = !matches!(cleanup_disposition, ExitDisposition::Exited(0));
                if cleanup_failed && tcr.is_passed() {
                    tcr = Tcr::Failed("Cleanup failed".to_string());
                }
            }
            Err(_) if tcr.is_passed() => {
                tcr = Tcr::Failed("Cleanup failed".to_string());
            }
            Err(_) => {}
        }
    }

    transcript
        .end_test_case(&meta.ident, &tcr)
        .map_err(|e| AtfError::FsError(e.to_string()))?;

    Ok(RunStatus {
        tcr,
        disposition: body_disposition,
    })
}

/// Finish a case whose setup or spawn failed before it could produce any
/// exit disposition: report it as `Failed` rather than propagating the
/// underlying `AtfError`.
fn finish_failed<W: Write>(
    meta: &TestCaseMeta,
    reason: String,
    transcript: &mut TranscriptWriter<W>,
) -> Result<RunStatus, AtfError> {
    let tcr = Tcr::Failed(reason);
    transcript
        .end_test_case(&meta.ident, &tcr)
        .map_err(|e| AtfError::FsError(e.to_string()))?;
    Ok(RunStatus {
        tcr,
        disposition: ExitDisposition::Exited(0),
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_phase<W: Write>(
    program: &Path,
    program_dir: &Path,
    workdir: &Path,
    results_path: &Path,
    extra_args: &[String],
    ident: &str,
    phase: &str,
    timeout: u64,
    cancel: &CancelToken,
    transcript: &mut TranscriptWriter<W>,
) -> Result<ExitDisposition, AtfError> {
    let mut args = vec![
        format!("-r{}", results_path.as_str()),
        format!("-s{}", program_dir.as_str()),
    ];
    args.extend(extra_args.iter().cloned());
    args.push(format!("{ident}:{phase}"));

    let request = SpawnRequest {
        program: program.clone(),
        args,
        cwd: workdir.clone(),
        env: vec![],
        stdout: StreamSpec::Capture,
        stderr: StreamSpec::Capture,
    };

    let child = exec(&request)?;
    let disposition = drain_and_wait(child, timeout, cancel, |line| {
        let result = match &line {
            OutputLine::Stdout(text) => transcript.write_stdout_line(text),
            OutputLine::Stderr(text) => transcript.write_stderr_line(text),
        };
        let _ = result;
    })
    .await?;

    Ok(disposition)
}

fn reconcile(disposition: ExitDisposition, timeout: u64, results_path: &Path) -> Tcr {
    match disposition {
        ExitDisposition::TimedOut => {
            Tcr::Failed(format!("Test case timed out after {timeout} seconds"))
        }
        ExitDisposition::Signaled { signo, coredump } => Tcr::Failed(format!(
            "Test program received signal {signo}{}",
            if coredump { " (core dumped)" } else { "" }
        )),
        ExitDisposition::Exited(code) => reconcile_exited(code, results_path),
    }
}

fn reconcile_exited(code: i32, results_path: &Path) -> Tcr {
    let file = match std::fs::File::open(results_path.as_std_path()) {
        Ok(f) => f,
        Err(e) => {
            return Tcr::Failed(format!(
                "Test case exited normally but failed to create the results file: {e}"
            ))
        }
    };
    let mut reader = std::io::BufReader::new(file);
    let parsed = match read_tc_result(&mut reader, results_path.as_str()) {
        Ok(tcr) => tcr,
        Err(e) => {
            return Tcr::Failed(format!(
                "Test case exited normally but failed to create the results file: {e}"
            ))
        }
    };

    match (&parsed, code) {
        (Tcr::Passed, c) if c != 0 => {
            Tcr::Failed("Test case exited with error but reported success".to_string())
        }
        (Tcr::Failed(_), 0) => {
            Tcr::Failed("Test case exited successfully but reported failure".to_string())
        }
        _ => parsed,
    }
}
