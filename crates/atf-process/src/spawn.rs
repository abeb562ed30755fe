//! Child process driver: pre-exec isolation, spawning and timeout-bounded
//! waiting.

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use atf_core::cancel::CancelToken;
use atf_core::error::AtfError;
use atf_core::model::ExitDisposition;
use atf_core::Path;
use tokio::process::{Child, Command};

use crate::kill::{kill_process_group, LinuxProcfsGrabber, PidGrabber};

/// Where a child's stdout/stderr should go.
#[derive(Debug, Clone)]
pub enum StreamSpec {
    /// Share the parent's stream unmodified.
    Inherit,
    /// Pipe the stream back for in-process consumption.
    Capture,
    /// `dup2` the given descriptor onto this stream in the child, e.g. to
    /// merge stderr onto stdout with target fd 1.
    RedirectToFd(i32),
    /// Redirect the stream to a file at the given path, truncating it.
    RedirectToPath(Path),
}

/// Everything needed to spawn one child, already resolved by the caller:
/// no further path lookups or environment merging happen here.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub program: Path,
    pub args: Vec<String>,
    pub cwd: Path,
    /// Extra environment variables layered on top of the sanitized base.
    pub env: Vec<(String, String)>,
    pub stdout: StreamSpec,
    pub stderr: StreamSpec,
}

/// `LANG`, every `LC_*` variable, and `TZ` are stripped so tests cannot
/// depend on the invoking user's locale.
fn is_locale_env_var(name: &str) -> bool {
    name == "LANG" || name == "TZ" || name.starts_with("LC_")
}

fn stdio_for(spec: &StreamSpec, path_for_redirect: Option<std::fs::File>) -> Stdio {
    match spec {
        StreamSpec::Inherit => Stdio::inherit(),
        StreamSpec::Capture => Stdio::piped(),
        // The actual redirect happens via dup2 in pre_exec; this is just a
        // placeholder slot that pre_exec will overwrite before exec.
        StreamSpec::RedirectToFd(_) => Stdio::null(),
        StreamSpec::RedirectToPath(_) => match path_for_redirect {
            Some(f) => Stdio::from(f),
            None => Stdio::null(),
        },
    }
}

fn open_redirect(spec: &StreamSpec) -> Option<std::fs::File> {
    match spec {
        StreamSpec::RedirectToPath(path) => std::fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_std_path())
            .ok(),
        _ => None,
    }
}

/// Spawn `request` with the pre-exec isolation a test case needs: a fresh
/// process group, a known umask, default signal dispositions, a sanitized
/// environment, and the working directory set before `exec`.
pub fn exec(request: &SpawnRequest) -> Result<Child, AtfError> {
    let mut cmd = Command::new(request.program.as_std_path());
    cmd.args(&request.args);
    cmd.current_dir(request.cwd.as_std_path());
    cmd.kill_on_drop(true);

    cmd.stdin(Stdio::null());
    let stdout_file = open_redirect(&request.stdout);
    let stderr_file = open_redirect(&request.stderr);
    cmd.stdout(stdio_for(&request.stdout, stdout_file));
    cmd.stderr(stdio_for(&request.stderr, stderr_file));

    for (key, _) in std::env::vars() {
        if is_locale_env_var(&key) {
            cmd.env_remove(key);
        }
    }
    cmd.env("HOME", request.cwd.as_str());
    for (key, value) in &request.env {
        cmd.env(key, value);
    }

    let stdout_dup2 = match request.stdout {
        StreamSpec::RedirectToFd(source) => Some((1, source)),
        _ => None,
    };
    let stderr_dup2 = match request.stderr {
        StreamSpec::RedirectToFd(source) => Some((2, source)),
        _ => None,
    };

    // SAFETY: only async-signal-safe calls run between fork and exec.
    unsafe {
        cmd.pre_exec(move || {
            if libc::setpgid(0, 0) == -1 {
                return Err(std::io::Error::last_os_error());
            }
            libc::umask(0o022);
            libc::signal(libc::SIGPIPE, libc::SIG_DFL);
            libc::signal(libc::SIGINT, libc::SIG_DFL);
            libc::signal(libc::SIGTERM, libc::SIG_DFL);
            if let Some((target, source)) = stdout_dup2 {
                if libc::dup2(source, target) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if let Some((target, source)) = stderr_dup2 {
                if libc::dup2(source, target) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            Ok(())
        });
    }

    cmd.spawn().map_err(|e| AtfError::SpawnError {
        program: request.program.as_str().to_string(),
        message: e.to_string(),
    })
}

/// Wait for `child` to exit, killing its entire process group and reporting
/// [`ExitDisposition::TimedOut`] if it runs past `timeout_secs`, or as soon
/// as `cancel` fires. A value of `0` for `timeout_secs` means wait
/// indefinitely (subject to `cancel`), matching a test case with no timeout.
pub async fn wait_with_timeout(
    mut child: Child,
    timeout_secs: u64,
    cancel: &CancelToken,
) -> Result<ExitDisposition, AtfError> {
    let pid = child.id().map(|p| p as i32);

    enum Outcome {
        Exited(std::process::ExitStatus),
        TimedOut,
    }

    let outcome = if timeout_secs == 0 {
        tokio::select! {
            result = child.wait() => Outcome::Exited(result.map_err(|e| AtfError::SpawnError {
                program: "<child>".to_string(),
                message: e.to_string(),
            })?),
            _ = cancel.cancelled() => Outcome::TimedOut,
        }
    } else {
        tokio::select! {
            result = tokio::time::timeout(Duration::from_secs(timeout_secs), child.wait()) => {
                match result {
                    Ok(r) => Outcome::Exited(r.map_err(|e| AtfError::SpawnError {
                        program: "<child>".to_string(),
                        message: e.to_string(),
                    })?),
                    Err(_) => Outcome::TimedOut,
                }
            }
            _ = cancel.cancelled() => Outcome::TimedOut,
        }
    };

    match outcome {
        Outcome::Exited(status) => Ok(exit_disposition_of(status)),
        Outcome::TimedOut => {
            kill_and_reap(pid, &mut child).await;
            Ok(ExitDisposition::TimedOut)
        }
    }
}

async fn kill_and_reap(pid: Option<i32>, child: &mut Child) {
    if let Some(pid) = pid {
        let _ = kill_process_group(pid, libc::SIGKILL);
        let grabber = LinuxProcfsGrabber;
        if grabber.can_enumerate() {
            let _ = crate::kill::kill_tree(pid, libc::SIGKILL, &grabber);
        }
    }
    let _ = child.wait().await;
}

pub(crate) fn exit_disposition_of(status: std::process::ExitStatus) -> ExitDisposition {
    if let Some(code) = status.code() {
        ExitDisposition::Exited(code)
    } else if let Some(signo) = status.signal() {
        ExitDisposition::Signaled {
            signo,
            coredump: status.core_dumped(),
        }
    } else {
        ExitDisposition::Exited(-1)
    }
}
