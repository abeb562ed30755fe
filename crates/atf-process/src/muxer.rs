//! Concurrent stdout/stderr line multiplexing for a running child. Reads
//! both streams with `tokio::select!`, driven by a single absolute
//! deadline for the whole case instead of a per-read idle timeout.

use std::time::{Duration, Instant};

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Child;

use atf_core::cancel::CancelToken;
use atf_core::error::AtfError;
use atf_core::model::ExitDisposition;

use crate::kill::{kill_process_group, LinuxProcfsGrabber, PidGrabber};

/// One line of output from either stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Drain a child's piped stdout/stderr concurrently, invoking `on_line` for
/// every complete line as it arrives, then wait for exit. Enforces
/// `timeout_secs` across the whole run (`0` means no deadline); on timeout,
/// or as soon as `cancel` fires, the child's process group is killed and
/// [`ExitDisposition::TimedOut`] is returned.
pub async fn drain_and_wait<F>(
    mut child: Child,
    timeout_secs: u64,
    cancel: &CancelToken,
    mut on_line: F,
) -> Result<ExitDisposition, AtfError>
where
    F: FnMut(OutputLine),
{
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let pid = child.id().map(|p| p as i32);

    let deadline = if timeout_secs == 0 {
        None
    } else {
        Some(Instant::now() + Duration::from_secs(timeout_secs))
    };

    let mut stdout_reader = stdout.map(|s| BufReader::new(s).lines());
    let mut stderr_reader = stderr.map(|s| BufReader::new(s).lines());
    let mut stdout_done = stdout_reader.is_none();
    let mut stderr_done = stderr_reader.is_none();

    while !stdout_done || !stderr_done {
        let remaining = match deadline {
            Some(d) => match d.checked_duration_since(Instant::now()) {
                Some(r) => r,
                None => {
                    timeout_kill(&mut child, pid);
                    let _ = child.wait().await;
                    return Ok(ExitDisposition::TimedOut);
                }
            },
            None => Duration::from_secs(u64::MAX / 4),
        };

        tokio::select! {
            line = read_next(&mut stdout_reader), if !stdout_done => {
                match line {
                    Some(Ok(Some(text))) => on_line(OutputLine::Stdout(text)),
                    Some(Ok(None)) | Some(Err(_)) | None => stdout_done = true,
                }
            }
            line = read_next(&mut stderr_reader), if !stderr_done => {
                match line {
                    Some(Ok(Some(text))) => on_line(OutputLine::Stderr(text)),
                    Some(Ok(None)) | Some(Err(_)) | None => stderr_done = true,
                }
            }
            _ = tokio::time::sleep(remaining) => {
                if deadline.is_some() {
                    timeout_kill(&mut child, pid);
                    let _ = child.wait().await;
                    return Ok(ExitDisposition::TimedOut);
                }
            }
            _ = cancel.cancelled() => {
                timeout_kill(&mut child, pid);
                let _ = child.wait().await;
                return Ok(ExitDisposition::TimedOut);
            }
        }
    }

    let status = child.wait().await.map_err(|e| AtfError::SpawnError {
        program: "<child>".to_string(),
        message: e.to_string(),
    })?;

    Ok(crate::spawn::exit_disposition_of(status))
}

fn timeout_kill(child: &mut Child, pid: Option<i32>) {
    if let Some(pid) = pid {
        let _ = kill_process_group(pid, libc::SIGKILL);
        let grabber = LinuxProcfsGrabber;
        if grabber.can_enumerate() {
            let _ = crate::kill::kill_tree(pid, libc::SIGKILL, &grabber);
        }
    } else {
        let _ = child.start_kill();
    }
}

type Lines<T> = tokio::io::Lines<BufReader<T>>;

async fn read_next<T: tokio::io::AsyncRead + Unpin>(
    reader: &mut Option<Lines<T>>,
) -> Option<std::io::Result<Option<String>>> {
    match reader {
        Some(r) => Some(r.next_line().await),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::{exec, SpawnRequest, StreamSpec};
    use atf_core::cancel::cancel_pair;
    use atf_core::Path;
    use std::sync::{Arc, Mutex};

    fn path(s: &str) -> Path {
        Path::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_drain_and_wait_captures_both_streams() {
        let request = SpawnRequest {
            program: path("/bin/sh"),
            args: vec![
                "-c".to_string(),
                "echo out-line; echo err-line >&2".to_string(),
            ],
            cwd: path("/tmp"),
            env: vec![],
            stdout: StreamSpec::Capture,
            stderr: StreamSpec::Capture,
        };
        let child = exec(&request).unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        let disposition = drain_and_wait(child, 5, &CancelToken::inert(), move |line| {
            collected.lock().unwrap().push(line);
        })
        .await
        .unwrap();

        assert_eq!(disposition, ExitDisposition::Exited(0));
        let lines = lines.lock().unwrap();
        assert!(lines.contains(&OutputLine::Stdout("out-line".to_string())));
        assert!(lines.contains(&OutputLine::Stderr("err-line".to_string())));
    }

    #[tokio::test]
    async fn test_drain_and_wait_times_out_long_running_child() {
        let request = SpawnRequest {
            program: path("/bin/sleep"),
            args: vec!["30".to_string()],
            cwd: path("/tmp"),
            env: vec![],
            stdout: StreamSpec::Capture,
            stderr: StreamSpec::Capture,
        };
        let child = exec(&request).unwrap();

        let disposition = drain_and_wait(child, 1, &CancelToken::inert(), |_| {})
            .await
            .unwrap();
        assert_eq!(disposition, ExitDisposition::TimedOut);
    }

    #[tokio::test]
    async fn test_drain_and_wait_zero_timeout_runs_to_completion() {
        let request = SpawnRequest {
            program: path("/bin/sh"),
            args: vec!["-c".to_string(), "echo done".to_string()],
            cwd: path("/tmp"),
            env: vec![],
            stdout: StreamSpec::Capture,
            stderr: StreamSpec::Capture,
        };
        let child = exec(&request).unwrap();

        let lines = Arc::new(Mutex::new(Vec::new()));
        let collected = lines.clone();
        let disposition = drain_and_wait(child, 0, &CancelToken::inert(), move |line| {
            collected.lock().unwrap().push(line);
        })
        .await
        .unwrap();

        assert_eq!(disposition, ExitDisposition::Exited(0));
        assert_eq!(
            lines.lock().unwrap().as_slice(),
            &[OutputLine::Stdout("done".to_string())]
        );
    }

    #[tokio::test]
    async fn test_drain_and_wait_cancelled_kills_long_running_child() {
        let request = SpawnRequest {
            program: path("/bin/sleep"),
            args: vec!["30".to_string()],
            cwd: path("/tmp"),
            env: vec![],
            stdout: StreamSpec::Capture,
            stderr: StreamSpec::Capture,
        };
        let child = exec(&request).unwrap();

        let (handle, token) = cancel_pair();
        handle.cancel();
        let disposition = drain_and_wait(child, 0, &token, |_| {}).await.unwrap();
        assert_eq!(disposition, ExitDisposition::TimedOut);
    }
}
