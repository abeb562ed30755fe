//! Recursive process-tree termination.
//!
//! The enumeration strategy is pluggable because discovering a process's
//! children is platform-specific; only the Linux procfs strategy and an
//! "unsupported" fallback are implemented here.

use std::collections::BTreeSet;
use std::fs;

use atf_core::error::AtfError;

/// Discovers the direct children of a pid. Implementations that cannot do
/// this honestly report `can_enumerate() == false` so `kill_tree` can fall
/// back to single-process signaling with a clear diagnostic.
pub trait PidGrabber {
    fn can_enumerate(&self) -> bool;
    fn children_of(&self, pid: i32) -> BTreeSet<i32>;
}

/// Enumerates children by scanning `/proc/<pid>/stat` for a matching ppid
/// field, the same approach `ps`/`pgrep` use on Linux.
pub struct LinuxProcfsGrabber;

impl PidGrabber for LinuxProcfsGrabber {
    fn can_enumerate(&self) -> bool {
        true
    }

    fn children_of(&self, pid: i32) -> BTreeSet<i32> {
        let mut children = BTreeSet::new();
        let entries = match fs::read_dir("/proc") {
            Ok(entries) => entries,
            Err(_) => return children,
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let name = match name.to_str() {
                Some(n) => n,
                None => continue,
            };
            if !name.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            if let Some(ppid) = parent_pid_of(name) {
                if ppid == pid {
                    if let Ok(child_pid) = name.parse::<i32>() {
                        children.insert(child_pid);
                    }
                }
            }
        }
        children
    }
}

fn parent_pid_of(pidstr: &str) -> Option<i32> {
    let stat = fs::read_to_string(format!("/proc/{pidstr}/stat")).ok()?;
    // Fields: pid (comm) state ppid ...; comm may contain spaces/parens, so
    // split after the last ')' rather than on whitespace naively.
    let after_comm = stat.rfind(')')?;
    let rest = &stat[after_comm + 1..];
    let mut fields = rest.split_whitespace();
    fields.next()?; // state
    fields.next()?.parse().ok()
}

/// Reports that it cannot enumerate children; used on platforms with no
/// implemented strategy.
pub struct UnsupportedGrabber;

impl PidGrabber for UnsupportedGrabber {
    fn can_enumerate(&self) -> bool {
        false
    }

    fn children_of(&self, _pid: i32) -> BTreeSet<i32> {
        BTreeSet::new()
    }
}

/// Picks the best [`PidGrabber`] for the current platform.
pub fn default_grabber() -> Box<dyn PidGrabber> {
    if cfg!(target_os = "linux") {
        Box::new(LinuxProcfsGrabber)
    } else {
        Box::new(UnsupportedGrabber)
    }
}

/// Recursively kill `pid` and its descendants with `signo`.
///
/// Stops the root first so it cannot spawn new children while the tree is
/// being discovered, recurses into every child found, then delivers the
/// final signal: `SIGKILL` is sent directly, anything else is preceded by
/// `SIGCONT` so a stopped process actually observes it. Returns the
/// diagnostics collected along the way instead of failing outright, since a
/// best-effort kill should still signal whatever it reached.
pub fn kill_tree(pid: i32, signo: i32, grabber: &dyn PidGrabber) -> Vec<String> {
    let mut diagnostics = Vec::new();

    if !grabber.can_enumerate() {
        diagnostics.push(format!(
            "{pid}: only killing this process because this platform is currently unsupported"
        ));
        send_signal(pid, signo);
        return diagnostics;
    }

    if send_signal(pid, libc::SIGSTOP).is_err() {
        diagnostics.push(format!("{pid}: some children may not be killed"));
    }

    for child in grabber.children_of(pid) {
        diagnostics.extend(kill_tree(child, signo, grabber));
    }

    if signo == libc::SIGKILL {
        let _ = send_signal(pid, signo);
    } else {
        let _ = send_signal(pid, libc::SIGCONT);
        let _ = send_signal(pid, signo);
    }

    diagnostics
}

fn send_signal(pid: i32, signo: i32) -> Result<(), ()> {
    // SAFETY: kill() is async-signal-safe and requires no preconditions
    // beyond a valid signal number; failures are reported via errno.
    let rc = unsafe { libc::kill(pid, signo) };
    if rc == -1 {
        Err(())
    } else {
        Ok(())
    }
}

/// Kill an entire process group, used when the tree's root is the leader of
/// its own group.
pub fn kill_process_group(pgid: i32, signo: i32) -> Result<(), AtfError> {
    send_signal(-pgid, signo).map_err(|_| {
        AtfError::KillTreeError(format!("failed to signal process group {pgid} with {signo}"))
    })
}
