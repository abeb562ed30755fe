use std::io;

use anyhow::Result;
use clap::Parser;

use atf_core::config::Config;
use atf_core::error::AtfError;
use atf_core::Path;
use atf_format::TranscriptWriter;

const EXIT_OK: i32 = 0;
const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Runs the test suite rooted at an `Atffile` manifest, streaming a `tps`
/// transcript to stdout.
#[derive(Parser, Debug)]
#[command(name = "atf-run")]
struct Cli {
    /// Override a configuration variable for the entire run, `name=value`.
    #[arg(short = 'v', value_name = "name=value")]
    vars: Vec<String>,

    /// Test program paths overriding the root manifest's own `tp` list.
    program_paths: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let exit_code = match run(cli).await {
        Ok(code) => code,
        Err(UsageOrFailure::Usage(message)) => {
            eprintln!("atf-run: {message}");
            EXIT_USAGE
        }
        Err(UsageOrFailure::Framework(e)) => {
            eprintln!("atf-run: {e}");
            EXIT_FAILURE
        }
    };
    std::process::exit(exit_code);
}

enum UsageOrFailure {
    Usage(String),
    Framework(anyhow::Error),
}

impl From<AtfError> for UsageOrFailure {
    fn from(e: AtfError) -> Self {
        UsageOrFailure::Framework(e.into())
    }
}

async fn run(cli: Cli) -> Result<i32, UsageOrFailure> {
    let mut cli_overrides = Config::new();
    for raw in &cli.vars {
        let (name, value) = raw
            .split_once('=')
            .ok_or_else(|| UsageOrFailure::Usage(format!("'-v {raw}' is not 'name=value'")))?;
        if name.is_empty() {
            return Err(UsageOrFailure::Usage(format!("'-v {raw}' has an empty name")));
        }
        cli_overrides.set(name, value);
    }

    let cwd = std::env::current_dir()
        .map_err(|e| UsageOrFailure::Framework(anyhow::anyhow!("cannot determine current directory: {e}")))?;
    let cwd = Path::new(cwd.to_string_lossy().into_owned())?;

    let root_manifest = cwd.join("Atffile")?;

    let mut program_overrides = Vec::new();
    for raw in &cli.program_paths {
        let p = Path::new(raw.as_str())?;
        program_overrides.push(p.to_absolute_against(&cwd)?);
    }

    let host_config = host_config();

    let stdout = io::stdout();
    let mut transcript =
        TranscriptWriter::new(stdout.lock()).map_err(|e| UsageOrFailure::Framework(e.into()))?;

    let (cancel_handle, cancel_token) = atf_core::cancel_pair();
    spawn_signal_watcher(cancel_handle);

    let all_passed = atf_exec::run_suite(
        &root_manifest,
        &host_config,
        &cli_overrides,
        &program_overrides,
        &cancel_token,
        &mut transcript,
    )
    .await?;

    Ok(if all_passed { EXIT_OK } else { EXIT_FAILURE })
}

/// Observes `SIGINT`/`SIGTERM` and fires `handle` on whichever arrives
/// first, so the current case is timed out early and the transcript is
/// finalized with synthesized failures for whatever remains.
fn spawn_signal_watcher(handle: atf_core::CancelHandle) {
    tokio::spawn(async move {
        let mut sigint = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()) {
            Ok(s) => s,
            Err(_) => return,
        };
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        handle.cancel();
    });
}

/// Host-scope configuration: just `atf_arch`/`atf_machine` from `uname`, plus
/// `PATH` inherited from the invoking shell so `require.progs` can resolve
/// bare names.
fn host_config() -> Config {
    let mut config = Config::new();
    if let Ok(path) = std::env::var("PATH") {
        config.set("PATH", path);
    }
    if let Some(machine) = uname_machine() {
        config.set("atf_arch", normalize_arch(&machine));
        config.set("atf_machine", machine);
    }
    config
}

fn uname_machine() -> Option<String> {
    // SAFETY: `uts` is a correctly sized, zeroed buffer for `uname(2)`.
    let mut uts: libc::utsname = unsafe { std::mem::zeroed() };
    // SAFETY: `uts` is valid for the duration of the call.
    if unsafe { libc::uname(&mut uts) } != 0 {
        return None;
    }
    Some(cstr_to_string(uts.machine.as_ptr()))
}

fn cstr_to_string(ptr: *const libc::c_char) -> String {
    // SAFETY: `ptr` comes from a populated `utsname` field, which is always
    // NUL-terminated.
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

fn normalize_arch(machine: &str) -> String {
    match machine {
        "x86_64" => "amd64".to_string(),
        other => other.to_string(),
    }
}
