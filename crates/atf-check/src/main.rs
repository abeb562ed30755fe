use std::io::Write as _;
use std::process::Command;

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use regex::Regex;

/// Runs a command and checks its exit status and output streams against a
/// set of specs, all of which must hold for success.
#[derive(Parser, Debug)]
#[command(name = "atf-check")]
struct Cli {
    /// `eq:N`, `ne:N` or `ignore`. May be given more than once.
    #[arg(short = 's', value_name = "status-spec")]
    status_specs: Vec<String>,

    /// `ignore`, `empty`, `inline:<bytes>`, `file:<path>`, `match:<regex>`
    /// or `save:<path>`, applied to stdout. May be given more than once.
    #[arg(short = 'o', value_name = "out-spec")]
    out_specs: Vec<String>,

    /// Same grammar as `-o`, applied to stderr.
    #[arg(short = 'e', value_name = "err-spec")]
    err_specs: Vec<String>,

    /// Command and arguments to run.
    #[arg(trailing_var_arg = true, required = true)]
    cmd: Vec<String>,
}

#[derive(Debug)]
enum StatusSpec {
    Eq(i32),
    Ne(i32),
    Ignore,
}

impl StatusSpec {
    fn parse(raw: &str) -> Result<Self> {
        if raw == "ignore" {
            return Ok(StatusSpec::Ignore);
        }
        if let Some(n) = raw.strip_prefix("eq:") {
            return Ok(StatusSpec::Eq(n.parse().context("eq: value must be an integer")?));
        }
        if let Some(n) = raw.strip_prefix("ne:") {
            return Ok(StatusSpec::Ne(n.parse().context("ne: value must be an integer")?));
        }
        bail!("unrecognized status spec '{raw}'")
    }

    fn check(&self, actual: i32) -> Result<()> {
        match self {
            StatusSpec::Ignore => Ok(()),
            StatusSpec::Eq(n) => (actual == *n)
                .then_some(())
                .ok_or_else(|| anyhow!("exit status {actual} != expected {n}")),
            StatusSpec::Ne(n) => (actual != *n)
                .then_some(())
                .ok_or_else(|| anyhow!("exit status {actual} == forbidden {n}")),
        }
    }
}

#[derive(Debug)]
enum StreamSpec {
    Ignore,
    Empty,
    Inline(String),
    File(String),
    Match(String),
    Save(String),
}

impl StreamSpec {
    fn parse(raw: &str) -> Result<Self> {
        if raw == "ignore" {
            return Ok(StreamSpec::Ignore);
        }
        if raw == "empty" {
            return Ok(StreamSpec::Empty);
        }
        if let Some(rest) = raw.strip_prefix("inline:") {
            return Ok(StreamSpec::Inline(rest.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("file:") {
            return Ok(StreamSpec::File(rest.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("match:") {
            return Ok(StreamSpec::Match(rest.to_string()));
        }
        if let Some(rest) = raw.strip_prefix("save:") {
            return Ok(StreamSpec::Save(rest.to_string()));
        }
        bail!("unrecognized stream spec '{raw}'")
    }

    /// Applies this check to `actual`, `name` being "stdout" or "stderr" for
    /// diagnostics. `Save` always succeeds (it's an output side effect, not a
    /// check) after writing the file.
    fn check(&self, name: &str, actual: &[u8]) -> Result<()> {
        match self {
            StreamSpec::Ignore => Ok(()),
            StreamSpec::Empty => actual
                .is_empty()
                .then_some(())
                .ok_or_else(|| anyhow!("{name} was expected to be empty")),
            StreamSpec::Inline(expected) => (actual == expected.as_bytes())
                .then_some(())
                .ok_or_else(|| anyhow!("{name} did not match the inline text")),
            StreamSpec::File(path) => {
                let expected = std::fs::read(path)
                    .with_context(|| format!("reading expected {name} file '{path}'"))?;
                (actual == expected)
                    .then_some(())
                    .ok_or_else(|| anyhow!("{name} did not match contents of '{path}'"))
            }
            StreamSpec::Match(pattern) => {
                let re = Regex::new(pattern)
                    .with_context(|| format!("compiling {name} pattern '{pattern}'"))?;
                let text = String::from_utf8_lossy(actual);
                re.is_match(&text)
                    .then_some(())
                    .ok_or_else(|| anyhow!("{name} did not match pattern '{pattern}'"))
            }
            StreamSpec::Save(path) => {
                std::fs::write(path, actual)
                    .with_context(|| format!("saving {name} to '{path}'"))?;
                Ok(())
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    std::process::exit(match run(cli) {
        Ok(()) => 0,
        Err(e) => {
            let _ = writeln!(std::io::stderr(), "atf-check: {e:#}");
            1
        }
    });
}

fn run(cli: Cli) -> Result<()> {
    let status_specs = cli
        .status_specs
        .iter()
        .map(|s| StatusSpec::parse(s))
        .collect::<Result<Vec<_>>>()?;
    let out_specs = cli
        .out_specs
        .iter()
        .map(|s| StreamSpec::parse(s))
        .collect::<Result<Vec<_>>>()?;
    let err_specs = cli
        .err_specs
        .iter()
        .map(|s| StreamSpec::parse(s))
        .collect::<Result<Vec<_>>>()?;

    let (program, args) = cli
        .cmd
        .split_first()
        .ok_or_else(|| anyhow!("no command given"))?;
    let output = Command::new(program)
        .args(args)
        .output()
        .with_context(|| format!("running '{program}'"))?;

    let exit_code = output.status.code().unwrap_or(-1);
    let mut failures = Vec::new();

    for spec in &status_specs {
        if let Err(e) = spec.check(exit_code) {
            failures.push(e.to_string());
        }
    }
    for spec in &out_specs {
        if let Err(e) = spec.check("stdout", &output.stdout) {
            failures.push(e.to_string());
        }
    }
    for spec in &err_specs {
        if let Err(e) = spec.check("stderr", &output.stderr) {
            failures.push(e.to_string());
        }
    }

    if failures.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(failures.join("; ")))
    }
}
