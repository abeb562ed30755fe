//! The merged configuration mapping consumed by the runner.
//!
//! Three scopes exist during a run and are merged in fixed order, later
//! wins: host+suite config files, suite manifest declarations, command-line
//! overrides.

use std::collections::BTreeMap;

/// A flat mapping from variable name to string value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    vars: BTreeMap<String, String>,
}

impl Config {
    pub fn new() -> Self {
        Config::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(name.into(), value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Merge `overlay` on top of `self`; entries in `overlay` win on
    /// collision.
    pub fn merge_from(&mut self, overlay: &Config) {
        for (k, v) in overlay.iter() {
            self.vars.insert(k.to_string(), v.to_string());
        }
    }

    /// Build the effective configuration for a run from the three scopes in
    /// their fixed precedence order (later wins).
    pub fn layered(host_and_suite: &Config, manifest: &Config, cli_overrides: &Config) -> Config {
        let mut merged = host_and_suite.clone();
        merged.merge_from(manifest);
        merged.merge_from(cli_overrides);
        merged
    }
}
