use std::collections::BTreeMap;

use crate::bundle::ParameterBundle;
use crate::config::WorkerConfig;

/// The environment one invocation runs with.
///
/// Built from a snapshot of the worker's environment rather than by
/// mutating it, so consecutive invocations in one process never see each
/// other's variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvocationEnv {
    vars: BTreeMap<String, String>,
}

impl InvocationEnv {
    /// Drops every ambient variable in the tool's namespace, injects the
    /// configured variables into the bundle, then applies the bundle's
    /// additions and removals. Returns the names that were scrubbed.
    pub fn prepare<I>(
        ambient: I,
        cfg: &WorkerConfig,
        bundle: &mut ParameterBundle,
    ) -> (Self, Vec<String>)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut scrubbed = Vec::new();
        let mut vars = BTreeMap::new();
        for (key, value) in ambient {
            if key.starts_with(&cfg.tool_env_prefix) {
                scrubbed.push(key);
            } else {
                vars.insert(key, value);
            }
        }

        for (key, value) in &cfg.injected_env {
            bundle.inject_env(key, value);
        }
        for (key, value) in &bundle.env_add {
            vars.insert(key.clone(), value.clone());
        }
        for key in &bundle.env_remove {
            vars.remove(key);
        }

        scrubbed.sort();
        (Self { vars }, scrubbed)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replaces `cmd`'s inherited environment with this one.
    pub fn apply_to(&self, cmd: &mut tokio::process::Command) {
        cmd.env_clear();
        cmd.envs(&self.vars);
    }
}
