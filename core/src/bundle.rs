use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Character the wrapped tool uses as a pattern wildcard in option syntax
/// (`-o *:shared=True`). Arguments containing it are always quoted.
pub const OPTION_WILDCARD: char = '*';

/// Description of one command invocation.
///
/// Built fresh by the caller for every invocation and handed to a runner,
/// which serializes it into the worker process. Only the worker harness
/// touches it afterwards, on its own copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterBundle {
    pub invocation_id: String,
    pub operation: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipe: Option<PathBuf>,
    #[serde(default)]
    pub env_add: BTreeMap<String, String>,
    #[serde(default)]
    pub env_remove: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub named: BTreeMap<String, Value>,
    #[serde(default)]
    pub timed: bool,
    /// Keys the harness added to `env_add` on its own. Never rendered.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub injected: BTreeSet<String>,
}

impl ParameterBundle {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            invocation_id: Uuid::new_v4().to_string(),
            operation: operation.into(),
            cwd: None,
            recipe: None,
            env_add: BTreeMap::new(),
            env_remove: Vec::new(),
            args: Vec::new(),
            named: BTreeMap::new(),
            timed: false,
            injected: BTreeSet::new(),
        }
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn recipe(mut self, recipe: impl Into<PathBuf>) -> Self {
        self.recipe = Some(recipe.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_add.insert(key.into(), value.into());
        self
    }

    pub fn unset(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.env_remove.contains(&key) {
            self.env_remove.push(key);
        }
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn named(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.named.insert(key.into(), value.into());
        self
    }

    pub fn timed(mut self, timed: bool) -> Self {
        self.timed = timed;
        self
    }

    /// Adds a harness-derived variable unless the caller set it explicitly.
    pub fn inject_env(&mut self, key: &str, value: &str) {
        if self.env_add.contains_key(key) {
            return;
        }
        self.env_add.insert(key.to_string(), value.to_string());
        self.injected.insert(key.to_string());
    }

    pub fn named_str(&self, key: &str) -> Option<&str> {
        match self.named.get(key)? {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        }
    }

    /// All string values stored under `key`, whether single or repeated.
    pub fn named_list(&self, key: &str) -> Vec<String> {
        match self.named.get(key) {
            Some(Value::String(s)) => vec![s.clone()],
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Equivalent shell command line, for display and export.
    pub fn render_command_line(&self, tool_program: &str) -> String {
        let mut parts: Vec<Cow<'_, str>> = Vec::new();

        if let Some(cwd) = &self.cwd {
            parts.push("cd".into());
            parts.push(quote_arg(&cwd.to_string_lossy()).into_owned().into());
            parts.push("&&".into());
        }

        let visible_env: Vec<(&String, &String)> = self
            .env_add
            .iter()
            .filter(|(k, _)| !self.injected.contains(*k))
            .collect();
        if !visible_env.is_empty() || !self.env_remove.is_empty() {
            parts.push("env".into());
            for key in &self.env_remove {
                parts.push("-u".into());
                parts.push(quote_arg(key));
            }
            for (key, value) in visible_env {
                parts.push(format!("{key}={}", quote_arg(value)).into());
            }
        }

        parts.push(quote_arg(tool_program));
        parts.push(quote_arg(&self.operation));
        if let Some(recipe) = &self.recipe {
            parts.push(quote_arg(&recipe.to_string_lossy()).into_owned().into());
        }
        for arg in &self.args {
            parts.push(quote_arg(arg));
        }

        parts.join(" ")
    }
}

fn is_shell_safe(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/' | ':' | '=' | '@' | '%' | '+' | ',')
}

pub fn quote_arg(arg: &str) -> Cow<'_, str> {
    if arg.is_empty() {
        return Cow::Borrowed("''");
    }
    if !arg.contains(OPTION_WILDCARD) && arg.chars().all(is_shell_safe) {
        return Cow::Borrowed(arg);
    }
    Cow::Owned(format!("'{}'", arg.replace('\'', r"'\''")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn plain_arguments_are_left_alone() {
        let b = ParameterBundle::new("install").args(["--build=missing", "-s", "build_type=Release"]);
        assert_eq!(
            b.render_command_line("conan"),
            "conan install --build=missing -s build_type=Release"
        );
    }

    #[test]
    fn wildcard_arguments_are_quoted() {
        let b = ParameterBundle::new("install").args(["-o", "*:shared=True"]);
        assert_eq!(b.render_command_line("conan"), "conan install -o '*:shared=True'");
    }

    #[test]
    fn single_quotes_are_escaped() {
        assert_eq!(quote_arg("it's"), r"'it'\''s'");
        assert_eq!(quote_arg(""), "''");
        assert_eq!(quote_arg("two words"), "'two words'");
    }

    #[test]
    fn injected_env_never_renders() {
        let mut b = ParameterBundle::new("create")
            .recipe("recipes/zlib")
            .env("CONAN_USER_HOME", "/tmp/home")
            .unset("CONAN_LOGGING_LEVEL");
        b.inject_env("CONAN_NON_INTERACTIVE", "1");

        let line = b.render_command_line("conan");
        assert_eq!(
            line,
            "env -u CONAN_LOGGING_LEVEL CONAN_USER_HOME=/tmp/home conan create recipes/zlib"
        );
        assert!(!line.contains("NON_INTERACTIVE"));
    }

    #[test]
    fn inject_does_not_override_caller_values() {
        let mut b = ParameterBundle::new("info").env("CONAN_NON_INTERACTIVE", "0");
        b.inject_env("CONAN_NON_INTERACTIVE", "1");
        assert_eq!(b.env_add["CONAN_NON_INTERACTIVE"], "0");
        assert!(b.injected.is_empty());
        assert!(b.render_command_line("conan").contains("CONAN_NON_INTERACTIVE=0"));
    }

    #[test]
    fn cwd_renders_as_cd_prefix() {
        let b = ParameterBundle::new("build").cwd("/work/my project");
        assert_eq!(
            b.render_command_line("conan"),
            "cd '/work/my project' && conan build"
        );
    }

    #[test]
    fn named_values_read_single_and_repeated() {
        let b = ParameterBundle::new("q")
            .named("key", "a")
            .named("many", serde_json::json!(["x", "y"]));
        assert_eq!(b.named_str("key"), Some("a"));
        assert_eq!(b.named_str("many"), Some("x"));
        assert_eq!(b.named_list("many"), vec!["x", "y"]);
        assert!(b.named_list("missing").is_empty());
    }

    #[test]
    fn every_bundle_gets_a_fresh_invocation_id() {
        let a = ParameterBundle::new("x");
        let b = ParameterBundle::new("x");
        assert_ne!(a.invocation_id, b.invocation_id);
    }
}
