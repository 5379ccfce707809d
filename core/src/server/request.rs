use std::collections::BTreeMap;

use serde_json::Value;
use url::form_urlencoded;

use crate::error::RequestError;
use crate::operation::{validate_name, SHUTDOWN_COMMAND};

/// One line sent to the query server: `command` or `command?k=v&k2=v2`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub command: String,
    /// Repeated keys keep every value, in order.
    pub params: BTreeMap<String, Vec<String>>,
}

impl QueryRequest {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn shutdown() -> Self {
        Self::new(SHUTDOWN_COMMAND)
    }

    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.entry(key.into()).or_default().push(value.into());
        self
    }

    pub fn is_shutdown(&self) -> bool {
        self.command == SHUTDOWN_COMMAND && self.params.is_empty()
    }

    pub fn parse(line: &str) -> Result<Self, RequestError> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.contains('\n') {
            return Err(RequestError::Multiline);
        }
        let line = line.trim();
        if line.is_empty() {
            return Err(RequestError::Empty);
        }

        let (command, query) = match line.split_once('?') {
            Some((command, query)) => (command, Some(query)),
            None => (line, None),
        };
        if command != SHUTDOWN_COMMAND && validate_name(command).is_err() {
            return Err(RequestError::InvalidCommand(command.to_string()));
        }

        let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
        if let Some(query) = query {
            for (key, value) in form_urlencoded::parse(query.as_bytes()) {
                params.entry(key.into_owned()).or_default().push(value.into_owned());
            }
        }

        Ok(Self {
            command: command.to_string(),
            params,
        })
    }

    /// Wire form, without the trailing newline.
    pub fn encode(&self) -> Result<String, RequestError> {
        if self.command != SHUTDOWN_COMMAND && validate_name(&self.command).is_err() {
            return Err(RequestError::InvalidCommand(self.command.clone()));
        }
        if self.params.is_empty() {
            return Ok(self.command.clone());
        }
        let mut query = form_urlencoded::Serializer::new(String::new());
        for (key, values) in &self.params {
            for value in values {
                query.append_pair(key, value);
            }
        }
        Ok(format!("{}?{}", self.command, query.finish()))
    }

    /// Parameters as handler arguments: single values as strings, repeated
    /// ones as arrays.
    pub fn named(&self) -> BTreeMap<String, Value> {
        self.params
            .iter()
            .map(|(key, values)| {
                let value = match values.as_slice() {
                    [single] => Value::String(single.clone()),
                    many => Value::Array(many.iter().cloned().map(Value::String).collect()),
                };
                (key.clone(), value)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn bare_command() {
        let req = QueryRequest::parse("remote.list\n").unwrap();
        assert_eq!(req, QueryRequest::new("remote.list"));
        assert_eq!(req.encode().unwrap(), "remote.list");
    }

    #[test]
    fn repeated_keys_decode_as_list() {
        let req = QueryRequest::parse("config.get?key=a&key=b&scope=global%20user").unwrap();
        assert_eq!(req.params["key"], vec!["a", "b"]);
        assert_eq!(req.params["scope"], vec!["global user"]);
        assert_eq!(
            req.named(),
            [
                ("key".to_string(), json!(["a", "b"])),
                ("scope".to_string(), json!("global user")),
            ]
            .into_iter()
            .collect()
        );
    }

    #[test]
    fn encoding_escapes_reserved_characters() {
        let req = QueryRequest::new("echo")
            .param("text", "a&b=c?d")
            .param("pattern", "*:shared=True");
        let line = req.encode().unwrap();
        assert!(!line[5..].contains('?'));
        assert_eq!(QueryRequest::parse(&line).unwrap(), req);
    }

    #[test]
    fn shutdown_sentinel() {
        assert!(QueryRequest::parse("end").unwrap().is_shutdown());
        assert!(!QueryRequest::parse("end?x=1").unwrap().is_shutdown());
        assert_eq!(QueryRequest::shutdown().encode().unwrap(), "end");
    }

    #[test]
    fn malformed_requests_are_rejected() {
        assert_eq!(QueryRequest::parse("   "), Err(RequestError::Empty));
        assert_eq!(
            QueryRequest::parse("has space?x=1"),
            Err(RequestError::InvalidCommand("has space".into()))
        );
        assert_eq!(QueryRequest::parse("a\nb"), Err(RequestError::Multiline));
        assert_eq!(
            QueryRequest::new("?").encode(),
            Err(RequestError::InvalidCommand("?".into()))
        );
    }
}
