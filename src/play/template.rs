//! Play templates and their parameters
//!
//! Templates are shell snippets with `{{name}}` placeholders. Parameters are
//! either declared as a JSON list or inferred from the placeholders.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

static PLACEHOLDER: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}"));

const MASK: &str = "***";

#[derive(Error, Debug)]
pub enum PlayError {
    #[error("Missing required value: {0}")]
    MissingValue(String),

    #[error("Rendered command is empty")]
    EmptyCommand,

    #[error("Invalid placeholder pattern: {0}")]
    Pattern(String),

    #[error("Failed to encode parameters: {0}")]
    Encode(#[from] serde_json::Error),
}

fn placeholder_regex() -> Result<&'static Regex, PlayError> {
    PLACEHOLDER
        .as_ref()
        .map_err(|e| PlayError::Pattern(e.to_string()))
}

/// One value a play asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayParameter {
    pub key: String,
    pub label: String,
    #[serde(default = "default_required")]
    pub required: bool,
    /// Never logged or displayed
    #[serde(default)]
    pub secret: bool,
}

fn default_required() -> bool {
    true
}

impl PlayParameter {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            required: true,
            secret: false,
        }
    }

    pub fn secret(mut self) -> Self {
        self.secret = true;
        self
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Lenient form used for decoding stored lists
#[derive(Deserialize)]
struct RawParameter {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    required: Option<bool>,
    #[serde(default)]
    secret: Option<bool>,
}

/// Decode a stored parameter list.
///
/// Entries without a key are skipped, a blank label falls back to the key,
/// and anything that is not a JSON list decodes as empty.
pub fn decode_parameters(json: &str) -> Vec<PlayParameter> {
    if json.trim().is_empty() {
        return Vec::new();
    }
    let Ok(items) = serde_json::from_str::<Vec<serde_json::Value>>(json) else {
        return Vec::new();
    };

    items
        .into_iter()
        .filter_map(|item| serde_json::from_value::<RawParameter>(item).ok())
        .filter_map(|raw| {
            let key = raw.key.map(|k| k.trim().to_string()).unwrap_or_default();
            if key.is_empty() {
                return None;
            }
            let label = raw
                .label
                .map(|l| l.trim().to_string())
                .filter(|l| !l.is_empty())
                .unwrap_or_else(|| key.clone());
            Some(PlayParameter {
                key,
                label,
                required: raw.required.unwrap_or(true),
                secret: raw.secret.unwrap_or(false),
            })
        })
        .collect()
}

pub fn encode_parameters(parameters: &[PlayParameter]) -> Result<String, PlayError> {
    Ok(serde_json::to_string(parameters)?)
}

/// Placeholder keys in order of first appearance
pub fn placeholders(template: &str) -> Result<Vec<String>, PlayError> {
    let mut keys: Vec<String> = Vec::new();
    for caps in placeholder_regex()?.captures_iter(template) {
        let key = &caps[1];
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

/// One required parameter per placeholder, labelled from its key
pub fn infer_parameters(template: &str) -> Result<Vec<PlayParameter>, PlayError> {
    Ok(placeholders(template)?
        .into_iter()
        .map(|key| {
            let label = label_from_key(&key);
            PlayParameter::new(key, label)
        })
        .collect())
}

/// `disk_path` -> `Disk path`
fn label_from_key(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => spaced,
    }
}

/// Every required parameter needs a non-blank value
pub fn validate_values(
    parameters: &[PlayParameter],
    values: &HashMap<String, String>,
) -> Result<(), PlayError> {
    for parameter in parameters {
        let value = values.get(&parameter.key).map(String::as_str).unwrap_or("");
        if parameter.required && value.trim().is_empty() {
            return Err(PlayError::MissingValue(parameter.label.clone()));
        }
    }
    Ok(())
}

/// Single-quote `value` for a POSIX shell
pub fn shell_quote(value: &str) -> String {
    if value.is_empty() {
        return "''".to_string();
    }
    format!("'{}'", value.replace('\'', r#"'"'"'"#))
}

/// Replace each placeholder with the shell-quoted value (missing -> `''`)
pub fn render(template: &str, values: &HashMap<String, String>) -> Result<String, PlayError> {
    Ok(placeholder_regex()?
        .replace_all(template, |caps: &Captures| {
            shell_quote(values.get(&caps[1]).map(String::as_str).unwrap_or(""))
        })
        .into_owned())
}

/// Render for logs: secret parameters show as a mask
pub fn render_masked(
    template: &str,
    parameters: &[PlayParameter],
    values: &HashMap<String, String>,
) -> Result<String, PlayError> {
    let mut masked = values.clone();
    for parameter in parameters.iter().filter(|p| p.secret) {
        masked.insert(parameter.key.clone(), MASK.to_string());
    }
    render(template, &masked)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_render_quotes_value_as_one_argument() {
        let rendered = render("echo {{greeting}}", &values(&[("greeting", "hi there")])).unwrap();
        assert_eq!(rendered, "echo 'hi there'");
    }

    #[test]
    fn test_render_tolerates_inner_whitespace_and_missing() {
        let rendered = render("ls {{ dir }} {{other}}", &values(&[("dir", "/tmp")])).unwrap();
        assert_eq!(rendered, "ls '/tmp' ''");
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote(""), "''");
        assert_eq!(shell_quote("it's"), r#"'it'"'"'s'"#);
        assert_eq!(shell_quote("$(rm -rf /)"), "'$(rm -rf /)'");
    }

    #[test]
    fn test_infer_parameters_dedups_and_labels() {
        let params = infer_parameters("cp {{src_path}} {{dest}} && ls {{src_path}}").unwrap();

        assert_eq!(params.len(), 2);
        assert_eq!(params[0].key, "src_path");
        assert_eq!(params[0].label, "Src path");
        assert!(params[0].required);
        assert!(!params[0].secret);
        assert_eq!(params[1].label, "Dest");
    }

    #[test]
    fn test_decode_applies_defaults() {
        let json = r#"[
            {"key": " user ", "label": ""},
            {"key": "", "label": "ignored"},
            {"label": "no key"},
            "not an object",
            {"key": "pw", "label": "Password", "required": false, "secret": true}
        ]"#;

        let params = decode_parameters(json);

        assert_eq!(
            params,
            vec![
                PlayParameter::new("user", "user"),
                PlayParameter::new("pw", "Password").optional().secret(),
            ]
        );
    }

    #[test]
    fn test_decode_invalid_json_is_empty() {
        assert!(decode_parameters("{not json").is_empty());
        assert!(decode_parameters("   ").is_empty());
        assert!(decode_parameters(r#"{"key": "x"}"#).is_empty());
    }

    #[test]
    fn test_encode_then_decode_keeps_flags() {
        let params = vec![PlayParameter::new("password", "Password").secret()];
        let json = encode_parameters(&params).unwrap();
        assert_eq!(decode_parameters(&json), params);
    }

    #[test]
    fn test_validate_reports_label_of_missing_value() {
        let params = vec![
            PlayParameter::new("host", "Host name"),
            PlayParameter::new("note", "Note").optional(),
        ];

        let err = validate_values(&params, &values(&[("host", "  ")])).unwrap_err();
        assert_eq!(err.to_string(), "Missing required value: Host name");

        assert!(validate_values(&params, &values(&[("host", "db1")])).is_ok());
    }

    #[test]
    fn test_masked_render_hides_secrets() {
        let params = vec![
            PlayParameter::new("username", "Username"),
            PlayParameter::new("password", "Password").secret(),
        ];
        let masked = render_masked(
            "echo {{username}}:{{password}} | sudo chpasswd",
            &params,
            &values(&[("username", "bob"), ("password", "hunter2")]),
        )
        .unwrap();

        assert_eq!(masked, "echo 'bob':'***' | sudo chpasswd");
    }
}
