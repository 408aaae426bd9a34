//! Plays: templated shell snippets run over their own session
//!
//! A play is rendered with shell-quoted parameter values, sent to a fresh
//! scripted session and considered done when an injected marker line comes
//! back.

pub mod managed;
mod runner;
pub mod template;

pub use runner::{PlayOptions, PlayRunResult, PlayRunner};
pub use template::{PlayError, PlayParameter};

use serde::{Deserialize, Serialize};

/// A stored play
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Play {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub script_template: String,
    /// JSON parameter list; empty or invalid means "infer from template"
    #[serde(default = "empty_parameters")]
    pub parameters_json: String,
    /// Shipped with the client rather than created by the user
    #[serde(default)]
    pub managed: bool,
}

fn empty_parameters() -> String {
    "[]".to_string()
}

impl Play {
    pub fn new(name: impl Into<String>, script_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            script_template: script_template.into(),
            parameters_json: empty_parameters(),
            managed: false,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_parameters(mut self, parameters: &[PlayParameter]) -> Result<Self, PlayError> {
        self.parameters_json = template::encode_parameters(parameters)?;
        Ok(self)
    }

    pub fn managed(mut self) -> Self {
        self.managed = true;
        self
    }

    /// Declared parameters, or ones inferred from the placeholders
    pub fn parameters(&self) -> Result<Vec<PlayParameter>, PlayError> {
        let declared = template::decode_parameters(&self.parameters_json);
        if declared.is_empty() {
            template::infer_parameters(&self.script_template)
        } else {
            Ok(declared)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_parameters_win() {
        let play = Play::new("Copy", "cp {{src}} {{dst}}")
            .with_parameters(&[PlayParameter::new("src", "Source")])
            .unwrap();

        let params = play.parameters().unwrap();
        assert_eq!(params, vec![PlayParameter::new("src", "Source")]);
    }

    #[test]
    fn test_invalid_declaration_falls_back_to_inference() {
        let mut play = Play::new("Copy", "cp {{src}} {{dst}}");
        play.parameters_json = "oops".into();

        let keys: Vec<String> = play.parameters().unwrap().into_iter().map(|p| p.key).collect();
        assert_eq!(keys, vec!["src", "dst"]);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let play: Play =
            serde_json::from_str(r#"{"name": "Uptime", "script_template": "uptime"}"#).unwrap();
        assert_eq!(play.parameters_json, "[]");
        assert!(!play.managed);
    }
}
