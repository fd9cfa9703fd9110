use crate::error::{Error, Result};
use crate::thinking::{ReasoningTemplate, TemplateRegistry};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct EnvConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    pub smooth: bool,
    pub timeout: u64,
    pub settings_path: PathBuf,
    pub template: Option<String>,
}

impl EnvConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            endpoint: lookup("CHATSTREAM_ENDPOINT").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            api_key: lookup("CHATSTREAM_API_KEY").filter(|k| !k.trim().is_empty()),
            model: lookup("CHATSTREAM_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            temperature: lookup("CHATSTREAM_TEMPERATURE")
                .and_then(|v| v.parse().ok())
                .unwrap_or(0.8),
            max_tokens: lookup("CHATSTREAM_MAX_TOKENS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
            stream: lookup("CHATSTREAM_STREAM")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            smooth: lookup("CHATSTREAM_SMOOTH")
                .and_then(|v| parse_bool(&v))
                .unwrap_or(true),
            timeout: lookup("CHATSTREAM_TIMEOUT")
                .unwrap_or_else(|| "600".to_string())
                .parse()
                .unwrap_or(600),
            settings_path: lookup("CHATSTREAM_SETTINGS")
                .map(PathBuf::from)
                .unwrap_or_else(settings_path),
            template: lookup("CHATSTREAM_REASONING_TEMPLATE"),
        }
    }

    pub fn chat_url(&self) -> String {
        format!("{}/v1/chat/completions", self.endpoint.trim_end_matches('/'))
    }

    /// Loads the settings file, then applies the template override if one
    /// is configured.
    pub fn reasoning_settings(&self) -> Result<ReasoningSettings> {
        let mut settings = ReasoningSettings::load(&self.settings_path)?;
        if let Some(name) = &self.template {
            settings.select_template(name)?;
        }
        Ok(settings)
    }
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

/// How reasoning is delimited, parsed and fed back into prompts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningSettings {
    #[serde(flatten)]
    pub template: ReasoningTemplate,
    pub auto_parse: bool,
    pub add_to_prompts: bool,
    pub max_additions: usize,
    pub squash_system_messages: bool,
}

impl Default for ReasoningSettings {
    fn default() -> Self {
        Self {
            template: ReasoningTemplate::deepseek(),
            auto_parse: true,
            add_to_prompts: false,
            max_additions: 1,
            squash_system_messages: false,
        }
    }
}

impl ReasoningSettings {
    /// A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(Error::Settings {
                    path: path.to_path_buf(),
                    source,
                }
                .into())
            }
        };
        serde_json::from_str(&text).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn select_template(&mut self, name: &str) -> Result<()> {
        if name.eq_ignore_ascii_case("none") {
            self.template = ReasoningTemplate::disabled();
            return Ok(());
        }
        let mut registry = TemplateRegistry::builtin();
        self.template = registry.select(name)?.clone();
        Ok(())
    }
}

pub fn settings_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chatstream")
        .join("settings.json")
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_with(vars: &[(&str, &str)]) -> EnvConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EnvConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = env_with(&[]);
        assert_eq!(config.chat_url(), "https://api.openai.com/v1/chat/completions");
        assert_eq!(config.api_key, None);
        assert_eq!(config.temperature, 0.8);
        assert_eq!(config.max_tokens, 4000);
        assert!(config.stream);
        assert!(config.smooth);
        assert_eq!(config.timeout, 600);
    }

    #[test]
    fn test_overrides() {
        let config = env_with(&[
            ("CHATSTREAM_ENDPOINT", "http://localhost:8080/"),
            ("CHATSTREAM_API_KEY", "sk-test"),
            ("CHATSTREAM_SMOOTH", "off"),
            ("CHATSTREAM_TEMPERATURE", "0.2"),
            ("CHATSTREAM_TIMEOUT", "soon"),
        ]);
        assert_eq!(config.chat_url(), "http://localhost:8080/v1/chat/completions");
        assert_eq!(config.api_key.as_deref(), Some("sk-test"));
        assert!(!config.smooth);
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.timeout, 600);
    }

    #[test]
    fn test_missing_settings_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = ReasoningSettings::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(settings, ReasoningSettings::default());
        assert_eq!(settings.template.prefix, "<think>");
    }

    #[test]
    fn test_settings_round_trip_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");

        let mut settings = ReasoningSettings::default();
        settings.select_template("Thinking").unwrap();
        settings.add_to_prompts = true;
        settings.save(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"prefix\": \"<thinking>\""));
        assert_eq!(ReasoningSettings::load(&path).unwrap(), settings);
    }

    #[test]
    fn test_partial_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"name":"Custom","prefix":"<r>","suffix":"</r>","auto_parse":false}"#).unwrap();

        let settings = ReasoningSettings::load(&path).unwrap();
        assert_eq!(settings.template, ReasoningTemplate::new("Custom", "<r>", "</r>", ""));
        assert!(!settings.auto_parse);
        assert_eq!(settings.max_additions, 1);
    }

    #[test]
    fn test_settings_file_without_template_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"add_to_prompts": true}"#).unwrap();

        let settings = ReasoningSettings::load(&path).unwrap();
        assert!(settings.add_to_prompts);
        assert!(settings.auto_parse);
        assert_eq!(settings.template, ReasoningTemplate::deepseek());
    }

    #[test]
    fn test_template_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let settings_path = path.to_string_lossy().into_owned();

        let config = env_with(&[
            ("CHATSTREAM_SETTINGS", settings_path.as_str()),
            ("CHATSTREAM_REASONING_TEMPLATE", "bracket"),
        ]);
        assert_eq!(config.reasoning_settings().unwrap().template.prefix, "[思考]");

        let config = env_with(&[
            ("CHATSTREAM_SETTINGS", settings_path.as_str()),
            ("CHATSTREAM_REASONING_TEMPLATE", "missing"),
        ]);
        let err = config.reasoning_settings().unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_none_template_disables_parsing() {
        let mut settings = ReasoningSettings::default();
        settings.select_template("none").unwrap();
        assert!(!settings.template.is_usable());
    }
}
