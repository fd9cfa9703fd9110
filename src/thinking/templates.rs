use crate::error::Error;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Delimiters used when a model writes its reasoning inline in the message
/// text instead of in a dedicated field.
/// Missing fields fall back to the DeepSeek delimiters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningTemplate {
    pub name: String,
    pub prefix: String,
    pub suffix: String,
    pub separator: String,
}

impl ReasoningTemplate {
    pub fn new(
        name: impl Into<String>,
        prefix: impl Into<String>,
        suffix: impl Into<String>,
        separator: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            suffix: suffix.into(),
            separator: separator.into(),
        }
    }

    /// A template with empty delimiters; inline parsing is switched off.
    pub fn disabled() -> Self {
        Self::new("None", "", "", "")
    }

    pub fn deepseek() -> Self {
        Self::new("DeepSeek", "<think>", "</think>", "")
    }

    /// Both delimiters must be present before the parser will use the template.
    pub fn is_usable(&self) -> bool {
        !self.prefix.is_empty() && !self.suffix.is_empty()
    }
}

impl Default for ReasoningTemplate {
    fn default() -> Self {
        Self::deepseek()
    }
}

static BUILTIN: Lazy<Vec<ReasoningTemplate>> = Lazy::new(|| {
    vec![
        ReasoningTemplate::deepseek(),
        ReasoningTemplate::new("Thinking", "<thinking>", "</thinking>", "\n\n"),
        ReasoningTemplate::new("Reasoning", "<reasoning>", "</reasoning>", "\n\n"),
        ReasoningTemplate::new("Markdown", "```thinking\n", "```", "\n\n"),
        ReasoningTemplate::new("Chinese", "【思考】", "【/思考】", ""),
        ReasoningTemplate::new("Bracket", "[思考]", "[/思考]", ""),
    ]
});

pub fn builtin_templates() -> &'static [ReasoningTemplate] {
    &BUILTIN
}

/// Named templates with exactly one of them active.
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: Vec<ReasoningTemplate>,
    active: usize,
}

impl TemplateRegistry {
    pub fn builtin() -> Self {
        Self {
            templates: BUILTIN.clone(),
            active: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReasoningTemplate> {
        self.templates.iter()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Looks a template up by name, ignoring case.
    pub fn get(&self, name: &str) -> Option<&ReasoningTemplate> {
        self.position(name).map(|idx| &self.templates[idx])
    }

    pub fn active(&self) -> &ReasoningTemplate {
        &self.templates[self.active]
    }

    pub fn select(&mut self, name: &str) -> Result<&ReasoningTemplate, Error> {
        let idx = self
            .position(name)
            .ok_or_else(|| Error::UnknownTemplate(name.to_string()))?;
        self.active = idx;
        Ok(&self.templates[idx])
    }

    /// Adds a template, replacing any existing one with the same name.
    pub fn register(&mut self, template: ReasoningTemplate) {
        match self.position(&template.name) {
            Some(idx) => self.templates[idx] = template,
            None => self.templates.push(template),
        }
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.templates
            .iter()
            .position(|t| t.name.eq_ignore_ascii_case(name))
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_templates_are_usable() {
        assert!(builtin_templates().iter().all(ReasoningTemplate::is_usable));
        assert!(!ReasoningTemplate::disabled().is_usable());
        assert!(!ReasoningTemplate::new("half", "<think>", "", "").is_usable());
    }

    #[test]
    fn test_select_by_name() {
        let mut registry = TemplateRegistry::builtin();
        assert_eq!(registry.active().name, "DeepSeek");

        let selected = registry.select("chinese").unwrap();
        assert_eq!(selected.prefix, "【思考】");
        assert_eq!(registry.active().suffix, "【/思考】");
    }

    #[test]
    fn test_select_unknown_keeps_active() {
        let mut registry = TemplateRegistry::builtin();
        registry.select("Thinking").unwrap();

        let err = registry.select("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownTemplate(ref name) if name == "nope"));
        assert_eq!(registry.active().name, "Thinking");
    }

    #[test]
    fn test_register_replaces_same_name() {
        let mut registry = TemplateRegistry::builtin();
        let before = registry.len();

        registry.register(ReasoningTemplate::new("deepseek", "<t>", "</t>", ""));
        assert_eq!(registry.len(), before);
        assert_eq!(registry.get("DeepSeek").unwrap().prefix, "<t>");

        registry.register(ReasoningTemplate::new("Custom", "<<", ">>", ""));
        assert_eq!(registry.len(), before + 1);
    }
}
