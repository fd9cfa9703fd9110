//! Inline reasoning blocks: splitting them out of plain text and composing
//! them back for display.

mod templates;

pub use templates::{builtin_templates, ReasoningTemplate, TemplateRegistry};

use regex::Regex;
use serde::Serialize;

const BLOCK_JOINER: &str = "\n\n---\n\n";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReasoningBlock {
    pub reasoning: String,
    pub content: String,
}

/// Regexes compiled from one template's delimiters.
#[derive(Debug, Clone)]
pub struct TemplatePatterns {
    closed: Regex,
    anchored: Regex,
    open: Regex,
}

impl TemplatePatterns {
    /// Returns `None` for templates without both delimiters.
    pub fn compile(template: &ReasoningTemplate) -> Option<Self> {
        if !template.is_usable() {
            return None;
        }
        let prefix = regex::escape(&template.prefix);
        let suffix = regex::escape(&template.suffix);

        Some(Self {
            closed: Regex::new(&format!("(?s){prefix}(.*?){suffix}")).ok()?,
            anchored: Regex::new(&format!(r"(?s)^\s*?{prefix}(.*?){suffix}")).ok()?,
            open: Regex::new(&format!("(?s){prefix}(.*)$")).ok()?,
        })
    }

    /// Splits the first closed block out of `text`. With `strict` the block
    /// must open the string, optionally after whitespace.
    pub fn parse(&self, text: &str, strict: bool) -> Option<ReasoningBlock> {
        let re = if strict { &self.anchored } else { &self.closed };
        let caps = re.captures(text)?;
        let whole = caps.get(0)?;
        let inner = caps.get(1).map_or("", |m| m.as_str());

        let mut content = String::with_capacity(text.len() - whole.len());
        content.push_str(&text[..whole.start()]);
        content.push_str(&text[whole.end()..]);

        Some(ReasoningBlock {
            reasoning: inner.trim().to_string(),
            content: content.trim().to_string(),
        })
    }

    /// Collects the reasoning written so far. Closed blocks win; an
    /// unterminated trailing block is only read when `allow_open` is set.
    /// `text` itself is left untouched.
    pub fn extract(&self, text: &str, allow_open: bool) -> Option<String> {
        let closed: Vec<&str> = self
            .closed
            .captures_iter(text)
            .map(|caps| caps.get(1).map_or("", |m| m.as_str().trim()))
            .collect();

        // An empty closed block still counts as closed.
        if !closed.is_empty() {
            let blocks: Vec<&str> = closed.into_iter().filter(|s| !s.is_empty()).collect();
            return (!blocks.is_empty()).then(|| blocks.join(BLOCK_JOINER));
        }

        if allow_open {
            let open = self.open.captures(text)?.get(1)?.as_str().trim();
            if !open.is_empty() {
                return Some(open.to_string());
            }
        }
        None
    }

    /// Strips every closed block, then a trailing unterminated one.
    pub fn remove(&self, text: &str) -> String {
        let without_closed = self.closed.replace_all(text, "");
        let without_open = self.open.replace(&without_closed, "");
        without_open.trim().to_string()
    }
}

pub fn parse_reasoning_from_string(
    text: &str,
    strict: bool,
    template: &ReasoningTemplate,
) -> Option<ReasoningBlock> {
    TemplatePatterns::compile(template)?.parse(text, strict)
}

pub fn extract_thinking(text: &str, allow_open: bool, template: &ReasoningTemplate) -> Option<String> {
    TemplatePatterns::compile(template)?.extract(text, allow_open)
}

pub fn remove_thinking(text: &str, template: &ReasoningTemplate) -> String {
    match TemplatePatterns::compile(template) {
        Some(patterns) => patterns.remove(text),
        None => text.trim().to_string(),
    }
}

/// Joins reasoning and content into one display string. The suffix is held
/// back until the reasoning phase is over.
pub fn compose(
    reasoning: &str,
    content: &str,
    in_reasoning_phase: bool,
    template: &ReasoningTemplate,
) -> String {
    let mut out = String::with_capacity(
        template.prefix.len() + reasoning.len() + template.suffix.len() + content.len(),
    );
    if !reasoning.is_empty() {
        out.push_str(&template.prefix);
        out.push_str(reasoning);
        if !in_reasoning_phase {
            out.push_str(&template.suffix);
        }
    }
    out.push_str(content);
    out
}
