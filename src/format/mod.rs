//! Provider chunk shapes.
//!
//! Every streaming backend wraps its deltas differently. The registry below
//! holds one predicate/extractor entry per known shape, tried in order; the
//! first entry whose predicate accepts a chunk decides how it is read.
//! Supporting a new backend means adding one entry.

use once_cell::sync::Lazy;
use serde_json::Value;
use std::fmt;

/// Reasoning and content carried by one chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedDelta {
    pub reasoning: String,
    pub content: String,
}

impl ParsedDelta {
    pub fn content(content: impl Into<String>) -> Self {
        Self {
            reasoning: String::new(),
            content: content.into(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.reasoning.is_empty() && self.content.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Claude,
    Cohere,
    Gemini,
    TokenStream,
    LlamaCpp,
    OllamaGenerate,
    OpenAi,
    OllamaChat,
    Custom(&'static str),
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Claude => write!(f, "claude"),
            Self::Cohere => write!(f, "cohere"),
            Self::Gemini => write!(f, "gemini"),
            Self::TokenStream => write!(f, "token-stream"),
            Self::LlamaCpp => write!(f, "llama.cpp"),
            Self::OllamaGenerate => write!(f, "ollama-generate"),
            Self::OpenAi => write!(f, "openai"),
            Self::OllamaChat => write!(f, "ollama-chat"),
            Self::Custom(name) => write!(f, "{}", name),
        }
    }
}

#[derive(Clone, Copy)]
pub struct ChunkFormat {
    pub provider: Provider,
    pub matches: fn(&Value) -> bool,
    pub extract: fn(&Value) -> ParsedDelta,
}

impl fmt::Debug for ChunkFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkFormat").field("provider", &self.provider).finish()
    }
}

#[derive(Debug, Clone)]
pub struct FormatRegistry {
    formats: Vec<ChunkFormat>,
}

impl FormatRegistry {
    pub fn builtin() -> Self {
        Self {
            formats: vec![
                ChunkFormat { provider: Provider::Claude, matches: is_claude, extract: claude },
                ChunkFormat { provider: Provider::Cohere, matches: is_cohere, extract: cohere },
                ChunkFormat { provider: Provider::Gemini, matches: is_gemini, extract: gemini },
                ChunkFormat { provider: Provider::TokenStream, matches: is_token, extract: token },
                ChunkFormat { provider: Provider::LlamaCpp, matches: is_llamacpp, extract: llamacpp },
                ChunkFormat { provider: Provider::OllamaGenerate, matches: is_ollama_generate, extract: ollama_generate },
                ChunkFormat { provider: Provider::OpenAi, matches: is_openai, extract: openai },
                ChunkFormat { provider: Provider::OllamaChat, matches: is_ollama_chat, extract: ollama_chat },
            ],
        }
    }

    /// Appends a format; it is tried after every existing entry.
    pub fn push(&mut self, format: ChunkFormat) {
        self.formats.push(format);
    }

    pub fn formats(&self) -> &[ChunkFormat] {
        &self.formats
    }

    pub fn detect(&self, json: &Value) -> Option<&ChunkFormat> {
        self.formats.iter().find(|f| (f.matches)(json))
    }

    /// Returns `None` when no format matches or the matched one carries no text.
    pub fn parse(&self, json: &Value) -> Option<ParsedDelta> {
        let format = self.detect(json)?;
        let delta = (format.extract)(json);
        tracing::trace!(provider = %format.provider, ?delta, "parsed chunk");
        (!delta.is_empty()).then_some(delta)
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

static BUILTIN: Lazy<FormatRegistry> = Lazy::new(FormatRegistry::builtin);

pub fn parse_chunk(json: &Value) -> Option<ParsedDelta> {
    BUILTIN.parse(json)
}

fn defined(json: &Value, pointer: &str) -> bool {
    json.pointer(pointer).is_some_and(|v| !v.is_null())
}

fn str_at<'a>(json: &'a Value, pointer: &str) -> &'a str {
    json.pointer(pointer).and_then(Value::as_str).unwrap_or_default()
}

fn first_non_empty<'a>(candidates: impl IntoIterator<Item = Option<&'a str>>) -> &'a str {
    candidates
        .into_iter()
        .flatten()
        .find(|s| !s.is_empty())
        .unwrap_or_default()
}

fn is_claude(json: &Value) -> bool {
    defined(json, "/delta/text") || defined(json, "/delta/thinking")
}

fn claude(json: &Value) -> ParsedDelta {
    ParsedDelta {
        reasoning: str_at(json, "/delta/thinking").to_string(),
        content: str_at(json, "/delta/text").to_string(),
    }
}

const COHERE_DELTA_TYPES: &[&str] = &["content-delta", "tool-plan-delta"];

fn is_cohere(json: &Value) -> bool {
    let known = json
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| COHERE_DELTA_TYPES.contains(&t));
    known && (defined(json, "/delta/message/content") || defined(json, "/delta/message/tool_plan"))
}

fn cohere(json: &Value) -> ParsedDelta {
    let content = json
        .pointer("/delta/message/content")
        .and_then(|c| c.as_str().or_else(|| c.get("text").and_then(Value::as_str)));
    let plan = json.pointer("/delta/message/tool_plan").and_then(Value::as_str);
    ParsedDelta::content(first_non_empty([content, plan]))
}

fn is_gemini(json: &Value) -> bool {
    json.pointer("/candidates/0/content/parts").is_some_and(Value::is_array)
}

fn gemini(json: &Value) -> ParsedDelta {
    let mut delta = ParsedDelta::default();
    let parts = json
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();
    for part in parts {
        let text = part.get("text").and_then(Value::as_str).unwrap_or_default();
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            delta.reasoning.push_str(text);
        } else {
            delta.content.push_str(text);
        }
    }
    delta
}

fn is_token(json: &Value) -> bool {
    json.get("token").is_some_and(Value::is_string)
}

fn token(json: &Value) -> ParsedDelta {
    ParsedDelta::content(str_at(json, "/token"))
}

fn is_llamacpp(json: &Value) -> bool {
    let chat_chunk = json.get("object").and_then(Value::as_str) == Some("chat.completion.chunk");
    json.get("content").is_some_and(Value::is_string) && !chat_chunk
}

fn llamacpp(json: &Value) -> ParsedDelta {
    ParsedDelta::content(str_at(json, "/content"))
}

fn is_ollama_generate(json: &Value) -> bool {
    defined(json, "/thinking") || defined(json, "/response")
}

fn ollama_generate(json: &Value) -> ParsedDelta {
    ParsedDelta {
        reasoning: str_at(json, "/thinking").to_string(),
        content: str_at(json, "/response").to_string(),
    }
}

fn is_openai(json: &Value) -> bool {
    defined(json, "/choices/0")
}

fn openai(json: &Value) -> ParsedDelta {
    let Some(choice) = json.pointer("/choices/0") else {
        return ParsedDelta::default();
    };
    if let Some(delta) = choice.get("delta").filter(|d| !d.is_null()) {
        return message_delta(delta, choice);
    }
    if let Some(message) = choice.get("message").filter(|m| !m.is_null()) {
        return message_delta(message, choice);
    }
    ParsedDelta::content(str_at(choice, "/text"))
}

/// Reads a `delta` or `message` object. `content` may be a plain string or a
/// list of parts where parts with a `thinking` key hold reasoning.
fn message_delta(message: &Value, choice: &Value) -> ParsedDelta {
    let mut delta = ParsedDelta {
        reasoning: first_non_empty([
            message.get("reasoning_content").and_then(Value::as_str),
            message.get("reasoning").and_then(Value::as_str),
            choice.get("thinking").and_then(Value::as_str),
        ])
        .to_string(),
        content: String::new(),
    };

    match message.get("content") {
        Some(Value::String(text)) => delta.content.push_str(text),
        Some(Value::Array(parts)) => {
            for part in parts {
                match part.get("thinking") {
                    Some(thinking) => push_thinking(&mut delta.reasoning, thinking),
                    None => delta
                        .content
                        .push_str(part.get("text").and_then(Value::as_str).unwrap_or_default()),
                }
            }
        }
        _ => {}
    }
    delta
}

fn push_thinking(out: &mut String, thinking: &Value) {
    match thinking {
        Value::String(text) => out.push_str(text),
        Value::Array(items) => {
            for item in items {
                if let Some(text) = item.as_str().or_else(|| item.get("text").and_then(Value::as_str)) {
                    out.push_str(text);
                }
            }
        }
        _ => {}
    }
}

fn is_ollama_chat(json: &Value) -> bool {
    json.get("message").is_some_and(Value::is_object)
}

fn ollama_chat(json: &Value) -> ParsedDelta {
    ParsedDelta {
        reasoning: str_at(json, "/message/thinking").to_string(),
        content: str_at(json, "/message/content").to_string(),
    }
}
