//! Request assembly: reasoning macros, feeding earlier reasoning back into
//! the history and merging adjacent system prompts.

use crate::api::types::{ChatCompletionRequest, ChatMessage};
use crate::envconfig::{EnvConfig, ReasoningSettings};
use crate::thinking::ReasoningTemplate;
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

static REASONING_MACRO: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\{\{reasoning(prefix|suffix|separator)\}\}").expect("valid macro pattern")
});

/// Expands `{{reasoningPrefix}}`, `{{reasoningSuffix}}` and
/// `{{reasoningSeparator}}`, ignoring case.
pub fn replace_reasoning_macros(text: &str, template: &ReasoningTemplate) -> String {
    REASONING_MACRO
        .replace_all(text, |caps: &Captures| {
            match caps[1].to_ascii_lowercase().as_str() {
                "prefix" => template.prefix.clone(),
                "suffix" => template.suffix.clone(),
                _ => template.separator.clone(),
            }
        })
        .into_owned()
}

/// Writes stored reasoning back in front of the most recent assistant
/// replies, at most `max_additions` of them.
pub fn add_reasoning_to_prompts(messages: &mut [ChatMessage], settings: &ReasoningSettings) {
    if !settings.add_to_prompts || !settings.template.is_usable() {
        return;
    }
    let template = &settings.template;

    let with_reasoning = messages
        .iter_mut()
        .rev()
        .filter(|m| m.role == "assistant")
        .filter(|m| m.reasoning.as_deref().is_some_and(|r| !r.is_empty()))
        .take(settings.max_additions);

    for message in with_reasoning {
        let reasoning = message.reasoning.as_deref().unwrap_or_default();
        message.content = format!(
            "{}{}{}{}{}",
            template.prefix, reasoning, template.suffix, template.separator, message.content
        );
    }
}

/// Merges runs of unnamed system messages into one, joined by newlines.
pub fn squash_system_messages(messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
    let mut squashed: Vec<ChatMessage> = Vec::with_capacity(messages.len());

    for message in messages {
        let mergeable = message.role == "system" && message.name.is_none();
        if let Some(last) = squashed.last_mut() {
            if mergeable && last.role == "system" && last.name.is_none() {
                last.content.push('\n');
                last.content.push_str(&message.content);
                continue;
            }
        }
        squashed.push(message);
    }
    squashed
}

/// Builds the chat completion request for `history`. Messages whose content
/// ends up blank are dropped.
pub fn build_request(
    history: &[ChatMessage],
    config: &EnvConfig,
    settings: &ReasoningSettings,
) -> ChatCompletionRequest {
    let mut messages: Vec<ChatMessage> = history
        .iter()
        .map(|m| ChatMessage {
            content: replace_reasoning_macros(&m.content, &settings.template),
            ..m.clone()
        })
        .collect();

    add_reasoning_to_prompts(&mut messages, settings);
    if settings.squash_system_messages {
        messages = squash_system_messages(messages);
    }
    messages.retain(|m| !m.content.trim().is_empty());

    ChatCompletionRequest {
        model: config.model.clone(),
        messages,
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        stream: config.stream,
    }
}
