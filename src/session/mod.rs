//! One chat's streaming state.
//!
//! A [`ChatSession`] carries what the reply pipeline needs between turns:
//! the reasoning settings, the chunk formats it understands and the abort
//! token. Each turn runs the chunk reader and the typewriter side by side on
//! the calling task.

use crate::envconfig::ReasoningSettings;
use crate::error::Result;
use crate::format::{FormatRegistry, ParsedDelta};
use crate::smoothing::{CharSender, RenderSink, StreamingMessage, Typewriter};
use crate::thinking::{compose, ReasoningTemplate, TemplatePatterns};
use futures_util::stream::{Stream, StreamExt};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// What a finished turn produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedTurn {
    pub reasoning: String,
    pub content: String,
    pub display: String,
    pub aborted: bool,
    pub chunks: usize,
    pub skipped: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct ChunkStats {
    chunks: usize,
    skipped: usize,
}

pub struct ChatSession {
    settings: ReasoningSettings,
    patterns: Option<TemplatePatterns>,
    formats: FormatRegistry,
    smooth: bool,
    cancel: CancellationToken,
}

impl ChatSession {
    pub fn new(settings: ReasoningSettings, smooth: bool) -> Self {
        let patterns = TemplatePatterns::compile(&settings.template);
        Self {
            settings,
            patterns,
            formats: FormatRegistry::builtin(),
            smooth,
            cancel: CancellationToken::new(),
        }
    }

    pub fn settings(&self) -> &ReasoningSettings {
        &self.settings
    }

    pub fn template(&self) -> &ReasoningTemplate {
        &self.settings.template
    }

    pub fn set_template(&mut self, template: ReasoningTemplate) {
        self.patterns = TemplatePatterns::compile(&template);
        self.settings.template = template;
    }

    pub fn formats_mut(&mut self) -> &mut FormatRegistry {
        &mut self.formats
    }

    /// Token shared by the reader and the typewriter of the current turn.
    pub fn abort_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn abort(&self) {
        self.cancel.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Arms a fresh token after an aborted turn.
    pub fn reset_abort(&mut self) {
        if self.cancel.is_cancelled() {
            self.cancel = CancellationToken::new();
        }
    }

    /// Streams one reply. Chunks that match no known format are skipped. A
    /// transport error stops reading; what was already queued is still
    /// shown before the error is returned.
    pub async fn stream<St, S>(&self, chunks: St, sink: &mut S) -> Result<CompletedTurn>
    where
        St: Stream<Item = Result<Value>>,
        S: RenderSink,
    {
        tracing::info!(template = %self.settings.template.name, smooth = self.smooth, "streaming turn started");
        let (tx, typewriter) = self.typewriter();
        let (read, message) = tokio::join!(self.read_chunks(chunks, tx), typewriter.run(&mut *sink));
        let stats = read?;
        Ok(self.finish(message, stats, sink))
    }

    /// Replays an already complete response body through the typewriter.
    pub async fn simulate<S: RenderSink>(&self, response: &Value, sink: &mut S) -> Result<CompletedTurn> {
        let delta = self.formats.parse(response).unwrap_or_default();
        let skipped = usize::from(delta.is_empty());
        let mut turn = self.simulate_delta(self.split_inline(delta), sink).await;
        turn.chunks = 1 - skipped;
        turn.skipped = skipped;
        Ok(turn)
    }

    /// Replays raw text, splitting a leading reasoning block out of it first.
    pub async fn simulate_text<S: RenderSink>(&self, text: &str, sink: &mut S) -> CompletedTurn {
        let delta = self.split_inline(ParsedDelta::content(text));
        self.simulate_delta(delta, sink).await
    }

    async fn simulate_delta<S: RenderSink>(&self, delta: ParsedDelta, sink: &mut S) -> CompletedTurn {
        tracing::info!(template = %self.settings.template.name, "simulated turn started");
        let (tx, typewriter) = self.typewriter();
        tx.push_delta(&delta);
        drop(tx);
        let message = typewriter.run(&mut *sink).await;
        self.finish(message, ChunkStats::default(), sink)
    }

    fn typewriter(&self) -> (CharSender, Typewriter) {
        Typewriter::new(self.settings.template.clone(), self.cancel.clone(), self.smooth)
    }

    async fn read_chunks<St>(&self, chunks: St, tx: CharSender) -> Result<ChunkStats>
    where
        St: Stream<Item = Result<Value>>,
    {
        let mut chunks = std::pin::pin!(chunks);
        let mut stats = ChunkStats::default();

        loop {
            if self.cancel.is_cancelled() {
                break;
            }
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                next = chunks.next() => next,
            };
            let Some(next) = next else { break };

            let json = next?;
            match self.formats.parse(&json) {
                Some(delta) => {
                    stats.chunks += 1;
                    tx.push_delta(&delta);
                    if tx.is_closed() {
                        break;
                    }
                }
                None => {
                    stats.skipped += 1;
                    tracing::debug!("chunk carried no delta: {}", json);
                }
            }
        }
        Ok(stats)
    }

    /// Splits an inline block out of content when no reasoning field was
    /// delivered and auto-parse is on.
    fn split_inline(&self, delta: ParsedDelta) -> ParsedDelta {
        if !delta.reasoning.is_empty() || !self.settings.auto_parse {
            return delta;
        }
        match self.patterns.as_ref().and_then(|p| p.parse(&delta.content, true)) {
            Some(block) => ParsedDelta {
                reasoning: block.reasoning,
                content: block.content,
            },
            None => delta,
        }
    }

    /// The typewriter's last render shows the raw buffers; when auto-parse
    /// reshapes them the settled display is rendered once more.
    fn finish<S: RenderSink>(&self, message: StreamingMessage, stats: ChunkStats, sink: &mut S) -> CompletedTurn {
        let aborted = self.cancel.is_cancelled();
        let shown = compose(&message.reasoning, &message.content, false, &self.settings.template);
        let parsed = self.split_inline(ParsedDelta {
            reasoning: message.reasoning,
            content: message.content,
        });
        let display = compose(&parsed.reasoning, &parsed.content, false, &self.settings.template);
        if display != shown {
            sink.render(&display);
        }

        if aborted {
            let chars = display.chars().count();
            tracing::info!(chars, "turn aborted");
        } else {
            tracing::info!(chunks = stats.chunks, skipped = stats.skipped, "turn finished");
        }

        CompletedTurn {
            reasoning: parsed.reasoning,
            content: parsed.content,
            display,
            aborted,
            chunks: stats.chunks,
            skipped: stats.skipped,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn session() -> ChatSession {
        ChatSession::new(ReasoningSettings::default(), false)
    }

    fn chunks(values: Vec<Value>) -> impl Stream<Item = Result<Value>> {
        stream::iter(values.into_iter().map(Ok))
    }

    #[tokio::test]
    async fn test_stream_reasoning_then_content() {
        let session = session();
        let mut renders = Vec::new();
        let mut sink = |text: &str| renders.push(text.to_string());

        let turn = session
            .stream(
                chunks(vec![
                    json!({"choices": [{"delta": {"role": "assistant"}}]}),
                    json!({"choices": [{"delta": {"reasoning_content": "ok"}}]}),
                    json!({"choices": [{"delta": {"content": "Hi"}}]}),
                ]),
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(renders, vec!["<think>o", "<think>ok", "<think>ok</think>H", "<think>ok</think>Hi"]);
        assert_eq!(turn.display, "<think>ok</think>Hi");
        assert_eq!((turn.chunks, turn.skipped), (2, 1));
        assert!(!turn.aborted);
    }

    #[tokio::test]
    async fn test_inline_block_is_split_at_finish() {
        let session = session();
        let mut renders = Vec::new();
        let mut sink = |text: &str| renders.push(text.to_string());
        let turn = session
            .stream(
                chunks(vec![
                    json!({"choices": [{"delta": {"content": "<think>plan"}}]}),
                    json!({"choices": [{"delta": {"content": "</think>\nDone"}}]}),
                ]),
                &mut sink,
            )
            .await
            .unwrap();

        assert_eq!(turn.reasoning, "plan");
        assert_eq!(turn.content, "Done");
        assert_eq!(turn.display, "<think>plan</think>Done");
        assert_eq!(renders[renders.len() - 2], "<think>plan</think>\nDone");
        assert_eq!(renders.last().map(String::as_str), Some("<think>plan</think>Done"));
    }

    #[tokio::test]
    async fn test_auto_parse_off_keeps_raw_content() {
        let settings = ReasoningSettings {
            auto_parse: false,
            ..Default::default()
        };
        let session = ChatSession::new(settings, false);
        let mut sink = |_: &str| {};
        let turn = session.simulate_text("<think>a</think>b", &mut sink).await;

        assert_eq!(turn.reasoning, "");
        assert_eq!(turn.content, "<think>a</think>b");
    }

    #[tokio::test]
    async fn test_transport_error_keeps_partial_display() {
        let session = session();
        let mut last = String::new();
        let mut sink = |text: &str| last = text.to_string();
        let body = stream::iter(vec![
            Ok(json!({"choices": [{"delta": {"content": "par"}}]})),
            Err(anyhow::anyhow!("connection reset")),
            Ok(json!({"choices": [{"delta": {"content": "tial"}}]})),
        ]);

        let err = session.stream(body, &mut sink).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert_eq!(last, "par");
    }

    #[tokio::test]
    async fn test_simulate_full_response() {
        let session = session();
        let mut count = 0;
        let mut sink = |_: &str| count += 1;
        let body = json!({"object": "chat.completion", "choices": [{"message": {"content": "<think>why</think>Because."}}]});

        let turn = session.simulate(&body, &mut sink).await.unwrap();

        assert_eq!(turn.reasoning, "why");
        assert_eq!(turn.content, "Because.");
        assert_eq!(count, "whyBecause.".len());
        assert_eq!(turn.chunks, 1);
    }

    #[tokio::test]
    async fn test_aborted_session_and_reset() {
        let mut session = session();
        session.abort();
        let mut renders = Vec::new();
        let mut sink = |text: &str| renders.push(text.to_string());

        let turn = session
            .stream(chunks(vec![json!({"token": "never"})]), &mut sink)
            .await
            .unwrap();
        assert!(turn.aborted);
        assert_eq!(turn.display, "");
        assert_eq!(renders, vec![""]);

        session.reset_abort();
        assert!(!session.is_aborted());
    }

    #[tokio::test]
    async fn test_set_template_changes_parsing() {
        let mut session = session();
        session.set_template(ReasoningTemplate::new("Chinese", "【思考】", "【/思考】", ""));
        let mut sink = |_: &str| {};
        let turn = session.simulate_text("【思考】想想【/思考】好的", &mut sink).await;
        assert_eq!(turn.reasoning, "想想");
        assert_eq!(turn.display, "【思考】想想【/思考】好的");
    }
}
