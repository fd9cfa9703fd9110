//! Typewriter rendering of a streamed reply.
//!
//! Deltas are fanned out into single characters and queued. One
//! [`Typewriter`] owns the receiving end and replays the characters into the
//! message with a short pause that depends on the previously shown
//! character. Cancelling the shared token flushes everything received so far
//! in one write.

use crate::format::ParsedDelta;
use crate::thinking::{compose, ReasoningTemplate};
use std::io::{self, Write};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Pause before showing the next character, keyed on the one shown before it.
pub fn smooth_delay(prev: Option<char>) -> Duration {
    let ms = match prev {
        None => 0,
        Some('.' | '?' | '!' | '。' | '！' | '？') => 30,
        Some(',' | ';' | ':' | '，' | '；' | '：' | '、') => 20,
        Some('\n') => 25,
        Some(c) if c.is_whitespace() => 8,
        Some(_) => 5,
    };
    Duration::from_millis(ms)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharKind {
    Reasoning,
    Content,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharQueueItem {
    pub kind: CharKind,
    pub ch: char,
}

impl CharQueueItem {
    /// Reasoning characters first, then content, each in source order.
    pub fn fan_out(delta: &ParsedDelta) -> impl Iterator<Item = CharQueueItem> + '_ {
        let reasoning = delta.reasoning.chars().map(|ch| CharQueueItem {
            kind: CharKind::Reasoning,
            ch,
        });
        let content = delta.content.chars().map(|ch| CharQueueItem {
            kind: CharKind::Content,
            ch,
        });
        reasoning.chain(content)
    }
}

/// The reply being built for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamingMessage {
    pub reasoning: String,
    pub content: String,
    pub in_reasoning_phase: bool,
}

impl StreamingMessage {
    pub fn push(&mut self, item: CharQueueItem) {
        match item.kind {
            CharKind::Reasoning => self.reasoning.push(item.ch),
            CharKind::Content => self.content.push(item.ch),
        }
        self.in_reasoning_phase = item.kind == CharKind::Reasoning;
    }

    pub fn display(&self, template: &ReasoningTemplate) -> String {
        compose(&self.reasoning, &self.content, self.in_reasoning_phase, template)
    }
}

/// Receives the full display string each time the message changes.
pub trait RenderSink {
    fn render(&mut self, text: &str);
}

impl<F: FnMut(&str)> RenderSink for F {
    fn render(&mut self, text: &str) {
        self(text)
    }
}

/// Writes only what was appended since the previous render. When the new
/// text does not extend the old one it is written again on a fresh line.
pub struct DiffWriter<W: Write> {
    out: W,
    shown: String,
}

impl<W: Write> DiffWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            shown: String::new(),
        }
    }

    pub fn shown(&self) -> &str {
        &self.shown
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_diff(&mut self, text: &str) -> io::Result<()> {
        match text.strip_prefix(self.shown.as_str()) {
            Some(tail) => self.out.write_all(tail.as_bytes())?,
            None => {
                self.out.write_all(b"\n")?;
                self.out.write_all(text.as_bytes())?;
            }
        }
        self.out.flush()?;
        self.shown.clear();
        self.shown.push_str(text);
        Ok(())
    }
}

impl<W: Write> RenderSink for DiffWriter<W> {
    fn render(&mut self, text: &str) {
        if let Err(e) = self.write_diff(text) {
            tracing::warn!("render failed: {}", e);
        }
    }
}

/// Producer handle for a typewriter queue.
#[derive(Debug, Clone)]
pub struct CharSender {
    tx: mpsc::UnboundedSender<CharQueueItem>,
}

impl CharSender {
    /// Returns false once the typewriter has stopped.
    pub fn push(&self, item: CharQueueItem) -> bool {
        self.tx.send(item).is_ok()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Queues every character of `delta`, returning how many were accepted.
    pub fn push_delta(&self, delta: &ParsedDelta) -> usize {
        let mut queued = 0;
        for item in CharQueueItem::fan_out(delta) {
            if !self.push(item) {
                break;
            }
            queued += 1;
        }
        queued
    }
}

pub struct Typewriter {
    rx: mpsc::UnboundedReceiver<CharQueueItem>,
    template: ReasoningTemplate,
    cancel: CancellationToken,
    smooth: bool,
}

impl Typewriter {
    /// With `smooth` off every character is shown without pausing.
    pub fn new(template: ReasoningTemplate, cancel: CancellationToken, smooth: bool) -> (CharSender, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let typewriter = Self {
            rx,
            template,
            cancel,
            smooth,
        };
        (CharSender { tx }, typewriter)
    }

    /// Consumes the queue until every sender is dropped or the token is
    /// cancelled. Each character produces one render; a reply that ends
    /// while still in reasoning gets one more render closing the block.
    pub async fn run<S: RenderSink>(mut self, sink: &mut S) -> StreamingMessage {
        let mut message = StreamingMessage::default();
        let mut prev = None;

        loop {
            if self.cancel.is_cancelled() {
                return self.abort(message, sink);
            }

            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                item = self.rx.recv() => Some(item),
            };
            let item = match next {
                None => return self.abort(message, sink),
                Some(None) => break,
                Some(Some(item)) => item,
            };

            let delay = if self.smooth { smooth_delay(prev) } else { Duration::ZERO };
            if !delay.is_zero() {
                let aborted = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => true,
                    _ = tokio::time::sleep(delay) => false,
                };
                if aborted {
                    message.push(item);
                    return self.abort(message, sink);
                }
            }

            message.push(item);
            prev = Some(item.ch);
            sink.render(&message.display(&self.template));
        }

        if message.in_reasoning_phase {
            message.in_reasoning_phase = false;
            sink.render(&message.display(&self.template));
        }
        message
    }

    /// Takes everything already queued, shows it in one write and closes the
    /// queue so later pushes are dropped.
    fn abort<S: RenderSink>(&mut self, mut message: StreamingMessage, sink: &mut S) -> StreamingMessage {
        self.rx.close();
        let mut flushed = 0usize;
        while let Ok(item) = self.rx.try_recv() {
            message.push(item);
            flushed += 1;
        }
        message.in_reasoning_phase = false;
        tracing::debug!(flushed, "typewriter aborted");
        sink.render(&message.display(&self.template));
        message
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    fn content(text: &str) -> ParsedDelta {
        ParsedDelta::content(text)
    }

    #[test]
    fn test_delay_classes() {
        assert_eq!(smooth_delay(None), Duration::ZERO);
        assert_eq!(smooth_delay(Some('.')), Duration::from_millis(30));
        assert_eq!(smooth_delay(Some('！')), Duration::from_millis(30));
        assert_eq!(smooth_delay(Some(',')), Duration::from_millis(20));
        assert_eq!(smooth_delay(Some('：')), Duration::from_millis(20));
        assert_eq!(smooth_delay(Some('\n')), Duration::from_millis(25));
        assert_eq!(smooth_delay(Some(' ')), Duration::from_millis(8));
        assert_eq!(smooth_delay(Some('a')), Duration::from_millis(5));
        assert!(smooth_delay(Some('.')) > smooth_delay(Some('a')));
    }

    #[test]
    fn test_fan_out_order() {
        let delta = ParsedDelta {
            reasoning: "ab".to_string(),
            content: "c".to_string(),
        };
        let items: Vec<_> = CharQueueItem::fan_out(&delta).collect();
        assert_eq!(
            items,
            vec![
                CharQueueItem { kind: CharKind::Reasoning, ch: 'a' },
                CharQueueItem { kind: CharKind::Reasoning, ch: 'b' },
                CharQueueItem { kind: CharKind::Content, ch: 'c' },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_render_per_char() {
        let template = ReasoningTemplate::deepseek();
        let (tx, typewriter) = Typewriter::new(template.clone(), CancellationToken::new(), true);
        tx.push_delta(&ParsedDelta {
            reasoning: "ab".to_string(),
            content: "c".to_string(),
        });
        drop(tx);

        let mut renders = Vec::new();
        let mut sink = |text: &str| renders.push(text.to_string());
        let message = typewriter.run(&mut sink).await;

        assert_eq!(renders, vec!["<think>a", "<think>ab", "<think>ab</think>c"]);
        assert_eq!(message.display(&template), compose("ab", "c", false, &template));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delays_follow_previous_char() {
        let (tx, typewriter) = Typewriter::new(ReasoningTemplate::deepseek(), CancellationToken::new(), true);
        tx.push_delta(&content("Hi. "));
        drop(tx);

        let start = Instant::now();
        let mut sink = |_: &str| {};
        typewriter.run(&mut sink).await;
        let elapsed = start.elapsed();

        // 0 + 5 ('H') + 5 ('i') + 30 ('.')
        assert!(elapsed >= Duration::from_millis(40), "{:?}", elapsed);
        assert!(elapsed < Duration::from_millis(45), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsmoothed_does_not_wait() {
        let (tx, typewriter) = Typewriter::new(ReasoningTemplate::deepseek(), CancellationToken::new(), false);
        tx.push_delta(&content("Hello, world."));
        drop(tx);

        let start = Instant::now();
        let mut count = 0;
        let mut sink = |_: &str| count += 1;
        let message = typewriter.run(&mut sink).await;

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert_eq!(count, "Hello, world.".len());
        assert_eq!(message.content, "Hello, world.");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reasoning_only_reply_is_closed() {
        let template = ReasoningTemplate::deepseek();
        let (tx, typewriter) = Typewriter::new(template.clone(), CancellationToken::new(), true);
        tx.push_delta(&ParsedDelta {
            reasoning: "hm".to_string(),
            content: String::new(),
        });
        drop(tx);

        let mut renders = Vec::new();
        let mut sink = |text: &str| renders.push(text.to_string());
        let message = typewriter.run(&mut sink).await;

        assert_eq!(renders, vec!["<think>h", "<think>hm", "<think>hm</think>"]);
        assert!(!message.in_reasoning_phase);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_flushes_received_text() {
        let cancel = CancellationToken::new();
        let (tx, typewriter) = Typewriter::new(ReasoningTemplate::deepseek(), cancel.clone(), true);
        tx.push_delta(&content("abcdefgh"));

        let mut renders = Vec::new();
        let mut sink = |text: &str| {
            renders.push(text.to_string());
            if renders.len() == 3 {
                cancel.cancel();
            }
        };
        let message = typewriter.run(&mut sink).await;

        assert_eq!(renders, vec!["a", "ab", "abc", "abcdefgh"]);
        assert_eq!(message.content, "abcdefgh");
        assert!(!tx.push(CharQueueItem { kind: CharKind::Content, ch: 'z' }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        let (tx, typewriter) = Typewriter::new(ReasoningTemplate::deepseek(), cancel.clone(), true);
        tx.push_delta(&ParsedDelta {
            reasoning: "why".to_string(),
            content: "ok".to_string(),
        });
        cancel.cancel();

        let mut renders = Vec::new();
        let mut sink = |text: &str| renders.push(text.to_string());
        typewriter.run(&mut sink).await;

        assert_eq!(renders, vec!["<think>why</think>ok"]);
    }

    #[test]
    fn test_diff_writer_appends() {
        let mut writer = DiffWriter::new(Vec::new());
        writer.render("<think>a");
        writer.render("<think>ab</think>");
        writer.render("<think>ab</think>Hi");
        assert_eq!(writer.shown(), "<think>ab</think>Hi");
        assert_eq!(String::from_utf8(writer.into_inner()).unwrap(), "<think>ab</think>Hi");
    }

    #[test]
    fn test_diff_writer_rewrites_on_divergence() {
        let mut writer = DiffWriter::new(Vec::new());
        writer.render("<think>abc");
        writer.render("abc");
        assert_eq!(String::from_utf8(writer.into_inner()).unwrap(), "<think>abc\nabc");
    }
}
