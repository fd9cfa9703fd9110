//! Decoding of streamed response bodies into JSON chunks.
//!
//! Handles server-sent events (`data: {...}` lines terminated by
//! `data: [DONE]`) as well as newline-delimited JSON, which Ollama and the
//! llama.cpp server emit without any `data:` framing.

use crate::error::Result;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;

#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(Value),
    Done,
}

/// Incremental line decoder. Bytes are buffered until a full line is
/// available, so multi-byte characters split across reads stay intact.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            if let Some(event) = decode_line(&line) {
                events.push(event);
            }
        }
        events
    }

    /// Decodes whatever is left once the body has ended.
    pub fn finish(&mut self) -> Vec<SseEvent> {
        let line = std::mem::take(&mut self.buffer);
        decode_line(&line).into_iter().collect()
    }
}

fn decode_line(raw: &[u8]) -> Option<SseEvent> {
    let line = String::from_utf8_lossy(raw);
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }

    let payload = match line.strip_prefix("data:") {
        Some(rest) => rest.trim_start(),
        None if line.starts_with('{') => line,
        None => return None,
    };
    if payload == "[DONE]" {
        return Some(SseEvent::Done);
    }

    match serde_json::from_str::<Value>(payload) {
        Ok(json) => Some(SseEvent::Data(json)),
        Err(e) => {
            tracing::warn!("skipping malformed stream chunk: {} ({})", e, payload);
            None
        }
    }
}

/// Turns a body byte stream into a stream of JSON chunks that ends at
/// `[DONE]`, at the end of the body, or after the first transport error.
pub fn decode<S, B, E>(body: S) -> impl Stream<Item = Result<Value>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<anyhow::Error> + Send,
{
    let state = (Box::pin(body), SseDecoder::new(), VecDeque::new(), false);

    stream::unfold(state, |(mut body, mut decoder, mut pending, mut ended)| async move {
        loop {
            match pending.pop_front() {
                Some(SseEvent::Data(json)) => {
                    return Some((Ok(json), (body, decoder, pending, ended)));
                }
                Some(SseEvent::Done) => return None,
                None if ended => return None,
                None => {}
            }

            match body.next().await {
                Some(Ok(bytes)) => pending.extend(decoder.push(bytes.as_ref())),
                Some(Err(e)) => {
                    return Some((Err(e.into()), (body, decoder, VecDeque::new(), true)));
                }
                None => {
                    pending.extend(decoder.finish());
                    ended = true;
                }
            }
        }
    })
}
