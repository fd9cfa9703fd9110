pub mod api;
pub mod envconfig;
pub mod error;
pub mod format;
pub mod prompt;
pub mod session;
pub mod smoothing;
pub mod sse;
pub mod thinking;

pub use api::{ChatCompletionRequest, ChatMessage, Client};
pub use envconfig::{EnvConfig, ReasoningSettings};
pub use error::{Error, Result};
pub use format::{parse_chunk, FormatRegistry, ParsedDelta, Provider};
pub use session::{ChatSession, CompletedTurn};
pub use smoothing::{DiffWriter, RenderSink, StreamingMessage, Typewriter};
pub use thinking::{
    compose, extract_thinking, parse_reasoning_from_string, remove_thinking, ReasoningBlock,
    ReasoningTemplate, TemplateRegistry,
};
