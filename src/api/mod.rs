use crate::envconfig::EnvConfig;
use crate::error::{Error, Result};
use crate::session::{ChatSession, CompletedTurn};
use crate::smoothing::RenderSink;
use crate::sse;
use anyhow::bail;
use serde_json::Value;
use std::time::Duration;

pub mod types;

pub use types::{ChatCompletionRequest, ChatMessage};

/// Client for OpenAI-compatible chat completion endpoints.
pub struct Client {
    chat_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl Client {
    pub fn from_config(config: &EnvConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;

        Ok(Self {
            chat_url: config.chat_url(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    async fn post(&self, request: &ChatCompletionRequest) -> Result<reqwest::Response> {
        let mut builder = self.client.post(&self.chat_url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Http {
                status: status.as_u16(),
                body,
            }
            .into());
        }
        Ok(response)
    }

    /// Sends `request` and renders the reply through `session`. Streaming
    /// requests are decoded as server-sent events; otherwise the complete
    /// body is replayed through the typewriter.
    pub async fn chat<S: RenderSink>(
        &self,
        session: &ChatSession,
        request: &ChatCompletionRequest,
        sink: &mut S,
    ) -> Result<CompletedTurn> {
        tracing::debug!(url = %self.chat_url, model = %request.model, stream = request.stream, "sending chat request");

        let cancel = session.abort_handle();
        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => bail!("request aborted"),
            response = self.post(request) => response?,
        };

        if request.stream {
            return session.stream(sse::decode(response.bytes_stream()), sink).await;
        }

        let body = tokio::select! {
            biased;
            _ = cancel.cancelled() => bail!("request aborted"),
            body = response.json::<Value>() => body?,
        };
        session.simulate(&body, sink).await
    }
}
