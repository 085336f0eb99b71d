use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;

use relay_core::{FragmentStream, SourceError, StreamSource};

use crate::sse::{self, SseItem};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection settings for an OpenAI-compatible chat-completions endpoint.
#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: SecretString,
    pub model: String,
    /// Base URL without the trailing `/chat/completions`.
    pub base_url: String,
}

/// Streams chat completions for a single user prompt.
pub struct OpenAiSource {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiSource {
    pub fn new(config: OpenAiConfig) -> Result<Self, SourceError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| SourceError::NetworkError(format!("build HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/chat/completions",
            self.config.base_url.trim_end_matches('/')
        )
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        json!({
            "model": self.config.model,
            "stream": true,
            "messages": [{ "role": "user", "content": prompt }],
        })
    }
}

#[async_trait]
impl StreamSource for OpenAiSource {
    fn name(&self) -> &str {
        "openai"
    }

    #[instrument(skip(self, prompt), fields(model = %self.config.model, prompt_len = prompt.len()))]
    async fn open(&self, prompt: &str) -> Result<FragmentStream, SourceError> {
        let resp = self
            .client
            .post(self.endpoint())
            .bearer_auth(self.config.api_key.expose_secret())
            .header("accept", "text/event-stream")
            .json(&self.request_body(prompt))
            .send()
            .await
            .map_err(|e| SourceError::NetworkError(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            tracing::warn!(status, "completion request rejected");
            return Err(SourceError::from_status(status, body));
        }

        let fragments = sse::parse_sse(resp.bytes_stream())
            .take_while(|item| future::ready(!matches!(item, Ok(SseItem::Done))))
            .filter_map(|item| {
                future::ready(match item {
                    Ok(SseItem::Data(data)) => parse_chunk(&data).transpose(),
                    Ok(SseItem::Done) => None,
                    Err(e) => Some(Err(e)),
                })
            });

        Ok(Box::pin(fragments))
    }
}

#[derive(Deserialize)]
struct ChatChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<ChunkError>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Default, Deserialize)]
struct ChunkDelta {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChunkError {
    message: Option<String>,
}

/// Extract the text fragment from one streamed chunk. Chunks that carry no
/// text (role announcements, finish reasons) yield `Ok(None)`.
pub fn parse_chunk(data: &str) -> Result<Option<String>, SourceError> {
    let chunk: ChatChunk = serde_json::from_str(data)
        .map_err(|e| SourceError::Malformed(format!("{e}: {data}")))?;

    if let Some(error) = chunk.error {
        return Err(SourceError::StreamInterrupted(
            error.message.unwrap_or_else(|| "provider error".into()),
        ));
    }

    Ok(chunk
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.delta.content)
        .filter(|text| !text.is_empty()))
}
