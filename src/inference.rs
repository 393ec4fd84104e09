use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::data_models::ChatMessage;
use crate::error::InferenceError;
use crate::splitter::{self, SplitOutcome, StreamAdapter, StreamObserver};

const HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<ChatOptions>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub num_ctx: u32,
}

/// One NDJSON line of a streamed reply, or the whole body of a non-streamed one.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub message: ChatMessage,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    model: &'a str,
    keep_alive: u32,
}

/// The single non-streaming call the model-driven router needs.
#[async_trait::async_trait]
pub trait ChatBackend: Send + Sync {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError>;
}

/// Client for an Ollama-compatible inference service.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
    model: String,
    num_ctx: Option<u32>,
    client: reqwest::Client,
    streaming_client: reqwest::Client,
}

impl OllamaClient {
    pub fn new(base_url: &str, model: &str, timeout: Duration) -> reqwest::Result<OllamaClient> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()?;
        // a long answer must not be cut off by a total-request timeout
        let streaming_client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(OllamaClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            num_ctx: None,
            client,
            streaming_client,
        })
    }

    pub fn with_num_ctx(mut self, num_ctx: u32) -> OllamaClient {
        self.num_ctx = Some(num_ctx);
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn request(&self, messages: Vec<ChatMessage>, stream: bool) -> ChatRequest {
        ChatRequest {
            model: self.model.clone(),
            messages,
            stream,
            options: self.num_ctx.map(|num_ctx| ChatOptions { num_ctx }),
        }
    }

    async fn check_status(res: reqwest::Response) -> Result<reqwest::Response, InferenceError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(InferenceError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn chat_sync(&self, messages: Vec<ChatMessage>) -> Result<String, InferenceError> {
        let res = self
            .client
            .post(self.endpoint("/api/chat"))
            .json(&self.request(messages, false))
            .send()
            .await
            .map_err(InferenceError::Transport)?;
        let res = Self::check_status(res).await?;
        let body = res.bytes().await.map_err(InferenceError::Transport)?;
        let chunk: ChatChunk =
            serde_json::from_slice(&body).map_err(|e| InferenceError::Decode(e.to_string()))?;
        if let Some(err) = chunk.error {
            return Err(InferenceError::Decode(err));
        }
        Ok(chunk.message.content)
    }

    /// Streams a chat reply through `adapter` into the reasoning/answer splitter.
    ///
    /// Transport failures after the stream opened do not discard what was already
    /// received: the partial buffers come back with `SplitOutcome::error` set.
    pub async fn chat_streaming<A, O>(
        &self,
        messages: Vec<ChatMessage>,
        adapter: &mut A,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> SplitOutcome
    where
        A: StreamAdapter + ?Sized,
        O: StreamObserver + ?Sized,
    {
        let send = self
            .streaming_client
            .post(self.endpoint("/api/chat"))
            .json(&self.request(messages, true))
            .send();

        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            res = send => res.map_err(InferenceError::Transport),
        };
        let res = match res {
            Ok(res) => res,
            Err(e) => return SplitOutcome::failed(e),
        };
        let res = match Self::check_status(res).await {
            Ok(res) => res,
            Err(e) => return SplitOutcome::failed(e),
        };

        splitter::split_stream(res.bytes_stream(), adapter, observer, cancel).await
    }

    /// Probes `/api/tags`. An unreachable service is reported as
    /// `InferenceError::Unreachable`, which callers treat as fatal at startup.
    pub async fn health_check(&self) -> Result<(), InferenceError> {
        let res = self
            .client
            .get(self.endpoint("/api/tags"))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(|source| InferenceError::Unreachable {
                url: self.base_url.clone(),
                source,
            })?;
        Self::check_status(res).await?;
        Ok(())
    }

    pub async fn list_models(&self) -> Result<Vec<String>, InferenceError> {
        let res = self
            .client
            .get(self.endpoint("/api/tags"))
            .timeout(HEALTH_CHECK_TIMEOUT)
            .send()
            .await
            .map_err(InferenceError::Transport)?;
        let res = Self::check_status(res).await?;
        let body = res.bytes().await.map_err(InferenceError::Transport)?;
        let tags: TagsResponse =
            serde_json::from_slice(&body).map_err(|e| InferenceError::Decode(e.to_string()))?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Asks the service to unload the model and free its memory.
    pub async fn stop_model(&self) -> Result<(), InferenceError> {
        let res = self
            .client
            .post(self.endpoint("/api/generate"))
            .json(&StopRequest {
                model: &self.model,
                keep_alive: 0,
            })
            .send()
            .await
            .map_err(InferenceError::Transport)?;
        Self::check_status(res).await?;
        log::info!("model {} unloaded", self.model);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ChatBackend for OllamaClient {
    async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<String, InferenceError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(InferenceError::Cancelled),
            res = self.chat_sync(messages) => res,
        }
    }
}
