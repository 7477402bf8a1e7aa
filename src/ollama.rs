//! Ollama backend client.
//!
//! This module provides a unified interface for talking to the completion
//! backend, allowing different implementations (a pooled hyper client in
//! production, mocks in tests) to be used interchangeably throughout the
//! gateway. The trait exposes exactly what the pipeline needs: resolving a
//! model identifier to a served-model handle, a streaming chat call, and a
//! single-shot chat call.
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request, header};
use bon::Builder;
use bytes::Bytes;
use futures_util::{Stream, TryStreamExt};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper_util::client::legacy::Client;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use url::Url;

use crate::models::Role;
use crate::ndjson::NdjsonTextStream;

pub type HyperClient = Client<
    hyper_tls::HttpsConnector<hyper_util::client::legacy::connect::HttpConnector>,
    axum::body::Body,
>;

/// A lazy sequence of completion-text chunks. Finite once the backend flags
/// completion, non-restartable, and cancelled by dropping it.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// A model identifier the backend has confirmed it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelHandle {
    pub name: String,
}

/// One role/content pair as the backend consumes it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A fully prepared chat invocation.
#[derive(Debug, Clone, Builder)]
pub struct ChatCall {
    pub model: String,
    pub messages: Vec<ChatTurn>,
    pub temperature: f32,
}

/// A failure from the backend. Status codes are never chosen here; the
/// error classifier decides how each of these surfaces.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("Ollama request failed: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Ollama request failed: HTTP {status}: {detail}")]
    Status { status: u16, detail: String },

    #[error("Ollama payload could not be decoded: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Invalid response from Ollama: missing content")]
    MissingContent,

    #[error("{0}")]
    Response(String),

    #[error("backend failure with no diagnostic")]
    Opaque,
}

#[async_trait]
pub trait OllamaApi: std::fmt::Debug {
    /// Ask the backend whether it serves `model`. `None` means the backend
    /// answered but does not serve it.
    async fn resolve(&self, model: &str) -> Result<Option<ModelHandle>, BackendError>;

    /// Invoke a chat completion, streaming text chunks as they are produced.
    async fn chat_stream(&self, call: ChatCall) -> Result<TextStream, BackendError>;

    /// Invoke a chat completion and await the whole completion string.
    async fn chat(&self, call: ChatCall) -> Result<String, BackendError>;
}

/// Wire shape of `POST /api/chat`.
#[derive(Serialize)]
struct ChatPayload<'a> {
    model: &'a str,
    messages: &'a [ChatTurn],
    stream: bool,
    options: SamplingOptions,
}

#[derive(Serialize)]
struct SamplingOptions {
    temperature: f32,
}

/// One NDJSON line of a streaming response; also the whole body of a
/// non-streaming one.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatChunk {
    #[serde(default)]
    pub message: Option<ChunkMessage>,
    #[serde(default)]
    pub done: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChunkMessage {
    #[serde(default)]
    pub content: Option<String>,
}

/// Wire shape of `GET /api/tags`.
#[derive(Debug, Deserialize)]
struct TagList {
    #[serde(default)]
    models: Vec<ServedModel>,
}

#[derive(Debug, Deserialize)]
struct ServedModel {
    name: String,
}

/// Error bodies from Ollama are `{"error": "..."}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: String,
}

fn status_error(status: u16, body: &[u8]) -> BackendError {
    let detail = serde_json::from_slice::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error)
        .unwrap_or_else(|_| String::from_utf8_lossy(body).into_owned());
    BackendError::Status { status, detail }
}

/// Tag names either match exactly or carry the implicit `:latest` suffix.
fn match_model(models: Vec<ServedModel>, model: &str) -> Option<ModelHandle> {
    let tagged = format!("{model}:latest");
    models
        .into_iter()
        .find(|served| served.name == model || served.name == tagged)
        .map(|served| ModelHandle { name: served.name })
}

/// The production backend: a pooled hyper client against one base URL.
#[derive(Debug, Clone)]
pub struct HyperOllama {
    client: HyperClient,
    base_url: Url,
}

impl HyperOllama {
    pub fn new(base_url: Url) -> Self {
        Self::with_pool(base_url, 90, 100)
    }

    /// Pool knobs come from the gateway config; 90s/100 are the defaults
    /// used when callers do not care.
    pub fn with_pool(
        base_url: Url,
        pool_idle_timeout_secs: u64,
        pool_max_idle_per_host: usize,
    ) -> Self {
        let https = hyper_tls::HttpsConnector::new();

        tracing::debug!(
            "HTTP client pool config: idle_timeout={}s, max_idle_per_host={}",
            pool_idle_timeout_secs,
            pool_max_idle_per_host
        );

        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(std::time::Duration::from_secs(pool_idle_timeout_secs))
            .pool_max_idle_per_host(pool_max_idle_per_host)
            .pool_timer(TokioTimer::new())
            .build(https);

        Self { client, base_url }
    }

    fn endpoint(&self, path: &str) -> Result<axum::http::Uri, BackendError> {
        let joined = self
            .base_url
            .join(path)
            .map_err(|err| BackendError::Transport(Box::new(err)))?;
        axum::http::Uri::try_from(joined.as_str())
            .map_err(|err| BackendError::Transport(Box::new(err)))
    }

    async fn send(
        &self,
        request: Request<Body>,
    ) -> Result<axum::http::Response<Incoming>, BackendError> {
        self.client
            .request(request)
            .await
            .map_err(|err| BackendError::Transport(Box::new(err)))
    }

    async fn post_chat(
        &self,
        call: &ChatCall,
        stream: bool,
    ) -> Result<axum::http::Response<Incoming>, BackendError> {
        let payload = serde_json::to_vec(&ChatPayload {
            model: &call.model,
            messages: &call.messages,
            stream,
            options: SamplingOptions {
                temperature: call.temperature,
            },
        })?;

        let request = Request::builder()
            .method(Method::POST)
            .uri(self.endpoint("api/chat")?)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(payload))
            .map_err(|err| BackendError::Transport(Box::new(err)))?;

        let response = self.send(request).await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .into_body()
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            return Err(status_error(status.as_u16(), &body));
        }
        Ok(response)
    }
}

#[async_trait]
impl OllamaApi for HyperOllama {
    async fn resolve(&self, model: &str) -> Result<Option<ModelHandle>, BackendError> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(self.endpoint("api/tags")?)
            .body(Body::empty())
            .map_err(|err| BackendError::Transport(Box::new(err)))?;

        let response = self.send(request).await?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| BackendError::Transport(Box::new(err)))?
            .to_bytes();

        if !status.is_success() {
            return Err(status_error(status.as_u16(), &body));
        }

        let tags: TagList = serde_json::from_slice(&body)?;
        tracing::debug!(served = tags.models.len(), "resolved backend tag list");
        Ok(match_model(tags.models, model))
    }

    async fn chat_stream(&self, call: ChatCall) -> Result<TextStream, BackendError> {
        let response = self.post_chat(&call, true).await?;
        let data = response
            .into_body()
            .into_data_stream()
            .map_err(std::io::Error::other);
        Ok(Box::pin(NdjsonTextStream::new(Box::pin(data))))
    }

    async fn chat(&self, call: ChatCall) -> Result<String, BackendError> {
        let response = self.post_chat(&call, false).await?;
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|err| BackendError::Transport(Box::new(err)))?
            .to_bytes();

        let chunk: ChatChunk = serde_json::from_slice(&body)?;
        if let Some(error) = chunk.error {
            return Err(BackendError::Response(error));
        }
        chunk
            .message
            .and_then(|message| message.content)
            .filter(|content| !content.is_empty())
            .ok_or(BackendError::MissingContent)
    }
}
