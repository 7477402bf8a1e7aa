//! Nirvana gateway - a thin HTTP front for a local Ollama chat assistant.
//!
//! This library validates untrusted chat payloads, confirms the configured
//! model is actually served, and relays completions back to the caller:
//! streamed for the multi-message chat form, whole for the single-turn
//! message form. All failures are classified centrally into a fixed set of
//! status codes and stable error bodies.

use axum::Router;
use axum::routing::post;
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use tracing::{info, instrument};

pub mod error;
pub mod handlers;
pub mod models;
pub mod ndjson;
pub mod ollama;
pub mod prompt;
pub mod validation;

use ollama::{HyperOllama, OllamaApi};

/// Environment variable naming the model both endpoints serve.
pub const MODEL_ENV: &str = "OLLAMA_MODEL";

/// Where the per-request model identifier comes from.
///
/// Production reads the environment on every request, so operators can
/// repoint the model without a restart; tests inject a fixed value. Blank
/// values count as unconfigured either way.
#[derive(Debug, Clone)]
pub enum ModelSource {
    Env(&'static str),
    Fixed(Option<String>),
}

impl ModelSource {
    pub fn read(&self) -> Option<String> {
        let value = match self {
            ModelSource::Env(var) => std::env::var(var).ok(),
            ModelSource::Fixed(value) => value.clone(),
        };
        value.filter(|model| !model.trim().is_empty())
    }
}

impl Default for ModelSource {
    fn default() -> Self {
        ModelSource::Env(MODEL_ENV)
    }
}

/// The main application state: the backend seam plus the model source.
#[derive(Clone, Debug)]
pub struct AppState<T: OllamaApi> {
    pub backend: T,
    pub model: ModelSource,
}

impl AppState<HyperOllama> {
    /// Create a new AppState with the default pooled backend client.
    pub fn new(backend: HyperOllama) -> Self {
        Self {
            backend,
            model: ModelSource::default(),
        }
    }
}

impl<T: OllamaApi> AppState<T> {
    /// Create a new AppState with a custom backend (useful for testing).
    pub fn with_backend(backend: T, model: ModelSource) -> Self {
        Self { backend, model }
    }
}

/// Build the main router for the gateway.
/// This creates routes for:
/// - `POST /api/chat` - multi-message chat, streamed response
/// - `POST /api/message` - single-turn message, plain-text response
#[instrument(skip(state))]
pub fn build_router<T: OllamaApi + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route("/api/chat", post(handlers::chat_handler::<T>))
        .route("/api/message", post(handlers::message_handler::<T>))
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// # Parameters
/// - `prefix`: A string prefix for the metrics, which can be either a string
///   literal or an owned string. The `'static` lifetime is required by the
///   Prometheus metrics layer, which holds the prefix for the lifetime of
///   the program.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}

/// Test doubles for the backend seam, shared by unit and integration tests.
pub mod test_utils {
    use crate::ollama::{BackendError, ChatCall, ModelHandle, OllamaApi, TextStream};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::sync::{Arc, Mutex};

    /// One interaction the mock backend has seen, in order.
    #[derive(Debug, Clone)]
    pub enum RecordedCall {
        Resolve { model: String },
        ChatStream { call: ChatCall },
        Chat { call: ChatCall },
    }

    type ResolveFn = dyn Fn(&str) -> Result<Option<ModelHandle>, BackendError> + Send + Sync;
    type StreamFn = dyn Fn() -> Result<Vec<String>, BackendError> + Send + Sync;
    type ChatFn = dyn Fn() -> Result<String, BackendError> + Send + Sync;

    pub struct MockOllama {
        pub calls: Arc<Mutex<Vec<RecordedCall>>>,
        resolve_fn: Arc<ResolveFn>,
        stream_fn: Arc<StreamFn>,
        chat_fn: Arc<ChatFn>,
    }

    /// The transport error a stopped local Ollama produces.
    pub fn connection_refused() -> BackendError {
        BackendError::Transport(Box::new(std::io::Error::new(
            std::io::ErrorKind::ConnectionRefused,
            "tcp connect error: Connection refused (os error 111)",
        )))
    }

    fn serves_any_model() -> Arc<ResolveFn> {
        Arc::new(|model| {
            Ok(Some(ModelHandle {
                name: model.to_string(),
            }))
        })
    }

    impl MockOllama {
        /// Serves whatever model it is asked about and streams `chunks`.
        pub fn streaming(chunks: Vec<&str>) -> Self {
            let chunks: Vec<String> = chunks.into_iter().map(str::to_string).collect();
            let joined = chunks.concat();
            let stream_chunks = chunks.clone();
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                resolve_fn: serves_any_model(),
                stream_fn: Arc::new(move || Ok(stream_chunks.clone())),
                chat_fn: Arc::new(move || Ok(joined.clone())),
            }
        }

        /// Serves any model; single-shot completions return `text`.
        pub fn completing(text: &str) -> Self {
            Self::streaming(vec![text])
        }

        /// Answers tag queries but serves no model at all.
        pub fn unavailable() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                resolve_fn: Arc::new(|_| Ok(None)),
                stream_fn: Arc::new(|| Err(BackendError::Opaque)),
                chat_fn: Arc::new(|| Err(BackendError::Opaque)),
            }
        }

        /// Refuses TCP connections on every call, like a stopped Ollama.
        pub fn refusing_connections() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                resolve_fn: serves_any_model(),
                stream_fn: Arc::new(|| Err(connection_refused())),
                chat_fn: Arc::new(|| Err(connection_refused())),
            }
        }

        /// Chat calls fail with a plain diagnostic message.
        pub fn erroring(message: &str) -> Self {
            let stream_message = message.to_string();
            let chat_message = message.to_string();
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                resolve_fn: serves_any_model(),
                stream_fn: Arc::new(move || Err(BackendError::Response(stream_message.clone()))),
                chat_fn: Arc::new(move || Err(BackendError::Response(chat_message.clone()))),
            }
        }

        /// Chat calls fail without any usable diagnostic.
        pub fn opaque_failure() -> Self {
            Self {
                calls: Arc::new(Mutex::new(Vec::new())),
                resolve_fn: serves_any_model(),
                stream_fn: Arc::new(|| Err(BackendError::Opaque)),
                chat_fn: Arc::new(|| Err(BackendError::Opaque)),
            }
        }

        pub fn recorded_calls(&self) -> Vec<RecordedCall> {
            self.calls.lock().unwrap().clone()
        }

        /// The chat invocations (either mode) the backend has seen.
        pub fn chat_calls(&self) -> Vec<ChatCall> {
            self.recorded_calls()
                .into_iter()
                .filter_map(|recorded| match recorded {
                    RecordedCall::ChatStream { call } | RecordedCall::Chat { call } => Some(call),
                    RecordedCall::Resolve { .. } => None,
                })
                .collect()
        }
    }

    impl std::fmt::Debug for MockOllama {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("MockOllama")
                .field("calls", &self.calls)
                .field("behavior", &"<closures>")
                .finish()
        }
    }

    impl Clone for MockOllama {
        fn clone(&self) -> Self {
            Self {
                calls: Arc::clone(&self.calls),
                resolve_fn: Arc::clone(&self.resolve_fn),
                stream_fn: Arc::clone(&self.stream_fn),
                chat_fn: Arc::clone(&self.chat_fn),
            }
        }
    }

    #[async_trait]
    impl OllamaApi for MockOllama {
        async fn resolve(&self, model: &str) -> Result<Option<ModelHandle>, BackendError> {
            self.calls.lock().unwrap().push(RecordedCall::Resolve {
                model: model.to_string(),
            });
            (self.resolve_fn)(model)
        }

        async fn chat_stream(&self, call: ChatCall) -> Result<TextStream, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(RecordedCall::ChatStream { call: call.clone() });
            let chunks = (self.stream_fn)()?;
            let stream = futures_util::stream::iter(
                chunks
                    .into_iter()
                    .map(|chunk| Ok::<_, std::io::Error>(Bytes::from(chunk))),
            );
            Ok(Box::pin(stream))
        }

        async fn chat(&self, call: ChatCall) -> Result<String, BackendError> {
            self.calls
                .lock()
                .unwrap()
                .push(RecordedCall::Chat { call: call.clone() });
            (self.chat_fn)()
        }
    }
}
