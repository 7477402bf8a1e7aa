//! Request pipelines for the two endpoints.
//!
//! Both handlers run the same staged pipeline (parse, validate, resolve the
//! model, invoke the backend) and short-circuit any failure into the error
//! classifier. Stages only ever produce [`PipelineError`]; status codes are
//! chosen in one place.
use axum::Json;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::AppState;
use crate::error::{PipelineError, Policy, classify};
use crate::models::Role;
use crate::ollama::{ChatCall, ChatTurn, ModelHandle, OllamaApi};
use crate::prompt::{SYSTEM_PROMPT, build_prompt};
use crate::validation::{validate_chat_request, validate_simple_request};

/// Fixed sampling temperature for every completion call.
const TEMPERATURE: f32 = 0.7;

/// `POST /api/chat`: validate a multi-message payload and stream the
/// completion back as it is produced.
#[instrument(skip(state, req))]
pub async fn chat_handler<T>(State(state): State<AppState<T>>, req: Request) -> Response
where
    T: OllamaApi + Clone + Send + Sync + 'static,
{
    match chat_pipeline(&state, req).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "chat request failed");
            let (status, body) = classify(&err, Policy::Chat);
            (status, Json(body)).into_response()
        }
    }
}

async fn chat_pipeline<T>(state: &AppState<T>, req: Request) -> Result<Response, PipelineError>
where
    T: OllamaApi + Clone + Send + Sync + 'static,
{
    let value = parse_body(req).await?;
    let request = validate_chat_request(&value).map_err(PipelineError::Schema)?;
    let model = resolve_model(state).await?;

    debug!(
        model = %model.name,
        messages = request.messages.len(),
        "chat request validated"
    );

    // Message text reaches the backend exactly as sent; only the fixed
    // system instruction is prepended.
    let mut turns = Vec::with_capacity(request.messages.len() + 1);
    turns.push(ChatTurn::new(Role::System, SYSTEM_PROMPT));
    turns.extend(
        request
            .messages
            .iter()
            .map(|message| ChatTurn::new(message.role, message.flatten_text())),
    );

    let call = ChatCall::builder()
        .model(model.name)
        .messages(turns)
        .temperature(TEMPERATURE)
        .build();
    let stream = state.backend.chat_stream(call).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CACHE_CONTROL, "no-cache"),
            (header::CONNECTION, "keep-alive"),
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
        ],
        Body::from_stream(stream),
    )
        .into_response())
}

/// `POST /api/message`: validate a single-turn payload and return the whole
/// completion as plain text.
#[instrument(skip(state, req))]
pub async fn message_handler<T>(State(state): State<AppState<T>>, req: Request) -> Response
where
    T: OllamaApi + Clone + Send + Sync + 'static,
{
    match message_pipeline(&state, req).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "message request failed");
            let (status, body) = classify(&err, Policy::Simple);
            (status, Json(body)).into_response()
        }
    }
}

async fn message_pipeline<T>(state: &AppState<T>, req: Request) -> Result<Response, PipelineError>
where
    T: OllamaApi + Clone + Send + Sync + 'static,
{
    let value = parse_body(req).await?;
    let request = validate_simple_request(&value).map_err(PipelineError::Schema)?;
    let model = resolve_model(state).await?;

    debug!(model = %model.name, "message request validated");

    let call = ChatCall::builder()
        .model(model.name)
        .messages(vec![ChatTurn::new(
            Role::User,
            build_prompt(&request.message),
        )])
        .temperature(TEMPERATURE)
        .build();
    let completion = state.backend.chat(call).await?;

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-store"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        completion.trim().to_string(),
    )
        .into_response())
}

/// Read and parse the request body.
///
/// Runs before any schema logic so malformed input is always reported as a
/// parse failure, distinct from schema violations.
async fn parse_body(req: Request) -> Result<Value, PipelineError> {
    let bytes = axum::body::to_bytes(req.into_body(), usize::MAX)
        .await
        .map_err(|err| PipelineError::Parse {
            detail: err.to_string(),
        })?;
    serde_json::from_slice(&bytes).map_err(|err| PipelineError::Parse {
        detail: err.to_string(),
    })
}

/// Resolve the model for this request.
///
/// The identifier is re-read from its source on every request; absence is a
/// service condition, not a crash. On failure here the backend's chat
/// capability is never invoked.
async fn resolve_model<T>(state: &AppState<T>) -> Result<ModelHandle, PipelineError>
where
    T: OllamaApi + Clone + Send + Sync + 'static,
{
    let model = state
        .model
        .read()
        .ok_or(PipelineError::ModelNotConfigured)?;
    let handle = state.backend.resolve(&model).await?;
    handle.ok_or(PipelineError::ModelNotAvailable { model })
}
