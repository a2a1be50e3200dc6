use std::collections::BTreeMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Serialize;
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::RelayConfig;
use crate::context::ExecutionContext;
use crate::launch::LaunchSpec;
use crate::messages::StreamRequest;
use crate::session::{FrameSink, StreamSession};

const FRAME_BUFFER: usize = 64;
const MIN_TOKEN_ESTIMATE: u64 = 32;
const FALLBACK_TOKEN_ESTIMATE: u64 = 128;

#[derive(Debug, Serialize)]
struct HealthResponse {
    ok: bool,
    cwd: String,
    env: BTreeMap<String, String>,
    time: String,
}

#[derive(Debug, Serialize)]
struct TokenCountResponse {
    input_tokens: u64,
    output_tokens: u64,
}

pub fn build_router(config: Arc<RelayConfig>) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/v1/messages", post(post_messages))
        .route("/v1/messages/count_tokens", post(post_count_tokens))
        .with_state(config)
}

async fn get_health(State(config): State<Arc<RelayConfig>>) -> Json<HealthResponse> {
    let cwd = std::env::current_dir()
        .map(|dir| dir.display().to_string())
        .unwrap_or_default();
    let time = OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_default();

    Json(HealthResponse {
        ok: true,
        cwd,
        env: config.entries().clone(),
        time,
    })
}

async fn post_count_tokens(body: Bytes) -> Json<TokenCountResponse> {
    Json(TokenCountResponse {
        input_tokens: estimate_input_tokens(&body),
        output_tokens: 0,
    })
}

/// Roughly four bytes of compact JSON per token, never below 32. Bodies that
/// are not JSON get a flat 128.
pub fn estimate_input_tokens(body: &[u8]) -> u64 {
    match serde_json::from_slice::<Value>(body) {
        Ok(value) => {
            let bytes = value.to_string().len() as u64;
            (bytes / 4).max(MIN_TOKEN_ESTIMATE)
        }
        Err(err) => {
            tracing::debug!(error = %err, "count_tokens: unparsable body, using fallback estimate");
            FALLBACK_TOKEN_ESTIMATE
        }
    }
}

async fn post_messages(State(config): State<Arc<RelayConfig>>, body: Bytes) -> Response {
    let request = StreamRequest::from_body(&body);
    let prompt = request.prompt_text();
    let context = ExecutionContext::resolve(&config, &prompt);

    tracing::info!(
        cwd = %context.working_dir.display(),
        pretty = config.pretty,
        messages = request.messages.len(),
        prompt_bytes = prompt.len(),
        "relay: connecting to codex"
    );

    let (sink, frames) = FrameSink::channel(FRAME_BUFFER);
    let session = StreamSession::new(
        context,
        LaunchSpec::codex(config.agent_program.clone()),
        config.translate_mode(),
        prompt,
        request.model_name().to_string(),
        sink,
    );
    tokio::spawn(session.run());

    let stream = ReceiverStream::new(frames).map(Ok::<_, Infallible>);
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}
