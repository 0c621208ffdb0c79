//! HTTP front end: one POST endpoint that converts a JSON request body.

mod middleware;
mod monitor;

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    extract::{DefaultBodyLimit, State},
    http::StatusCode,
    middleware as axum_middleware,
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::Value;
use tokio::{sync::Semaphore, time::Instant};

pub use middleware::{RequestContext, log_responses, set_request_context};
pub use monitor::{MonitorSnapshot, RenderMonitor, RenderOutcome};

use crate::{
    application::{
        convert::ConversionService,
        error::{ConversionError, HttpError},
    },
    domain::{
        artifact::Delivery,
        request::{ConversionRequest, RequestParams},
    },
};

const SOURCE: &str = "infra::http::export";
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;
const MALFORMED_BODY: &str = "Failed rendering: \nERROR: Failed rendering chart";

#[derive(Clone)]
pub struct HttpState {
    service: ConversionService,
    permits: Arc<Semaphore>,
    request_timeout: Duration,
    monitor: RenderMonitor,
}

impl HttpState {
    pub fn new(service: ConversionService, max_concurrent: usize, request_timeout: Duration) -> Self {
        Self {
            service,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            request_timeout,
            monitor: RenderMonitor::new(),
        }
    }

    pub fn monitor(&self) -> &RenderMonitor {
        &self.monitor
    }
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/", post(export))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn export(State(state): State<HttpState>, body: Bytes) -> Result<Response, HttpError> {
    let value: Value = serde_json::from_slice(&body).map_err(|err| {
        HttpError::new(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            MALFORMED_BODY,
            format!("request body is not JSON: {err}"),
        )
    })?;

    if is_status_probe(&value) {
        return Ok((StatusCode::OK, "OK").into_response());
    }

    let params = RequestParams::deserialize(value).map_err(|err| {
        HttpError::new(
            SOURCE,
            StatusCode::INTERNAL_SERVER_ERROR,
            MALFORMED_BODY,
            format!("request body is not an object of request keys: {err}"),
        )
    })?;
    let request = ConversionRequest::from_params(params)
        .map_err(|err| HttpError::rendering(SOURCE, &ConversionError::from(err)))?;

    let started = Instant::now();
    state.monitor.started();
    let (outcome, result) = match tokio::time::timeout(
        state.request_timeout,
        convert_with_permit(&state, request),
    )
    .await
    {
        Ok(Ok(delivery)) => (RenderOutcome::Ok, Ok(delivery)),
        Ok(Err(error)) => (RenderOutcome::Failed, Err(error)),
        Err(_) => (
            RenderOutcome::TimedOut,
            Err(ConversionError::render_failure(format!(
                "Timeout reached while rendering after {} seconds",
                state.request_timeout.as_secs()
            ))),
        ),
    };
    state
        .monitor
        .finished(outcome, started.elapsed().as_millis() as u64);

    match result {
        Ok(delivery) => Ok((StatusCode::OK, delivery.into_response_text()).into_response()),
        Err(error) => Err(HttpError::rendering(SOURCE, &error)),
    }
}

async fn convert_with_permit(
    state: &HttpState,
    request: ConversionRequest,
) -> Result<Delivery, ConversionError> {
    let _permit = state
        .permits
        .acquire()
        .await
        .map_err(|_| ConversionError::render_failure("render pool is closed"))?;
    state.service.convert(request).await
}

/// `{"status": true}` asks whether the server is up.
fn is_status_probe(value: &Value) -> bool {
    match value.get("status") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text == "true",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn status_probe_accepts_boolean_and_text() {
        assert!(is_status_probe(&json!({"status": true})));
        assert!(is_status_probe(&json!({"status": "true"})));
        assert!(!is_status_probe(&json!({"status": false})));
        assert!(!is_status_probe(&json!({"options": "{}"})));
    }
}
