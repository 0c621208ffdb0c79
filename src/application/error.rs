use std::{collections::BTreeSet, error::Error as StdError};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::{
    application::engine::EngineError, domain::error::DomainError, infra::error::InfraError,
};

const TIMEOUT_PREFIX: &str =
    "Timeout reached while downloading external resources. Remaining resources: ";

/// Failure taxonomy of a single conversion.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// A required binding or the markup never confirmed.
    #[error("{0}")]
    Parse(String),
    /// The resource deadline elapsed with loads still pending.
    #[error("{}", timeout_message(.pending))]
    ResourceTimeout { pending: BTreeSet<String> },
    #[error("{0}")]
    RenderFailure(String),
    #[error("{message}")]
    Io {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },
    #[error("{0}")]
    InvalidRequest(String),
}

fn timeout_message(pending: &BTreeSet<String>) -> String {
    let mut message = TIMEOUT_PREFIX.to_string();
    for url in pending {
        message.push_str("\n  - ");
        message.push_str(url);
    }
    message
}

impl ConversionError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn render_failure(message: impl Into<String>) -> Self {
        Self::RenderFailure(message.into())
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source: Some(source),
        }
    }

    /// The error artifact handed back to callers.
    pub fn artifact_message(&self) -> String {
        format!("ERROR: {self}")
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ConversionError::Parse(_) => "parse",
            ConversionError::ResourceTimeout { .. } => "resource_timeout",
            ConversionError::RenderFailure(_) => "render_failure",
            ConversionError::Io { .. } => "io",
            ConversionError::InvalidRequest(_) => "invalid_request",
        }
    }
}

impl From<EngineError> for ConversionError {
    fn from(error: EngineError) -> Self {
        Self::RenderFailure(error.to_string())
    }
}

impl From<DomainError> for ConversionError {
    fn from(error: DomainError) -> Self {
        match error {
            DomainError::Validation { message } => Self::InvalidRequest(message),
            DomainError::Invariant { message } => Self::RenderFailure(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = Vec::new();
        messages.push(error.to_string());
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// A failed render as seen by HTTP clients: `500 text/plain` with the error artifact.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    body: String,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        body: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        let report = ErrorReport::from_message(source, status, detail);
        Self {
            status,
            body: body.into(),
            report,
        }
    }

    pub fn rendering(source: &'static str, error: &ConversionError) -> Self {
        let status = StatusCode::INTERNAL_SERVER_ERROR;
        Self {
            status,
            body: format!("Failed rendering: \n{}", error.artifact_message()),
            report: ErrorReport::from_error(source, status, error),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.body).into_response();
        self.report.attach(&mut response);
        response
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Conversion(#[from] ConversionError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Line printed by the command-line front end before a failing exit.
    pub fn exit_message(&self) -> String {
        match self {
            AppError::Conversion(error) => error.artifact_message(),
            other => format!("ERROR: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_lists_each_pending_url() {
        let error = ConversionError::ResourceTimeout {
            pending: BTreeSet::from([
                "http://b.example/2.png".to_string(),
                "http://a.example/1.png".to_string(),
            ]),
        };

        assert_eq!(
            error.artifact_message(),
            "ERROR: Timeout reached while downloading external resources. Remaining resources: \
             \n  - http://a.example/1.png\n  - http://b.example/2.png"
        );
    }

    #[test]
    fn engine_errors_become_render_failures() {
        let error: ConversionError = EngineError::render("pixmap allocation failed").into();
        assert_eq!(error.kind(), "render_failure");
        assert_eq!(error.to_string(), "pixmap allocation failed");
    }

    #[test]
    fn validation_errors_become_invalid_requests() {
        let error: ConversionError =
            DomainError::validation("Insufficient or wrong parameters for rendering").into();
        assert!(matches!(error, ConversionError::InvalidRequest(_)));
    }

    #[test]
    fn exit_message_prefixes_conversion_errors_once() {
        let error = AppError::from(ConversionError::parse("bad options"));
        assert_eq!(error.exit_message(), "ERROR: bad options");
    }

    #[test]
    fn rendering_response_is_plain_text_500() {
        let response =
            HttpError::rendering("test", &ConversionError::render_failure("boom")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(response.extensions().get::<ErrorReport>().is_some());
    }
}
