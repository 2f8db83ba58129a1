use crate::types::{Message, MessageKind};
use crate::util::is_local_endpoint_url;

/// Closed classification of provider failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    BadRequest,
    RateLimited,
    ConnectionFailed,
    ServerError,
    Unknown,
}

impl ProviderErrorKind {
    pub fn type_name(self) -> &'static str {
        match self {
            Self::BadRequest => "BadRequestError",
            Self::RateLimited => "RateLimitError",
            Self::ConnectionFailed => "APIConnectionError",
            Self::ServerError => "APIError",
            Self::Unknown => "UnknownError",
        }
    }

    pub fn message_kind(self) -> MessageKind {
        match self {
            Self::Unknown => MessageKind::UnknownError,
            _ => MessageKind::ApiError,
        }
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            400 | 422 => Self::BadRequest,
            429 => Self::RateLimited,
            _ => Self::ServerError,
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}: {message}", kind.type_name())]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unknown(error: impl std::fmt::Display) -> Self {
        Self::new(ProviderErrorKind::Unknown, error.to_string())
    }

    pub fn from_status(status: u16, request_url: &str, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("API endpoint '{request_url}' returned HTTP {status}")
        } else {
            format!("API endpoint '{request_url}' returned HTTP {status}: {body}")
        };
        Self::new(ProviderErrorKind::from_status(status), message)
    }

    pub fn from_reqwest(error: reqwest::Error, request_url: &str) -> Self {
        if error.is_connect() && is_local_endpoint_url(request_url) {
            return Self::new(
                ProviderErrorKind::ConnectionFailed,
                format!(
                    "cannot reach local API endpoint '{request_url}': {error}. Start your local server or change base_url."
                ),
            );
        }
        if error.is_connect() {
            return Self::new(
                ProviderErrorKind::ConnectionFailed,
                format!("cannot reach API endpoint '{request_url}': {error}"),
            );
        }
        if error.is_timeout() {
            return Self::new(
                ProviderErrorKind::ConnectionFailed,
                format!("API request to '{request_url}' timed out: {error}"),
            );
        }
        if let Some(status) = error.status() {
            return Self::from_status(status.as_u16(), request_url, &error.to_string());
        }
        if error.is_body() || error.is_request() {
            return Self::new(
                ProviderErrorKind::ConnectionFailed,
                format!("API request to '{request_url}' failed: {error}"),
            );
        }
        Self::new(
            ProviderErrorKind::Unknown,
            format!("API request to '{request_url}' failed: {error}"),
        )
    }

    /// Error-tagged assistant message recorded as the round's response.
    pub fn to_message(&self) -> Message {
        Message::error(
            self.kind.message_kind(),
            self.kind.type_name(),
            &self.message,
        )
    }
}
