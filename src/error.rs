//! Error — the host's internal error taxonomy and the uniform response envelope.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ContainerResource;

/// Internal error taxonomy. Every public [`crate::engine::HostEngine`] operation
/// converts a `HostError` into a [`Response`] at its outer boundary — nothing
/// below the engine returns `Response` directly.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("validation failed: {0}")]
    ValidationFault(String),

    #[error("conflict: {0}")]
    Conflict {
        message: String,
        existing: Option<Box<ContainerResource>>,
    },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("artifact resolution failed: {0}")]
    ResolutionFailure(String),

    #[error("extension failure: {0}")]
    ExtensionFailure(String),

    #[error("update failed: {0}")]
    UpdateFailure(String),

    #[error("controller unreachable: {0}")]
    ControllerUnreachable(String),

    #[error("unexpected error [{kind}]: {message}")]
    Unexpected { kind: String, message: String },
}

impl HostError {
    pub fn conflict(message: impl Into<String>, existing: Option<ContainerResource>) -> Self {
        HostError::Conflict {
            message: message.into(),
            existing: existing.map(Box::new),
        }
    }

    pub fn unexpected(kind: impl Into<String>, message: impl Into<String>) -> Self {
        HostError::Unexpected {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

/// Response type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseType {
    Success,
    Failure,
}

/// Uniform response envelope returned by every [`crate::engine::HostEngine`] operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T> {
    #[serde(rename = "type")]
    pub kind: ResponseType,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<T>,
}

impl<T> Response<T> {
    pub fn success(message: impl Into<String>, payload: T) -> Self {
        Response {
            kind: ResponseType::Success,
            message: message.into(),
            payload: Some(payload),
        }
    }

    pub fn success_empty(message: impl Into<String>) -> Self {
        Response {
            kind: ResponseType::Success,
            message: message.into(),
            payload: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Response {
            kind: ResponseType::Failure,
            message: message.into(),
            payload: None,
        }
    }

    pub fn failure_with(message: impl Into<String>, payload: T) -> Self {
        Response {
            kind: ResponseType::Failure,
            message: message.into(),
            payload: Some(payload),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == ResponseType::Success
    }
}

impl<T> From<HostError> for Response<T> {
    fn from(err: HostError) -> Self {
        Response::failure(err.to_string())
    }
}
