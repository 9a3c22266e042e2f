use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::warn;

use crate::core::SolveError;

/// Rejections raised while turning flags or request payloads into planner inputs.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("--{flag} {requirement}")]
    InvalidArgument {
        flag: &'static str,
        requirement: &'static str,
    },

    #[error("Invalid API JSON payload: {0}")]
    Payload(String),

    #[error("unknown withdrawal source: {0}")]
    UnknownSource(String),

    #[error(transparent)]
    Solve(#[from] SolveError),

    #[error(transparent)]
    Cli(#[from] clap::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl InputError {
    pub(crate) fn invalid(flag: &'static str, requirement: &'static str) -> Self {
        InputError::InvalidArgument { flag, requirement }
    }
}

impl From<serde_json::Error> for InputError {
    fn from(err: serde_json::Error) -> Self {
        InputError::Serialization(err.to_string())
    }
}

impl IntoResponse for InputError {
    fn into_response(self) -> Response {
        let status = match &self {
            InputError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        warn!(%status, error = %self, "request rejected");

        let mut response = (status, Json(json!({ "error": self.to_string() }))).into_response();
        super::set_no_store(&mut response);
        response
    }
}

pub type InputResult<T> = Result<T, InputError>;
