use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::controller::ControlError;
use crate::mapping::ParseMappingTypeError;
use crate::pool::BindError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing or invalid authorization code")]
    Unauthorized,

    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    MappingType(#[from] ParseMappingTypeError),

    #[error(transparent)]
    Control(#[from] ControlError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) | Self::MappingType(_) => StatusCode::BAD_REQUEST,
            Self::Control(ControlError::Conflict(_)) => StatusCode::CONFLICT,
            Self::Control(ControlError::NotFound(..)) => StatusCode::NOT_FOUND,
            Self::Control(ControlError::Bind(_)) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable reason string for clients to match on.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::BadRequest(_) => "bad_request",
            Self::MappingType(ParseMappingTypeError::Unsupported(_)) => "unsupported_mapping_type",
            Self::MappingType(ParseMappingTypeError::Unknown(_)) => "bad_request",
            Self::Control(ControlError::Conflict(_)) => "conflict",
            Self::Control(ControlError::NotFound(..)) => "not_found",
            Self::Control(ControlError::Bind(BindError::AddressInUse(_))) => "address_in_use",
            Self::Control(ControlError::Bind(BindError::Other { .. })) => "bind_failed",
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(e: QueryRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("{self}");
        } else {
            debug!("{status}: {self}");
        }

        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
