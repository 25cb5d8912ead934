use std::collections::BTreeMap;

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use page_manager_api_types::{ApiErrorBody, ApiErrorMessage, codes};

use crate::application::error::ErrorReport;
use crate::application::pages::ArchivePageError;
use crate::application::repos::RepoError;

const SOURCE: &str = "infra::http::error";

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
    hint: Option<String>,
    errors: BTreeMap<String, Vec<String>>,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            hint: None,
            errors: BTreeMap::new(),
            detail: None,
        }
    }

    pub fn bad_request(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            hint,
            ..Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message)
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<ArchivePageError> for ApiError {
    fn from(err: ArchivePageError) -> Self {
        match err {
            ArchivePageError::Validation(errors) => Self {
                errors: errors.by_field(),
                ..Self::new(
                    StatusCode::BAD_REQUEST,
                    codes::VALIDATION,
                    "One or more validation errors occurred.",
                )
            }
            .with_detail(errors.to_string()),
            ArchivePageError::NotFound { .. } => {
                Self::not_found(err.to_string()).with_detail(err.to_string())
            }
            ArchivePageError::Conflict { attempts } => Self::new(
                StatusCode::CONFLICT,
                codes::CONFLICT,
                "Unable to complete operation due to concurrent modifications",
            )
            .with_detail(format!("gave up after {attempts} attempts")),
            ArchivePageError::Repo(RepoError::Timeout) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
            )
            .with_detail(RepoError::Timeout.to_string()),
            ArchivePageError::Repo(_) | ArchivePageError::Domain(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                codes::REPO,
                "Internal server error",
            )
            .with_detail(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = self
            .detail
            .unwrap_or_else(|| format!("{}: {}", self.code, self.message));
        let body = ApiErrorBody {
            error: ApiErrorMessage {
                code: self.code.to_string(),
                message: self.message,
                hint: self.hint,
                errors: self.errors,
                trace_id: None,
            },
        };
        let mut response = (self.status, Json(body.clone())).into_response();
        // Re-rendered with the request id by `set_request_context`.
        response.extensions_mut().insert(body);
        ErrorReport::from_message(SOURCE, self.status, detail).attach(&mut response);
        response
    }
}
