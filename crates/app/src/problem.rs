use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use quick_ops_core::ValidationError;
use quick_ops_storage::OperationsError;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    problem_type: &'static str,
    title: &'static str,
    detail: String,
}

#[derive(Debug)]
pub struct ProblemResponse {
    status: StatusCode,
    body: ProblemDetails,
}

impl ProblemResponse {
    pub fn new<S: Into<String>>(status: StatusCode, problem_type: &'static str, detail: S) -> Self {
        Self {
            status,
            body: ProblemDetails {
                problem_type,
                title: status.canonical_reason().unwrap_or("error"),
                detail: detail.into(),
            },
        }
    }

    /// Short label used for request metrics.
    pub fn problem_type(&self) -> &'static str {
        self.body.problem_type
    }
}

impl IntoResponse for ProblemResponse {
    fn into_response(self) -> Response {
        let mut response = Json(self.body).into_response();
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderValue::from_static("application/problem+json"),
        );
        response
    }
}

impl From<ValidationError> for ProblemResponse {
    fn from(err: ValidationError) -> Self {
        let problem_type = match err {
            ValidationError::RequiredUserId => "required_user_id",
            ValidationError::InvalidUserId(_) => "invalid_user_id",
            ValidationError::MissingField { .. } => "validation_failed",
        };
        Self::new(StatusCode::BAD_REQUEST, problem_type, err.to_string())
    }
}

impl From<OperationsError> for ProblemResponse {
    fn from(err: OperationsError) -> Self {
        error!(stage = "store", error = %err, "operations store request failed");
        match err {
            OperationsError::Connectivity(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "store_unavailable",
                "operations store is unavailable",
            ),
            OperationsError::DataIntegrity { user_id, .. } => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "data_integrity",
                format!("stored operations for user {user_id} are malformed"),
            ),
            OperationsError::Encode(_) | OperationsError::Store(_) => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "store_error",
                "failed to access operations store",
            ),
        }
    }
}
