pub mod api;
pub mod health;
pub mod metrics;

use axum::{Json, http::StatusCode, response::IntoResponse};
use tally_common::error::TallyError;

pub struct ApiError(pub TallyError);

impl From<TallyError> for ApiError {
    fn from(value: TallyError) -> Self {
        Self(value)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = match self.0 {
            TallyError::InvalidArgument(_) | TallyError::InvalidObservation(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (
            status,
            Json(serde_json::json!({
                "code": self.0.error_code(),
                "message": self.0.to_string(),
            })),
        )
            .into_response()
    }
}
