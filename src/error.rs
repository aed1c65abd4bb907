use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),

    /// Bad username/password. Deliberately says nothing about which.
    #[error("Invalid credentials")]
    AuthenticationFailure,

    /// Missing, invalid or expired session token.
    #[error("Unauthorized")]
    NotAuthenticated,

    #[error("{0}")]
    Conflict(String),

    #[error("Unable to provision account")]
    IdentityProvisioning,

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Dependency(#[from] anyhow::Error),
}

impl AppError {
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "validation",
            AppError::AuthenticationFailure | AppError::NotAuthenticated => "authentication",
            AppError::Conflict(_) => "conflict",
            AppError::IdentityProvisioning => "provisioning",
            AppError::NotFound(_) => "not_found",
            AppError::Dependency(_) => "dependency",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::Conflict(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationFailure | AppError::NotAuthenticated => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::IdentityProvisioning | AppError::Dependency(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        AppError::Dependency(e.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Dependency(e) = &self {
            error!(error = ?e, "dependency failure");
        }
        let status = self.status();
        let body = Json(json!({
            "success": false,
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}
