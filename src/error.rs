use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error(transparent)]
    Remote(#[from] DraftServiceError),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not found")]
    NotFound,
    #[error("unauthorized")]
    Unauthorized,
    #[error("remote backend not configured")]
    RemoteDisabled,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Config(_)
            | AppError::Io(_)
            | AppError::Database(_)
            | AppError::Migration(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Remote(_) => StatusCode::BAD_GATEWAY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::RemoteDisabled => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Failures of the hosted draft table. Not-found reads are `Ok(None)`, never
/// an error.
#[derive(Debug, Error)]
pub enum DraftServiceError {
    #[error("failed to fetch drafts: {0}")]
    Fetch(#[source] RemoteCause),
    #[error("failed to write draft: {0}")]
    Write(#[source] RemoteCause),
}

#[derive(Debug, Error)]
pub enum RemoteCause {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
    #[error("backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("no matching row")]
    MissingRow,
    #[error(transparent)]
    Realtime(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid endpoint: {0}")]
    Endpoint(#[from] url::ParseError),
}
