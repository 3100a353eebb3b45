use axum::{
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

#[derive(Debug, Error)]
pub(crate) enum AppError {
    #[error("unsupported upload type {0:?}, expected jpg, jpeg or png")]
    UnsupportedType(String),
    #[error("no image field in upload")]
    MissingImage,
    #[error("could not decode image: {0}")]
    InvalidImage(#[from] image::ImageError),
    #[error(transparent)]
    Multipart(#[from] MultipartError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        tracing::warn!(error = %self, "upload rejected");
        (StatusCode::BAD_REQUEST, self.to_string()).into_response()
    }
}
