use super::multipart::MultipartError;
use super::paths::{FilenameError, PathError};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use log::{debug, error};

/// 单个请求的失败原因，每个变体对应一个状态码
#[derive(Debug, thiserror::Error)]
pub enum RequestError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Upload not allowed")]
    UploadDisabled,

    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    #[error("Bad upload: {0}")]
    BadUpload(String),

    #[error("Upload exceeds {0} bytes")]
    PayloadTooLarge(u64),

    #[error("Upload failed: {0}")]
    Internal(String),
}

impl RequestError {
    pub fn status(&self) -> StatusCode {
        match self {
            RequestError::NotFound(_) => StatusCode::NOT_FOUND,
            RequestError::Forbidden(_) => StatusCode::FORBIDDEN,
            RequestError::UploadDisabled | RequestError::MethodNotAllowed(_) => {
                StatusCode::METHOD_NOT_ALLOWED
            }
            RequestError::BadUpload(_) => StatusCode::BAD_REQUEST,
            RequestError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            RequestError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PathError> for RequestError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::NotFound(p) => RequestError::NotFound(p),
            PathError::Traversal(_) | PathError::NullByte | PathError::InvalidEncoding => {
                RequestError::Forbidden(err.to_string())
            }
            PathError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                RequestError::Forbidden("No permission to access path".to_string())
            }
            PathError::Io(e) => RequestError::Internal(e.to_string()),
        }
    }
}

impl From<MultipartError> for RequestError {
    fn from(err: MultipartError) -> Self {
        RequestError::BadUpload(err.to_string())
    }
}

impl From<FilenameError> for RequestError {
    fn from(err: FilenameError) -> Self {
        RequestError::BadUpload(err.to_string())
    }
}

impl IntoResponse for RequestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("{}", self);
        } else {
            debug!("Request rejected ({}): {}", status.as_u16(), self);
        }

        let message = crate::listing::escape_html(&self.to_string());
        let body = format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Error {code}</title></head>\n<body>\n<h1>Error {code}</h1>\n<p>{message}</p>\n</body>\n</html>\n",
            code = status.as_u16(),
        );
        (
            status,
            [("Content-Type", "text/html; charset=utf-8")],
            body,
        )
            .into_response()
    }
}
