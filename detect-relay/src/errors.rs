use http::StatusCode;
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T, E = RelayError> = std::result::Result<T, E>;

/// Errors that end a relay request before a downstream response can be passed through
#[derive(Error, Debug)]
pub enum RelayError {
    #[error("only POST allowed")]
    MethodNotAllowed,

    #[error("expected multipart/form-data with a boundary")]
    UnsupportedContentType,

    #[error("malformed multipart body: {0}")]
    MalformedMultipart(String),

    #[error("upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },

    #[error("no image file provided")]
    NoFileProvided { received_fields: Vec<String> },

    #[error("inference service is not ready, try again later")]
    UpstreamUnavailable,

    #[error("upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] crate::config::ValidationError),

    #[error("HTTP client error: {0}")]
    HttpClientError(#[from] reqwest::Error),
}

impl RelayError {
    /// Status code reported to the caller.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            RelayError::UnsupportedContentType
            | RelayError::MalformedMultipart(_)
            | RelayError::NoFileProvided { .. } => StatusCode::BAD_REQUEST,
            RelayError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            RelayError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            RelayError::UpstreamTimeout(_)
            | RelayError::UpstreamRequestFailed(_, _)
            | RelayError::Io(_)
            | RelayError::InvalidConfig(_)
            | RelayError::HttpClientError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// True when no response was received from the inference service.
    pub fn is_transport_failure(&self) -> bool {
        matches!(
            self,
            RelayError::UpstreamTimeout(_) | RelayError::UpstreamRequestFailed(_, _)
        )
    }

    /// Short label used to tag metrics and logs.
    pub fn outcome(&self) -> &'static str {
        match self {
            RelayError::MethodNotAllowed
            | RelayError::UnsupportedContentType
            | RelayError::MalformedMultipart(_)
            | RelayError::PayloadTooLarge { .. }
            | RelayError::NoFileProvided { .. } => "bad_request",
            RelayError::UpstreamUnavailable => "upstream_unavailable",
            RelayError::UpstreamTimeout(_) | RelayError::UpstreamRequestFailed(_, _) => {
                "transport_failure"
            }
            RelayError::Io(_) | RelayError::InvalidConfig(_) | RelayError::HttpClientError(_) => {
                "internal_error"
            }
        }
    }
}

impl From<multer::Error> for RelayError {
    fn from(e: multer::Error) -> Self {
        match e {
            multer::Error::StreamSizeExceeded { limit } => RelayError::PayloadTooLarge { limit },
            multer::Error::FieldSizeExceeded { limit, .. } => {
                RelayError::PayloadTooLarge { limit }
            }
            multer::Error::NoBoundary | multer::Error::NoMultipart => {
                RelayError::UnsupportedContentType
            }
            other => RelayError::MalformedMultipart(other.to_string()),
        }
    }
}
