/// Failures seen by a client. Server errors carry the code from the
/// response body; transport problems are `Connection` or `Timeout`.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unknown permission: {0}")]
    UnknownPermission(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("depth exceeded: {0}")]
    DepthExceeded(String),
    #[error("check timed out on the server: {0}")]
    CheckTimeout(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response: {0}")]
    Decode(String),
    #[error("unexpected status {status}: {message}")]
    Status { status: u16, message: String },
}

impl ClientError {
    /// Maps an error body's `code` onto a variant.
    pub fn from_code(status: u16, code: &str, message: String) -> Self {
        match code {
            "invalid_argument" => Self::InvalidArgument(message),
            "unknown_permission" => Self::UnknownPermission(message),
            "schema_validation" => Self::SchemaValidation(message),
            "not_found" => Self::NotFound(message),
            "depth_exceeded" => Self::DepthExceeded(message),
            "timeout" => Self::CheckTimeout(message),
            "unavailable" => Self::Unavailable(message),
            _ => Self::Status { status, message },
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::Unavailable(_))
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}
