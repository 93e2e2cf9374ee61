use warden_core::engine::CheckError;
use warden_core::schema::SchemaError;
use warden_core::schema::types::TupleSchemaError;
use warden_core::tuple::TupleError;
use warden_storage::StorageError;

/// Public error taxonomy. Each `ApiError` maps to exactly one code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    InvalidArgument,
    UnknownPermission,
    SchemaValidation,
    NotFound,
    DepthExceeded,
    Timeout,
    Unavailable,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::UnknownPermission => "unknown_permission",
            Self::SchemaValidation => "schema_validation",
            Self::NotFound => "not_found",
            Self::DepthExceeded => "depth_exceeded",
            Self::Timeout => "timeout",
            Self::Unavailable => "unavailable",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Unavailable)
    }
}

pub const UNAVAILABLE_MESSAGE: &str = "the authorization store is temporarily unavailable";

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("check error: {0}")]
    Check(#[from] CheckError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("invalid tuple: {0}")]
    Tuple(#[from] TupleError),

    #[error("tuple rejected by schema: {0}")]
    TupleSchema(#[from] TupleSchemaError),

    #[error("schema rejected: {0}")]
    Schema(#[from] SchemaError),

    #[error("no schema has been loaded")]
    SchemaNotLoaded,
}

impl ApiError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidArgument(_) | Self::Tuple(_) | Self::TupleSchema(_) => {
                ErrorCode::InvalidArgument
            }
            Self::Check(CheckError::TypeNotFound(_)) => ErrorCode::InvalidArgument,
            Self::Check(CheckError::PermissionNotFound { .. }) => ErrorCode::UnknownPermission,
            Self::Check(CheckError::MaxDepthExceeded(_)) => ErrorCode::DepthExceeded,
            Self::Check(CheckError::Timeout(_)) => ErrorCode::Timeout,
            Self::Check(CheckError::StorageError(_)) => ErrorCode::Unavailable,
            Self::Storage(StorageError::Unavailable(_)) => ErrorCode::Unavailable,
            Self::Storage(_) => ErrorCode::InvalidArgument,
            Self::Schema(_) => ErrorCode::SchemaValidation,
            Self::SchemaNotLoaded => ErrorCode::NotFound,
        }
    }

    /// The message safe to hand to callers. Store failures are replaced by a
    /// fixed text; the detail is logged here instead.
    pub fn public_message(&self) -> String {
        if self.code() == ErrorCode::Unavailable {
            tracing::error!(error = %self, "store failure");
            return UNAVAILABLE_MESSAGE.to_string();
        }
        match self {
            Self::InvalidArgument(msg) => msg.clone(),
            Self::Check(err) => err.to_string(),
            Self::Storage(err) => err.to_string(),
            Self::Tuple(err) => err.to_string(),
            Self::TupleSchema(err) => err.to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use warden_core::schema::ParseError;

    #[test]
    fn check_errors_map_to_taxonomy() {
        let cases = [
            (
                CheckError::TypeNotFound("document".to_string()),
                ErrorCode::InvalidArgument,
            ),
            (
                CheckError::PermissionNotFound {
                    type_name: "document".to_string(),
                    permission: "fly".to_string(),
                },
                ErrorCode::UnknownPermission,
            ),
            (CheckError::MaxDepthExceeded(25), ErrorCode::DepthExceeded),
            (
                CheckError::Timeout(Duration::from_millis(10)),
                ErrorCode::Timeout,
            ),
            (
                CheckError::StorageError("connection reset".to_string()),
                ErrorCode::Unavailable,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(ApiError::from(err).code(), code);
        }
    }

    #[test]
    fn storage_errors_split_between_caller_and_store() {
        assert_eq!(
            ApiError::from(StorageError::InvalidCursor).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            ApiError::from(StorageError::EmptyDeleteFilter).code(),
            ErrorCode::InvalidArgument
        );
        assert_eq!(
            ApiError::from(StorageError::Unavailable("pool timed out".to_string())).code(),
            ErrorCode::Unavailable
        );
    }

    #[test]
    fn unavailable_message_is_sanitised() {
        let err = ApiError::from(StorageError::Unavailable(
            "error returned from database: relation \"relation_tuples\" does not exist"
                .to_string(),
        ));

        let message = err.public_message();

        assert_eq!(message, UNAVAILABLE_MESSAGE);
        assert!(!message.contains("relation_tuples"));
        assert!(err.code().is_retryable());
    }

    #[test]
    fn schema_errors_are_validation_failures() {
        let err = ApiError::from(SchemaError::Parse(ParseError::MixedOperators));

        assert_eq!(err.code(), ErrorCode::SchemaValidation);
        assert!(err.public_message().contains("mixed"));
    }

    #[test]
    fn missing_schema_is_not_found() {
        assert_eq!(ApiError::SchemaNotLoaded.code(), ErrorCode::NotFound);
        assert_eq!(ApiError::SchemaNotLoaded.code().as_str(), "not_found");
    }
}
