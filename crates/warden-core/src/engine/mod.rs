mod check;

pub use check::{CheckEngine, CheckRequest, CheckResult, Trace};

use std::future::Future;
use std::time::Duration;

use crate::schema::types::ResolveError;
use crate::tuple::{Tuple, TupleFilter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("type not found: {0}")]
    TypeNotFound(String),

    #[error("permission '{permission}' not found on type '{type_name}'")]
    PermissionNotFound {
        type_name: String,
        permission: String,
    },

    #[error("max depth exceeded: {0}")]
    MaxDepthExceeded(usize),

    #[error("check timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<ResolveError> for CheckError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::UnknownType(t) => Self::TypeNotFound(t),
            ResolveError::UnknownMember { type_name, name } => Self::PermissionNotFound {
                type_name,
                permission: name,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub max_depth: usize,
    pub max_concurrent_branches: usize,
    pub check_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_depth: 25,
            max_concurrent_branches: 10,
            check_timeout: Duration::from_millis(2000),
        }
    }
}

/// Read access to relationship tuples during traversal. Implementations
/// return every tuple matching the filter.
pub trait TupleReader: Send + Sync {
    fn read_tuples(
        &self,
        filter: &TupleFilter,
    ) -> impl Future<Output = Result<Vec<Tuple>, CheckError>> + Send;
}
