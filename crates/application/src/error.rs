use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for ApplicationError {
    fn from(value: RepositoryError) -> Self {
        match value {
            // 原子更新内被业务规则拒绝的变更按领域错误处理
            RepositoryError::Rejected(err) => ApplicationError::Domain(err),
            other => ApplicationError::Repository(other),
        }
    }
}
