//! Crate-level error type used by the pipelines

use crate::providers::ProviderError;
use crate::store::StoreError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// Every search came back empty
    #[error("no comparable listings found")]
    NoComparables,

    #[error("{0}")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;
