use thiserror::Error;

use crate::domain::practitioner::UserId;
use crate::domain::request::RequestId;

/// Failure surfaced by a store or directory port. Backend details are kept
/// as strings so the core stays free of any particular driver.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("backend failure: {0}")]
    Backend(String),
    #[error("decode failure: {0}")]
    Decode(String),
}

/// Failure surfaced to callers of the engines. NotFound variants are
/// terminal for the call; there is nothing to retry.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("request not found: {0}")]
    RequestNotFound(RequestId),
    #[error("user not found: {0}")]
    UserNotFound(UserId),
    #[error(transparent)]
    Store(#[from] StoreError),
}
