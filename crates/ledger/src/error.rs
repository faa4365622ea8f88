//! Ledger errors.

use isaac_storage::StorageError;
use isaac_types::{AmountError, Hash, TransactionError};
use thiserror::Error;

/// Failure applying ledger operations.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The block already exists at this height. Not a failure: the batch is
    /// discarded and the commit is treated as a success.
    #[error("block is not committable: already stored")]
    NotCommittable,

    #[error("block not found")]
    BlockNotFound,

    #[error("transaction {0:?} not found in pool or storage")]
    TransactionNotFound(Hash),

    #[error("account {0} not found")]
    AccountNotFound(String),

    #[error("account {0} already exists")]
    AccountAlreadyExists(String),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("validation failed: {0}")]
    Validation(#[from] crate::validation::ValidationError),

    #[error("malformed transaction: {0}")]
    Transaction(#[from] TransactionError),

    #[error("amount arithmetic: {0}")]
    Amount(#[from] AmountError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
