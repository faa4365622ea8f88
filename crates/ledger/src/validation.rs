//! State validation of ordinary transactions.
//!
//! Structural checks (signature, fee floor, operation kinds) live on the
//! transaction type itself; this module checks a transaction against
//! ledger state: source existence, sequence continuity, balance
//! sufficiency and per-operation target rules. It runs unchanged against
//! committed state or a finalizer batch via [`KvRead`].

use crate::account::Account;
use isaac_storage::{KvRead, StorageError};
use isaac_types::{Amount, Operation, Transaction};
use thiserror::Error;

/// Why a transaction fails state validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("source account {0} does not exist")]
    SourceNotFound(String),
    #[error("sequence mismatch: expected {expected}, got {got}")]
    SequenceMismatch { expected: u64, got: u64 },
    #[error("insufficient balance: have {balance}, need {needed}")]
    InsufficientBalance { balance: Amount, needed: Amount },
    #[error("payment target {0} does not exist")]
    TargetNotFound(String),
    #[error("create-account target {0} already exists")]
    TargetAlreadyExists(String),
    #[error("amount arithmetic: {0}")]
    Amount(#[from] isaac_types::AmountError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Validate `tx` against the state visible through `reader`.
pub fn validate_transaction<R: KvRead>(
    reader: &R,
    tx: &Transaction,
) -> Result<(), ValidationError> {
    let source = tx.source();
    let account = Account::get(reader, &source)?
        .ok_or_else(|| ValidationError::SourceNotFound(source.to_hex()))?;

    if tx.sequence_id() != account.sequence_id {
        return Err(ValidationError::SequenceMismatch {
            expected: account.sequence_id,
            got: tx.sequence_id(),
        });
    }

    let needed = tx.total_debit()?;
    if account.balance < needed {
        return Err(ValidationError::InsufficientBalance {
            balance: account.balance,
            needed,
        });
    }

    for op in tx.operations() {
        match op {
            Operation::Payment(payment) => {
                if Account::get(reader, &payment.target)?.is_none() {
                    return Err(ValidationError::TargetNotFound(payment.target.to_hex()));
                }
            }
            Operation::CreateAccount(create) => {
                if Account::get(reader, &create.target)?.is_some() {
                    return Err(ValidationError::TargetAlreadyExists(create.target.to_hex()));
                }
            }
            // Structural checks already reject these in ordinary
            // transactions; the finalizer applies them separately.
            Operation::CollectTxFee(_) | Operation::Inflation(_) => {}
        }
    }

    Ok(())
}
