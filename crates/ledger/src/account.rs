//! Account records.

use crate::error::LedgerError;
use isaac_storage::{keys, Batch, KvRead};
use isaac_types::{Address, Amount};
use serde::{Deserialize, Serialize};

/// A balance-and-sequence account.
///
/// `sequence_id` is the next sequence a transaction from this source must
/// carry; it increments by one for every committed transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub address: Address,
    pub balance: Amount,
    pub sequence_id: u64,
}

impl Account {
    pub fn new(address: Address, balance: Amount) -> Self {
        Account {
            address,
            balance,
            sequence_id: 0,
        }
    }

    /// Load an account, if it exists.
    pub fn get<R: KvRead>(
        reader: &R,
        address: &Address,
    ) -> Result<Option<Account>, isaac_storage::StorageError> {
        reader.get_json(&keys::account_key(&address.to_hex()))
    }

    /// Load an account, failing when absent.
    pub fn get_required<R: KvRead>(reader: &R, address: &Address) -> Result<Account, LedgerError> {
        Self::get(reader, address)?.ok_or_else(|| LedgerError::AccountNotFound(address.to_hex()))
    }

    /// Stage this account into a batch.
    pub fn save(&self, batch: &mut Batch<'_>) -> Result<(), LedgerError> {
        batch.put_json(&keys::account_key(&self.address.to_hex()), self)?;
        Ok(())
    }

    /// Credit `amount`, staging the result.
    pub fn credit(&mut self, amount: Amount, batch: &mut Batch<'_>) -> Result<(), LedgerError> {
        self.balance = self.balance.checked_add(amount)?;
        self.save(batch)
    }

    /// Debit `amount` and bump the sequence, staging the result.
    pub fn debit_and_advance(
        &mut self,
        amount: Amount,
        batch: &mut Batch<'_>,
    ) -> Result<(), LedgerError> {
        self.balance = self.balance.checked_sub(amount)?;
        self.sequence_id += 1;
        self.save(batch)
    }
}
