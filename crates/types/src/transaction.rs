//! Transactions and operations.
//!
//! An ordinary transaction carries payments and account creations from a
//! single source account. The proposer transaction is a synthetic
//! transaction built fresh each round by the elected proposer, carrying
//! exactly a fee-collection operation followed by an inflation operation;
//! it is never admitted to the transaction pool and exists only inside a
//! ballot.

use crate::amount::Amount;
use crate::crypto::{Address, KeyPair, Signature};
use crate::hash::Hash;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Minimum fee per operation for ordinary transactions, in micro-units.
pub const BASE_FEE: u64 = 10_000;

/// Structural failure of a transaction.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("transaction has no operations")]
    EmptyOperations,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("operation targets its own source")]
    SelfTarget,
    #[error("operation amount is zero")]
    ZeroAmount,
    #[error("fee {fee} below base fee for {operations} operations")]
    FeeBelowBase { fee: Amount, operations: usize },
    #[error("operation kind not allowed here")]
    ForbiddenOperation,
    #[error("proposer transaction must carry collect-tx-fee then inflation")]
    MalformedProposerTransaction,
}

/// Transfer to an existing account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub target: Address,
    pub amount: Amount,
}

/// Create a new account with an opening balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAccount {
    pub target: Address,
    pub amount: Amount,
}

/// Credit the common account with the block's transaction fees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectTxFee {
    pub target: Address,
    pub amount: Amount,
    /// Number of ordinary transactions the fee was collected from.
    pub txs: u64,
    /// Height of the block this fee belongs to.
    pub height: u64,
}

/// Credit the common account with block inflation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inflation {
    pub target: Address,
    pub amount: Amount,
    pub initial_balance: Amount,
    /// The configured decimal ratio string, compared byte-for-byte.
    pub ratio: String,
    pub height: u64,
}

/// A single transaction operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Operation {
    Payment(Payment),
    CreateAccount(CreateAccount),
    CollectTxFee(CollectTxFee),
    Inflation(Inflation),
}

impl Operation {
    /// The account credited by this operation.
    pub fn target(&self) -> Address {
        match self {
            Operation::Payment(op) => op.target,
            Operation::CreateAccount(op) => op.target,
            Operation::CollectTxFee(op) => op.target,
            Operation::Inflation(op) => op.target,
        }
    }

    /// The amount credited by this operation.
    pub fn amount(&self) -> Amount {
        match self {
            Operation::Payment(op) => op.amount,
            Operation::CreateAccount(op) => op.amount,
            Operation::CollectTxFee(op) => op.amount,
            Operation::Inflation(op) => op.amount,
        }
    }

    /// Whether this kind may appear in a client-submitted transaction.
    pub fn allowed_in_ordinary(&self) -> bool {
        matches!(self, Operation::Payment(_) | Operation::CreateAccount(_))
    }
}

/// The signed fields of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct TransactionBody {
    source: Address,
    sequence_id: u64,
    fee: Amount,
    operations: Vec<Operation>,
}

/// A signed transaction.
///
/// The content hash covers everything except the signature; `(source,
/// sequence_id)` is unique within any committed chain prefix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(flatten)]
    body: TransactionBody,
    signature: Signature,
}

impl Transaction {
    /// Build an unsigned transaction. Call [`Transaction::signed`] before use.
    pub fn new(source: Address, sequence_id: u64, fee: Amount, operations: Vec<Operation>) -> Self {
        Transaction {
            body: TransactionBody {
                source,
                sequence_id,
                fee,
                operations,
            },
            signature: Signature::zero(),
        }
    }

    /// Sign the body with `keypair` under `network_id`.
    pub fn signed(mut self, keypair: &KeyPair, network_id: &[u8]) -> Self {
        self.signature = keypair.sign(network_id, &self.signing_bytes());
        self
    }

    fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).expect("serializable body")
    }

    /// Content hash over the signed fields.
    pub fn hash(&self) -> Hash {
        Hash::digest_json(&self.body)
    }

    pub fn source(&self) -> Address {
        self.body.source
    }

    pub fn sequence_id(&self) -> u64 {
        self.body.sequence_id
    }

    pub fn fee(&self) -> Amount {
        self.body.fee
    }

    pub fn operations(&self) -> &[Operation] {
        &self.body.operations
    }

    /// Total debited from the source: operation amounts plus the fee.
    pub fn total_debit(&self) -> Result<Amount, crate::amount::AmountError> {
        Amount::sum(self.body.operations.iter().map(|op| op.amount()))?.checked_add(self.body.fee)
    }

    /// Verify the signature against the source address.
    pub fn verify(&self, network_id: &[u8]) -> bool {
        match self.body.source.public_key() {
            Some(pk) => pk.verify(network_id, &self.signing_bytes(), &self.signature),
            None => false,
        }
    }

    /// Structural checks for a client-submitted transaction.
    pub fn well_formed(&self, network_id: &[u8]) -> Result<(), TransactionError> {
        if self.body.operations.is_empty() {
            return Err(TransactionError::EmptyOperations);
        }
        if !self.verify(network_id) {
            return Err(TransactionError::InvalidSignature);
        }
        for op in &self.body.operations {
            if !op.allowed_in_ordinary() {
                return Err(TransactionError::ForbiddenOperation);
            }
            if op.target() == self.body.source {
                return Err(TransactionError::SelfTarget);
            }
            if op.amount() == Amount::ZERO {
                return Err(TransactionError::ZeroAmount);
            }
        }
        let minimum = Amount::from(BASE_FEE * self.body.operations.len() as u64);
        if self.body.fee < minimum {
            return Err(TransactionError::FeeBelowBase {
                fee: self.body.fee,
                operations: self.body.operations.len(),
            });
        }
        Ok(())
    }
}

/// The proposer's synthetic per-round transaction.
///
/// Carries zero fee and exactly two operations: collect-tx-fee, then
/// inflation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposerTransaction(Transaction);

impl ProposerTransaction {
    /// Build and sign the proposer transaction for a block at `height`.
    pub fn new(
        proposer: &KeyPair,
        network_id: &[u8],
        height: u64,
        fee_total: Amount,
        fee_txs: u64,
        inflation_amount: Amount,
        common_account: Address,
        initial_balance: Amount,
        inflation_ratio: &str,
    ) -> Self {
        let operations = vec![
            Operation::CollectTxFee(CollectTxFee {
                target: common_account,
                amount: fee_total,
                txs: fee_txs,
                height,
            }),
            Operation::Inflation(Inflation {
                target: common_account,
                amount: inflation_amount,
                initial_balance,
                ratio: inflation_ratio.to_string(),
                height,
            }),
        ];
        ProposerTransaction(
            Transaction::new(proposer.address(), height, Amount::ZERO, operations)
                .signed(proposer, network_id),
        )
    }

    pub fn hash(&self) -> Hash {
        self.0.hash()
    }

    pub fn source(&self) -> Address {
        self.0.source()
    }

    /// The inner transaction, for applying through the ledger.
    pub fn transaction(&self) -> &Transaction {
        &self.0
    }

    /// The collect-tx-fee operation.
    pub fn collect_tx_fee(&self) -> Result<&CollectTxFee, TransactionError> {
        match self.0.operations().first() {
            Some(Operation::CollectTxFee(op)) => Ok(op),
            _ => Err(TransactionError::MalformedProposerTransaction),
        }
    }

    /// The inflation operation.
    pub fn inflation(&self) -> Result<&Inflation, TransactionError> {
        match self.0.operations().get(1) {
            Some(Operation::Inflation(op)) => Ok(op),
            _ => Err(TransactionError::MalformedProposerTransaction),
        }
    }

    /// Structural checks: signature, zero fee, exactly the two operations.
    pub fn well_formed(&self, network_id: &[u8]) -> Result<(), TransactionError> {
        if !self.0.verify(network_id) {
            return Err(TransactionError::InvalidSignature);
        }
        if self.0.fee() != Amount::ZERO || self.0.operations().len() != 2 {
            return Err(TransactionError::MalformedProposerTransaction);
        }
        self.collect_tx_fee()?;
        self.inflation()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_keypair;

    const NET: &[u8] = b"test-network";

    #[test]
    fn well_formed_payment() {
        let kp = test_keypair(1);
        let target = test_keypair(2).address();
        let tx = Transaction::new(
            kp.address(),
            0,
            Amount::from(BASE_FEE),
            vec![Operation::Payment(Payment {
                target,
                amount: Amount::from(500),
            })],
        )
        .signed(&kp, NET);
        assert!(tx.well_formed(NET).is_ok());
        assert_eq!(tx.total_debit().unwrap(), Amount::from(500 + BASE_FEE));
    }

    #[test]
    fn rejects_fee_below_base() {
        let kp = test_keypair(1);
        let target = test_keypair(2).address();
        let tx = Transaction::new(
            kp.address(),
            0,
            Amount::from(BASE_FEE - 1),
            vec![Operation::Payment(Payment {
                target,
                amount: Amount::from(500),
            })],
        )
        .signed(&kp, NET);
        assert!(matches!(
            tx.well_formed(NET),
            Err(TransactionError::FeeBelowBase { .. })
        ));
    }

    #[test]
    fn rejects_tampered_signature() {
        let kp = test_keypair(1);
        let target = test_keypair(2).address();
        let tx = Transaction::new(
            kp.address(),
            0,
            Amount::from(BASE_FEE),
            vec![Operation::Payment(Payment {
                target,
                amount: Amount::from(500),
            })],
        )
        .signed(&kp, NET);
        let mut tampered = tx.clone();
        tampered.body.sequence_id = 99;
        assert_eq!(
            tampered.well_formed(NET),
            Err(TransactionError::InvalidSignature)
        );
    }

    #[test]
    fn rejects_forbidden_operation_kind() {
        let kp = test_keypair(1);
        let tx = Transaction::new(
            kp.address(),
            0,
            Amount::from(BASE_FEE),
            vec![Operation::Inflation(Inflation {
                target: test_keypair(2).address(),
                amount: Amount::from(1),
                initial_balance: Amount::from(1),
                ratio: "0.1".into(),
                height: 1,
            })],
        )
        .signed(&kp, NET);
        assert_eq!(
            tx.well_formed(NET),
            Err(TransactionError::ForbiddenOperation)
        );
    }

    #[test]
    fn proposer_transaction_shape() {
        let kp = test_keypair(3);
        let common = test_keypair(9).address();
        let ptx = ProposerTransaction::new(
            &kp,
            NET,
            4,
            Amount::from(30_000),
            3,
            Amount::from(100),
            common,
            Amount::from(1_000_000),
            "0.0000001",
        );
        assert!(ptx.well_formed(NET).is_ok());
        assert_eq!(ptx.collect_tx_fee().unwrap().amount, Amount::from(30_000));
        assert_eq!(ptx.inflation().unwrap().height, 4);
    }
}
