//! Core types for ISAAC consensus.
//!
//! This crate provides the foundational types used throughout the consensus
//! implementation:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures, amounts
//! - **Consensus types**: VotingBasis, Ballot, Block
//! - **Ledger types**: Transaction, Operation, ProposerTransaction
//! - **Membership**: ValidatorSet
//! - **Configuration**: node-wide consensus parameters
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.

mod amount;
mod ballot;
mod block;
mod config;
mod crypto;
mod hash;
mod transaction;
mod validator;

pub use amount::{calculate_inflation, Amount, AmountError};
pub use ballot::{Ballot, BallotError, BallotState, Proposed, VotingBasis, VotingHole};
pub use block::Block;
pub use config::ConsensusConfig;
pub use crypto::{Address, AddressParseError, KeyPair, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use transaction::{
    CollectTxFee, CreateAccount, Inflation, Operation, Payment, ProposerTransaction, Transaction,
    TransactionError, BASE_FEE,
};
pub use validator::ValidatorSet;

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Create a deterministic test keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(&[seed; 32])
    }

    /// Create a simple signed payment transaction.
    pub fn test_payment(
        source: &KeyPair,
        target: Address,
        amount: u64,
        sequence_id: u64,
        network_id: &[u8],
    ) -> Transaction {
        Transaction::new(
            source.address(),
            sequence_id,
            Amount::from(BASE_FEE),
            vec![Operation::Payment(Payment {
                target,
                amount: Amount::from(amount),
            })],
        )
        .signed(source, network_id)
    }
}

#[cfg(test)]
mod tests {
    use super::test_utils::*;
    use super::*;

    #[test]
    fn payment_round_trips_through_json() {
        let kp = test_keypair(7);
        let target = test_keypair(8).address();
        let tx = test_payment(&kp, target, 100, 0, b"test-network");

        let raw = serde_json::to_vec(&tx).unwrap();
        let back: Transaction = serde_json::from_slice(&raw).unwrap();
        assert_eq!(back.hash(), tx.hash());
        assert!(back.verify(b"test-network"));
    }
}
