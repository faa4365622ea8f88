//! Ballots and voting bases.
//!
//! A ballot is the signed vote message exchanged during a consensus round.
//! The proposer's INIT ballot carries the full proposed payload (transaction
//! hash list, confirmed timestamp, proposer transaction); every derived
//! SIGN/ACCEPT ballot echoes the payload with the proposer transaction
//! reduced to its hash.

use crate::crypto::{Address, KeyPair, Signature};
use crate::hash::Hash;
use crate::transaction::ProposerTransaction;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The tuple identifying one consensus attempt.
///
/// `height` is the height of the block being decided; `block_hash` is the
/// hash of the previous (latest committed) block. Two ballots share a basis
/// iff all three fields match, so the basis itself serves as the map key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VotingBasis {
    pub height: u64,
    pub round: u64,
    pub block_hash: Hash,
}

impl fmt::Display for VotingBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {:?})", self.height, self.round, self.block_hash)
    }
}

/// Consensus phase a ballot belongs to.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum BallotState {
    Init,
    Sign,
    Accept,
    AllConfirm,
}

impl BallotState {
    /// Whether ballots in this state are tallied into a round vote.
    pub fn is_valid_for_vote(&self) -> bool {
        matches!(self, BallotState::Sign | BallotState::Accept)
    }

    /// The phase entered after this one.
    pub fn next(&self) -> BallotState {
        match self {
            BallotState::Init => BallotState::Sign,
            BallotState::Sign => BallotState::Accept,
            BallotState::Accept | BallotState::AllConfirm => BallotState::AllConfirm,
        }
    }
}

impl fmt::Display for BallotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BallotState::Init => "INIT",
            BallotState::Sign => "SIGN",
            BallotState::Accept => "ACCEPT",
            BallotState::AllConfirm => "ALLCONFIRM",
        };
        f.write_str(s)
    }
}

/// A node's vote carried by a ballot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VotingHole {
    Yes,
    No,
    /// Threshold reached without a YES or NO majority.
    Exp,
    /// No decision yet; never broadcast.
    NotYet,
}

impl fmt::Display for VotingHole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VotingHole::Yes => "YES",
            VotingHole::No => "NO",
            VotingHole::Exp => "EXP",
            VotingHole::NotYet => "NOTYET",
        };
        f.write_str(s)
    }
}

/// The proposer-chosen payload for one basis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposed {
    /// Ordered hashes of the ordinary transactions in the proposal.
    pub transactions: Vec<Hash>,
    /// Hash of the proposer transaction; always present.
    pub proposer_transaction_hash: Hash,
    /// Full proposer transaction; present only on the proposer's INIT ballot.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub proposer_transaction: Option<ProposerTransaction>,
    /// Proposal timestamp (RFC 3339), stamped by the proposer and reused as
    /// the committed block's `confirmed` field.
    pub confirmed: String,
}

/// Structural failure of a ballot.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BallotError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("ballot vote NOTYET cannot be broadcast")]
    NotYetVote,
    #[error("INIT ballot must be signed by its proposer")]
    InitNotFromProposer,
    #[error("INIT ballot from the proposer must carry the proposer transaction")]
    MissingProposerTransaction,
    #[error("proposer transaction hash mismatch")]
    ProposerTransactionHashMismatch,
    #[error("malformed proposer transaction: {0}")]
    ProposerTransaction(#[from] crate::transaction::TransactionError),
}

/// The signed fields of a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct BallotBody {
    basis: VotingBasis,
    proposer: Address,
    source: Address,
    state: BallotState,
    vote: VotingHole,
    proposed: Proposed,
}

/// A signed vote message for one basis in one state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    #[serde(flatten)]
    body: BallotBody,
    signature: Signature,
}

impl Ballot {
    /// Build the proposer's INIT ballot carrying the full payload.
    pub fn new_init(
        basis: VotingBasis,
        proposer: &KeyPair,
        network_id: &[u8],
        transactions: Vec<Hash>,
        proposer_transaction: ProposerTransaction,
        confirmed: String,
    ) -> Self {
        let body = BallotBody {
            basis,
            proposer: proposer.address(),
            source: proposer.address(),
            state: BallotState::Init,
            vote: VotingHole::Yes,
            proposed: Proposed {
                transactions,
                proposer_transaction_hash: proposer_transaction.hash(),
                proposer_transaction: Some(proposer_transaction),
                confirmed,
            },
        };
        let mut ballot = Ballot {
            body,
            signature: Signature::zero(),
        };
        ballot.sign(proposer, network_id);
        ballot
    }

    /// Derive a ballot for the next phase with our own vote, echoing the
    /// payload by hash and re-signing as `local`.
    pub fn derive(&self, state: BallotState, vote: VotingHole, local: &KeyPair, network_id: &[u8]) -> Self {
        let mut body = self.body.clone();
        body.source = local.address();
        body.state = state;
        body.vote = vote;
        body.proposed.proposer_transaction = None;
        let mut ballot = Ballot {
            body,
            signature: Signature::zero(),
        };
        ballot.sign(local, network_id);
        ballot
    }

    fn sign(&mut self, keypair: &KeyPair, network_id: &[u8]) {
        self.signature = keypair.sign(network_id, &self.signing_bytes());
    }

    fn signing_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(&self.body).expect("serializable body")
    }

    /// Content hash over the signed fields.
    pub fn hash(&self) -> Hash {
        Hash::digest_json(&self.body)
    }

    pub fn basis(&self) -> VotingBasis {
        self.body.basis
    }

    pub fn proposer(&self) -> Address {
        self.body.proposer
    }

    pub fn source(&self) -> Address {
        self.body.source
    }

    pub fn state(&self) -> BallotState {
        self.body.state
    }

    pub fn vote(&self) -> VotingHole {
        self.body.vote
    }

    pub fn proposed(&self) -> &Proposed {
        &self.body.proposed
    }

    /// Ordered transaction hashes of the proposal.
    pub fn transactions(&self) -> &[Hash] {
        &self.body.proposed.transactions
    }

    /// The full proposer transaction, when carried.
    pub fn proposer_transaction(&self) -> Option<&ProposerTransaction> {
        self.body.proposed.proposer_transaction.as_ref()
    }

    /// Whether this ballot was signed by its own proposer.
    pub fn is_from_proposer(&self) -> bool {
        self.body.source == self.body.proposer
    }

    /// Verify signature and structural invariants.
    pub fn well_formed(&self, network_id: &[u8]) -> Result<(), BallotError> {
        let pk = self
            .body
            .source
            .public_key()
            .ok_or(BallotError::InvalidSignature)?;
        if !pk.verify(network_id, &self.signing_bytes(), &self.signature) {
            return Err(BallotError::InvalidSignature);
        }
        if self.body.vote == VotingHole::NotYet {
            return Err(BallotError::NotYetVote);
        }
        match (&self.body.state, self.proposer_transaction()) {
            (BallotState::Init, _) if !self.is_from_proposer() => {
                return Err(BallotError::InitNotFromProposer);
            }
            (BallotState::Init, Some(ptx)) => {
                if ptx.hash() != self.body.proposed.proposer_transaction_hash {
                    return Err(BallotError::ProposerTransactionHashMismatch);
                }
                ptx.well_formed(network_id)?;
            }
            (BallotState::Init, None) => {
                return Err(BallotError::MissingProposerTransaction);
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::Amount;
    use crate::test_utils::test_keypair;

    const NET: &[u8] = b"test-network";

    fn proposer_tx(kp: &KeyPair) -> ProposerTransaction {
        ProposerTransaction::new(
            kp,
            NET,
            1,
            Amount::ZERO,
            0,
            Amount::from(100),
            test_keypair(9).address(),
            Amount::from(1_000_000),
            "0.0000001",
        )
    }

    fn init_ballot(kp: &KeyPair) -> Ballot {
        let basis = VotingBasis {
            height: 1,
            round: 0,
            block_hash: Hash::digest(b"genesis"),
        };
        Ballot::new_init(
            basis,
            kp,
            NET,
            vec![Hash::digest(b"tx-a")],
            proposer_tx(kp),
            "2024-01-01T00:00:00Z".to_string(),
        )
    }

    #[test]
    fn init_ballot_is_well_formed() {
        let kp = test_keypair(1);
        let ballot = init_ballot(&kp);
        assert!(ballot.well_formed(NET).is_ok());
        assert!(ballot.is_from_proposer());
        assert_eq!(ballot.state(), BallotState::Init);
        assert_eq!(ballot.vote(), VotingHole::Yes);
    }

    #[test]
    fn derived_ballot_drops_proposer_transaction_body() {
        let proposer = test_keypair(1);
        let voter = test_keypair(2);
        let derived = init_ballot(&proposer).derive(BallotState::Sign, VotingHole::Yes, &voter, NET);
        assert!(derived.well_formed(NET).is_ok());
        assert!(derived.proposer_transaction().is_none());
        assert!(!derived
            .proposed()
            .proposer_transaction_hash
            .is_zero());
        assert_eq!(derived.source(), voter.address());
        assert_eq!(derived.proposer(), proposer.address());
    }

    #[test]
    fn ballot_survives_json_round_trip() {
        let kp = test_keypair(1);
        let ballot = init_ballot(&kp);
        let raw = serde_json::to_vec(&ballot).unwrap();
        let back: Ballot = serde_json::from_slice(&raw).unwrap();
        assert!(back.well_formed(NET).is_ok());
        assert_eq!(back.hash(), ballot.hash());
    }

    #[test]
    fn tampered_vote_fails_verification() {
        let kp = test_keypair(1);
        let mut ballot = init_ballot(&kp);
        ballot.body.vote = VotingHole::No;
        assert_eq!(ballot.well_formed(NET), Err(BallotError::InvalidSignature));
    }
}
