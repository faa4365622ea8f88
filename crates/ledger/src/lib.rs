//! Persistent ledger: accounts, blocks, transaction stores and the block
//! finalizer.
//!
//! Everything here operates on the storage capability from
//! `isaac-storage`; the consensus state machine never touches it directly.
//! The finalizer is invoked by the runner when an ACCEPT round concludes
//! YES, and during catch-up for blocks fetched from peers.

mod account;
mod block_store;
mod error;
mod finalize;
mod genesis;
pub mod intake;
pub mod proposal;
mod tx_store;
pub mod validation;

pub use account::Account;
pub use block_store::{
    exists_block, get_block, get_block_by_height, get_latest_block, save_block,
};
pub use error::LedgerError;
pub use finalize::{apply_synced_block, finish_ballot, FinalizeOutcome};
pub use genesis::make_genesis;
pub use intake::{parse_transaction, preflight_transaction, IntakeError};
pub use proposal::{validate_proposal_transactions, ProposalError};
pub use tx_store::{
    exists_tx_history, exists_tx_pool, get_tx_pool, save_tx_history, save_tx_pool,
};
pub use validation::{validate_transaction, ValidationError};
