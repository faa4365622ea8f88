//! The block finalizer.
//!
//! `finish_ballot` turns a confirmed ACCEPT ballot into a committed block:
//! it opens a storage batch, resolves the proposal's ordinary transactions
//! from the in-memory pool snapshot and the persistent pool, re-validates
//! each against the batch's staged state in ballot order, applies the
//! proposer transaction last, and commits atomically. A duplicate block is
//! `NotCommittable`: the batch is discarded and the commit treated as a
//! success.
//!
//! `apply_synced_block` is the same commit path for blocks fetched during
//! catch-up, with hash-chain linkage checks in place of a ballot.

use crate::account::Account;
use crate::block_store::save_block;
use crate::error::LedgerError;
use crate::tx_store::get_tx_pool;
use crate::validation::validate_transaction;
use isaac_storage::{Batch, Store};
use isaac_types::{
    calculate_inflation, Address, Amount, Ballot, Block, ConsensusConfig, Hash, Operation,
    ProposerTransaction, Transaction,
};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Result of a successful finalize.
#[derive(Debug, Clone)]
pub struct FinalizeOutcome {
    pub block: Block,
    /// Source accounts the block changed; the pool re-validates its
    /// entries from these sources after the commit.
    pub updated_sources: Vec<Address>,
}

/// Apply a confirmed ballot to storage.
pub fn finish_ballot(
    store: &Store,
    ballot: &Ballot,
    proposer_transaction: &ProposerTransaction,
    pooled: &[Transaction],
    config: &ConsensusConfig,
) -> Result<FinalizeOutcome, LedgerError> {
    let basis = ballot.basis();
    let mut batch = store.open_batch();

    let transactions = resolve_transactions(&batch, ballot.transactions(), pooled)?;
    check_proposer_transaction(proposer_transaction, &transactions, basis.height, config)?;

    let mut updated_sources = Vec::new();
    for tx in &transactions {
        validate_transaction(&batch, tx)?;
        apply_transaction(&mut batch, tx)?;
        if !updated_sources.contains(&tx.source()) {
            updated_sources.push(tx.source());
        }
    }
    apply_proposer_transaction(&mut batch, proposer_transaction)?;

    let block = Block::from_ballot(ballot, proposer_transaction.clone());
    match save_block(&mut batch, &block) {
        Ok(()) => {}
        Err(LedgerError::NotCommittable) => {
            debug!(hash = ?block.hash, height = block.height, "block already stored");
            batch.discard();
            return Ok(FinalizeOutcome {
                block,
                updated_sources: Vec::new(),
            });
        }
        Err(e) => {
            batch.discard();
            return Err(e);
        }
    }
    batch.commit()?;

    info!(
        hash = ?block.hash,
        height = block.height,
        transactions = block.transactions.len(),
        "block stored"
    );
    Ok(FinalizeOutcome {
        block,
        updated_sources,
    })
}

/// Apply a block fetched from a peer during catch-up.
///
/// `latest` is the local chain tip the block must link to.
pub fn apply_synced_block(
    store: &Store,
    latest: &Block,
    block: &Block,
    transactions: &[Transaction],
    config: &ConsensusConfig,
) -> Result<FinalizeOutcome, LedgerError> {
    if !block.verify_hash() {
        return Err(LedgerError::InvalidOperation("block hash mismatch".into()));
    }
    if block.height != latest.height + 1 {
        return Err(LedgerError::InvalidOperation(format!(
            "height {} does not follow {}",
            block.height, latest.height
        )));
    }
    if block.previous_hash != latest.hash {
        return Err(LedgerError::InvalidOperation(
            "previous hash does not link to latest block".into(),
        ));
    }

    let proposer_transaction = block
        .proposer_transaction
        .as_ref()
        .ok_or_else(|| LedgerError::InvalidOperation("block missing proposer transaction".into()))?;

    let mut batch = store.open_batch();
    let bodies: HashMap<Hash, &Transaction> =
        transactions.iter().map(|tx| (tx.hash(), tx)).collect();

    let mut resolved = Vec::with_capacity(block.transactions.len());
    for hash in &block.transactions {
        let tx = bodies
            .get(hash)
            .copied()
            .cloned()
            .ok_or(LedgerError::TransactionNotFound(*hash))?;
        resolved.push(tx);
    }
    check_proposer_transaction(proposer_transaction, &resolved, block.height, config)?;

    let mut updated_sources = Vec::new();
    for tx in &resolved {
        validate_transaction(&batch, tx)?;
        apply_transaction(&mut batch, tx)?;
        if !updated_sources.contains(&tx.source()) {
            updated_sources.push(tx.source());
        }
    }
    apply_proposer_transaction(&mut batch, proposer_transaction)?;

    match save_block(&mut batch, block) {
        Ok(()) => {}
        Err(LedgerError::NotCommittable) => {
            batch.discard();
            return Ok(FinalizeOutcome {
                block: block.clone(),
                updated_sources: Vec::new(),
            });
        }
        Err(e) => {
            batch.discard();
            return Err(e);
        }
    }
    batch.commit()?;

    debug!(hash = ?block.hash, height = block.height, "synced block applied");
    Ok(FinalizeOutcome {
        block: block.clone(),
        updated_sources,
    })
}

/// Resolve the proposal's ordered transaction bodies from the pool
/// snapshot and the persistent pool.
fn resolve_transactions(
    batch: &Batch<'_>,
    hashes: &[Hash],
    pooled: &[Transaction],
) -> Result<Vec<Transaction>, LedgerError> {
    let by_hash: HashMap<Hash, &Transaction> = pooled.iter().map(|tx| (tx.hash(), tx)).collect();
    let mut resolved = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let tx = match by_hash.get(hash) {
            Some(tx) => (*tx).clone(),
            None => get_tx_pool(batch, hash)?.ok_or(LedgerError::TransactionNotFound(*hash))?,
        };
        resolved.push(tx);
    }
    Ok(resolved)
}

/// Enforce the proposer-transaction invariants against configuration and
/// the resolved transaction set.
///
/// The fee-sum equality is enforced here rather than in the ballot
/// pipeline: a Byzantine proposer must not be able to credit the common
/// account with more than the block's actual fees.
fn check_proposer_transaction(
    proposer_transaction: &ProposerTransaction,
    transactions: &[Transaction],
    height: u64,
    config: &ConsensusConfig,
) -> Result<(), LedgerError> {
    let collect = proposer_transaction.collect_tx_fee()?;
    if collect.target != config.common_account {
        return Err(LedgerError::InvalidOperation(
            "collect-tx-fee target is not the common account".into(),
        ));
    }
    let fee_total = Amount::sum(transactions.iter().map(|tx| tx.fee()))?;
    if collect.amount != fee_total {
        warn!(
            claimed = %collect.amount,
            actual = %fee_total,
            "proposer fee amount disagrees with block fees"
        );
        return Err(LedgerError::InvalidOperation(
            "collect-tx-fee amount disagrees with block fees".into(),
        ));
    }
    if collect.height != height {
        return Err(LedgerError::InvalidOperation(
            "collect-tx-fee height mismatch".into(),
        ));
    }

    let inflation = proposer_transaction.inflation()?;
    if inflation.target != config.common_account {
        return Err(LedgerError::InvalidOperation(
            "inflation target is not the common account".into(),
        ));
    }
    if inflation.ratio != config.inflation_ratio {
        return Err(LedgerError::InvalidOperation(
            "inflation ratio mismatch".into(),
        ));
    }
    if inflation.initial_balance != config.initial_balance {
        return Err(LedgerError::InvalidOperation(
            "inflation initial balance mismatch".into(),
        ));
    }
    let expected = if height <= config.end_of_inflation {
        calculate_inflation(config.initial_balance, &config.inflation_ratio)?
    } else {
        Amount::ZERO
    };
    if inflation.amount != expected {
        return Err(LedgerError::InvalidOperation(
            "inflation amount mismatch".into(),
        ));
    }
    Ok(())
}

/// Apply one validated ordinary transaction to the batch.
fn apply_transaction(batch: &mut Batch<'_>, tx: &Transaction) -> Result<(), LedgerError> {
    let mut source = Account::get_required(batch, &tx.source())?;
    source.debit_and_advance(tx.total_debit()?, batch)?;

    for op in tx.operations() {
        match op {
            Operation::Payment(payment) => {
                let mut target = Account::get_required(batch, &payment.target)?;
                target.credit(payment.amount, batch)?;
            }
            Operation::CreateAccount(create) => {
                if Account::get(batch, &create.target)?.is_some() {
                    return Err(LedgerError::AccountAlreadyExists(create.target.to_hex()));
                }
                Account::new(create.target, create.amount).save(batch)?;
            }
            Operation::CollectTxFee(_) | Operation::Inflation(_) => {
                return Err(LedgerError::InvalidOperation(
                    "synthetic operation in ordinary transaction".into(),
                ));
            }
        }
    }
    Ok(())
}

/// Credit the common account with fees and inflation. The common
/// account's sequence is untouched.
fn apply_proposer_transaction(
    batch: &mut Batch<'_>,
    proposer_transaction: &ProposerTransaction,
) -> Result<(), LedgerError> {
    for op in proposer_transaction.transaction().operations() {
        let (target, amount) = (op.target(), op.amount());
        if amount == Amount::ZERO {
            continue;
        }
        let mut account = Account::get_required(batch, &target)?;
        account.credit(amount, batch)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::make_genesis;
    use crate::tx_store::save_tx_pool;
    use isaac_storage::MemoryBackend;
    use isaac_types::test_utils::{test_keypair, test_payment};
    use isaac_types::{KeyPair, VotingBasis, BASE_FEE};
    use std::sync::Arc;

    const NET: &[u8] = b"test-network";

    struct Fixture {
        store: Store,
        config: ConsensusConfig,
        genesis_kp: KeyPair,
        genesis_block: Block,
    }

    fn fixture() -> Fixture {
        let store = Store::new(Arc::new(MemoryBackend::new()));
        let config = ConsensusConfig {
            common_account: test_keypair(200).address(),
            ..ConsensusConfig::default()
        };
        let genesis_kp = test_keypair(0);
        let genesis_block = make_genesis(
            &store,
            &config,
            genesis_kp.address(),
            "2024-01-01T00:00:00Z".into(),
        )
        .unwrap();
        Fixture {
            store,
            config,
            genesis_kp,
            genesis_block,
        }
    }

    fn proposer_tx(
        fx: &Fixture,
        proposer: &KeyPair,
        height: u64,
        fee_total: u64,
        fee_txs: u64,
    ) -> ProposerTransaction {
        ProposerTransaction::new(
            proposer,
            NET,
            height,
            Amount::from(fee_total),
            fee_txs,
            calculate_inflation(fx.config.initial_balance, &fx.config.inflation_ratio).unwrap(),
            fx.config.common_account,
            fx.config.initial_balance,
            &fx.config.inflation_ratio,
        )
    }

    fn init_ballot(
        fx: &Fixture,
        proposer: &KeyPair,
        tx_hashes: Vec<Hash>,
        ptx: ProposerTransaction,
    ) -> Ballot {
        let basis = VotingBasis {
            height: fx.genesis_block.height + 1,
            round: 0,
            block_hash: fx.genesis_block.hash,
        };
        Ballot::new_init(
            basis,
            proposer,
            NET,
            tx_hashes,
            ptx,
            "2024-01-01T00:00:10Z".into(),
        )
    }

    #[test]
    fn finish_commits_block_and_moves_balances() {
        let fx = fixture();
        let proposer = test_keypair(1);
        let target = test_keypair(2).address();

        // Create the target account first so a payment to it validates.
        let tx = isaac_types::Transaction::new(
            fx.genesis_kp.address(),
            0,
            Amount::from(BASE_FEE),
            vec![isaac_types::Operation::CreateAccount(
                isaac_types::CreateAccount {
                    target,
                    amount: Amount::from(5_000_000),
                },
            )],
        )
        .signed(&fx.genesis_kp, NET);

        let ptx = proposer_tx(&fx, &proposer, 1, BASE_FEE, 1);
        let ballot = init_ballot(&fx, &proposer, vec![tx.hash()], ptx.clone());

        let outcome =
            finish_ballot(&fx.store, &ballot, &ptx, std::slice::from_ref(&tx), &fx.config)
                .unwrap();
        assert_eq!(outcome.block.height, 1);
        assert_eq!(outcome.updated_sources, vec![fx.genesis_kp.address()]);

        let created = Account::get(&fx.store, &target).unwrap().unwrap();
        assert_eq!(created.balance, Amount::from(5_000_000));

        let genesis_account = Account::get(&fx.store, &fx.genesis_kp.address())
            .unwrap()
            .unwrap();
        assert_eq!(genesis_account.sequence_id, 1);

        let common = Account::get(&fx.store, &fx.config.common_account)
            .unwrap()
            .unwrap();
        let expected = Amount::from(BASE_FEE)
            .checked_add(
                calculate_inflation(fx.config.initial_balance, &fx.config.inflation_ratio)
                    .unwrap(),
            )
            .unwrap();
        assert_eq!(common.balance, expected);
    }

    #[test]
    fn failed_finalize_leaves_no_partial_state() {
        let fx = fixture();
        let proposer = test_keypair(1);

        // Payment to a non-existent account fails validation mid-apply.
        let tx = test_payment(
            &fx.genesis_kp,
            test_keypair(50).address(),
            1_000,
            0,
            NET,
        );
        let ptx = proposer_tx(&fx, &proposer, 1, BASE_FEE, 1);
        let ballot = init_ballot(&fx, &proposer, vec![tx.hash()], ptx.clone());

        let result = finish_ballot(
            &fx.store,
            &ballot,
            &ptx,
            std::slice::from_ref(&tx),
            &fx.config,
        );
        assert!(result.is_err());

        // Nothing was written: no block, sequence untouched.
        let genesis_account = Account::get(&fx.store, &fx.genesis_kp.address())
            .unwrap()
            .unwrap();
        assert_eq!(genesis_account.sequence_id, 0);
        let latest = crate::block_store::get_latest_block(&fx.store)
            .unwrap()
            .unwrap();
        assert_eq!(latest.hash, fx.genesis_block.hash);
    }

    #[test]
    fn fee_sum_mismatch_is_rejected() {
        let fx = fixture();
        let proposer = test_keypair(1);
        let tx = test_payment(&fx.genesis_kp, test_keypair(2).address(), 100, 0, NET);

        // Proposer claims double the actual fees.
        let ptx = proposer_tx(&fx, &proposer, 1, BASE_FEE * 2, 1);
        let ballot = init_ballot(&fx, &proposer, vec![tx.hash()], ptx.clone());

        let result = finish_ballot(
            &fx.store,
            &ballot,
            &ptx,
            std::slice::from_ref(&tx),
            &fx.config,
        );
        assert!(matches!(result, Err(LedgerError::InvalidOperation(_))));
    }

    #[test]
    fn resolves_missing_bodies_from_persistent_pool() {
        let fx = fixture();
        let proposer = test_keypair(1);
        let target = test_keypair(2).address();

        let tx = isaac_types::Transaction::new(
            fx.genesis_kp.address(),
            0,
            Amount::from(BASE_FEE),
            vec![isaac_types::Operation::CreateAccount(
                isaac_types::CreateAccount {
                    target,
                    amount: Amount::from(1_000),
                },
            )],
        )
        .signed(&fx.genesis_kp, NET);

        // Body only in the persistent pool, not passed in-memory.
        let mut batch = fx.store.open_batch();
        save_tx_pool(&mut batch, &tx).unwrap();
        batch.commit().unwrap();

        let ptx = proposer_tx(&fx, &proposer, 1, BASE_FEE, 1);
        let ballot = init_ballot(&fx, &proposer, vec![tx.hash()], ptx.clone());

        let outcome = finish_ballot(&fx.store, &ballot, &ptx, &[], &fx.config).unwrap();
        assert_eq!(outcome.block.transactions, vec![tx.hash()]);
    }

    #[test]
    fn duplicate_finalize_is_treated_as_success() {
        let fx = fixture();
        let proposer = test_keypair(1);
        let ptx = proposer_tx(&fx, &proposer, 1, 0, 0);
        let ballot = init_ballot(&fx, &proposer, vec![], ptx.clone());

        finish_ballot(&fx.store, &ballot, &ptx, &[], &fx.config).unwrap();
        // Second application of the same ballot: NotCommittable internally,
        // surfaced as success with no updated sources.
        let outcome = finish_ballot(&fx.store, &ballot, &ptx, &[], &fx.config).unwrap();
        assert!(outcome.updated_sources.is_empty());
    }

    #[test]
    fn synced_block_requires_linkage() {
        let fx = fixture();
        let proposer = test_keypair(1);
        let ptx = proposer_tx(&fx, &proposer, 1, 0, 0);
        let ballot = init_ballot(&fx, &proposer, vec![], ptx.clone());
        let outcome = finish_ballot(&fx.store, &ballot, &ptx, &[], &fx.config).unwrap();

        // A block that does not link to the tip is rejected.
        let orphan = outcome.block.clone();
        let result = apply_synced_block(&fx.store, &outcome.block, &orphan, &[], &fx.config);
        assert!(result.is_err());
    }
}
