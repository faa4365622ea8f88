//! Genesis bootstrap.

use crate::account::Account;
use crate::block_store::{get_latest_block, save_block};
use crate::error::LedgerError;
use isaac_storage::Store;
use isaac_types::{Address, Amount, Block, ConsensusConfig};
use tracing::info;

/// Create the height-0 genesis block and its two seed accounts: the
/// genesis account holding the initial balance, and the empty common
/// account that will receive fees and inflation.
///
/// A no-op returning the existing latest block when the store already has
/// one.
pub fn make_genesis(
    store: &Store,
    config: &ConsensusConfig,
    genesis_account: Address,
    confirmed: String,
) -> Result<Block, LedgerError> {
    if let Some(existing) = get_latest_block(store)? {
        return Ok(existing);
    }

    let block = Block::genesis(genesis_account, confirmed);

    let mut batch = store.open_batch();
    Account::new(genesis_account, config.initial_balance).save(&mut batch)?;
    Account::new(config.common_account, Amount::ZERO).save(&mut batch)?;
    save_block(&mut batch, &block)?;
    batch.commit()?;

    info!(
        hash = ?block.hash,
        genesis_account = ?genesis_account,
        balance = %config.initial_balance,
        "genesis block created"
    );
    Ok(block)
}
