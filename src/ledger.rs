//! Block commit: the only place the confidential layer writes chain state.
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::confidential::{validate_transaction, Transaction};
use crate::config::PrivacyContext;
use crate::errors::{RejectReason, TransactionError};
use crate::keys::PaymentAddress;
use crate::state::{ConsensusOracle, StateStore, StoredCoin};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    pub shard_id: u8,
    pub height: u64,
    /// Unix seconds, the reference for lock times.
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub producer_signature: Vec<u8>,
}

/// What happened to each transaction of a committed block, by hash.
#[derive(Clone, Debug, Default)]
pub struct CommitReport {
    pub accepted: Vec<[u8; 32]>,
    pub rejected: Vec<([u8; 32], RejectReason)>,
}

// Serials and one-time addresses claimed by transactions accepted earlier in the block.
#[derive(Default)]
struct BlockClaims {
    serials: HashSet<[u8; 32]>,
    otas: HashSet<[u8; 32]>,
}

impl BlockClaims {
    fn check(&self, ctx: &PrivacyContext, tx: &Transaction) -> Result<(), TransactionError> {
        for spent in tx.spent_serials(ctx.config().num_shards) {
            if self.serials.contains(&spent.serial) {
                return Err(TransactionError::DoubleSpend(hex::encode(spent.serial)));
            }
        }
        for (_, coin) in tx.output_coins() {
            let public_key = coin.public_key_bytes();
            if !coin.is_burn() && self.otas.contains(&public_key) {
                return Err(TransactionError::DuplicateOta(hex::encode(public_key)));
            }
        }
        Ok(())
    }

    fn claim(&mut self, ctx: &PrivacyContext, tx: &Transaction) {
        self.serials.extend(
            tx.spent_serials(ctx.config().num_shards)
                .into_iter()
                .map(|spent| spent.serial),
        );
        self.otas.extend(
            tx.output_coins()
                .into_iter()
                .filter(|(_, coin)| !coin.is_burn())
                .map(|(_, coin)| coin.public_key_bytes()),
        );
    }
}

fn write_effects(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    height: u64,
    tx: &Transaction,
) -> Result<(), TransactionError> {
    let num_shards = ctx.config().num_shards;
    for spent in tx.spent_serials(num_shards) {
        store.store_serial_numbers(&spent.bucket, spent.shard_id, &[spent.serial])?;
    }
    for (bucket, coin) in tx.output_coins() {
        let shard_id = coin.shard_id(num_shards);
        let stored = StoredCoin {
            public_key: coin.public_key_bytes(),
            bytes: coin.to_bytes(),
        };
        store.store_output_coins(&bucket, shard_id, height, &[stored])?;
        store.store_commitments(&bucket, shard_id, &[coin.commitment().compress().to_bytes()])?;
    }
    if let Some(token_id) = tx.minted_token() {
        store.store_privacy_token_id(&token_id)?;
        info!(token = %token_id, "token registered");
    }
    Ok(())
}

/// Check the block with the consensus oracle, then validate and apply its transactions in
/// order. A transaction conflicting with one accepted earlier in the block is rejected, so of
/// two spends of one coin exactly the first survives.
///
/// Invalid transactions are reported, not fatal. Store failures abort the commit.
pub fn commit_block(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    oracle: &dyn ConsensusOracle,
    block: &Block,
    committee: &[PaymentAddress],
) -> Result<CommitReport, TransactionError> {
    if !oracle.validate_block_signatures(block, committee) {
        warn!(shard = block.shard_id, height = block.height, "block signatures rejected");
        return Err(TransactionError::BlockSignaturesRejected);
    }

    let mut claims = BlockClaims::default();
    let mut report = CommitReport::default();
    for tx in &block.transactions {
        let hash = tx.hash()?;
        let verdict = validate_transaction(ctx, store, tx, block.timestamp)
            .and_then(|_| claims.check(ctx, tx));
        match verdict {
            Ok(()) => {
                claims.claim(ctx, tx);
                write_effects(ctx, store, block.height, tx)?;
                debug!(tx = %hex::encode(hash), "transaction committed");
                report.accepted.push(hash);
            }
            Err(TransactionError::Store(e)) => return Err(e.into()),
            Err(e) => report.rejected.push((hash, e.reason())),
        }
    }
    info!(
        shard = block.shard_id,
        height = block.height,
        accepted = report.accepted.len(),
        rejected = report.rejected.len(),
        "block committed"
    );
    Ok(report)
}
