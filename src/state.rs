//! Narrow interface to the persistent chain state.
//!
//! The store is external and internally synchronized. Every call is keyed by token bucket and
//! shard; no atomicity is assumed across calls.
use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;

use crate::coin::TokenId;
use crate::constants::BURNING_ADDRESS;
use crate::errors::StoreError;
use crate::keys::PaymentAddress;
use crate::ledger::Block;

/// An output coin to persist, with its public key already extracted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredCoin {
    pub public_key: [u8; 32],
    pub bytes: Vec<u8>,
}

pub trait StateStore: Send + Sync {
    fn has_onetime_address(&self, token_id: &TokenId, public_key: &[u8; 32])
        -> Result<bool, StoreError>;

    fn has_commitment(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        commitment: &[u8; 32],
    ) -> Result<bool, StoreError>;

    fn has_serial_number(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        serial_number: &[u8; 32],
    ) -> Result<bool, StoreError>;

    /// Encoded coins first seen at `height`.
    fn get_ota_coins_by_height(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError>;

    fn get_ota_coin_by_index(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        index: u64,
    ) -> Result<Vec<u8>, StoreError>;

    fn get_ota_coin_index(&self, token_id: &TokenId, public_key: &[u8; 32])
        -> Result<u64, StoreError>;

    fn get_ota_coin_length(&self, token_id: &TokenId, shard_id: u8) -> Result<u64, StoreError>;

    fn get_commitment_length(&self, token_id: &TokenId, shard_id: u8)
        -> Result<u64, StoreError>;

    fn store_output_coins(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
        coins: &[StoredCoin],
    ) -> Result<(), StoreError>;

    fn store_serial_numbers(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        serial_numbers: &[[u8; 32]],
    ) -> Result<(), StoreError>;

    fn store_commitments(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        commitments: &[[u8; 32]],
    ) -> Result<(), StoreError>;

    fn privacy_token_id_existed(&self, token_id: &TokenId) -> bool;

    fn store_privacy_token_id(&self, token_id: &TokenId) -> Result<(), StoreError>;
}

/// Consensus collaborator. Committee cryptography stays behind this boolean.
pub trait ConsensusOracle: Send + Sync {
    fn validate_block_signatures(&self, block: &Block, committee: &[PaymentAddress]) -> bool;
}

#[derive(Default)]
struct ShardState {
    coins_by_height: BTreeMap<u64, Vec<Vec<u8>>>,
    coins_by_index: Vec<Vec<u8>>,
    commitments: HashSet<[u8; 32]>,
    commitment_count: u64,
    serial_numbers: HashSet<[u8; 32]>,
}

#[derive(Default)]
struct MemoryState {
    shards: HashMap<(TokenId, u8), ShardState>,
    ota_indexes: HashMap<(TokenId, [u8; 32]), u64>,
    tokens: HashSet<TokenId>,
}

/// In-memory `StateStore`, for tests, demos and light clients.
#[derive(Default)]
pub struct MemoryStateStore {
    state: RwLock<MemoryState>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn latest_height(&self, token_id: &TokenId, shard_id: u8) -> Option<u64> {
        self.state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .and_then(|shard| shard.coins_by_height.keys().next_back().copied())
    }
}

impl StateStore for MemoryStateStore {
    fn has_onetime_address(
        &self,
        token_id: &TokenId,
        public_key: &[u8; 32],
    ) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .ota_indexes
            .contains_key(&(*token_id, *public_key)))
    }

    fn has_commitment(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        commitment: &[u8; 32],
    ) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .map_or(false, |shard| shard.commitments.contains(commitment)))
    }

    fn has_serial_number(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        serial_number: &[u8; 32],
    ) -> Result<bool, StoreError> {
        Ok(self
            .state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .map_or(false, |shard| shard.serial_numbers.contains(serial_number)))
    }

    fn get_ota_coins_by_height(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self
            .state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .and_then(|shard| shard.coins_by_height.get(&height).cloned())
            .unwrap_or_default())
    }

    fn get_ota_coin_by_index(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        index: u64,
    ) -> Result<Vec<u8>, StoreError> {
        self.state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .and_then(|shard| shard.coins_by_index.get(index as usize).cloned())
            .ok_or_else(|| {
                let what = format!("coin {} of {} in shard {}", index, token_id, shard_id);
                StoreError::NotFound(what)
            })
    }

    fn get_ota_coin_index(
        &self,
        token_id: &TokenId,
        public_key: &[u8; 32],
    ) -> Result<u64, StoreError> {
        self.state
            .read()
            .ota_indexes
            .get(&(*token_id, *public_key))
            .copied()
            .ok_or_else(|| StoreError::NotFound(format!("index of {}", hex::encode(public_key))))
    }

    fn get_ota_coin_length(&self, token_id: &TokenId, shard_id: u8) -> Result<u64, StoreError> {
        Ok(self
            .state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .map_or(0, |shard| shard.coins_by_index.len() as u64))
    }

    fn get_commitment_length(
        &self,
        token_id: &TokenId,
        shard_id: u8,
    ) -> Result<u64, StoreError> {
        Ok(self
            .state
            .read()
            .shards
            .get(&(*token_id, shard_id))
            .map_or(0, |shard| shard.commitment_count))
    }

    fn store_output_coins(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
        coins: &[StoredCoin],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let mut indexed = Vec::with_capacity(coins.len());
        {
            let shard = state.shards.entry((*token_id, shard_id)).or_default();
            for coin in coins {
                let index = shard.coins_by_index.len() as u64;
                shard.coins_by_index.push(coin.bytes.clone());
                shard
                    .coins_by_height
                    .entry(height)
                    .or_default()
                    .push(coin.bytes.clone());
                indexed.push((coin.public_key, index));
            }
        }
        // Burn coins share one public key, so they are reachable by position only.
        let burning = BURNING_ADDRESS.public_spend.compress().to_bytes();
        for (public_key, index) in indexed {
            if public_key != burning {
                state.ota_indexes.insert((*token_id, public_key), index);
            }
        }
        Ok(())
    }

    fn store_serial_numbers(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        serial_numbers: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let shard = state.shards.entry((*token_id, shard_id)).or_default();
        shard.serial_numbers.extend(serial_numbers.iter().copied());
        Ok(())
    }

    fn store_commitments(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        commitments: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        let mut state = self.state.write();
        let shard = state.shards.entry((*token_id, shard_id)).or_default();
        for commitment in commitments {
            if shard.commitments.insert(*commitment) {
                shard.commitment_count += 1;
            }
        }
        Ok(())
    }

    fn privacy_token_id_existed(&self, token_id: &TokenId) -> bool {
        self.state.read().tokens.contains(token_id)
    }

    fn store_privacy_token_id(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.state.write().tokens.insert(*token_id);
        Ok(())
    }
}
