//! Persistence for submitted OTA keys and the coins indexed for them.
use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;

use crate::errors::{IndexerError, StoreError};
use crate::keys::OtaKey;

use super::KeyStatus;

const RAW_KEY_LEN: usize = 64;

/// A persisted OTA key.
///
/// The on-disk form is the 64-byte raw key followed by one status byte. Records written
/// before the status byte existed are exactly 64 bytes and count as submitted through the
/// usual path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyRecord {
    pub key: OtaKey,
    pub status: KeyStatus,
}

impl KeyRecord {
    pub fn new(key: OtaKey, status: KeyStatus) -> Self {
        KeyRecord { key, status }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.key.to_raw().to_vec();
        bytes.push(self.status.to_byte());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IndexerError> {
        let status = match bytes.len() {
            RAW_KEY_LEN => KeyStatus::SubmittedUsual,
            len if len == RAW_KEY_LEN + 1 => KeyStatus::from_byte(bytes[RAW_KEY_LEN])
                .ok_or(IndexerError::InvalidKeyRecord(len))?,
            len => return Err(IndexerError::InvalidKeyRecord(len)),
        };
        Ok(KeyRecord {
            key: OtaKey::from_raw(&bytes[..RAW_KEY_LEN])?,
            status,
        })
    }
}

/// Storage owned by the coin indexer, separate from the chain state.
pub trait IndexerDb: Send + Sync {
    fn store_key(&self, raw_key: &[u8; 64], record: Vec<u8>) -> Result<(), StoreError>;

    fn delete_key(&self, raw_key: &[u8; 64]) -> Result<(), StoreError>;

    /// Every persisted key record, in no particular order.
    fn load_keys(&self) -> Result<Vec<Vec<u8>>, StoreError>;

    /// Append encoded coins to the set indexed for `raw_key`.
    fn store_indexed_coins(&self, raw_key: &[u8; 64], coins: Vec<Vec<u8>>)
        -> Result<(), StoreError>;

    fn get_indexed_coins(&self, raw_key: &[u8; 64]) -> Result<Vec<Vec<u8>>, StoreError>;

    fn cache_coin_public_keys(&self, public_keys: &[[u8; 32]]) -> Result<(), StoreError>;

    fn cached_coin_public_keys(&self) -> Result<Vec<[u8; 32]>, StoreError>;
}

#[derive(Default)]
struct MemoryIndexerState {
    keys: HashMap<[u8; 64], Vec<u8>>,
    coins: HashMap<[u8; 64], Vec<Vec<u8>>>,
    cached: HashSet<[u8; 32]>,
}

#[derive(Default)]
pub struct MemoryIndexerDb {
    state: RwLock<MemoryIndexerState>,
}

impl MemoryIndexerDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IndexerDb for MemoryIndexerDb {
    fn store_key(&self, raw_key: &[u8; 64], record: Vec<u8>) -> Result<(), StoreError> {
        self.state.write().keys.insert(*raw_key, record);
        Ok(())
    }

    fn delete_key(&self, raw_key: &[u8; 64]) -> Result<(), StoreError> {
        self.state.write().keys.remove(raw_key);
        Ok(())
    }

    fn load_keys(&self) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self.state.read().keys.values().cloned().collect())
    }

    fn store_indexed_coins(
        &self,
        raw_key: &[u8; 64],
        coins: Vec<Vec<u8>>,
    ) -> Result<(), StoreError> {
        self.state
            .write()
            .coins
            .entry(*raw_key)
            .or_default()
            .extend(coins);
        Ok(())
    }

    fn get_indexed_coins(&self, raw_key: &[u8; 64]) -> Result<Vec<Vec<u8>>, StoreError> {
        Ok(self
            .state
            .read()
            .coins
            .get(raw_key)
            .cloned()
            .unwrap_or_default())
    }

    fn cache_coin_public_keys(&self, public_keys: &[[u8; 32]]) -> Result<(), StoreError> {
        self.state.write().cached.extend(public_keys.iter().copied());
        Ok(())
    }

    fn cached_coin_public_keys(&self) -> Result<Vec<[u8; 32]>, StoreError> {
        Ok(self.state.read().cached.iter().copied().collect())
    }
}
