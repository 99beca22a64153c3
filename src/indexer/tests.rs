#![cfg(test)]
use super::*;
use crate::config::{PrivacyConfig, ScanMode};
use crate::constants::PRV_TOKEN_ID;
use crate::errors::StoreError;
use crate::keys::{KeySet, PaymentInfo};
use crate::state::{MemoryStateStore, StoredCoin};
use crate::testing::*;

use quickcheck::TestResult;

const ACCESS: [u8; 32] = [7u8; 32];

fn access_token() -> String {
    hex::encode(ACCESS)
}

fn enhanced_config(batch_wait_ms: u64) -> PrivacyConfig {
    let mut config = config();
    config.indexer.num_workers = 2;
    config.indexer.batch_size = 4;
    config.indexer.batch_wait_ms = batch_wait_ms;
    config.indexer.idle_sleep_ms = 5;
    config.indexer.index_window = 4;
    config.indexer.height_window = 2;
    config.indexer.access_tokens = vec![access_token()];
    config
}

fn shared_context(config: PrivacyConfig) -> Arc<PrivacyContext> {
    Arc::new(PrivacyContext::new(config).unwrap())
}

struct Chain {
    store: Arc<MemoryStateStore>,
    owner: KeySet,
    /// Two native coins at heights 2 and 4, one blinded `TOKEN` coin at height 5.
    owned: Vec<CoinV2>,
}

fn chain(ctx: &PrivacyContext, seed: u64) -> Chain {
    let mut csprng = rng(seed);
    let store = Arc::new(MemoryStateStore::new());
    let owner = KeySet::random(&mut csprng);
    for height in 0..=5 {
        let stranger = KeySet::random(&mut csprng).payment_address();
        for (token_id, blind) in [(PRV_TOKEN_ID, false), (FILLER, true)] {
            let payment = PaymentInfo::new(stranger, 7);
            store_coin(ctx, &store, payment, &token_id, blind, height, &mut csprng);
        }
    }
    let owned = [(5, PRV_TOKEN_ID, 2), (8, PRV_TOKEN_ID, 4), (9, TOKEN, 5)]
        .iter()
        .map(|(value, token_id, height)| {
            let payment = PaymentInfo::new(owner.payment_address(), *value);
            store_coin(ctx, &store, payment, token_id, !token_id.is_native(), *height, &mut csprng)
        })
        .collect();
    Chain {
        store,
        owner,
        owned,
    }
}

fn indexer(
    ctx: &Arc<PrivacyContext>,
    store: Arc<dyn StateStore>,
    db: &Arc<MemoryIndexerDb>,
) -> CoinIndexer {
    CoinIndexer::new(Arc::clone(ctx), store, Arc::clone(db) as Arc<dyn IndexerDb>).unwrap()
}

async fn wait_for(indexer: &CoinIndexer, key: &OtaKey, status: KeyStatus) {
    for _ in 0..500 {
        if indexer.has_ota_key(key) == status {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("key never reached {:?}", status);
}

#[test]
fn key_records_should_decode_every_known_form() {
    let key = KeySet::random(&mut rng(1)).ota_key();
    let raw = key.to_raw();

    assert_eq!(KeyRecord::from_bytes(&raw).unwrap().status, KeyStatus::SubmittedUsual);
    for (byte, status) in [
        (0u8, KeyStatus::SubmittedUsual),
        (1, KeyStatus::Indexing),
        (2, KeyStatus::SubmittedUsual),
        (3, KeyStatus::Finished),
    ] {
        let mut bytes = raw.to_vec();
        bytes.push(byte);
        let record = KeyRecord::from_bytes(&bytes).unwrap();
        assert_eq!(record.status, status);
        assert_eq!(record.key, key);
    }

    let mut unknown = raw.to_vec();
    unknown.push(4);
    assert!(matches!(KeyRecord::from_bytes(&unknown), Err(IndexerError::InvalidKeyRecord(65))));
    assert!(matches!(KeyRecord::from_bytes(&raw[..10]), Err(IndexerError::InvalidKeyRecord(10))));
}

#[quickcheck]
fn allocation_should_respect_capacity_and_need(
    depths: Vec<u8>,
    free: u8,
    batch_size: u8,
) -> TestResult {
    if batch_size == 0 {
        return TestResult::discard();
    }
    let depths: Vec<usize> = depths.into_iter().map(usize::from).collect();
    let (free, batch_size) = (free as usize, batch_size as usize);
    let allocation = allocate_workers(&depths, free, batch_size, &mut rng(free as u64));

    let needs: Vec<usize> = depths.iter().map(|d| (d + batch_size - 1) / batch_size).collect();
    let assigned: usize = allocation.iter().sum();
    TestResult::from_bool(
        allocation.len() == depths.len()
            && allocation.iter().zip(&needs).all(|(a, need)| a <= need)
            && assigned == free.min(needs.iter().sum()),
    )
}

#[test]
fn allocation_should_favor_the_deepest_queue() {
    for seed in 0..20 {
        let allocation = allocate_workers(&[0, 30, 10], 2, 10, &mut rng(seed));
        assert_eq!(allocation[0], 0);
        assert!(allocation[1] >= 1);
        assert_eq!(allocation.iter().sum::<usize>(), 2);
    }
}

#[test]
fn unknown_keys_should_not_be_synced() {
    let ctx = Arc::new(context());
    let chain = chain(&ctx, 2);
    let indexer = indexer(&ctx, chain.store, &Arc::new(MemoryIndexerDb::new()));
    let key = chain.owner.ota_key();
    assert_eq!(indexer.has_ota_key(&key), KeyStatus::NotSubmitted);
    assert!(matches!(
        indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID),
        Err(IndexerError::NotSynced)
    ));
}

#[test]
fn usual_keys_should_collect_committed_coins_by_token() {
    let ctx = Arc::new(context());
    let chain = chain(&ctx, 3);
    let db = Arc::new(MemoryIndexerDb::new());
    let indexer = indexer(&ctx, chain.store.clone(), &db);
    let key = chain.owner.ota_key();

    indexer.add_ota_key(&key).unwrap();
    assert_eq!(indexer.has_ota_key(&key), KeyStatus::SubmittedUsual);
    assert!(matches!(
        indexer.submit_ota_key(key.clone(), 0, false, &access_token()),
        Err(IndexerError::EnhancedModeDisabled)
    ));

    assert_eq!(indexer.cache_output_coins(&chain.owned).unwrap(), 3);
    let count = |token_id: &TokenId| indexer.get_indexed_out_coins(&key, token_id).unwrap().len();
    assert_eq!(count(&PRV_TOKEN_ID), 2);
    assert_eq!(count(&TOKEN), 1);
    assert_eq!(count(&CONFIDENTIAL_ASSET_ID), 1);
    assert_eq!(count(&FILLER), 0);

    // A reload sees the same key and coins.
    let reloaded = CoinIndexer::new(ctx.clone(), chain.store, db).unwrap();
    assert_eq!(reloaded.has_ota_key(&key), KeyStatus::SubmittedUsual);
    assert_eq!(reloaded.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap().len(), 2);

    reloaded.remove_ota_key(&key).unwrap();
    assert_eq!(reloaded.has_ota_key(&key), KeyStatus::NotSubmitted);
}

#[test]
fn coins_missing_from_the_store_should_be_dropped_as_forked() {
    let ctx = Arc::new(context());
    let chain = chain(&ctx, 4);
    let indexer = indexer(&ctx, chain.store.clone(), &Arc::new(MemoryIndexerDb::new()));
    let key = chain.owner.ota_key();
    indexer.add_ota_key(&key).unwrap();

    // Derived on a branch the store never saw.
    let orphan = store_coin(
        &ctx,
        &MemoryStateStore::new(),
        PaymentInfo::new(chain.owner.payment_address(), 11),
        &PRV_TOKEN_ID,
        false,
        6,
        &mut rng(5),
    );
    assert_eq!(indexer.cache_output_coins(&[orphan, chain.owned[0].clone()]).unwrap(), 2);
    let coins = indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap();
    assert_eq!(coins, vec![chain.owned[0].clone()]);
}

#[test]
fn submissions_should_check_mode_token_and_running_state() {
    let ctx = shared_context(enhanced_config(0));
    let chain = chain(&ctx, 6);
    let indexer = indexer(&ctx, chain.store, &Arc::new(MemoryIndexerDb::new()));
    let key = chain.owner.ota_key();

    for token in ["zz".to_string(), hex::encode([8u8; 32])] {
        assert!(matches!(
            indexer.submit_ota_key(key.clone(), 0, false, &token),
            Err(IndexerError::InvalidAccessToken)
        ));
    }
    assert!(matches!(
        indexer.submit_ota_key(key.clone(), 0, false, &access_token()),
        Err(IndexerError::NotRunning)
    ));
    assert_eq!(indexer.has_ota_key(&key), KeyStatus::NotSubmitted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn enhanced_scan_should_find_owned_coins_once() {
    let ctx = shared_context(enhanced_config(300));
    let chain = chain(&ctx, 7);
    let indexer = indexer(&ctx, chain.store, &Arc::new(MemoryIndexerDb::new()));
    let key = chain.owner.ota_key();
    indexer.start(vec![5]).unwrap();

    indexer.submit_ota_key(key.clone(), 0, false, &access_token()).unwrap();
    assert!(matches!(
        indexer.submit_ota_key(key.clone(), 0, false, &access_token()),
        Err(IndexerError::AlreadyIndexing)
    ));
    wait_for(&indexer, &key, KeyStatus::Finished).await;
    assert_eq!(indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap().len(), 2);
    assert_eq!(indexer.get_indexed_out_coins(&key, &TOKEN).unwrap().len(), 1);

    assert!(matches!(
        indexer.submit_ota_key(key.clone(), 0, false, &access_token()),
        Err(IndexerError::AlreadyIndexed)
    ));
    indexer.submit_ota_key(key.clone(), 0, true, &access_token()).unwrap();
    wait_for(&indexer, &key, KeyStatus::Finished).await;
    assert_eq!(indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap().len(), 2);

    indexer.stop().await;
    assert!(!indexer.is_running());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn height_scans_should_start_at_the_requested_height() {
    let mut config = enhanced_config(0);
    config.indexer.scan_mode = ScanMode::ByHeight;
    let ctx = shared_context(config);
    let chain = chain(&ctx, 8);
    let indexer = indexer(&ctx, chain.store, &Arc::new(MemoryIndexerDb::new()));
    let key = chain.owner.ota_key();
    indexer.start(vec![5]).unwrap();

    indexer.submit_ota_key(key.clone(), 3, false, &access_token()).unwrap();
    wait_for(&indexer, &key, KeyStatus::Finished).await;
    assert_eq!(
        indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap(),
        vec![chain.owned[1].clone()]
    );
    assert_eq!(indexer.get_indexed_out_coins(&key, &TOKEN).unwrap().len(), 1);
    indexer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn interrupted_keys_should_resume_after_a_reload() {
    let ctx = shared_context(enhanced_config(0));
    let chain = chain(&ctx, 9);
    let db = Arc::new(MemoryIndexerDb::new());
    let key = chain.owner.ota_key();
    let record = KeyRecord::new(key.clone(), KeyStatus::Indexing);
    db.store_key(&key.to_raw(), record.to_bytes()).unwrap();

    let indexer = indexer(&ctx, chain.store, &db);
    assert_eq!(indexer.has_ota_key(&key), KeyStatus::Indexing);
    assert!(matches!(
        indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID),
        Err(IndexerError::InProgress)
    ));

    indexer.start(vec![5]).unwrap();
    wait_for(&indexer, &key, KeyStatus::Finished).await;
    assert_eq!(indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap().len(), 2);
    let stored = KeyRecord::from_bytes(&db.load_keys().unwrap()[0]).unwrap();
    assert_eq!(stored.status, KeyStatus::Finished);
    indexer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stopping_should_roll_back_queued_keys_but_keep_their_records() {
    // Long enough that the lone key is still queued when the indexer stops.
    let ctx = shared_context(enhanced_config(60_000));
    let chain = chain(&ctx, 10);
    let db = Arc::new(MemoryIndexerDb::new());
    let indexer = indexer(&ctx, chain.store, &db);
    let key = chain.owner.ota_key();
    indexer.start(vec![5]).unwrap();
    indexer.submit_ota_key(key.clone(), 0, false, &access_token()).unwrap();

    indexer.stop().await;
    assert_eq!(indexer.has_ota_key(&key), KeyStatus::NotSubmitted);
    assert!(!indexer.is_queue_full(0));
    let stored = KeyRecord::from_bytes(&db.load_keys().unwrap()[0]).unwrap();
    assert_eq!(stored.status, KeyStatus::Indexing);
    assert!(matches!(
        indexer.submit_ota_key(key.clone(), 0, false, &access_token()),
        Err(IndexerError::NotRunning)
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn keys_being_scanned_should_not_be_removed_or_queued_twice() {
    let ctx = shared_context(enhanced_config(60_000));
    let chain = chain(&ctx, 12);
    let db = Arc::new(MemoryIndexerDb::new());
    let indexer = indexer(&ctx, chain.store, &db);
    let key = chain.owner.ota_key();
    indexer.start(vec![5]).unwrap();
    indexer.submit_ota_key(key.clone(), 0, false, &access_token()).unwrap();

    assert!(matches!(indexer.remove_ota_key(&key), Err(IndexerError::AlreadyIndexing)));
    assert_eq!(indexer.has_ota_key(&key), KeyStatus::Indexing);
    assert_eq!(db.load_keys().unwrap().len(), 1);
    assert!(matches!(
        indexer.submit_ota_key(key.clone(), 0, false, &access_token()),
        Err(IndexerError::AlreadyIndexing)
    ));
    assert_eq!(indexer.shared.queue_depths.lock()[0], 1);
    indexer.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn coins_committed_during_a_scan_should_be_indexed_once() {
    let ctx = shared_context(enhanced_config(300));
    let chain = chain(&ctx, 13);
    let store = chain.store.clone();
    let indexer = indexer(&ctx, chain.store, &Arc::new(MemoryIndexerDb::new()));
    let key = chain.owner.ota_key();
    indexer.start(vec![6]).unwrap();
    indexer.submit_ota_key(key.clone(), 0, false, &access_token()).unwrap();

    let payment = PaymentInfo::new(chain.owner.payment_address(), 13);
    let late = store_coin(&ctx, &store, payment, &PRV_TOKEN_ID, false, 6, &mut rng(14));
    assert_eq!(indexer.cache_output_coins(&[late.clone()]).unwrap(), 1);
    assert_eq!(indexer.cache_output_coins(&[late.clone()]).unwrap(), 0);

    wait_for(&indexer, &key, KeyStatus::Finished).await;
    let coins = indexer.get_indexed_out_coins(&key, &PRV_TOKEN_ID).unwrap();
    assert_eq!(coins.len(), 3);
    assert_eq!(coins.iter().filter(|coin| **coin == late).count(), 1);
    indexer.stop().await;
}

struct BrokenStore(MemoryStateStore);

impl StateStore for BrokenStore {
    fn has_onetime_address(
        &self,
        token_id: &TokenId,
        public_key: &[u8; 32],
    ) -> Result<bool, StoreError> {
        self.0.has_onetime_address(token_id, public_key)
    }

    fn has_commitment(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        commitment: &[u8; 32],
    ) -> Result<bool, StoreError> {
        self.0.has_commitment(token_id, shard_id, commitment)
    }

    fn has_serial_number(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        serial_number: &[u8; 32],
    ) -> Result<bool, StoreError> {
        self.0.has_serial_number(token_id, shard_id, serial_number)
    }

    fn get_ota_coins_by_height(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
    ) -> Result<Vec<Vec<u8>>, StoreError> {
        self.0.get_ota_coins_by_height(token_id, shard_id, height)
    }

    fn get_ota_coin_by_index(&self, _: &TokenId, _: u8, _: u64) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::Backend("disk on fire".to_string()))
    }

    fn get_ota_coin_index(
        &self,
        token_id: &TokenId,
        public_key: &[u8; 32],
    ) -> Result<u64, StoreError> {
        self.0.get_ota_coin_index(token_id, public_key)
    }

    fn get_ota_coin_length(&self, token_id: &TokenId, shard_id: u8) -> Result<u64, StoreError> {
        self.0.get_ota_coin_length(token_id, shard_id)
    }

    fn get_commitment_length(
        &self,
        token_id: &TokenId,
        shard_id: u8,
    ) -> Result<u64, StoreError> {
        self.0.get_commitment_length(token_id, shard_id)
    }

    fn store_output_coins(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
        coins: &[StoredCoin],
    ) -> Result<(), StoreError> {
        self.0.store_output_coins(token_id, shard_id, height, coins)
    }

    fn store_serial_numbers(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        serial_numbers: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        self.0.store_serial_numbers(token_id, shard_id, serial_numbers)
    }

    fn store_commitments(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        commitments: &[[u8; 32]],
    ) -> Result<(), StoreError> {
        self.0.store_commitments(token_id, shard_id, commitments)
    }

    fn privacy_token_id_existed(&self, token_id: &TokenId) -> bool {
        self.0.privacy_token_id_existed(token_id)
    }

    fn store_privacy_token_id(&self, token_id: &TokenId) -> Result<(), StoreError> {
        self.0.store_privacy_token_id(token_id)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_scans_should_drop_the_key() {
    let ctx = shared_context(enhanced_config(0));
    let mut csprng = rng(11);
    let store = MemoryStateStore::new();
    let owner = KeySet::random(&mut csprng);
    let payment = PaymentInfo::new(owner.payment_address(), 5);
    store_coin(&ctx, &store, payment, &PRV_TOKEN_ID, false, 1, &mut csprng);
    let db = Arc::new(MemoryIndexerDb::new());
    let indexer = indexer(&ctx, Arc::new(BrokenStore(store)), &db);
    let key = owner.ota_key();
    indexer.start(vec![1]).unwrap();

    indexer.submit_ota_key(key.clone(), 0, false, &access_token()).unwrap();
    wait_for(&indexer, &key, KeyStatus::NotSubmitted).await;
    assert!(db.load_keys().unwrap().is_empty());
    indexer.stop().await;
}
