//! Coin indexer: finds and caches the coins owned by submitted OTA keys.
//!
//! In usual mode (no workers) a submitted key only collects the coins handed to
//! [`CoinIndexer::cache_output_coins`] after it was added. In enhanced mode a control loop
//! batches submitted keys per shard and scans the chain state for their coins on blocking
//! worker threads.
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::coin::{Coin, CoinV2, TokenId};
use crate::config::{parse_access_token, PrivacyContext};
use crate::constants::CONFIDENTIAL_ASSET_ID;
use crate::errors::IndexerError;
use crate::keys::OtaKey;
use crate::state::StateStore;

mod scan;
mod store;

pub use scan::allocate_workers;
pub use store::{IndexerDb, KeyRecord, MemoryIndexerDb};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyStatus {
    NotSubmitted,
    Indexing,
    /// Added without a scan; collects coins from the moment it was added.
    SubmittedUsual,
    Finished,
}

impl KeyStatus {
    pub(crate) fn to_byte(self) -> u8 {
        match self {
            KeyStatus::NotSubmitted => 0,
            KeyStatus::Indexing => 1,
            KeyStatus::SubmittedUsual => 2,
            KeyStatus::Finished => 3,
        }
    }

    // A zero byte predates the usual-path marker and means the same thing.
    pub(crate) fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 | 2 => Some(KeyStatus::SubmittedUsual),
            1 => Some(KeyStatus::Indexing),
            3 => Some(KeyStatus::Finished),
            _ => None,
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct IndexJob {
    pub(crate) key: OtaKey,
    pub(crate) shard_id: u8,
    pub(crate) from_height: u64,
}

// Outcome of one scanned batch, reported back to the control loop.
struct BatchDone {
    id: u64,
    jobs: Vec<IndexJob>,
    result: Result<Vec<Vec<CoinV2>>, IndexerError>,
}

pub(crate) struct Shared {
    pub(crate) ctx: Arc<PrivacyContext>,
    pub(crate) store: Arc<dyn StateStore>,
    db: Arc<dyn IndexerDb>,
    statuses: Mutex<HashMap<[u8; 64], KeyStatus>>,
    pub(crate) cached: Mutex<HashSet<[u8; 32]>>,
    queue_depths: Mutex<Vec<usize>>,
    pub(crate) best_heights: Mutex<Vec<u64>>,
}

impl Shared {
    fn status(&self, raw_key: &[u8; 64]) -> KeyStatus {
        self.statuses
            .lock()
            .get(raw_key)
            .copied()
            .unwrap_or(KeyStatus::NotSubmitted)
    }

    fn persist(&self, key: &OtaKey, status: KeyStatus) -> Result<(), IndexerError> {
        let record = KeyRecord::new(key.clone(), status);
        self.db.store_key(&key.to_raw(), record.to_bytes())?;
        Ok(())
    }

    /// Store the coins found for `key` that no key has indexed yet, and mark them indexed.
    ///
    /// Returns how many were new.
    fn save_coins(&self, key: &OtaKey, coins: &[CoinV2]) -> Result<usize, IndexerError> {
        let fresh: Vec<&CoinV2> = {
            let mut cached = self.cached.lock();
            coins
                .iter()
                .filter(|coin| cached.insert(coin.public_key_bytes()))
                .collect()
        };
        if fresh.is_empty() {
            return Ok(0);
        }
        let public_keys: Vec<[u8; 32]> = fresh.iter().map(|coin| coin.public_key_bytes()).collect();
        let stored = self
            .db
            .store_indexed_coins(&key.to_raw(), fresh.iter().map(|coin| coin.to_bytes()).collect())
            .and_then(|_| self.db.cache_coin_public_keys(&public_keys));
        if let Err(e) = stored {
            let mut cached = self.cached.lock();
            for public_key in &public_keys {
                cached.remove(public_key);
            }
            return Err(e.into());
        }
        Ok(fresh.len())
    }

    fn finish(&self, job: &IndexJob, coins: &[CoinV2]) -> Result<(), IndexerError> {
        self.save_coins(&job.key, coins)?;
        self.persist(&job.key, KeyStatus::Finished)?;
        self.statuses
            .lock()
            .insert(job.key.to_raw(), KeyStatus::Finished);
        Ok(())
    }

    fn fail(&self, job: &IndexJob, reason: &IndexerError) {
        let raw_key = job.key.to_raw();
        error!(shard = job.shard_id, error = %reason, "indexing failed, key dropped");
        if let Err(e) = self.db.delete_key(&raw_key) {
            warn!(error = %e, "could not delete failed key record");
        }
        self.statuses.lock().remove(&raw_key);
    }

    fn apply(&self, done: BatchDone) {
        let results = match done.result {
            Ok(results) => results,
            Err(reason) => {
                done.jobs.iter().for_each(|job| self.fail(job, &reason));
                return;
            }
        };
        for (job, coins) in done.jobs.iter().zip(results) {
            // Rolled back by a stop while its batch was running.
            if self.status(&job.key.to_raw()) != KeyStatus::Indexing {
                continue;
            }
            match self.finish(job, &coins) {
                Ok(()) => info!(shard = job.shard_id, coins = coins.len(), "key indexed"),
                Err(reason) => self.fail(job, &reason),
            }
        }
        debug!(batch = done.id, "batch applied");
    }
}

struct Control {
    submissions: mpsc::Sender<IndexJob>,
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Vec<IndexJob>>,
}

pub struct CoinIndexer {
    shared: Arc<Shared>,
    // Keys left Indexing by a previous run or a stop, queued again on start.
    resumed: Mutex<Vec<IndexJob>>,
    control: Mutex<Option<Control>>,
}

impl CoinIndexer {
    /// Load persisted key records and the cached coin set.
    pub fn new(
        ctx: Arc<PrivacyContext>,
        store: Arc<dyn StateStore>,
        db: Arc<dyn IndexerDb>,
    ) -> Result<Self, IndexerError> {
        let num_shards = ctx.config().num_shards;
        let enhanced = ctx.config().indexer.num_workers > 0;
        let mut statuses = HashMap::new();
        let mut resumed = Vec::new();
        for bytes in db.load_keys()? {
            let record = match KeyRecord::from_bytes(&bytes) {
                Ok(record) => record,
                Err(e) => {
                    warn!(error = %e, "skipping key record");
                    continue;
                }
            };
            let mut status = record.status;
            if status == KeyStatus::Indexing {
                if enhanced {
                    resumed.push(IndexJob {
                        shard_id: record.key.shard_id(num_shards),
                        key: record.key.clone(),
                        from_height: 0,
                    });
                } else {
                    status = KeyStatus::SubmittedUsual;
                }
            }
            statuses.insert(record.key.to_raw(), status);
        }
        let cached: HashSet<[u8; 32]> = db.cached_coin_public_keys()?.into_iter().collect();
        info!(
            keys = statuses.len(),
            resumed = resumed.len(),
            cached = cached.len(),
            "coin indexer loaded"
        );

        Ok(CoinIndexer {
            shared: Arc::new(Shared {
                ctx,
                store,
                db,
                statuses: Mutex::new(statuses),
                cached: Mutex::new(cached),
                queue_depths: Mutex::new(vec![0; num_shards as usize]),
                best_heights: Mutex::new(vec![0; num_shards as usize]),
            }),
            resumed: Mutex::new(resumed),
            control: Mutex::new(None),
        })
    }

    pub fn is_enhanced(&self) -> bool {
        self.shared.ctx.config().indexer.num_workers > 0
    }

    pub fn is_running(&self) -> bool {
        self.control.lock().is_some()
    }

    pub fn has_ota_key(&self, key: &OtaKey) -> KeyStatus {
        self.shared.status(&key.to_raw())
    }

    /// Track `key` without scanning history.
    pub fn add_ota_key(&self, key: &OtaKey) -> Result<(), IndexerError> {
        let raw_key = key.to_raw();
        {
            let mut statuses = self.shared.statuses.lock();
            match statuses.get(&raw_key).copied() {
                Some(KeyStatus::Indexing) => return Err(IndexerError::AlreadyIndexing),
                Some(_) => return Ok(()),
                None => statuses.insert(raw_key, KeyStatus::SubmittedUsual),
            };
        }
        if let Err(e) = self.shared.persist(key, KeyStatus::SubmittedUsual) {
            self.shared.statuses.lock().remove(&raw_key);
            return Err(e);
        }
        Ok(())
    }

    /// Forget `key`. A key with a scan queued or running can't be removed until it finishes.
    pub fn remove_ota_key(&self, key: &OtaKey) -> Result<(), IndexerError> {
        let raw_key = key.to_raw();
        let mut statuses = self.shared.statuses.lock();
        if statuses.get(&raw_key) == Some(&KeyStatus::Indexing) {
            return Err(IndexerError::AlreadyIndexing);
        }
        self.shared.db.delete_key(&raw_key)?;
        statuses.remove(&raw_key);
        Ok(())
    }

    pub fn is_queue_full(&self, shard_id: u8) -> bool {
        let config = &self.shared.ctx.config().indexer;
        let capacity = config.num_workers * config.queue_capacity_per_worker;
        self.shared
            .queue_depths
            .lock()
            .get(shard_id as usize)
            .map_or(true, |depth| *depth >= capacity)
    }

    /// Queue `key` for a full scan of its shard.
    ///
    /// The key turns `Indexing` before this returns, so a second submission fails with
    /// `AlreadyIndexing` however the two race. A finished key is scanned again only when
    /// `is_reset` is set.
    pub fn submit_ota_key(
        &self,
        key: OtaKey,
        from_height: u64,
        is_reset: bool,
        access_token: &str,
    ) -> Result<(), IndexerError> {
        if !self.is_enhanced() {
            return Err(IndexerError::EnhancedModeDisabled);
        }
        let token = parse_access_token(access_token).map_err(|_| IndexerError::InvalidAccessToken)?;
        if !self.shared.ctx.is_access_token_valid(&token) {
            return Err(IndexerError::InvalidAccessToken);
        }
        let submissions = match self.control.lock().as_ref() {
            Some(control) => control.submissions.clone(),
            None => return Err(IndexerError::NotRunning),
        };
        let shard_id = key.shard_id(self.shared.ctx.config().num_shards);
        if self.is_queue_full(shard_id) {
            return Err(IndexerError::QueueFull(shard_id));
        }

        let raw_key = key.to_raw();
        let previous = {
            let mut statuses = self.shared.statuses.lock();
            let previous = statuses.get(&raw_key).copied();
            match previous {
                Some(KeyStatus::Indexing) => return Err(IndexerError::AlreadyIndexing),
                Some(KeyStatus::Finished) if !is_reset => return Err(IndexerError::AlreadyIndexed),
                _ => statuses.insert(raw_key, KeyStatus::Indexing),
            };
            previous
        };
        let rollback = |shared: &Shared| {
            let mut statuses = shared.statuses.lock();
            match previous {
                Some(status) => statuses.insert(raw_key, status),
                None => statuses.remove(&raw_key),
            };
        };

        if let Err(e) = self.shared.persist(&key, KeyStatus::Indexing) {
            rollback(&self.shared);
            return Err(e);
        }
        let job = IndexJob {
            key,
            shard_id,
            from_height,
        };
        if submissions.try_send(job).is_err() {
            rollback(&self.shared);
            return Err(IndexerError::QueueFull(shard_id));
        }
        if let Some(depth) = self.shared.queue_depths.lock().get_mut(shard_id as usize) {
            *depth += 1;
        }
        debug!(shard = shard_id, from_height, is_reset, "OTA key queued");
        Ok(())
    }

    /// Record the tip the height scan of `shard_id` runs up to.
    pub fn set_best_height(&self, shard_id: u8, height: u64) -> Result<(), IndexerError> {
        match self.shared.best_heights.lock().get_mut(shard_id as usize) {
            Some(best) => {
                *best = height;
                Ok(())
            }
            None => Err(IndexerError::UnknownShard(shard_id)),
        }
    }

    /// Index freshly committed coins for every tracked key that owns one.
    ///
    /// Keys still being scanned are included, since their scan may have passed the point where
    /// these coins were committed. Returns how many coins were newly cached.
    pub fn cache_output_coins(&self, coins: &[CoinV2]) -> Result<usize, IndexerError> {
        let keys: Vec<OtaKey> = {
            let statuses = self.shared.statuses.lock();
            statuses
                .iter()
                .filter(|(_, status)| **status != KeyStatus::NotSubmitted)
                .filter_map(|(raw, _)| OtaKey::from_raw(raw).ok())
                .collect()
        };
        let mut cached = 0;
        for key in &keys {
            let owned: Vec<CoinV2> = coins
                .iter()
                .filter(|coin| !coin.is_burn() && coin.is_owned_by(key).is_some())
                .cloned()
                .collect();
            cached += self.shared.save_coins(key, &owned)?;
        }
        Ok(cached)
    }

    /// Coins indexed for `key` that carry `token_id` and are still on chain.
    ///
    /// `CONFIDENTIAL_ASSET_ID` selects every token coin. Coins whose one-time address the
    /// store no longer knows were lost to a fork and are dropped.
    pub fn get_indexed_out_coins(
        &self,
        key: &OtaKey,
        token_id: &TokenId,
    ) -> Result<Vec<CoinV2>, IndexerError> {
        let raw_key = key.to_raw();
        match self.shared.status(&raw_key) {
            KeyStatus::NotSubmitted => return Err(IndexerError::NotSynced),
            KeyStatus::Indexing => return Err(IndexerError::InProgress),
            KeyStatus::SubmittedUsual | KeyStatus::Finished => {}
        }

        let mut coins = Vec::new();
        for bytes in self.shared.db.get_indexed_coins(&raw_key)? {
            let coin = Coin::from_bytes(&bytes)?.into_v2()?;
            let shared_secret = match coin.is_owned_by(key) {
                Some(shared_secret) => shared_secret,
                None => continue,
            };
            let carries_token = match coin.asset_tag() {
                None => token_id.is_native(),
                Some(_) if *token_id == CONFIDENTIAL_ASSET_ID => true,
                Some(_) => !token_id.is_native() && coin.has_token(&shared_secret, token_id),
            };
            if !carries_token {
                continue;
            }
            let bucket = if coin.asset_tag().is_some() {
                CONFIDENTIAL_ASSET_ID
            } else {
                token_id.bucket()
            };
            if self
                .shared
                .store
                .has_onetime_address(&bucket, &coin.public_key_bytes())?
            {
                coins.push(coin);
            } else {
                debug!(public_key = %hex::encode(coin.public_key_bytes()), "dropping forked coin");
            }
        }
        Ok(coins)
    }

    /// Spawn the control loop on the current tokio runtime. Keys left `Indexing` by a previous
    /// run are queued first.
    pub fn start(&self, best_heights: Vec<u64>) -> Result<(), IndexerError> {
        if !self.is_enhanced() {
            return Err(IndexerError::EnhancedModeDisabled);
        }
        let mut control = self.control.lock();
        if control.is_some() {
            debug!("coin indexer already running");
            return Ok(());
        }
        for (shard, height) in best_heights.into_iter().enumerate() {
            self.set_best_height(shard as u8, height)?;
        }

        let config = &self.shared.ctx.config().indexer;
        let num_shards = self.shared.ctx.config().num_shards as usize;
        let capacity = (config.num_workers * config.queue_capacity_per_worker * num_shards).max(1);
        let (submissions, receiver) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = oneshot::channel();

        let mut queues = vec![VecDeque::new(); num_shards];
        {
            let mut statuses = self.shared.statuses.lock();
            let mut depths = self.shared.queue_depths.lock();
            for job in self.resumed.lock().drain(..) {
                if let Some(queue) = queues.get_mut(job.shard_id as usize) {
                    statuses.insert(job.key.to_raw(), KeyStatus::Indexing);
                    depths[job.shard_id as usize] += 1;
                    queue.push_back(job);
                }
            }
        }
        let handle = tokio::spawn(control_loop(
            Arc::clone(&self.shared),
            receiver,
            shutdown_rx,
            queues,
        ));
        *control = Some(Control {
            submissions,
            shutdown,
            handle,
        });
        info!(workers = config.num_workers, "coin indexer started");
        Ok(())
    }

    /// Stop the control loop and wait for it to exit.
    ///
    /// Queued and in-flight keys go back to `NotSubmitted` in memory and the results of
    /// running batches are discarded. Their persisted records stay `Indexing`, so the next
    /// start, in this process or after a reload, scans them again.
    pub async fn stop(&self) {
        let control = self.control.lock().take();
        if let Some(control) = control {
            let _ = control.shutdown.send(());
            match control.handle.await {
                Ok(abandoned) => {
                    info!(abandoned = abandoned.len(), "coin indexer stopped");
                    self.resumed.lock().extend(abandoned);
                }
                Err(e) => error!(error = %e, "coin indexer control loop panicked"),
            }
        }
    }
}

async fn control_loop(
    shared: Arc<Shared>,
    mut submissions: mpsc::Receiver<IndexJob>,
    mut shutdown: oneshot::Receiver<()>,
    mut queues: Vec<VecDeque<IndexJob>>,
) -> Vec<IndexJob> {
    let config = shared.ctx.config().indexer.clone();
    let (done_tx, mut done_rx) = mpsc::channel::<BatchDone>(config.num_workers.max(1));
    let mut tick = tokio::time::interval(Duration::from_millis(config.idle_sleep_ms.max(1)));
    let batch_wait = Duration::from_millis(config.batch_wait_ms);
    let mut csprng = ChaCha20Rng::from_entropy();
    let mut in_flight: HashMap<u64, Vec<IndexJob>> = HashMap::new();
    let mut next_id = 0u64;
    let mut waiting_since: Option<Instant> = None;

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            Some(done) = done_rx.recv() => {
                in_flight.remove(&done.id);
                shared.apply(done);
            }
            Some(job) = submissions.recv() => {
                queues[job.shard_id as usize].push_back(job);
            }
            _ = tick.tick() => {
                let queued: usize = queues.iter().map(VecDeque::len).sum();
                if queued == 0 {
                    waiting_since = None;
                    continue;
                }
                let since = *waiting_since.get_or_insert_with(Instant::now);
                let free = config.num_workers.saturating_sub(in_flight.len());
                if free == 0 || (queued < config.batch_size && since.elapsed() < batch_wait) {
                    continue;
                }
                let depths: Vec<usize> = queues.iter().map(VecDeque::len).collect();
                let allocation = allocate_workers(&depths, free, config.batch_size, &mut csprng);
                for (shard, workers) in allocation.into_iter().enumerate() {
                    for _ in 0..workers {
                        let take = config.batch_size.max(1).min(queues[shard].len());
                        if take == 0 {
                            break;
                        }
                        let jobs: Vec<IndexJob> = queues[shard].drain(..take).collect();
                        if let Some(depth) = shared.queue_depths.lock().get_mut(shard) {
                            *depth = depth.saturating_sub(take);
                        }
                        let id = next_id;
                        next_id += 1;
                        in_flight.insert(id, jobs.clone());
                        spawn_batch(Arc::clone(&shared), shard as u8, id, jobs, done_tx.clone());
                    }
                }
                waiting_since = None;
            }
        }
    }

    // Shutting down: nothing queued or in flight survives in memory.
    submissions.close();
    let mut abandoned: Vec<IndexJob> = queues
        .into_iter()
        .flatten()
        .chain(in_flight.into_values().flatten())
        .collect();
    while let Ok(job) = submissions.try_recv() {
        abandoned.push(job);
    }
    {
        let mut statuses = shared.statuses.lock();
        for job in &abandoned {
            statuses.remove(&job.key.to_raw());
        }
    }
    shared.queue_depths.lock().iter_mut().for_each(|depth| *depth = 0);
    abandoned
}

fn spawn_batch(
    shared: Arc<Shared>,
    shard_id: u8,
    id: u64,
    jobs: Vec<IndexJob>,
    done: mpsc::Sender<BatchDone>,
) {
    tokio::spawn(async move {
        debug!(batch = id, shard = shard_id, keys = jobs.len(), "scanning batch");
        let started = Instant::now();
        let scan_jobs = jobs.clone();
        let result =
            tokio::task::spawn_blocking(move || scan::scan_batch(&shared, shard_id, &scan_jobs))
                .await
                .unwrap_or_else(|e| Err(IndexerError::JobFailed(e.to_string())));
        debug!(batch = id, elapsed_ms = started.elapsed().as_millis() as u64, "batch scanned");
        // The loop is gone after a stop; the results are dropped with it.
        let _ = done.send(BatchDone { id, jobs, result }).await;
    });
}

mod tests;
