use rand::seq::SliceRandom;
use rand::Rng;
use tracing::debug;

use crate::coin::{Coin, CoinV2};
use crate::config::ScanMode;
use crate::constants::{CONFIDENTIAL_ASSET_ID, PRV_TOKEN_ID};
use crate::errors::IndexerError;

use super::{IndexJob, Shared};

/// Split `free` workers across shards in proportion to their queue depths.
///
/// A shard never gets more workers than it has batches of `batch_size` keys. Capacity left
/// over after the proportional split goes one worker at a time to randomly chosen shards that
/// still have unassigned batches.
pub fn allocate_workers<R: Rng + ?Sized>(
    depths: &[usize],
    free: usize,
    batch_size: usize,
    rng: &mut R,
) -> Vec<usize> {
    let batch_size = batch_size.max(1);
    let needs: Vec<usize> = depths
        .iter()
        .map(|depth| (depth + batch_size - 1) / batch_size)
        .collect();
    let total_depth: usize = depths.iter().sum();
    if total_depth == 0 || free == 0 {
        return vec![0; depths.len()];
    }

    let mut allocation: Vec<usize> = depths
        .iter()
        .zip(&needs)
        .map(|(depth, need)| (free * depth / total_depth).min(*need))
        .collect();
    let mut left = free - allocation.iter().sum::<usize>();
    while left > 0 {
        let hungry: Vec<usize> = (0..depths.len())
            .filter(|shard| allocation[*shard] < needs[*shard])
            .collect();
        match hungry.choose(rng) {
            Some(shard) => {
                allocation[*shard] += 1;
                left -= 1;
            }
            None => break,
        }
    }
    allocation
}

/// Scan one shard's coins for the keys of a batch.
///
/// Returns the matching coins per job, in job order. Burn coins and coins already indexed for
/// some key are skipped.
pub(crate) fn scan_batch(
    shared: &Shared,
    shard_id: u8,
    jobs: &[IndexJob],
) -> Result<Vec<Vec<CoinV2>>, IndexerError> {
    let config = &shared.ctx.config().indexer;
    let mut matches = vec![Vec::new(); jobs.len()];
    // `height` is None when scanning by index, where every key sees every coin.
    let mut visit = |bytes: &[u8], height: Option<u64>| -> Result<(), IndexerError> {
        let coin = match Coin::from_bytes(bytes)? {
            Coin::V2(coin) => coin,
            Coin::V1(_) => return Ok(()),
        };
        if coin.is_burn() || shared.cached.lock().contains(&coin.public_key_bytes()) {
            return Ok(());
        }
        if let Some(i) = jobs.iter().position(|job| {
            height.map_or(true, |h| h >= job.from_height) && coin.is_owned_by(&job.key).is_some()
        }) {
            matches[i].push(coin);
        }
        Ok(())
    };

    match config.scan_mode {
        ScanMode::ByIndex => {
            let window = config.index_window.max(1);
            for bucket in [PRV_TOKEN_ID, CONFIDENTIAL_ASSET_ID] {
                let length = shared.store.get_ota_coin_length(&bucket, shard_id)?;
                let mut start = 0;
                while start < length {
                    let end = start.saturating_add(window).min(length);
                    for index in start..end {
                        visit(&shared.store.get_ota_coin_by_index(&bucket, shard_id, index)?, None)?;
                    }
                    debug!(shard = shard_id, token = %bucket, start, end, "scanned index window");
                    start = end;
                }
            }
        }
        ScanMode::ByHeight => {
            let window = config.height_window.max(1);
            let from = jobs.iter().map(|job| job.from_height).min().unwrap_or(0);
            let to = shared
                .best_heights
                .lock()
                .get(shard_id as usize)
                .copied()
                .unwrap_or(0);
            let mut start = from;
            while start <= to {
                let end = start.saturating_add(window - 1).min(to);
                for height in start..=end {
                    for bucket in [PRV_TOKEN_ID, CONFIDENTIAL_ASSET_ID] {
                        let coins =
                            shared.store.get_ota_coins_by_height(&bucket, shard_id, height)?;
                        for bytes in coins {
                            visit(&bytes, Some(height))?;
                        }
                    }
                }
                debug!(shard = shard_id, start, end, "scanned height window");
                if end == to {
                    break;
                }
                start = end + 1;
            }
        }
    }
    Ok(matches)
}
