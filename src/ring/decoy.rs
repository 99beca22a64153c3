use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand_core::{CryptoRng, RngCore};
use rand_distr::Distribution;
use tracing::{trace, warn};

use crate::coin::{Coin, CoinV2, TokenId};
use crate::config::PrivacyContext;
use crate::errors::DecoyError;
use crate::state::StateStore;

/// Draws decoys by spend age: a Gamma-distributed number of seconds back from the tip,
/// converted to blocks.
pub struct DecoySampler<'a> {
    ctx: &'a PrivacyContext,
    store: &'a dyn StateStore,
}

impl<'a> DecoySampler<'a> {
    pub fn new(ctx: &'a PrivacyContext, store: &'a dyn StateStore) -> Self {
        DecoySampler { ctx, store }
    }

    /// Pick one decoy for a ring spending `token_id` in `shard_id`, returning its index in
    /// the token's bucket. Coins whose public key is in `exclude` are never picked.
    pub fn pick_decoy<T: RngCore + CryptoRng>(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        latest_height: u64,
        exclude: &HashSet<[u8; 32]>,
        rng: &mut T,
    ) -> Result<(u64, CoinV2), DecoyError> {
        let max_draws = self.ctx.config().decoy.max_draws;
        let mut height = latest_height;
        for _ in 0..max_draws {
            height = match self.draw_height(token_id, latest_height, rng) {
                Some(height) => height,
                None => continue,
            };
            let candidates = self.candidates(token_id, shard_id, height, exclude)?;
            if let Some(coin) = candidates.choose(rng) {
                let index = self
                    .store
                    .get_ota_coin_index(&token_id.bucket(), &coin.public_key_bytes())?;
                trace!(height, index, "picked decoy");
                return Ok((index, coin.clone()));
            }
        }
        warn!(
            token = %token_id,
            shard = shard_id,
            latest_height,
            max_draws,
            "no decoy found"
        );
        Err(DecoyError::NoCoinAtHeight {
            height,
            attempts: max_draws,
        })
    }

    // None when the offset reaches back past genesis.
    fn draw_height<T: RngCore + CryptoRng>(
        &self,
        token_id: &TokenId,
        latest_height: u64,
        rng: &mut T,
    ) -> Option<u64> {
        let seconds = self.ctx.decoy_distribution(token_id).sample(rng);
        let blocks = (seconds / self.ctx.config().decoy.block_time_secs as f64) as u64;
        latest_height.checked_sub(blocks)
    }

    fn candidates(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        height: u64,
        exclude: &HashSet<[u8; 32]>,
    ) -> Result<Vec<CoinV2>, DecoyError> {
        let confidential = !token_id.is_native();
        let mut candidates = vec![];
        for bytes in self
            .store
            .get_ota_coins_by_height(&token_id.bucket(), shard_id, height)?
        {
            let coin = match Coin::from_bytes(&bytes)? {
                Coin::V2(coin) => coin,
                Coin::V1(_) => continue,
            };
            if coin.is_burn() || exclude.contains(&coin.public_key_bytes()) {
                continue;
            }
            // An unblinded restricted tag inside a ring would trip the burn-only policy.
            if confidential {
                match coin.asset_tag() {
                    Some(tag) if self.ctx.restricted_token_of(tag).is_none() => {}
                    _ => continue,
                }
            }
            candidates.push(coin);
        }
        Ok(candidates)
    }
}
