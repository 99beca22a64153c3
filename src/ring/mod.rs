//! Ring construction for the signer and its reconstruction for the verifier.
//!
//! Each row lists one coin per input followed by the synthetic balance columns. For the plain
//! variant that is `Σ row commitments − Σ output commitments − fee·G`; the confidential-asset
//! variant prepends `outCount·Σ row tags − inCount·Σ output tags`. Only the real row makes
//! these multiples of `H` with a discrete log the signer knows.
use std::collections::HashSet;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use rand_core::{CryptoRng, RngCore};
use tracing::debug;

use crate::coin::{Coin, CoinV2, TokenId};
use crate::config::PrivacyContext;
use crate::constants::{BASE_POINT, CONFIDENTIAL_ASSET_ID, PRV_TOKEN_ID};
use crate::errors::RingError;
use crate::mlsag::{MlsagVariant, Ring};
use crate::state::StateStore;

mod decoy;
mod indexes;

pub use decoy::DecoySampler;
pub use indexes::SigPubKey;

/// The output side every ring row is balanced against.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RingOutputs {
    pub commitments: Vec<RistrettoPoint>,
    /// Output asset tags, empty for the native coin.
    pub asset_tags: Vec<RistrettoPoint>,
    pub fee: u64,
}

impl RingOutputs {
    pub fn from_coins(coins: &[CoinV2], fee: u64) -> Self {
        RingOutputs {
            commitments: coins.iter().map(|c| *c.commitment()).collect(),
            asset_tags: coins.iter().filter_map(|c| c.asset_tag().copied()).collect(),
            fee,
        }
    }
}

pub fn variant_for(token_id: &TokenId) -> MlsagVariant {
    if token_id.is_native() {
        MlsagVariant::Plain
    } else {
        MlsagVariant::ConfidentialAsset
    }
}

fn bucket_for(variant: MlsagVariant) -> TokenId {
    match variant {
        MlsagVariant::Plain => PRV_TOKEN_ID,
        MlsagVariant::ConfidentialAsset => CONFIDENTIAL_ASSET_ID,
    }
}

fn sum(points: impl Iterator<Item = RistrettoPoint>) -> RistrettoPoint {
    points.fold(RistrettoPoint::identity(), |acc, p| acc + p)
}

/// One ring row: the coins' public keys followed by the synthetic columns.
pub fn ring_row(
    variant: MlsagVariant,
    coins: &[CoinV2],
    outputs: &RingOutputs,
) -> Result<Vec<RistrettoPoint>, RingError> {
    let mut row: Vec<RistrettoPoint> = coins.iter().map(|c| *c.public_key()).collect();
    if variant == MlsagVariant::ConfidentialAsset {
        if outputs.asset_tags.len() != outputs.commitments.len() {
            return Err(RingError::Malformed("output without asset tag".to_string()));
        }
        let tags = coins
            .iter()
            .map(|c| {
                c.asset_tag()
                    .copied()
                    .ok_or_else(|| RingError::Malformed("ring coin without asset tag".to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        let in_count = Scalar::from(coins.len() as u64);
        let out_count = Scalar::from(outputs.asset_tags.len() as u64);
        row.push(
            out_count * sum(tags.into_iter()) - in_count * sum(outputs.asset_tags.iter().copied()),
        );
    }
    row.push(
        sum(coins.iter().map(|c| *c.commitment()))
            - sum(outputs.commitments.iter().copied())
            - Scalar::from(outputs.fee) * BASE_POINT,
    );
    Ok(row)
}

/// A signer's ring with the positions of its members.
#[derive(Clone, Debug)]
pub struct BuiltRing {
    pub ring: Ring,
    pub pi: usize,
    pub sig_pub_key: SigPubKey,
    pub coins: Vec<Vec<CoinV2>>,
}

/// A verifier's ring rebuilt from on-chain positions.
#[derive(Clone, Debug)]
pub struct ReconstructedRing {
    pub ring: Ring,
    pub coins: Vec<Vec<CoinV2>>,
}

pub struct RingBuilder<'a> {
    store: &'a dyn StateStore,
    sampler: DecoySampler<'a>,
}

impl<'a> RingBuilder<'a> {
    pub fn new(ctx: &'a PrivacyContext, store: &'a dyn StateStore) -> Self {
        RingBuilder {
            store,
            sampler: DecoySampler::new(ctx, store),
        }
    }

    /// Place `real_inputs` at row `pi` of a `ring_size`-row ring and fill every other row with
    /// independently drawn decoys from the same shard.
    #[allow(clippy::too_many_arguments)]
    pub fn build_ring<T: RngCore + CryptoRng>(
        &self,
        token_id: &TokenId,
        shard_id: u8,
        latest_height: u64,
        pi: usize,
        real_inputs: &[CoinV2],
        outputs: &RingOutputs,
        ring_size: usize,
        rng: &mut T,
    ) -> Result<BuiltRing, RingError> {
        if real_inputs.is_empty() {
            return Err(RingError::Malformed("no real inputs".to_string()));
        }
        if pi >= ring_size {
            return Err(RingError::Malformed(format!(
                "real row {} outside a ring of {}",
                pi, ring_size
            )));
        }
        let variant = variant_for(token_id);
        let bucket = token_id.bucket();
        let exclude: HashSet<[u8; 32]> =
            real_inputs.iter().map(CoinV2::public_key_bytes).collect();
        let real_indexes = real_inputs
            .iter()
            .map(|c| self.store.get_ota_coin_index(&bucket, &c.public_key_bytes()))
            .collect::<Result<Vec<_>, _>>()?;

        let mut rows = Vec::with_capacity(ring_size);
        let mut indexes = Vec::with_capacity(ring_size);
        let mut coins = Vec::with_capacity(ring_size);
        for i in 0..ring_size {
            let (row_indexes, row_coins) = if i == pi {
                (real_indexes.clone(), real_inputs.to_vec())
            } else {
                let mut row_indexes = Vec::with_capacity(real_inputs.len());
                let mut row_coins = Vec::with_capacity(real_inputs.len());
                for _ in real_inputs {
                    let (index, coin) =
                        self.sampler
                            .pick_decoy(token_id, shard_id, latest_height, &exclude, rng)?;
                    row_indexes.push(index);
                    row_coins.push(coin);
                }
                (row_indexes, row_coins)
            };
            rows.push(ring_row(variant, &row_coins, outputs)?);
            indexes.push(row_indexes);
            coins.push(row_coins);
        }

        let ring = Ring::new(variant, rows).map_err(|e| RingError::Malformed(e.to_string()))?;
        debug_points!(
            "real row",
            balance = ring.row(pi)[ring.cols() - 1],
            first_key = ring.row(pi)[0],
        );
        debug!(rows = ring.rows(), cols = ring.cols(), "ring built");
        Ok(BuiltRing {
            ring,
            pi,
            sig_pub_key: SigPubKey::new(indexes)?,
            coins,
        })
    }

    /// Rebuild the ring a signature was made over from the indexes it carries.
    pub fn reconstruct_ring(
        &self,
        variant: MlsagVariant,
        shard_id: u8,
        sig_pub_key: &SigPubKey,
        outputs: &RingOutputs,
    ) -> Result<ReconstructedRing, RingError> {
        let bucket = bucket_for(variant);
        let mut rows = Vec::with_capacity(sig_pub_key.rows());
        let mut coins = Vec::with_capacity(sig_pub_key.rows());
        for row_indexes in sig_pub_key.indexes() {
            let row_coins = row_indexes
                .iter()
                .map(|index| -> Result<CoinV2, RingError> {
                    let bytes = self.store.get_ota_coin_by_index(&bucket, shard_id, *index)?;
                    Ok(Coin::from_bytes(&bytes)?.into_v2()?)
                })
                .collect::<Result<Vec<_>, _>>()?;
            rows.push(ring_row(variant, &row_coins, outputs)?);
            coins.push(row_coins);
        }
        let ring = Ring::new(variant, rows).map_err(|e| RingError::Malformed(e.to_string()))?;
        Ok(ReconstructedRing { ring, coins })
    }
}

mod tests;
