//! Chain fixtures shared by the assembler, ledger and indexer tests.
#![cfg(test)]
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

use crate::coin::{derive_ota, CoinV2, TokenId};
use crate::config::{GammaParams, PolicyRule, PrivacyConfig, PrivacyContext, TokenPolicy};
use crate::constants::PRV_TOKEN_ID;
use crate::keys::{KeySet, PaymentInfo};
use crate::state::{MemoryStateStore, StateStore, StoredCoin};

pub(crate) const TOKEN: TokenId = TokenId([3u8; 32]);
pub(crate) const RESTRICTED: TokenId = TokenId([6u8; 32]);
/// Decoy filler for the confidential-asset bucket.
pub(crate) const FILLER: TokenId = TokenId([9u8; 32]);
pub(crate) const TIP: u64 = 30;
pub(crate) const NOW: i64 = 1_700_000_000;

pub(crate) fn rng(seed: u64) -> ChaCha20Rng {
    SeedableRng::seed_from_u64(seed)
}

pub(crate) fn config() -> PrivacyConfig {
    let mut config = PrivacyConfig::default();
    config.num_shards = 1;
    config.ring_size = 4;
    config.decoy.block_time_secs = 1;
    config.decoy.max_draws = 100;
    config.decoy.native = GammaParams {
        shape: 1.0,
        scale: 2.0,
    };
    config.decoy.token = config.decoy.native;
    config
}

pub(crate) fn context() -> PrivacyContext {
    PrivacyContext::new(config()).expect("valid test configuration")
}

/// Same as [`context`], with `RESTRICTED` burn-only.
pub(crate) fn policy_context() -> PrivacyContext {
    let mut config = config();
    config.token_policies = vec![TokenPolicy {
        token_id: RESTRICTED,
        rule: PolicyRule::BurnOnly,
    }];
    PrivacyContext::new(config).expect("valid test configuration")
}

/// Derive, conceal and store a coin paying `payment` at `height`.
pub(crate) fn store_coin(
    ctx: &PrivacyContext,
    store: &MemoryStateStore,
    payment: PaymentInfo,
    token_id: &TokenId,
    blind: bool,
    height: u64,
    rng: &mut ChaCha20Rng,
) -> CoinV2 {
    let view = payment.address.public_view;
    let (coin, _) = derive_ota(ctx, store, &payment, token_id, 0, blind, rng).unwrap();
    let coin = coin.conceal(&view).unwrap();
    store
        .store_output_coins(
            &token_id.bucket(),
            0,
            height,
            &[StoredCoin {
                public_key: coin.public_key_bytes(),
                bytes: coin.to_bytes(),
            }],
        )
        .unwrap();
    coin
}

/// A store with three stranger coins per height up to `TIP` in both buckets.
pub(crate) fn funded_store(ctx: &PrivacyContext, rng: &mut ChaCha20Rng) -> MemoryStateStore {
    let store = MemoryStateStore::new();
    for height in 0..=TIP {
        for token_id in [PRV_TOKEN_ID, FILLER] {
            for _ in 0..3 {
                let stranger = KeySet::random(rng).payment_address();
                let payment = PaymentInfo::new(stranger, 7);
                store_coin(ctx, &store, payment, &token_id, true, height, rng);
            }
        }
    }
    store
}

/// A stored coin owned by `owner`, decrypted and ready to spend.
pub(crate) fn owned_input(
    ctx: &PrivacyContext,
    store: &MemoryStateStore,
    owner: &KeySet,
    value: u64,
    token_id: &TokenId,
    blind: bool,
    rng: &mut ChaCha20Rng,
) -> CoinV2 {
    let payment = PaymentInfo::new(owner.payment_address(), value);
    store_coin(ctx, store, payment, token_id, blind, TIP, rng)
        .decrypt(owner)
        .unwrap()
}
