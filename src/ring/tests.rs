#![cfg(test)]
use super::*;
use crate::coin::{derive_ota, token_base};
use crate::config::{GammaParams, PolicyRule, PrivacyConfig, TokenPolicy};
use crate::constants::RANDOMNESS_BASE;
use crate::errors::DecoyError;
use crate::keys::{KeySet, PaymentAddress, PaymentInfo};
use crate::state::{MemoryStateStore, StoredCoin};
use rand_chacha::ChaCha20Rng;
use rand_core::SeedableRng;

const TOKEN: TokenId = TokenId([3u8; 32]);
const RESTRICTED: TokenId = TokenId([6u8; 32]);

fn context() -> PrivacyContext {
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
    config.token_policies = vec![TokenPolicy {
        token_id: RESTRICTED,
        rule: PolicyRule::BurnOnly,
    }];
    PrivacyContext::new(config).expect("valid test configuration")
}

fn store_coin(
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

// Three decoy candidates at every height up to `tip`.
fn populate(
    ctx: &PrivacyContext,
    store: &MemoryStateStore,
    token_id: &TokenId,
    tip: u64,
    rng: &mut ChaCha20Rng,
) {
    for height in 0..=tip {
        for _ in 0..3 {
            let stranger = KeySet::random(rng).payment_address();
            store_coin(ctx, store, PaymentInfo::new(stranger, 7), token_id, true, height, rng);
        }
    }
}

fn owned_input(
    ctx: &PrivacyContext,
    store: &MemoryStateStore,
    owner: &KeySet,
    value: u64,
    token_id: &TokenId,
    height: u64,
    rng: &mut ChaCha20Rng,
) -> CoinV2 {
    let payment = PaymentInfo::new(owner.payment_address(), value);
    store_coin(ctx, store, payment, token_id, true, height, rng)
        .decrypt(owner)
        .unwrap()
}

fn outputs_to(
    ctx: &PrivacyContext,
    store: &MemoryStateStore,
    address: PaymentAddress,
    values: &[u64],
    token_id: &TokenId,
    rng: &mut ChaCha20Rng,
) -> Vec<CoinV2> {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| {
            let payment = PaymentInfo::new(address, *v);
            derive_ota(ctx, store, &payment, token_id, i as u32, true, rng)
                .unwrap()
                .0
        })
        .collect()
}

#[test]
fn native_ring_should_reconstruct_from_indexes() {
    let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(1);
    let ctx = context();
    let store = MemoryStateStore::new();
    populate(&ctx, &store, &PRV_TOKEN_ID, 30, &mut csprng);
    let owner = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &owner, 100, &PRV_TOKEN_ID, 30, &mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let outs = outputs_to(&ctx, &store, receiver, &[60, 30], &PRV_TOKEN_ID, &mut csprng);
    let outputs = RingOutputs::from_coins(&outs, 10);

    let builder = RingBuilder::new(&ctx, &store);
    let built = builder
        .build_ring(&PRV_TOKEN_ID, 0, 30, 2, &[input.clone()], &outputs, 4, &mut csprng)
        .expect("enough decoys");
    assert_eq!((built.ring.rows(), built.ring.cols()), (4, 2));
    assert_eq!(built.ring.row(2)[0], *input.public_key());
    assert!(built.coins.iter().enumerate().all(|(i, row)| i == 2
        || row.iter().all(|c| c.public_key() != input.public_key())));

    // The real row's balance column is a multiple of H the signer can compute.
    let blinding = input.randomness().unwrap()
        - outs.iter().map(|c| c.randomness().unwrap()).sum::<Scalar>();
    assert_eq!(built.ring.row(2)[1], blinding * *RANDOMNESS_BASE);

    let rebuilt = builder
        .reconstruct_ring(MlsagVariant::Plain, 0, &built.sig_pub_key, &outputs)
        .expect("indexes resolve");
    assert_eq!(rebuilt.ring, built.ring);
}

#[test]
fn confidential_ring_should_balance_tags_on_the_real_row() {
    let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(2);
    let ctx = context();
    let store = MemoryStateStore::new();
    populate(&ctx, &store, &TokenId([9u8; 32]), 20, &mut csprng);
    let owner = KeySet::random(&mut csprng);
    let first = owned_input(&ctx, &store, &owner, 40, &TOKEN, 20, &mut csprng);
    let second = owned_input(&ctx, &store, &owner, 60, &TOKEN, 20, &mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let outs = outputs_to(&ctx, &store, receiver, &[100], &TOKEN, &mut csprng);
    let outputs = RingOutputs::from_coins(&outs, 0);

    let builder = RingBuilder::new(&ctx, &store);
    let built = builder
        .build_ring(&TOKEN, 0, 20, 0, &[first, second], &outputs, 3, &mut csprng)
        .expect("enough decoys");
    assert_eq!(built.ring.variant(), MlsagVariant::ConfidentialAsset);
    assert_eq!(built.ring.cols(), 4);

    // Unblinded token bases cancel: 1·(T1 + T2) − 2·T_out leaves only blinders times H.
    let tag_column = built.ring.row(0)[2];
    let blinders = built.coins[0]
        .iter()
        .map(|c| {
            let ss = c.is_owned_by(&owner.ota_key()).unwrap();
            c.asset_blinder(&ss, &TOKEN).unwrap()
        })
        .sum::<Scalar>();
    let out_blinder_point = outs[0].asset_tag().unwrap() - token_base(&TOKEN);
    assert_eq!(
        tag_column,
        blinders * *RANDOMNESS_BASE - Scalar::from(2u64) * out_blinder_point
    );

    let rebuilt = builder
        .reconstruct_ring(MlsagVariant::ConfidentialAsset, 0, &built.sig_pub_key, &outputs)
        .unwrap();
    assert_eq!(rebuilt.ring, built.ring);
    assert_eq!(rebuilt.coins.len(), 3);
}

#[test]
fn empty_buckets_should_exhaust_the_draw_bound() {
    let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(3);
    let ctx = context();
    let store = MemoryStateStore::new();
    let sampler = DecoySampler::new(&ctx, &store);
    let result = sampler.pick_decoy(&PRV_TOKEN_ID, 0, 50, &HashSet::new(), &mut csprng);
    assert!(matches!(
        result,
        Err(DecoyError::NoCoinAtHeight { attempts: 100, .. })
    ));
}

#[test]
fn ring_without_decoys_should_fail_to_build() {
    let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(4);
    let ctx = context();
    let store = MemoryStateStore::new();
    let owner = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &owner, 5, &PRV_TOKEN_ID, 0, &mut csprng);
    let outputs = RingOutputs {
        commitments: vec![],
        asset_tags: vec![],
        fee: 5,
    };

    // The only coin on chain is the real input itself.
    let err = RingBuilder::new(&ctx, &store)
        .build_ring(&PRV_TOKEN_ID, 0, 0, 0, &[input], &outputs, 2, &mut csprng)
        .unwrap_err();
    assert!(matches!(err, RingError::Decoy(DecoyError::NoCoinAtHeight { .. })));
    assert_eq!(err.class(), crate::errors::ErrorClass::ResourceExhausted);
}

#[test]
fn decoys_should_skip_burns_and_restricted_tags() {
    let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(5);
    let ctx = context();
    let store = MemoryStateStore::new();
    let stranger = KeySet::random(&mut csprng).payment_address();
    for _ in 0..4 {
        store_coin(&ctx, &store, PaymentInfo::burn(1), &TOKEN, true, 0, &mut csprng);
        let payment = PaymentInfo::new(stranger, 1);
        store_coin(&ctx, &store, payment, &RESTRICTED, false, 0, &mut csprng);
    }
    let good = store_coin(
        &ctx,
        &store,
        PaymentInfo::new(stranger, 1),
        &TOKEN,
        true,
        0,
        &mut csprng,
    );

    let sampler = DecoySampler::new(&ctx, &store);
    for _ in 0..10 {
        let (index, coin) = sampler
            .pick_decoy(&TOKEN, 0, 0, &HashSet::new(), &mut csprng)
            .expect("one usable coin");
        assert_eq!(coin.public_key(), good.public_key());
        assert_eq!(index, 8);
    }

    let exclude = [good.public_key_bytes()].into_iter().collect();
    assert!(sampler
        .pick_decoy(&TOKEN, 0, 0, &exclude, &mut csprng)
        .is_err());
}

#[test]
fn reconstruct_should_fail_on_unknown_indexes() {
    let ctx = context();
    let store = MemoryStateStore::new();
    let sig_pub_key = SigPubKey::new(vec![vec![3]]).unwrap();
    let outputs = RingOutputs {
        commitments: vec![],
        asset_tags: vec![],
        fee: 0,
    };
    let err = RingBuilder::new(&ctx, &store)
        .reconstruct_ring(MlsagVariant::Plain, 0, &sig_pub_key, &outputs)
        .unwrap_err();
    assert!(matches!(err, RingError::Store(_)));
}
