#![cfg(test)]

use super::*;
use crate::coin::{Coin, CoinV1};
use crate::config::PrivacyContext;
use crate::constants::BASE_POINT;
use crate::errors::ErrorClass;
use crate::keys::{KeySet, PaymentInfo};
use crate::state::{MemoryStateStore, StoredCoin};
use crate::testing::*;
use curve25519_dalek::scalar::Scalar;
use quickcheck::TestResult;
use rand_chacha::ChaCha20Rng;

fn native_transfer(
    ctx: &PrivacyContext,
    store: &MemoryStateStore,
    sender: &KeySet,
    input: CoinV2,
    payments: Vec<PaymentInfo>,
    fee: u64,
    csprng: &mut ChaCha20Rng,
) -> Result<Transaction, TransactionError> {
    TransferBuilder::new(ctx, store, sender, TransferParams::native(vec![input], payments, fee))
        .build(TIP, csprng)
}

fn commit_serials(ctx: &PrivacyContext, store: &MemoryStateStore, tx: &Transaction) {
    for spent in tx.spent_serials(ctx.config().num_shards) {
        store
            .store_serial_numbers(&spent.bucket, spent.shard_id, &[spent.serial])
            .unwrap();
    }
}

#[test]
fn native_transfer_should_validate_and_pay_the_recipient() {
    let mut csprng = rng(11);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let payment = PaymentInfo::new(receiver.payment_address(), 60).with_message(b"rent".to_vec());

    let tx = native_transfer(&ctx, &store, &sender, input, vec![payment], 10, &mut csprng).unwrap();
    assert_eq!(tx.tx_type(), TxType::Normal);
    validate_transaction(&ctx, &store, &tx, NOW).expect("valid transfer");

    let decoded = Transaction::from_bytes(&tx.to_bytes().unwrap()).unwrap();
    assert_eq!(decoded.hash().unwrap(), tx.hash().unwrap());
    validate_transaction(&ctx, &store, &decoded, NOW).expect("decoded transfer stays valid");

    let received: Vec<CoinV2> = tx
        .output_coins()
        .into_iter()
        .filter_map(|(_, coin)| coin.decrypt(&receiver).ok())
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value(), Some(60));
    assert_eq!(received[0].message(), b"rent");

    let change: Vec<CoinV2> = tx
        .output_coins()
        .into_iter()
        .filter_map(|(_, coin)| coin.decrypt(&sender).ok())
        .collect();
    assert_eq!(change.len(), 1);
    assert_eq!(change[0].value(), Some(30));
}

#[test]
fn builder_should_enforce_stage_order() {
    let mut csprng = rng(12);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 50, &PRV_TOKEN_ID, false, &mut csprng);
    let mut builder = TransferBuilder::new(
        &ctx,
        &store,
        &sender,
        TransferParams::native(vec![input], vec![], 5),
    );
    assert!(matches!(
        builder.prove(&mut csprng),
        Err(TransactionError::InvalidStage {
            expected: TxStage::Initialized,
            actual: TxStage::Unsized,
        })
    ));
    builder.initialize(&mut csprng).unwrap();
    assert!(matches!(
        builder.sign(TIP, &mut csprng),
        Err(TransactionError::InvalidStage {
            expected: TxStage::Proven,
            actual: TxStage::Initialized,
        })
    ));
    assert!(matches!(
        builder.initialize(&mut csprng),
        Err(TransactionError::InvalidStage { .. })
    ));
    builder.prove(&mut csprng).unwrap();
    builder.sign(TIP, &mut csprng).unwrap();
    assert_eq!(builder.stage(), TxStage::Signed);
    let tx = Transaction::Normal(builder.finalize().unwrap());
    validate_transaction(&ctx, &store, &tx, NOW).unwrap();
}

#[test]
fn overspending_should_be_unbalanced() {
    let mut csprng = rng(13);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let result = native_transfer(
        &ctx,
        &store,
        &sender,
        input,
        vec![PaymentInfo::new(receiver, 95)],
        10,
        &mut csprng,
    );
    assert!(matches!(
        result,
        Err(TransactionError::Unbalanced {
            inputs: 100,
            outputs: 95,
            fee: 10
        })
    ));
}

#[test]
fn tampered_fee_should_break_the_ring_signature() {
    let mut csprng = rng(14);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let mut tx = native_transfer(&ctx, &store, &sender, input, vec![], 10, &mut csprng).unwrap();
    if let Transaction::Normal(t) = &mut tx {
        t.core.fee = 5;
    }
    validate_sanity(&ctx, &tx, NOW).unwrap();
    assert!(matches!(
        validate_correctness(&ctx, &store, &tx),
        Err(TransactionError::RingSignatureRejected)
    ));
}

#[test]
fn spent_key_images_should_be_double_spends() {
    let mut csprng = rng(15);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let first = native_transfer(
        &ctx,
        &store,
        &sender,
        input.clone(),
        vec![PaymentInfo::new(receiver, 90)],
        10,
        &mut csprng,
    )
    .unwrap();
    let second = native_transfer(&ctx, &store, &sender, input, vec![], 10, &mut csprng).unwrap();
    validate_transaction(&ctx, &store, &first, NOW).unwrap();
    validate_transaction(&ctx, &store, &second, NOW).unwrap();

    commit_serials(&ctx, &store, &first);
    let rejected = validate_transaction(&ctx, &store, &second, NOW).unwrap_err();
    assert!(matches!(rejected, TransactionError::DoubleSpend(_)));
    assert_eq!(rejected.class(), ErrorClass::DoubleSpend);
}

#[test]
fn private_token_transfer_should_validate() {
    let mut csprng = rng(16);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng);
    let fee_input = owned_input(&ctx, &store, &sender, 20, &PRV_TOKEN_ID, false, &mut csprng);
    let first = owned_input(&ctx, &store, &sender, 40, &TOKEN, true, &mut csprng);
    let second = owned_input(&ctx, &store, &sender, 25, &TOKEN, true, &mut csprng);
    let params = TransferParams::token(
        TOKEN,
        vec![first, second],
        vec![PaymentInfo::new(receiver.payment_address(), 50)],
    );

    let tx = TokenTransferBuilder::new(&ctx, &store, &sender, vec![fee_input], 5, params)
        .build(TIP, &mut csprng)
        .unwrap();
    assert_eq!(tx.fee(), 5);
    let token_core = tx.cores()[1];
    assert_eq!(token_core.token_id, CONFIDENTIAL_ASSET_ID);
    assert!(!token_core.is_non_private_token());
    validate_transaction(&ctx, &store, &tx, NOW).expect("valid token transfer");

    let received: Vec<CoinV2> = token_core
        .proof
        .output_coins()
        .iter()
        .filter_map(|coin| coin.decrypt(&receiver).ok())
        .collect();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].value(), Some(50));
    let shared = received[0].is_owned_by(&receiver.ota_key()).unwrap();
    assert!(received[0].has_token(&shared, &TOKEN));
}

#[test]
fn token_halves_should_not_be_swappable() {
    let mut csprng = rng(17);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let build = |csprng: &mut ChaCha20Rng| {
        let fee_input = owned_input(&ctx, &store, &sender, 5, &PRV_TOKEN_ID, false, csprng);
        let token_input = owned_input(&ctx, &store, &sender, 30, &TOKEN, true, csprng);
        TokenTransferBuilder::new(
            &ctx,
            &store,
            &sender,
            vec![fee_input],
            5,
            TransferParams::token(TOKEN, vec![token_input], vec![]),
        )
        .build(TIP, csprng)
        .unwrap()
    };
    let (first, second) = match (build(&mut csprng), build(&mut csprng)) {
        (Transaction::Token(a), Transaction::Token(b)) => (a, b),
        _ => panic!("token builder returns token transactions"),
    };
    let spliced = Transaction::Token(TxToken {
        fee_tx: first.fee_tx,
        token_tx: second.token_tx,
    });
    assert!(matches!(
        validate_correctness(&ctx, &store, &spliced),
        Err(TransactionError::RingSignatureRejected)
    ));
}

#[test]
fn normal_builder_should_refuse_tokens() {
    let mut csprng = rng(18);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 30, &TOKEN, true, &mut csprng);
    let result = TransferBuilder::new(
        &ctx,
        &store,
        &sender,
        TransferParams::token(TOKEN, vec![input], vec![]),
    )
    .build(TIP, &mut csprng);
    assert!(matches!(result, Err(TransactionError::InvalidType(_))));
}

#[test]
fn burn_only_token_should_not_be_transferred() {
    let mut csprng = rng(19);
    let ctx = policy_context();
    let store = funded_store(&ctx, &mut csprng);
    store.store_privacy_token_id(&RESTRICTED).unwrap();
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let fee_input = owned_input(&ctx, &store, &sender, 5, &PRV_TOKEN_ID, false, &mut csprng);
    let input = owned_input(&ctx, &store, &sender, 30, &RESTRICTED, false, &mut csprng);
    let mut params =
        TransferParams::token(RESTRICTED, vec![input], vec![PaymentInfo::new(receiver, 30)]);
    params.private_asset = false;
    let result = TokenTransferBuilder::new(&ctx, &store, &sender, vec![fee_input], 5, params)
        .build(TIP, &mut csprng);
    assert!(matches!(result, Err(TransactionError::PolicyViolation(_))));
}

#[test]
fn burn_only_token_should_burn_next_to_earlier_burns() {
    let mut csprng = rng(20);
    let ctx = policy_context();
    let store = funded_store(&ctx, &mut csprng);
    store.store_privacy_token_id(&RESTRICTED).unwrap();
    // A burn already on chain shares the burning key with the one about to be made.
    store_coin(&ctx, &store, PaymentInfo::burn(3), &RESTRICTED, false, TIP, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let fee_input = owned_input(&ctx, &store, &sender, 5, &PRV_TOKEN_ID, false, &mut csprng);
    let input = owned_input(&ctx, &store, &sender, 30, &RESTRICTED, false, &mut csprng);
    let mut params = TransferParams::token(RESTRICTED, vec![input], vec![PaymentInfo::burn(30)]);
    params.private_asset = false;

    let tx = TokenTransferBuilder::new(&ctx, &store, &sender, vec![fee_input], 5, params)
        .build(TIP, &mut csprng)
        .unwrap();
    assert!(tx.cores()[1].is_non_private_token());
    validate_transaction(&ctx, &store, &tx, NOW).expect("burns are exempt from uniqueness");
}

#[test]
fn restricted_tag_inside_a_private_ring_should_be_detected() {
    let mut csprng = rng(21);
    // Built where nobody restricts the token, checked where it is burn-only.
    let open = context();
    let store = funded_store(&open, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let fee_input = owned_input(&open, &store, &sender, 5, &PRV_TOKEN_ID, false, &mut csprng);
    let input = owned_input(&open, &store, &sender, 30, &RESTRICTED, false, &mut csprng);
    let params =
        TransferParams::token(RESTRICTED, vec![input], vec![PaymentInfo::new(receiver, 30)]);
    let tx = TokenTransferBuilder::new(&open, &store, &sender, vec![fee_input], 5, params)
        .build(TIP, &mut csprng)
        .unwrap();
    validate_correctness(&open, &store, &tx).unwrap();

    let strict = policy_context();
    let rejected = validate_correctness(&strict, &store, &tx).unwrap_err();
    assert!(matches!(rejected, TransactionError::PolicyViolation(_)));
    assert_eq!(rejected.class(), ErrorClass::Malformed);
}

fn stored_v1(
    store: &MemoryStateStore,
    owner: &KeySet,
    value: u64,
    csprng: &mut ChaCha20Rng,
) -> CoinV1 {
    let coin = CoinV1::new(owner.public_spend(), value, b"legacy".to_vec(), csprng).unwrap();
    store
        .store_commitments(&PRV_TOKEN_ID, 0, &[coin.commitment().compress().to_bytes()])
        .unwrap();
    coin
}

#[test]
fn conversion_should_move_v1_coins_into_v2() {
    let mut csprng = rng(22);
    let ctx = context();
    let store = MemoryStateStore::new();
    let owner = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng);
    let inputs = vec![
        stored_v1(&store, &owner, 70, &mut csprng),
        stored_v1(&store, &owner, 50, &mut csprng),
    ];
    let params = ConversionParams {
        inputs,
        payments: vec![PaymentInfo::new(receiver.payment_address(), 100)],
        fee: 15,
        ..Default::default()
    };
    let tx = build_conversion(&ctx, &store, &owner, params, &mut csprng).unwrap();
    validate_transaction(&ctx, &store, &tx, NOW).expect("valid conversion");

    let outputs = tx.output_coins();
    assert_eq!(outputs.len(), 2);
    assert!(outputs.iter().all(|(bucket, coin)| *bucket == PRV_TOKEN_ID && !coin.is_encrypted()));
    let mine: Vec<u64> = outputs
        .iter()
        .filter_map(|(_, coin)| coin.decrypt(&receiver).ok())
        .filter_map(|coin| coin.value())
        .collect();
    assert_eq!(mine, vec![100]);

    commit_serials(&ctx, &store, &tx);
    assert!(matches!(
        validate_with_state(&ctx, &store, &tx),
        Err(TransactionError::DoubleSpend(_))
    ));
}

#[test]
fn conversion_should_reject_foreign_serial_numbers() {
    let mut csprng = rng(23);
    let ctx = context();
    let store = MemoryStateStore::new();
    let owner = KeySet::random(&mut csprng);
    let params = ConversionParams {
        inputs: vec![stored_v1(&store, &owner, 40, &mut csprng)],
        ..Default::default()
    };
    let mut tx = build_conversion(&ctx, &store, &owner, params, &mut csprng).unwrap();
    if let Transaction::Conversion(t) = &mut tx {
        if let Proof::Conversion(proof) = &mut t.core.proof {
            proof.inputs[0].serial_number = Scalar::random(&mut csprng) * BASE_POINT;
        }
    }
    assert!(matches!(
        validate_correctness(&ctx, &store, &tx),
        Err(TransactionError::InvalidSignature(_))
    ));
}

#[test]
fn conversion_of_unknown_commitments_should_fail_with_state() {
    let mut csprng = rng(24);
    let ctx = context();
    let store = MemoryStateStore::new();
    let owner = KeySet::random(&mut csprng);
    let coin = CoinV1::new(owner.public_spend(), 40, vec![], &mut csprng).unwrap();
    let params = ConversionParams {
        inputs: vec![coin],
        ..Default::default()
    };
    let tx = build_conversion(&ctx, &store, &owner, params, &mut csprng).unwrap();
    validate_correctness(&ctx, &store, &tx).unwrap();
    assert!(matches!(
        validate_with_state(&ctx, &store, &tx),
        Err(TransactionError::CommitmentNotFound(_))
    ));
}

#[test]
fn foreign_v1_coins_should_not_convert() {
    let mut csprng = rng(25);
    let ctx = context();
    let store = MemoryStateStore::new();
    let owner = KeySet::random(&mut csprng);
    let thief = KeySet::random(&mut csprng);
    let params = ConversionParams {
        inputs: vec![stored_v1(&store, &owner, 40, &mut csprng)],
        ..Default::default()
    };
    assert!(matches!(
        build_conversion(&ctx, &store, &thief, params, &mut csprng),
        Err(TransactionError::Malformed(_))
    ));
}

#[quickcheck]
fn serial_number_proofs_should_bind_the_key(seed: u64) -> bool {
    let mut csprng = rng(seed);
    let owner = KeySet::random(&mut csprng);
    let coin = CoinV1::new(owner.public_spend(), 9, vec![], &mut csprng).unwrap();
    let (serial, proof) =
        SerialNumberProof::prove(&coin, owner.private_key().unwrap(), &mut csprng).unwrap();
    let other = CoinV1::new(owner.public_spend(), 9, vec![], &mut csprng).unwrap();
    proof.verify(&coin, &serial)
        && !proof.verify(&other, &serial)
        && !proof.verify(&coin, &(serial + BASE_POINT))
}

#[test]
fn rewards_should_mint_native_and_token_coins() {
    let mut csprng = rng(26);
    let ctx = context();
    let store = MemoryStateStore::new();
    let minter = KeySet::random(&mut csprng);
    let miner = KeySet::random(&mut csprng);
    let minter_key = *minter.private_key().unwrap();
    let payment = PaymentInfo::new(miner.payment_address(), 1_000);

    let native = build_reward(&ctx, &store, &minter_key, &payment, &PRV_TOKEN_ID, &mut csprng)
        .unwrap();
    validate_transaction(&ctx, &store, &native, NOW).unwrap();
    assert_eq!(native.minted_token(), None);
    assert_eq!(native.output_coins()[0].0, PRV_TOKEN_ID);

    let token = build_reward(&ctx, &store, &minter_key, &payment, &TOKEN, &mut csprng).unwrap();
    validate_transaction(&ctx, &store, &token, NOW).unwrap();
    assert_eq!(token.minted_token(), Some(TOKEN));
    let (bucket, coin) = token.output_coins()[0];
    assert_eq!(bucket, CONFIDENTIAL_ASSET_ID);
    assert_eq!(coin.decrypt(&miner).unwrap().value(), Some(1_000));
}

#[test]
fn forged_reward_signature_should_be_rejected() {
    let mut csprng = rng(27);
    let ctx = context();
    let store = MemoryStateStore::new();
    let minter = KeySet::random(&mut csprng);
    let payment = PaymentInfo::new(KeySet::random(&mut csprng).payment_address(), 10);
    let mut tx = build_reward(
        &ctx,
        &store,
        minter.private_key().unwrap(),
        &payment,
        &PRV_TOKEN_ID,
        &mut csprng,
    )
    .unwrap();
    if let Transaction::Reward(t) = &mut tx {
        t.core.sig[0] ^= 1;
    }
    assert!(matches!(
        validate_transaction(&ctx, &store, &tx, NOW),
        Err(TransactionError::InvalidSignature(_))
    ));
}

#[test]
fn estimate_should_bound_the_real_size() {
    let mut csprng = rng(28);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let receiver = KeySet::random(&mut csprng).payment_address();
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let tx = native_transfer(
        &ctx,
        &store,
        &sender,
        input,
        vec![PaymentInfo::new(receiver, 40)],
        10,
        &mut csprng,
    )
    .unwrap();
    let actual = tx.to_bytes().unwrap().len();
    let estimated = estimate_size_bytes(&SizeParams::Transfer {
        shape: TxShape {
            num_inputs: 1,
            num_outputs: 2,
            message_len: 0,
        },
        ring_size: ctx.config().ring_size,
        info_len: 0,
    });
    assert!(estimated >= actual, "estimated {} < actual {}", estimated, actual);
    assert!(estimated - actual < 1024);
}

#[test]
fn oversized_transfers_should_fail_before_proving() {
    let mut csprng = rng(29);
    let mut config = config();
    config.max_tx_size_kb = 1;
    let ctx = PrivacyContext::new(config).unwrap();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let mut builder = TransferBuilder::new(
        &ctx,
        &store,
        &sender,
        TransferParams::native(vec![input], vec![], 10),
    );
    assert!(matches!(
        builder.initialize(&mut csprng),
        Err(TransactionError::TxTooLarge { max_kb: 1, .. })
    ));
    assert_eq!(builder.stage(), TxStage::Unsized);
}

#[test]
fn far_future_lock_time_should_be_malformed() {
    let mut csprng = rng(30);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let mut params = TransferParams::native(vec![input], vec![], 10);
    params.lock_time = NOW + 2 * ctx.config().lock_time_tolerance_secs;
    let tx = TransferBuilder::new(&ctx, &store, &sender, params)
        .build(TIP, &mut csprng)
        .unwrap();
    let rejected = validate_transaction(&ctx, &store, &tx, NOW).unwrap_err();
    assert!(matches!(rejected, TransactionError::InvalidLockTime(_)));
    assert_eq!(rejected.reason().class, ErrorClass::Malformed);
}

#[quickcheck]
fn unknown_encoding_versions_should_be_rejected(version: u8, body: Vec<u8>) -> TestResult {
    if version == TX_ENCODING_VERSION {
        return TestResult::discard();
    }
    let mut bytes = vec![version];
    bytes.extend(body);
    TestResult::from_bool(matches!(
        Transaction::from_bytes(&bytes),
        Err(TransactionError::InvalidVersion(v)) if v == version
    ))
}

#[test]
fn stored_outputs_should_decode_as_v2_coins() {
    let mut csprng = rng(31);
    let ctx = context();
    let store = funded_store(&ctx, &mut csprng);
    let sender = KeySet::random(&mut csprng);
    let input = owned_input(&ctx, &store, &sender, 100, &PRV_TOKEN_ID, false, &mut csprng);
    let tx = native_transfer(&ctx, &store, &sender, input, vec![], 1, &mut csprng).unwrap();
    for (_, coin) in tx.output_coins() {
        let stored = StoredCoin {
            public_key: coin.public_key_bytes(),
            bytes: coin.to_bytes(),
        };
        let decoded = Coin::from_bytes(&stored.bytes).unwrap().into_v2().unwrap();
        assert_eq!(decoded.public_key_bytes(), stored.public_key);
        assert!(decoded.is_encrypted());
    }
}
