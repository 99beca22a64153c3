//! Three validation stages of increasing cost. Run them in order and stop at the first failure:
//! structure first, so cryptography is never spent on garbage, and state last.
use std::collections::HashSet;

use curve25519_dalek::ristretto::RistrettoPoint;
use itertools::Itertools;
use tracing::{debug, warn};

use super::{
    Convertible, Proof, RingProof, Signable, Transaction, TransactionCore, TxType,
};
use crate::coin::{token_base, CoinV2};
use crate::config::{PolicyRule, PrivacyContext};
use crate::constants::{PRV_TOKEN_ID, TX_VERSION};
use crate::crypto::is_identity;
use crate::errors::{CoinError, TransactionError};
use crate::mlsag::{MlsagSignature, MlsagVariant};
use crate::rangeproof::OutputRangeProof;
use crate::ring::{ReconstructedRing, SigPubKey};
use crate::state::StateStore;

fn malformed(message: &str) -> TransactionError {
    TransactionError::Malformed(message.to_string())
}

fn check_type(core: &TransactionCore, expected: TxType) -> Result<(), TransactionError> {
    if core.tx_type != expected {
        return Err(TransactionError::InvalidType("transaction type does not match its body"));
    }
    Ok(())
}

fn check_common(
    ctx: &PrivacyContext,
    core: &TransactionCore,
    now: i64,
) -> Result<(), TransactionError> {
    let config = ctx.config();
    if core.version != TX_VERSION {
        return Err(TransactionError::InvalidVersion(core.version));
    }
    if core.lock_time < 0 || core.lock_time > now.saturating_add(config.lock_time_tolerance_secs) {
        return Err(TransactionError::InvalidLockTime(core.lock_time));
    }
    if core.info.len() > config.max_info_size {
        return Err(TransactionError::InfoTooLong {
            given: core.info.len(),
            max: config.max_info_size,
        });
    }
    Ok(())
}

fn check_counts(
    ctx: &PrivacyContext,
    inputs: usize,
    outputs: usize,
) -> Result<(), TransactionError> {
    let config = ctx.config();
    if inputs == 0 {
        return Err(TransactionError::EmptyInputs);
    }
    if inputs > config.max_inputs {
        return Err(TransactionError::TooManyInputs {
            given: inputs,
            max: config.max_inputs,
        });
    }
    if outputs == 0 {
        return Err(TransactionError::EmptyOutputs);
    }
    if outputs > config.max_outputs {
        return Err(TransactionError::TooManyOutputs {
            given: outputs,
            max: config.max_outputs,
        });
    }
    Ok(())
}

fn check_ring_core(ctx: &PrivacyContext, core: &TransactionCore) -> Result<(), TransactionError> {
    let (variant, proof) = core
        .proof
        .ring()
        .ok_or(TransactionError::InvalidType("expected a ring-signed proof"))?;
    check_counts(ctx, proof.key_images.len(), proof.output_coins.len())?;
    if proof.key_images.iter().any(is_identity) {
        return Err(malformed("identity key image"));
    }
    if !proof.key_images.iter().map(|ki| ki.compress().to_bytes()).all_unique() {
        return Err(malformed("repeated key image"));
    }
    if proof.output_coins.iter().any(|coin| !coin.is_encrypted()) {
        return Err(malformed("ring-signed outputs must be concealed"));
    }

    let sig_pub_key = SigPubKey::from_bytes(&core.sig_pub_key)?;
    if sig_pub_key.rows() != ctx.config().ring_size || sig_pub_key.cols() != proof.key_images.len()
    {
        return Err(malformed("ring index matrix does not match the ring"));
    }
    let signature = MlsagSignature::from_bytes(&core.sig)?;
    if signature.variant() != variant || !signature.key_images().is_empty() {
        return Err(malformed("signature does not match the proof"));
    }

    match variant {
        MlsagVariant::Plain => {
            if proof.output_coins.iter().any(|coin| coin.asset_tag().is_some()) {
                return Err(CoinError::AssetTagMismatch.into());
            }
            if !matches!(proof.range_proof, OutputRangeProof::Aggregated(_)) {
                return Err(malformed("native outputs need an aggregated range proof"));
            }
        }
        MlsagVariant::ConfidentialAsset => {
            if core.fee != 0 {
                return Err(malformed("confidential-asset spends carry no fee"));
            }
            let expected = core.is_non_private_token().then(|| token_base(&core.token_id));
            for coin in &proof.output_coins {
                match (coin.asset_tag(), expected) {
                    (None, _) => return Err(CoinError::AssetTagMismatch.into()),
                    (Some(tag), Some(base)) if *tag != base => {
                        return Err(CoinError::AssetTagMismatch.into())
                    }
                    _ => {}
                }
            }
            match &proof.range_proof {
                OutputRangeProof::PerOutput(proofs) if proofs.len() == proof.output_coins.len() => {}
                _ => return Err(malformed("token outputs need one range proof each")),
            }
        }
    }
    Ok(())
}

fn check_schnorr_lengths(core: &TransactionCore) -> Result<(), TransactionError> {
    if core.sig_pub_key.len() != 32 || core.sig.len() != 64 {
        return Err(malformed("schnorr signature or key has the wrong length"));
    }
    Ok(())
}

/// Structural checks: versions, types, limits and proof shapes. No cryptography, no state.
pub fn validate_sanity(
    ctx: &PrivacyContext,
    tx: &Transaction,
    now: i64,
) -> Result<(), TransactionError> {
    match tx {
        Transaction::Normal(t) => {
            check_type(&t.core, TxType::Normal)?;
            check_common(ctx, &t.core, now)?;
            if t.core.token_id != PRV_TOKEN_ID || !matches!(t.core.proof, Proof::Payment(_)) {
                return Err(TransactionError::InvalidType(
                    "normal transactions move the native coin",
                ));
            }
            check_ring_core(ctx, &t.core)?;
        }
        Transaction::Token(t) => {
            for core in [&t.fee_tx.core, &t.token_tx.core] {
                check_type(core, TxType::Token)?;
                check_common(ctx, core, now)?;
            }
            if t.fee_tx.core.token_id != PRV_TOKEN_ID
                || !matches!(t.fee_tx.core.proof, Proof::Payment(_))
            {
                return Err(TransactionError::InvalidType("fee half must move the native coin"));
            }
            if t.token_tx.core.token_id == PRV_TOKEN_ID
                || !matches!(t.token_tx.core.proof, Proof::ConfidentialAsset(_))
            {
                return Err(TransactionError::InvalidType("token half must move a token"));
            }
            check_ring_core(ctx, &t.fee_tx.core)?;
            check_ring_core(ctx, &t.token_tx.core)?;
        }
        Transaction::Conversion(t) => {
            check_type(&t.core, TxType::Conversion)?;
            check_common(ctx, &t.core, now)?;
            if t.core.token_id != PRV_TOKEN_ID {
                return Err(TransactionError::InvalidType("only native coins convert"));
            }
            let proof = t.proof()?;
            check_counts(ctx, proof.inputs.len(), proof.output_coins.len())?;
            if proof
                .output_coins
                .iter()
                .any(|coin| coin.is_encrypted() || coin.asset_tag().is_some())
            {
                return Err(malformed("conversion outputs must be plain native coins"));
            }
            check_schnorr_lengths(&t.core)?;
            t.verify_conversion_balance()?;
        }
        Transaction::Reward(t) => {
            check_type(&t.core, TxType::Reward)?;
            check_common(ctx, &t.core, now)?;
            if t.core.fee != 0 {
                return Err(malformed("rewards carry no fee"));
            }
            check_schnorr_lengths(&t.core)?;
            t.verify_output()?;
        }
    }

    let max_kb = ctx.config().max_tx_size_kb;
    let size_kb = tx.size_kb()?;
    if size_kb > max_kb {
        return Err(TransactionError::TxTooLarge { size_kb, max_kb });
    }
    Ok(())
}

fn verify_range_proof(proof: &RingProof) -> Result<(), TransactionError> {
    let commitments: Vec<RistrettoPoint> =
        proof.output_coins.iter().map(|c| *c.commitment()).collect();
    let asset_tags: Vec<RistrettoPoint> =
        proof.output_coins.iter().filter_map(|c| c.asset_tag().copied()).collect();
    Ok(proof.range_proof.verify(&commitments, &asset_tags)?)
}

/// Burn-only tokens: an unblinded spend is judged by its declared token, a blinded one by the
/// unblinded restricted tags showing up among its ring members.
fn check_token_policy(
    ctx: &PrivacyContext,
    core: &TransactionCore,
    ring: &ReconstructedRing,
) -> Result<(), TransactionError> {
    let all_burned = core.proof.output_coins().iter().all(CoinV2::is_burn);
    if all_burned {
        return Ok(());
    }
    if core.is_non_private_token() {
        if ctx.policy(&core.token_id) == Some(PolicyRule::BurnOnly) {
            warn!(token = %core.token_id, "burn-only token transferred");
            return Err(TransactionError::PolicyViolation(format!(
                "token {} can only be burned",
                core.token_id
            )));
        }
        return Ok(());
    }
    let detected = ring
        .coins
        .iter()
        .flatten()
        .find_map(|coin| coin.asset_tag().and_then(|tag| ctx.restricted_token_of(tag)));
    match detected {
        Some(token) => {
            warn!(token = %token, "burn-only token found in a private ring");
            Err(TransactionError::PolicyViolation(format!(
                "ring spends token {} which can only be burned",
                token
            )))
        }
        None => Ok(()),
    }
}

/// Cryptographic checks: range proofs, signatures, serial-number proofs and token policy.
pub fn validate_correctness(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    tx: &Transaction,
) -> Result<(), TransactionError> {
    match tx {
        Transaction::Normal(t) => {
            let (_, proof) = t.ring_proof()?;
            verify_range_proof(proof)?;
            t.verify_sig(ctx, store)
        }
        Transaction::Token(t) => {
            for half in [&t.fee_tx, &t.token_tx] {
                let (_, proof) = half.ring_proof()?;
                verify_range_proof(proof)?;
            }
            let ring = t.verify_ring_sigs(ctx, store)?;
            check_token_policy(ctx, &t.token_tx.core, &ring)
        }
        Transaction::Conversion(t) => {
            t.verify_inputs()?;
            t.verify_sig(ctx, store)
        }
        Transaction::Reward(t) => {
            t.verify_output()?;
            t.verify_sig(ctx, store)
        }
    }
}

/// Checks against chain state: nothing spent twice, no reused one-time address, the token and
/// the converted commitments exist.
pub fn validate_with_state(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    tx: &Transaction,
) -> Result<(), TransactionError> {
    let num_shards = ctx.config().num_shards;
    let mut serials = HashSet::new();
    for spent in tx.spent_serials(num_shards) {
        if !serials.insert(spent.serial)
            || store.has_serial_number(&spent.bucket, spent.shard_id, &spent.serial)?
        {
            return Err(TransactionError::DoubleSpend(hex::encode(spent.serial)));
        }
    }

    let mut otas = HashSet::new();
    for (bucket, coin) in tx.output_coins() {
        if coin.is_burn() {
            continue;
        }
        let public_key = coin.public_key_bytes();
        if !otas.insert(public_key) || store.has_onetime_address(&bucket, &public_key)? {
            return Err(TransactionError::DuplicateOta(hex::encode(public_key)));
        }
    }

    for core in tx.cores() {
        if core.is_non_private_token() && !store.privacy_token_id_existed(&core.token_id) {
            return Err(TransactionError::UnknownToken(core.token_id.to_string()));
        }
    }

    if let Transaction::Conversion(t) = tx {
        for input in t.converted_inputs() {
            let commitment = input.coin.commitment().compress().to_bytes();
            let shard_id = input.coin.shard_id(num_shards);
            if !store.has_commitment(&PRV_TOKEN_ID, shard_id, &commitment)? {
                return Err(TransactionError::CommitmentNotFound(hex::encode(commitment)));
            }
        }
    }
    Ok(())
}

/// All three stages, short-circuiting. `now` is the current unix time for lock-time checks.
pub fn validate_transaction(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    tx: &Transaction,
    now: i64,
) -> Result<(), TransactionError> {
    let result = validate_sanity(ctx, tx, now)
        .and_then(|_| validate_correctness(ctx, store, tx))
        .and_then(|_| validate_with_state(ctx, store, tx));
    match &result {
        Ok(()) => debug!(tx_type = ?tx.tx_type(), "transaction accepted"),
        Err(e) => {
            let reason = e.reason();
            warn!(
                tx_type = ?tx.tx_type(),
                class = ?reason.class,
                reason = %reason.message,
                "transaction rejected"
            );
        }
    }
    result
}
