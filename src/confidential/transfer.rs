use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand::Rng;
use rand_core::{CryptoRng, RngCore};
use tracing::{debug, warn};

use super::{
    estimate_size, token_message, Proof, RingProof, SizeParams, Transaction, TransactionCore,
    TxShape, TxStage, TxToken, TxType, TxVer2,
};
use crate::coin::{derive_ota, CoinV2, SharedSecret, TokenId};
use crate::config::{PolicyRule, PrivacyContext};
use crate::constants::{CONFIDENTIAL_ASSET_ID, PRV_TOKEN_ID, TX_VERSION};
use crate::errors::{CoinError, TransactionError};
use crate::keys::{KeySet, PaymentInfo};
use crate::mlsag::Mlsag;
use crate::rangeproof::{prove_confidential, prove_native, OutputRangeProof};
use crate::ring::{RingBuilder, RingOutputs};
use crate::state::StateStore;

/// What a ring-signed transfer spends and pays. Inputs must be decrypted coins of the signer.
#[derive(Clone, Debug)]
pub struct TransferParams {
    pub token_id: TokenId,
    pub inputs: Vec<CoinV2>,
    pub payments: Vec<PaymentInfo>,
    pub fee: u64,
    pub info: Vec<u8>,
    pub lock_time: i64,
    /// Blind the outputs' asset tags. Meaningless for the native coin.
    pub private_asset: bool,
}

impl TransferParams {
    pub fn native(inputs: Vec<CoinV2>, payments: Vec<PaymentInfo>, fee: u64) -> Self {
        TransferParams {
            token_id: PRV_TOKEN_ID,
            inputs,
            payments,
            fee,
            info: vec![],
            lock_time: 0,
            private_asset: false,
        }
    }

    pub fn token(token_id: TokenId, inputs: Vec<CoinV2>, payments: Vec<PaymentInfo>) -> Self {
        TransferParams {
            token_id,
            inputs,
            payments,
            fee: 0,
            info: vec![],
            lock_time: 0,
            private_asset: true,
        }
    }

    // Change output counted in, the exact count is only known after balancing.
    fn shape_upper_bound(&self) -> TxShape {
        TxShape {
            num_inputs: self.inputs.len(),
            num_outputs: self.payments.len() + 1,
            message_len: self.payments.iter().map(|p| p.message.len()).max().unwrap_or(0),
        }
    }
}

struct PendingOutput {
    coin: CoinV2,
    shared: SharedSecret,
    view: RistrettoPoint,
}

fn opening(coin: &CoinV2) -> Result<(u64, Scalar), TransactionError> {
    match (coin.value(), coin.randomness()) {
        (Some(value), Some(randomness)) => Ok((value, *randomness)),
        _ => Err(TransactionError::Malformed("coin is not decrypted".to_string())),
    }
}

/// Builds one ring-signed transaction core, one stage at a time.
pub struct TransferBuilder<'a> {
    ctx: &'a PrivacyContext,
    store: &'a dyn StateStore,
    keys: &'a KeySet,
    params: TransferParams,
    tx_type: TxType,
    stage: TxStage,
    input_blinders: Vec<Scalar>,
    outputs: Vec<PendingOutput>,
    proven: Option<(Vec<CoinV2>, OutputRangeProof)>,
    mlsag: Option<Mlsag>,
    core: Option<TransactionCore>,
}

impl<'a> TransferBuilder<'a> {
    /// A native transfer.
    pub fn new(
        ctx: &'a PrivacyContext,
        store: &'a dyn StateStore,
        keys: &'a KeySet,
        params: TransferParams,
    ) -> Self {
        Self::with_type(ctx, store, keys, params, TxType::Normal)
    }

    fn with_type(
        ctx: &'a PrivacyContext,
        store: &'a dyn StateStore,
        keys: &'a KeySet,
        params: TransferParams,
        tx_type: TxType,
    ) -> Self {
        TransferBuilder {
            ctx,
            store,
            keys,
            params,
            tx_type,
            stage: TxStage::Unsized,
            input_blinders: vec![],
            outputs: vec![],
            proven: None,
            mlsag: None,
            core: None,
        }
    }

    pub fn stage(&self) -> TxStage {
        self.stage
    }

    fn expect_stage(&self, expected: TxStage) -> Result<(), TransactionError> {
        if self.stage == expected {
            Ok(())
        } else {
            Err(TransactionError::InvalidStage {
                expected,
                actual: self.stage,
            })
        }
    }

    fn is_native(&self) -> bool {
        self.params.token_id.is_native()
    }

    /// Balance inputs against payments and fee, check limits and policy, derive the outputs.
    pub fn initialize<T: RngCore + CryptoRng>(
        &mut self,
        rng: &mut T,
    ) -> Result<(), TransactionError> {
        self.expect_stage(TxStage::Unsized)?;
        let config = self.ctx.config();
        let token_id = self.params.token_id;
        if self.tx_type == TxType::Normal && !self.is_native() {
            return Err(TransactionError::InvalidType(
                "token transfers need a fee transaction",
            ));
        }
        if !self.is_native() && self.params.fee != 0 {
            return Err(TransactionError::Malformed(
                "confidential-asset spends pay their fee in the native coin".to_string(),
            ));
        }
        if self.params.inputs.is_empty() {
            return Err(TransactionError::EmptyInputs);
        }
        if self.params.inputs.len() > config.max_inputs {
            return Err(TransactionError::TooManyInputs {
                given: self.params.inputs.len(),
                max: config.max_inputs,
            });
        }
        if self.params.info.len() > config.max_info_size {
            return Err(TransactionError::InfoTooLong {
                given: self.params.info.len(),
                max: config.max_info_size,
            });
        }

        let ota_key = self.keys.ota_key();
        let mut input_total = 0u64;
        let mut input_blinders = Vec::with_capacity(self.params.inputs.len());
        for coin in &self.params.inputs {
            let (value, _) = opening(coin)?;
            input_total = input_total
                .checked_add(value)
                .ok_or(TransactionError::Overflow)?;
            if self.is_native() {
                if coin.asset_tag().is_some() {
                    return Err(CoinError::AssetTagMismatch.into());
                }
            } else {
                let shared = coin.is_owned_by(&ota_key).ok_or_else(|| {
                    CoinError::Decryption("input is not owned by the signer".to_string())
                })?;
                input_blinders.push(coin.asset_blinder(&shared, &token_id)?);
            }
        }

        let paid = self
            .params
            .payments
            .iter()
            .try_fold(0u64, |acc, p| acc.checked_add(p.amount))
            .ok_or(TransactionError::Overflow)?;
        let spent = paid
            .checked_add(self.params.fee)
            .ok_or(TransactionError::Overflow)?;
        let change = input_total
            .checked_sub(spent)
            .ok_or(TransactionError::Unbalanced {
                inputs: input_total,
                outputs: paid,
                fee: self.params.fee,
            })?;
        let mut payments = self.params.payments.clone();
        if change > 0 || payments.is_empty() {
            payments.push(PaymentInfo::new(self.keys.payment_address(), change));
        }
        if payments.len() > config.max_outputs {
            return Err(TransactionError::TooManyOutputs {
                given: payments.len(),
                max: config.max_outputs,
            });
        }
        if self.ctx.policy(&token_id) == Some(PolicyRule::BurnOnly)
            && payments.iter().any(|p| !p.address.is_burning())
        {
            warn!(token = %token_id, "refusing to transfer a burn-only token");
            return Err(TransactionError::PolicyViolation(format!(
                "token {} can only be burned",
                token_id
            )));
        }

        if self.tx_type == TxType::Normal {
            let estimated_kb = estimate_size(&SizeParams::Transfer {
                shape: TxShape {
                    num_inputs: self.params.inputs.len(),
                    num_outputs: payments.len(),
                    message_len: payments.iter().map(|p| p.message.len()).max().unwrap_or(0),
                },
                ring_size: config.ring_size,
                info_len: self.params.info.len(),
            });
            if estimated_kb > config.max_tx_size_kb {
                return Err(TransactionError::TxTooLarge {
                    size_kb: estimated_kb,
                    max_kb: config.max_tx_size_kb,
                });
            }
        }

        let blind = !self.is_native() && self.params.private_asset;
        let mut outputs = Vec::with_capacity(payments.len());
        for (i, payment) in payments.iter().enumerate() {
            let (coin, shared) =
                derive_ota(self.ctx, self.store, payment, &token_id, i as u32, blind, rng)?;
            outputs.push(PendingOutput {
                coin,
                shared,
                view: payment.address.public_view,
            });
        }
        debug!(
            token = %token_id,
            inputs = self.params.inputs.len(),
            outputs = outputs.len(),
            change,
            "transfer initialized"
        );
        self.input_blinders = input_blinders;
        self.outputs = outputs;
        self.stage = TxStage::Initialized;
        Ok(())
    }

    /// Prove every output in range, then conceal them for their recipients.
    pub fn prove<T: RngCore + CryptoRng>(&mut self, rng: &mut T) -> Result<(), TransactionError> {
        self.expect_stage(TxStage::Initialized)?;
        let (values, blindings): (Vec<u64>, Vec<Scalar>) = self
            .outputs
            .iter()
            .map(|o| opening(&o.coin))
            .collect::<Result<Vec<_>, _>>()?
            .into_iter()
            .unzip();
        let range_proof = if self.is_native() {
            prove_native(&values, &blindings, rng)?
        } else {
            let tags: Vec<RistrettoPoint> =
                self.outputs.iter().map(|o| o.coin.value_base()).collect();
            prove_confidential(&values, &blindings, &tags, rng)?
        };
        let concealed = self
            .outputs
            .iter()
            .map(|o| o.coin.clone().conceal(&o.view))
            .collect::<Result<Vec<_>, _>>()?;
        self.proven = Some((concealed, range_proof));
        self.stage = TxStage::Proven;
        Ok(())
    }

    // Spend keys of the inputs followed by the discrete logs of the real row's synthetic
    // columns over H.
    fn private_keys(&self) -> Result<Vec<Scalar>, TransactionError> {
        let mut keys = self
            .params
            .inputs
            .iter()
            .map(|c| c.private_key(self.keys))
            .collect::<Result<Vec<_>, _>>()?;
        let inputs = self
            .params
            .inputs
            .iter()
            .map(opening)
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = self
            .outputs
            .iter()
            .map(|o| opening(&o.coin))
            .collect::<Result<Vec<_>, _>>()?;

        if self.is_native() {
            let r_in: Scalar = inputs.iter().map(|(_, r)| r).sum();
            let r_out: Scalar = outputs.iter().map(|(_, r)| r).sum();
            keys.push(r_in - r_out);
            return Ok(keys);
        }

        let in_count = Scalar::from(inputs.len() as u64);
        let out_count = Scalar::from(outputs.len() as u64);
        let bl_in: Scalar = self.input_blinders.iter().sum();
        let bl_out: Scalar = self.outputs.iter().map(|o| o.shared.asset_blinder).sum();
        keys.push(out_count * bl_in - in_count * bl_out);

        let weighted_in: Scalar = inputs
            .iter()
            .zip(&self.input_blinders)
            .map(|((v, r), bl)| Scalar::from(*v) * bl + r)
            .sum();
        let weighted_out: Scalar = outputs
            .iter()
            .zip(&self.outputs)
            .map(|((v, r), o)| Scalar::from(*v) * o.shared.asset_blinder + r)
            .sum();
        keys.push(weighted_in - weighted_out);
        Ok(keys)
    }

    /// Build the ring and the unsigned core. The MLSAG engine checks the keys against the
    /// real row here, before anything is signed.
    pub(crate) fn attach_ring<T: RngCore + CryptoRng>(
        &mut self,
        latest_height: u64,
        rng: &mut T,
    ) -> Result<(), TransactionError> {
        self.expect_stage(TxStage::Proven)?;
        let (output_coins, range_proof) = self
            .proven
            .take()
            .ok_or_else(|| TransactionError::Malformed("ring already attached".to_string()))?;
        let config = self.ctx.config();
        let token_id = self.params.token_id;
        let ring_size = config.ring_size;
        let pi = rng.gen_range(0..ring_size);
        let built = RingBuilder::new(self.ctx, self.store).build_ring(
            &token_id,
            self.keys.shard_id(config.num_shards),
            latest_height,
            pi,
            &self.params.inputs,
            &RingOutputs::from_coins(&output_coins, self.params.fee),
            ring_size,
            rng,
        )?;
        let mlsag = Mlsag::new(built.ring, self.private_keys()?, pi)?;

        let ring_proof = RingProof {
            key_images: mlsag.key_images().to_vec(),
            output_coins,
            range_proof,
        };
        let (core_token, proof) = if self.is_native() {
            (PRV_TOKEN_ID, Proof::Payment(ring_proof))
        } else if self.params.private_asset {
            (CONFIDENTIAL_ASSET_ID, Proof::ConfidentialAsset(ring_proof))
        } else {
            (token_id, Proof::ConfidentialAsset(ring_proof))
        };
        self.core = Some(TransactionCore {
            version: TX_VERSION,
            tx_type: self.tx_type,
            lock_time: self.params.lock_time,
            fee: self.params.fee,
            info: self.params.info.clone(),
            token_id: core_token,
            sender_shard_byte: self.keys.public_spend_last_byte(),
            proof,
            sig: vec![],
            sig_pub_key: built.sig_pub_key.to_bytes(),
        });
        self.mlsag = Some(mlsag);
        Ok(())
    }

    pub(crate) fn core_hash(&self) -> Result<[u8; 32], TransactionError> {
        self.core
            .as_ref()
            .ok_or_else(|| TransactionError::Malformed("ring not attached".to_string()))?
            .hash()
    }

    pub(crate) fn sign_message<T: RngCore + CryptoRng>(
        &mut self,
        message: &[u8],
        rng: &mut T,
    ) -> Result<(), TransactionError> {
        self.expect_stage(TxStage::Proven)?;
        let (mlsag, core) = match (self.mlsag.take(), self.core.as_mut()) {
            (Some(mlsag), Some(core)) => (mlsag, core),
            _ => return Err(TransactionError::Malformed("ring not attached".to_string())),
        };
        core.sig = mlsag
            .sign_with_rng(message, rng)
            .without_key_images()
            .to_bytes();
        self.stage = TxStage::Signed;
        Ok(())
    }

    /// Build the ring around the inputs and sign the core's own hash.
    pub fn sign<T: RngCore + CryptoRng>(
        &mut self,
        latest_height: u64,
        rng: &mut T,
    ) -> Result<(), TransactionError> {
        self.attach_ring(latest_height, rng)?;
        let message = self.core_hash()?;
        self.sign_message(&message, rng)
    }

    pub fn finalize(mut self) -> Result<TxVer2, TransactionError> {
        self.expect_stage(TxStage::Signed)?;
        let core = self
            .core
            .take()
            .ok_or_else(|| TransactionError::Malformed("ring not attached".to_string()))?;
        self.stage = TxStage::Broadcastable;
        Ok(TxVer2 { core })
    }

    /// Run every stage against chain tip `latest_height`.
    pub fn build<T: RngCore + CryptoRng>(
        mut self,
        latest_height: u64,
        rng: &mut T,
    ) -> Result<Transaction, TransactionError> {
        self.initialize(rng)?;
        self.prove(rng)?;
        self.sign(latest_height, rng)?;
        Ok(Transaction::Normal(self.finalize()?))
    }
}

/// Builds a token transfer: the native fee half and the token half advance together and sign
/// one shared message.
pub struct TokenTransferBuilder<'a> {
    ctx: &'a PrivacyContext,
    fee: TransferBuilder<'a>,
    token: TransferBuilder<'a>,
}

impl<'a> TokenTransferBuilder<'a> {
    /// `fee_inputs` are native coins covering `fee`; the change goes back to the signer.
    pub fn new(
        ctx: &'a PrivacyContext,
        store: &'a dyn StateStore,
        keys: &'a KeySet,
        fee_inputs: Vec<CoinV2>,
        fee: u64,
        token: TransferParams,
    ) -> Self {
        let mut fee_params = TransferParams::native(fee_inputs, vec![], fee);
        fee_params.lock_time = token.lock_time;
        TokenTransferBuilder {
            ctx,
            fee: TransferBuilder::with_type(ctx, store, keys, fee_params, TxType::Token),
            token: TransferBuilder::with_type(ctx, store, keys, token, TxType::Token),
        }
    }

    pub fn stage(&self) -> TxStage {
        self.token.stage()
    }

    pub fn initialize<T: RngCore + CryptoRng>(
        &mut self,
        rng: &mut T,
    ) -> Result<(), TransactionError> {
        if self.token.is_native() {
            return Err(TransactionError::InvalidType(
                "token transfer of the native coin",
            ));
        }
        let config = self.ctx.config();
        let estimated_kb = estimate_size(&SizeParams::Token {
            fee: self.fee.params.shape_upper_bound(),
            token: self.token.params.shape_upper_bound(),
            ring_size: config.ring_size,
            info_len: self.token.params.info.len(),
        });
        if estimated_kb > config.max_tx_size_kb {
            return Err(TransactionError::TxTooLarge {
                size_kb: estimated_kb,
                max_kb: config.max_tx_size_kb,
            });
        }
        self.fee.initialize(rng)?;
        self.token.initialize(rng)
    }

    pub fn prove<T: RngCore + CryptoRng>(&mut self, rng: &mut T) -> Result<(), TransactionError> {
        self.fee.prove(rng)?;
        self.token.prove(rng)
    }

    pub fn sign<T: RngCore + CryptoRng>(
        &mut self,
        latest_height: u64,
        rng: &mut T,
    ) -> Result<(), TransactionError> {
        self.fee.attach_ring(latest_height, rng)?;
        self.token.attach_ring(latest_height, rng)?;
        let message = token_message(&self.fee.core_hash()?, &self.token.core_hash()?);
        self.fee.sign_message(&message, rng)?;
        self.token.sign_message(&message, rng)
    }

    pub fn finalize(self) -> Result<TxToken, TransactionError> {
        Ok(TxToken {
            fee_tx: self.fee.finalize()?,
            token_tx: self.token.finalize()?,
        })
    }

    pub fn build<T: RngCore + CryptoRng>(
        mut self,
        latest_height: u64,
        rng: &mut T,
    ) -> Result<Transaction, TransactionError> {
        self.initialize(rng)?;
        self.prove(rng)?;
        self.sign(latest_height, rng)?;
        Ok(Transaction::Token(self.finalize()?))
    }
}
