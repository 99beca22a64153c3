use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    Convertible, Proof, Signable, SizeParams, Transaction, TransactionCore, TxConversion,
    TxShape, TxType,
};
use crate::coin::{derive_ota, CoinV1, CoinV2};
use crate::config::PrivacyContext;
use crate::constants::{BASE_POINT, MERLIN_SERIAL_NUMBER_LABEL, PRV_TOKEN_ID, TX_VERSION};
use crate::crypto::{decompress_point, schnorr_sign, schnorr_verify};
use crate::errors::{CoinError, TransactionError};
use crate::keys::{KeySet, PaymentInfo};
use crate::state::StateStore;

/// Proof that a serial number `SN` belongs to a v1 coin: with `k = privateKey + snd`,
/// `log_G(P + snd·G) = log_SN(G) = k`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialNumberProof {
    a: RistrettoPoint,
    b: RistrettoPoint,
    z: Scalar,
}

fn serial_challenge(
    opened: &RistrettoPoint,
    serial_number: &RistrettoPoint,
    a: &RistrettoPoint,
    b: &RistrettoPoint,
) -> Scalar {
    let mut transcript = Transcript::new(MERLIN_SERIAL_NUMBER_LABEL);
    transcript.append_message(b"opened", opened.compress().as_bytes());
    transcript.append_message(b"serial", serial_number.compress().as_bytes());
    transcript.append_message(b"A", a.compress().as_bytes());
    transcript.append_message(b"B", b.compress().as_bytes());
    let mut wide = [0u8; 64];
    transcript.challenge_bytes(b"c", &mut wide);
    Scalar::from_bytes_mod_order_wide(&wide)
}

impl SerialNumberProof {
    /// Serial number of `coin` under `private_key` with its proof.
    pub fn prove<T: RngCore + CryptoRng>(
        coin: &CoinV1,
        private_key: &Scalar,
        rng: &mut T,
    ) -> Result<(RistrettoPoint, Self), CoinError> {
        let serial_number = coin.serial_number(private_key)?;
        let k = private_key + coin.snd();
        let w = Scalar::random(rng);
        let a = w * BASE_POINT;
        let b = w * serial_number;
        let c = serial_challenge(&(k * BASE_POINT), &serial_number, &a, &b);
        Ok((serial_number, SerialNumberProof { a, b, z: w - c * k }))
    }

    pub fn verify(&self, coin: &CoinV1, serial_number: &RistrettoPoint) -> bool {
        let opened = coin.public_key() + coin.snd() * BASE_POINT;
        let c = serial_challenge(&opened, serial_number, &self.a, &self.b);
        self.a == self.z * BASE_POINT + c * opened
            && self.b == self.z * serial_number + c * BASE_POINT
    }
}

/// A v1 coin spent in the clear.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConvertedInput {
    pub coin: CoinV1,
    pub serial_number: RistrettoPoint,
    pub proof: SerialNumberProof,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ConversionProof {
    pub inputs: Vec<ConvertedInput>,
    /// Plain v2 outputs; their values are as public as the inputs'.
    pub output_coins: Vec<CoinV2>,
}

/// What a conversion spends and pays.
#[derive(Clone, Debug, Default)]
pub struct ConversionParams {
    pub inputs: Vec<CoinV1>,
    pub payments: Vec<PaymentInfo>,
    pub fee: u64,
    pub info: Vec<u8>,
    pub lock_time: i64,
}

fn sum_values(mut values: impl Iterator<Item = u64>) -> Result<u64, TransactionError> {
    values.try_fold(0u64, |acc, v| acc.checked_add(v).ok_or(TransactionError::Overflow))
}

/// Convert v1 coins owned by `keys` into v2 coins, signed without privacy.
pub fn build_conversion<T: RngCore + CryptoRng>(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    keys: &KeySet,
    params: ConversionParams,
    rng: &mut T,
) -> Result<Transaction, TransactionError> {
    let config = ctx.config();
    if params.inputs.is_empty() {
        return Err(TransactionError::EmptyInputs);
    }
    if params.inputs.len() > config.max_inputs {
        return Err(TransactionError::TooManyInputs {
            given: params.inputs.len(),
            max: config.max_inputs,
        });
    }
    let private_key = keys.private_key()?;
    if params.inputs.iter().any(|c| c.public_key() != keys.public_spend()) {
        return Err(TransactionError::Malformed(
            "conversion inputs must belong to the signer".to_string(),
        ));
    }

    let input_total = sum_values(params.inputs.iter().map(CoinV1::value))?;
    let paid = sum_values(params.payments.iter().map(|p| p.amount))?;
    let spent = paid.checked_add(params.fee).ok_or(TransactionError::Overflow)?;
    let change = input_total
        .checked_sub(spent)
        .ok_or(TransactionError::Unbalanced {
            inputs: input_total,
            outputs: paid,
            fee: params.fee,
        })?;
    let mut payments = params.payments;
    if change > 0 || payments.is_empty() {
        payments.push(PaymentInfo::new(keys.payment_address(), change));
    }
    if payments.len() > config.max_outputs {
        return Err(TransactionError::TooManyOutputs {
            given: payments.len(),
            max: config.max_outputs,
        });
    }

    let estimated_kb = super::estimate_size(&SizeParams::Conversion {
        shape: TxShape {
            num_inputs: params.inputs.len(),
            num_outputs: payments.len(),
            message_len: payments.iter().map(|p| p.message.len()).max().unwrap_or(0),
        },
        input_info_len: params.inputs.iter().map(|c| c.info().len()).max().unwrap_or(0),
        info_len: params.info.len(),
    });
    if estimated_kb > config.max_tx_size_kb {
        return Err(TransactionError::TxTooLarge {
            size_kb: estimated_kb,
            max_kb: config.max_tx_size_kb,
        });
    }

    let mut inputs = Vec::with_capacity(params.inputs.len());
    for coin in params.inputs {
        let (serial_number, proof) = SerialNumberProof::prove(&coin, private_key, rng)?;
        inputs.push(ConvertedInput {
            coin,
            serial_number,
            proof,
        });
    }
    let output_coins = payments
        .iter()
        .enumerate()
        .map(|(i, payment)| {
            derive_ota(ctx, store, payment, &PRV_TOKEN_ID, i as u32, false, rng)
                .map(|(coin, _)| coin)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut core = TransactionCore {
        version: TX_VERSION,
        tx_type: TxType::Conversion,
        lock_time: params.lock_time,
        fee: params.fee,
        info: params.info,
        token_id: PRV_TOKEN_ID,
        sender_shard_byte: keys.public_spend_last_byte(),
        proof: Proof::Conversion(ConversionProof {
            inputs,
            output_coins,
        }),
        sig: vec![],
        sig_pub_key: keys.public_spend().compress().to_bytes().to_vec(),
    };
    core.sig = schnorr_sign(private_key, &core.hash()?)?.to_vec();
    debug!(inputs = input_total, fee = core.fee, "conversion built");
    Ok(Transaction::Conversion(TxConversion { core }))
}

impl TxConversion {
    pub(crate) fn proof(&self) -> Result<&ConversionProof, TransactionError> {
        match &self.core.proof {
            Proof::Conversion(proof) => Ok(proof),
            other => Err(TransactionError::InvalidType(other.name())),
        }
    }

    /// Each v1 input opens its commitment and its serial number is proven.
    pub(crate) fn verify_inputs(&self) -> Result<(), TransactionError> {
        for input in &self.proof()?.inputs {
            if !input.coin.verify_commitment() {
                return Err(TransactionError::CommitmentMismatch);
            }
            if !input.proof.verify(&input.coin, &input.serial_number) {
                return Err(TransactionError::InvalidSignature(
                    "serial number proof".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Signable for TxConversion {
    fn hash(&self) -> Result<[u8; 32], TransactionError> {
        self.core.hash()
    }

    fn verify_sig(
        &self,
        _ctx: &PrivacyContext,
        _store: &dyn StateStore,
    ) -> Result<(), TransactionError> {
        let signer = decompress_point(&self.core.sig_pub_key, "signer public key")?;
        if self
            .converted_inputs()
            .iter()
            .any(|input| *input.coin.public_key() != signer)
        {
            return Err(TransactionError::InvalidSignature(
                "input not owned by the signer".to_string(),
            ));
        }
        if schnorr_verify(&signer, &self.hash()?, &self.core.sig) {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignature("conversion signature".to_string()))
        }
    }
}

impl Convertible for TxConversion {
    fn converted_inputs(&self) -> &[ConvertedInput] {
        self.proof().map(|p| p.inputs.as_slice()).unwrap_or(&[])
    }

    fn verify_conversion_balance(&self) -> Result<(), TransactionError> {
        let proof = self.proof()?;
        let inputs = sum_values(proof.inputs.iter().map(|i| i.coin.value()))?;
        let outputs = sum_values(
            proof
                .output_coins
                .iter()
                .map(|c| c.value().ok_or(TransactionError::CommitmentMismatch))
                .collect::<Result<Vec<_>, _>>()?
                .into_iter(),
        )?;
        match outputs.checked_add(self.core.fee) {
            Some(total) if total == inputs => Ok(()),
            Some(_) => Err(TransactionError::Unbalanced {
                inputs,
                outputs,
                fee: self.core.fee,
            }),
            None => Err(TransactionError::Overflow),
        }
    }
}
