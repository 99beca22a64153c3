use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Proof, Signable, Transaction, TransactionCore, TxReward, TxType};
use crate::coin::{derive_ota, token_base, CoinV2, TokenId};
use crate::config::PrivacyContext;
use crate::constants::{BASE_POINT, TX_VERSION};
use crate::crypto::{decompress_point, schnorr_sign, schnorr_verify};
use crate::errors::TransactionError;
use crate::keys::PaymentInfo;
use crate::state::StateStore;

/// A freshly minted plain coin. Token mints carry the bare token base as asset tag.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MintProof {
    pub output: CoinV2,
}

/// Mint `payment.amount` of `token_id`, signed by `minter`.
pub fn build_reward<T: RngCore + CryptoRng>(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    minter: &Scalar,
    payment: &PaymentInfo,
    token_id: &TokenId,
    rng: &mut T,
) -> Result<Transaction, TransactionError> {
    if payment.address.is_burning() {
        return Err(TransactionError::Malformed("minting to the burning address".to_string()));
    }
    let (output, _) = derive_ota(ctx, store, payment, token_id, 0, false, rng)?;
    let minter_key = minter * BASE_POINT;
    let mut core = TransactionCore {
        version: TX_VERSION,
        tx_type: TxType::Reward,
        lock_time: 0,
        fee: 0,
        info: vec![],
        token_id: *token_id,
        sender_shard_byte: minter_key.compress().as_bytes()[31],
        proof: Proof::Mint(MintProof { output }),
        sig: vec![],
        sig_pub_key: minter_key.compress().to_bytes().to_vec(),
    };
    core.sig = schnorr_sign(minter, &core.hash()?)?.to_vec();
    debug!(token = %token_id, amount = payment.amount, "reward minted");
    Ok(Transaction::Reward(TxReward { core }))
}

impl TxReward {
    pub(crate) fn output(&self) -> Result<&CoinV2, TransactionError> {
        match &self.core.proof {
            Proof::Mint(proof) => Ok(&proof.output),
            other => Err(TransactionError::InvalidType(other.name())),
        }
    }

    /// The minted coin is in the clear and tagged for the declared token.
    pub(crate) fn verify_output(&self) -> Result<(), TransactionError> {
        let output = self.output()?;
        if output.is_encrypted() {
            return Err(TransactionError::CommitmentMismatch);
        }
        let expected_tag =
            (!self.core.token_id.is_native()).then(|| token_base(&self.core.token_id));
        if output.asset_tag().copied() != expected_tag {
            return Err(TransactionError::Coin(
                crate::errors::CoinError::AssetTagMismatch,
            ));
        }
        Ok(())
    }
}

impl Signable for TxReward {
    fn hash(&self) -> Result<[u8; 32], TransactionError> {
        self.core.hash()
    }

    fn verify_sig(
        &self,
        _ctx: &PrivacyContext,
        _store: &dyn StateStore,
    ) -> Result<(), TransactionError> {
        let minter = decompress_point(&self.core.sig_pub_key, "minter public key")?;
        if schnorr_verify(&minter, &self.hash()?, &self.core.sig) {
            Ok(())
        } else {
            Err(TransactionError::InvalidSignature("mint signature".to_string()))
        }
    }
}
