//! Transaction assembly: native transfers, confidential-asset token transfers, v1 to v2
//! conversions and reward mints, plus their validation.
//!
//! Every transaction is a [`TransactionCore`] carrying one [`Proof`]. Ring-signed cores store
//! the MLSAG signature without key images (those travel in the proof) and the ring's on-chain
//! indexes in `sig_pub_key`. The no-privacy paths store a Schnorr signature and the signer's
//! public key instead.
use curve25519_dalek::ristretto::RistrettoPoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::coin::{CoinV2, TokenId};
use crate::config::PrivacyContext;
use crate::constants::{CONFIDENTIAL_ASSET_ID, PRV_TOKEN_ID, TX_ENCODING_VERSION};
use crate::errors::TransactionError;
use crate::mlsag::{MlsagSignature, MlsagVariant};
use crate::rangeproof::OutputRangeProof;
use crate::ring::{ReconstructedRing, RingBuilder, RingOutputs, SigPubKey};
use crate::state::StateStore;
use crate::utils::shard_from_last_byte;

mod conversion;
mod reward;
mod size;
mod transfer;
mod validate;

pub use conversion::{
    build_conversion, ConversionParams, ConversionProof, ConvertedInput, SerialNumberProof,
};
pub use reward::{build_reward, MintProof};
pub use size::{estimate_size, estimate_size_bytes, SizeParams, TxShape};
pub use transfer::{TokenTransferBuilder, TransferBuilder, TransferParams};
pub use validate::{
    validate_correctness, validate_sanity, validate_transaction, validate_with_state,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxType {
    Normal,
    Token,
    Conversion,
    Reward,
}

/// Progress of a transaction under construction. Steps must run in this order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxStage {
    Unsized,
    /// Size checked, output coins derived.
    Initialized,
    /// Range proof generated, outputs concealed.
    Proven,
    /// Ring built and MLSAG attached.
    Signed,
    Broadcastable,
}

/// Ring-signed spend: the inputs' key images, the concealed outputs and their range proof.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RingProof {
    pub key_images: Vec<RistrettoPoint>,
    pub output_coins: Vec<CoinV2>,
    pub range_proof: OutputRangeProof,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Proof {
    /// Native coin behind a plain MLSAG.
    Payment(RingProof),
    /// Token coins behind a confidential-asset MLSAG.
    ConfidentialAsset(RingProof),
    Conversion(ConversionProof),
    Mint(MintProof),
}

impl Proof {
    pub fn output_coins(&self) -> &[CoinV2] {
        match self {
            Proof::Payment(p) | Proof::ConfidentialAsset(p) => &p.output_coins,
            Proof::Conversion(p) => &p.output_coins,
            Proof::Mint(p) => std::slice::from_ref(&p.output),
        }
    }

    pub fn ring(&self) -> Option<(MlsagVariant, &RingProof)> {
        match self {
            Proof::Payment(p) => Some((MlsagVariant::Plain, p)),
            Proof::ConfidentialAsset(p) => Some((MlsagVariant::ConfidentialAsset, p)),
            Proof::Conversion(_) | Proof::Mint(_) => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Proof::Payment(_) => "payment",
            Proof::ConfidentialAsset(_) => "confidential asset",
            Proof::Conversion(_) => "conversion",
            Proof::Mint(_) => "mint",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TransactionCore {
    pub version: u8,
    pub tx_type: TxType,
    pub lock_time: i64,
    pub fee: u64,
    pub info: Vec<u8>,
    /// The native id, the umbrella confidential-asset id for blinded token spends, or the
    /// token itself when its outputs are unblinded.
    pub token_id: TokenId,
    /// Last byte of the sender's public spend key.
    pub sender_shard_byte: u8,
    pub proof: Proof,
    pub sig: Vec<u8>,
    pub sig_pub_key: Vec<u8>,
}

// Everything but the signature, in field order.
#[derive(Serialize)]
struct UnsignedCore<'a> {
    version: u8,
    tx_type: TxType,
    lock_time: i64,
    fee: u64,
    info: &'a [u8],
    token_id: &'a TokenId,
    sender_shard_byte: u8,
    proof: &'a Proof,
    sig_pub_key: &'a [u8],
}

fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&hasher.finalize());
    hash
}

impl TransactionCore {
    /// SHA-256 of the bincode encoding with the signature left out.
    pub fn hash(&self) -> Result<[u8; 32], TransactionError> {
        let unsigned = UnsignedCore {
            version: self.version,
            tx_type: self.tx_type,
            lock_time: self.lock_time,
            fee: self.fee,
            info: &self.info,
            token_id: &self.token_id,
            sender_shard_byte: self.sender_shard_byte,
            proof: &self.proof,
            sig_pub_key: &self.sig_pub_key,
        };
        Ok(sha256(&[&bincode::serialize(&unsigned)?]))
    }

    pub fn sender_shard(&self, num_shards: u8) -> u8 {
        shard_from_last_byte(self.sender_shard_byte, num_shards)
    }

    /// Store bucket of the coins this core creates and spends.
    pub fn bucket(&self) -> TokenId {
        match self.proof {
            Proof::Payment(_) | Proof::Conversion(_) => PRV_TOKEN_ID,
            Proof::ConfidentialAsset(_) => CONFIDENTIAL_ASSET_ID,
            Proof::Mint(_) => self.token_id.bucket(),
        }
    }

    /// Whether this core spends a token with its outputs' asset tags left unblinded.
    pub fn is_non_private_token(&self) -> bool {
        matches!(self.proof, Proof::ConfidentialAsset(_)) && self.token_id != CONFIDENTIAL_ASSET_ID
    }
}

/// Capability of every transaction: a signing hash and a signature over it.
pub trait Signable {
    fn hash(&self) -> Result<[u8; 32], TransactionError>;

    fn verify_sig(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
    ) -> Result<(), TransactionError>;
}

/// Capability of ring-signed transactions.
pub trait RingProvable {
    fn key_images(&self) -> &[RistrettoPoint];

    fn reconstruct_ring(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
    ) -> Result<ReconstructedRing, TransactionError>;
}

/// Capability of transactions spending v1 coins into v2 ones.
pub trait Convertible {
    fn converted_inputs(&self) -> &[ConvertedInput];

    fn verify_conversion_balance(&self) -> Result<(), TransactionError>;
}

/// A ring-signed transaction core: a native transfer, or one half of a token transfer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxVer2 {
    pub core: TransactionCore,
}

impl TxVer2 {
    pub(crate) fn ring_proof(&self) -> Result<(MlsagVariant, &RingProof), TransactionError> {
        self.core
            .proof
            .ring()
            .ok_or(TransactionError::InvalidType(self.core.proof.name()))
    }

    /// Check the stored MLSAG over `message` and hand back the ring it was checked against.
    pub(crate) fn verify_ring_sig(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
        message: &[u8],
    ) -> Result<ReconstructedRing, TransactionError> {
        let (_, proof) = self.ring_proof()?;
        let ring = self.reconstruct_ring(ctx, store)?;
        let signature =
            MlsagSignature::from_bytes(&self.core.sig)?.with_key_images(proof.key_images.clone());
        if signature.verify(&ring.ring, message) {
            Ok(ring)
        } else {
            Err(TransactionError::RingSignatureRejected)
        }
    }
}

impl Signable for TxVer2 {
    fn hash(&self) -> Result<[u8; 32], TransactionError> {
        self.core.hash()
    }

    fn verify_sig(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
    ) -> Result<(), TransactionError> {
        self.verify_ring_sig(ctx, store, &self.hash()?).map(|_| ())
    }
}

impl RingProvable for TxVer2 {
    fn key_images(&self) -> &[RistrettoPoint] {
        self.core
            .proof
            .ring()
            .map(|(_, p)| p.key_images.as_slice())
            .unwrap_or(&[])
    }

    fn reconstruct_ring(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
    ) -> Result<ReconstructedRing, TransactionError> {
        let (variant, proof) = self.ring_proof()?;
        let sig_pub_key = SigPubKey::from_bytes(&self.core.sig_pub_key)?;
        let outputs = RingOutputs::from_coins(&proof.output_coins, self.core.fee);
        let shard = self.core.sender_shard(ctx.config().num_shards);
        Ok(RingBuilder::new(ctx, store).reconstruct_ring(variant, shard, &sig_pub_key, &outputs)?)
    }
}

/// Token transfer: a native transaction paying the fee and a token transaction moving the
/// asset, both signing `SHA-256(fee_tx hash || token_tx hash)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxToken {
    pub fee_tx: TxVer2,
    pub token_tx: TxVer2,
}

pub(crate) fn token_message(fee_hash: &[u8; 32], token_hash: &[u8; 32]) -> [u8; 32] {
    sha256(&[fee_hash, token_hash])
}

impl TxToken {
    /// Verify both signatures and return the token half's ring.
    pub(crate) fn verify_ring_sigs(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
    ) -> Result<ReconstructedRing, TransactionError> {
        let message = self.hash()?;
        self.fee_tx.verify_ring_sig(ctx, store, &message)?;
        self.token_tx.verify_ring_sig(ctx, store, &message)
    }
}

impl Signable for TxToken {
    fn hash(&self) -> Result<[u8; 32], TransactionError> {
        Ok(token_message(&self.fee_tx.hash()?, &self.token_tx.hash()?))
    }

    fn verify_sig(
        &self,
        ctx: &PrivacyContext,
        store: &dyn StateStore,
    ) -> Result<(), TransactionError> {
        self.verify_ring_sigs(ctx, store).map(|_| ())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxConversion {
    pub core: TransactionCore,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TxReward {
    pub core: TransactionCore,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Transaction {
    Normal(TxVer2),
    Token(TxToken),
    Conversion(TxConversion),
    Reward(TxReward),
}

/// A key image or v1 serial number consumed by a transaction, with where it is recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SpentSerial {
    pub bucket: TokenId,
    pub shard_id: u8,
    pub serial: [u8; 32],
}

impl Transaction {
    pub fn tx_type(&self) -> TxType {
        match self {
            Transaction::Normal(_) => TxType::Normal,
            Transaction::Token(_) => TxType::Token,
            Transaction::Conversion(_) => TxType::Conversion,
            Transaction::Reward(_) => TxType::Reward,
        }
    }

    pub fn hash(&self) -> Result<[u8; 32], TransactionError> {
        match self {
            Transaction::Normal(tx) => tx.hash(),
            Transaction::Token(tx) => tx.hash(),
            Transaction::Conversion(tx) => tx.core.hash(),
            Transaction::Reward(tx) => tx.core.hash(),
        }
    }

    pub fn cores(&self) -> Vec<&TransactionCore> {
        match self {
            Transaction::Normal(tx) => vec![&tx.core],
            Transaction::Token(tx) => vec![&tx.fee_tx.core, &tx.token_tx.core],
            Transaction::Conversion(tx) => vec![&tx.core],
            Transaction::Reward(tx) => vec![&tx.core],
        }
    }

    /// Native fee, paid by the fee half of a token transfer.
    pub fn fee(&self) -> u64 {
        match self {
            Transaction::Token(tx) => tx.fee_tx.core.fee,
            _ => self.cores()[0].fee,
        }
    }

    /// Output coins with the bucket each is stored under.
    pub fn output_coins(&self) -> Vec<(TokenId, &CoinV2)> {
        self.cores()
            .into_iter()
            .flat_map(|core| {
                let bucket = core.bucket();
                core.proof.output_coins().iter().map(move |coin| (bucket, coin))
            })
            .collect()
    }

    /// Key images of ring spends and serial numbers of converted v1 coins.
    pub fn spent_serials(&self, num_shards: u8) -> Vec<SpentSerial> {
        let mut serials = vec![];
        for core in self.cores() {
            match &core.proof {
                Proof::Payment(p) | Proof::ConfidentialAsset(p) => {
                    let shard_id = core.sender_shard(num_shards);
                    serials.extend(p.key_images.iter().map(|ki| SpentSerial {
                        bucket: core.bucket(),
                        shard_id,
                        serial: ki.compress().to_bytes(),
                    }));
                }
                Proof::Conversion(p) => {
                    serials.extend(p.inputs.iter().map(|input| SpentSerial {
                        bucket: PRV_TOKEN_ID,
                        shard_id: input.coin.shard_id(num_shards),
                        serial: input.serial_number.compress().to_bytes(),
                    }));
                }
                Proof::Mint(_) => {}
            }
        }
        serials
    }

    /// Token registered by this transaction, for token mints.
    pub fn minted_token(&self) -> Option<TokenId> {
        match self {
            Transaction::Reward(tx) if !tx.core.token_id.is_native() => Some(tx.core.token_id),
            _ => None,
        }
    }

    /// Encoding version byte followed by the bincode encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, TransactionError> {
        let encoded = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(encoded.len() + 1);
        bytes.push(TX_ENCODING_VERSION);
        bytes.extend_from_slice(&encoded);
        Ok(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TransactionError> {
        match bytes.split_first() {
            None => Err(TransactionError::Serialization("empty transaction".to_string())),
            Some((&TX_ENCODING_VERSION, encoded)) => Ok(bincode::deserialize(encoded)?),
            Some((version, _)) => Err(TransactionError::InvalidVersion(*version)),
        }
    }

    /// Encoded size rounded up to whole kilobytes.
    pub fn size_kb(&self) -> Result<u64, TransactionError> {
        Ok((self.to_bytes()?.len() as u64 + 1023) / 1024)
    }
}

mod tests;
