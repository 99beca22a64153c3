pub use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
pub use curve25519_dalek::scalar::Scalar;
pub use schnorrkel::{PublicKey as SchnorrPublicKey, Signature as SchnorrSignature};

use curve25519_dalek::traits::Identity;
use schnorrkel::SecretKey as SchnorrSecretKey;
use sha2::{Digest, Sha512};

use crate::constants::{
    BASE_POINT, KEY_IMAGE_BASE_LABEL, ONE_TIME_ADDRESS_LABEL, PC_GENS, RANDOMNESS_BASE,
    SCHNORR_SIGNING_CONTEXT,
};
use crate::errors::CoinError;

/// Hash an ordered list of byte strings to a scalar.
pub fn hash_to_scalar(parts: &[&[u8]]) -> Scalar {
    let mut hasher = Sha512::new();
    for part in parts {
        hasher.update(part);
    }
    Scalar::from_hash(hasher)
}

pub fn hash_to_point(bytes: &[u8]) -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(bytes)
}

/// `Hp(P)`, the base a key image is computed over.
pub fn key_image_base(public_key: &RistrettoPoint) -> RistrettoPoint {
    let mut input = Vec::with_capacity(KEY_IMAGE_BASE_LABEL.len() + 32);
    input.extend_from_slice(KEY_IMAGE_BASE_LABEL);
    input.extend_from_slice(public_key.compress().as_bytes());
    hash_to_point(&input)
}

/// `Hs(sharedSecret || index)`, the scalar separating a one-time key from the recipient's
/// spend key.
pub fn one_time_scalar(shared_secret: &RistrettoPoint, index: u32) -> Scalar {
    hash_to_scalar(&[
        ONE_TIME_ADDRESS_LABEL,
        shared_secret.compress().as_bytes(),
        &index.to_be_bytes(),
    ])
}

pub fn decompress_point(bytes: &[u8], what: &'static str) -> Result<RistrettoPoint, CoinError> {
    if bytes.len() != 32 {
        return Err(CoinError::InvalidPoint(what));
    }
    CompressedRistretto::from_slice(bytes)
        .ok()
        .and_then(|c| c.decompress())
        .ok_or(CoinError::InvalidPoint(what))
}

pub fn canonical_scalar(bytes: &[u8]) -> Option<Scalar> {
    let array: [u8; 32] = bytes.try_into().ok()?;
    Option::from(Scalar::from_canonical_bytes(array))
}

/// Native Pedersen commitment `v·G + r·H`.
pub fn commit(value: u64, randomness: &Scalar) -> RistrettoPoint {
    PC_GENS.commit(Scalar::from(value), *randomness)
}

/// Commitment over an explicit value generator, an asset tag for CA coins.
pub fn commit_with_base(base: &RistrettoPoint, value: u64, randomness: &Scalar) -> RistrettoPoint {
    Scalar::from(value) * base + randomness * *RANDOMNESS_BASE
}

/// Recover a u64 from a scalar, failing if the scalar is out of range.
pub fn scalar_to_u64(scalar: &Scalar) -> Option<u64> {
    let bytes = scalar.as_bytes();
    if bytes[8..].iter().any(|b| *b != 0) {
        return None;
    }
    let mut low = [0u8; 8];
    low.copy_from_slice(&bytes[..8]);
    Some(u64::from_le_bytes(low))
}

pub fn is_identity(point: &RistrettoPoint) -> bool {
    *point == RistrettoPoint::identity()
}

// Schnorrkel keeps its own key types, the conversion goes through the canonical scalar bytes.
fn to_schnorr_secret_key(secret: &Scalar) -> Result<SchnorrSecretKey, CoinError> {
    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(secret.as_bytes());
    let nonce = Sha512::new()
        .chain_update(SCHNORR_SIGNING_CONTEXT)
        .chain_update(secret.as_bytes())
        .finalize();
    bytes[32..].copy_from_slice(&nonce[..32]);
    SchnorrSecretKey::from_bytes(&bytes).map_err(|e| CoinError::Encoding(e.to_string()))
}

pub fn to_schnorr_public_key(point: &RistrettoPoint) -> SchnorrPublicKey {
    SchnorrPublicKey::from_point(*point)
}

/// Schnorr signature used by the no-privacy paths (conversion and mint).
pub fn schnorr_sign(secret: &Scalar, message: &[u8]) -> Result<[u8; 64], CoinError> {
    let secret_key = to_schnorr_secret_key(secret)?;
    let public_key = to_schnorr_public_key(&(secret * BASE_POINT));
    Ok(secret_key
        .sign_simple(SCHNORR_SIGNING_CONTEXT, message, &public_key)
        .to_bytes())
}

pub fn schnorr_verify(public_key: &RistrettoPoint, message: &[u8], signature: &[u8]) -> bool {
    let signature = match SchnorrSignature::from_bytes(signature) {
        Ok(signature) => signature,
        Err(_) => return false,
    };
    to_schnorr_public_key(public_key)
        .verify_simple(SCHNORR_SIGNING_CONTEXT, message, &signature)
        .is_ok()
}
