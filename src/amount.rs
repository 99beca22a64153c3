//! Hiding of coin amounts, randomness and messages under a one-time shared secret.
//!
//! Amount and randomness are masked additively with chained hashes of the coin's one-time
//! scalar, so a wrong key unmasks garbage that fails the commitment check. The message is
//! sealed with ChaCha20-Poly1305 and fails loudly on a wrong key or tampering.
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use sha2::{Digest, Sha512};

use crate::constants::COIN_MESSAGE_KEY_LABEL;
use crate::crypto::{hash_to_scalar, scalar_to_u64};
use crate::errors::CoinError;

fn randomness_mask(one_time: &Scalar) -> Scalar {
    hash_to_scalar(&[one_time.as_bytes()])
}

fn amount_mask(one_time: &Scalar) -> Scalar {
    hash_to_scalar(&[randomness_mask(one_time).as_bytes()])
}

pub(crate) fn mask_randomness(randomness: &Scalar, one_time: &Scalar) -> Scalar {
    randomness + randomness_mask(one_time)
}

pub(crate) fn unmask_randomness(masked: &Scalar, one_time: &Scalar) -> Scalar {
    masked - randomness_mask(one_time)
}

pub(crate) fn mask_amount(value: u64, one_time: &Scalar) -> Scalar {
    Scalar::from(value) + amount_mask(one_time)
}

pub(crate) fn unmask_amount(masked: &Scalar, one_time: &Scalar) -> Result<u64, CoinError> {
    scalar_to_u64(&(masked - amount_mask(one_time)))
        .ok_or_else(|| CoinError::Decryption("amount out of range".to_string()))
}

fn message_cipher(shared_secret: &RistrettoPoint, index: u32) -> ChaCha20Poly1305 {
    let digest = Sha512::new()
        .chain_update(COIN_MESSAGE_KEY_LABEL)
        .chain_update(shared_secret.compress().as_bytes())
        .chain_update(index.to_be_bytes())
        .finalize();
    ChaCha20Poly1305::new(Key::from_slice(&digest[..32]))
}

// Every (shared secret, index) pair keys exactly one message, a fixed nonce is sufficient.
const MESSAGE_NONCE: [u8; 12] = [0u8; 12];

pub(crate) fn seal_message(
    shared_secret: &RistrettoPoint,
    index: u32,
    message: &[u8],
) -> Result<Vec<u8>, CoinError> {
    message_cipher(shared_secret, index)
        .encrypt(Nonce::from_slice(&MESSAGE_NONCE), message)
        .map_err(|_| CoinError::Encoding("cannot seal coin message".to_string()))
}

pub(crate) fn open_message(
    shared_secret: &RistrettoPoint,
    index: u32,
    sealed: &[u8],
) -> Result<Vec<u8>, CoinError> {
    message_cipher(shared_secret, index)
        .decrypt(Nonce::from_slice(&MESSAGE_NONCE), sealed)
        .map_err(|_| CoinError::Decryption("message authentication failed".to_string()))
}
