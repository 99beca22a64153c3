use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::constants::{BASE_POINT, BURNING_ADDRESS, VIEW_KEY_LABEL};
use crate::crypto::{canonical_scalar, decompress_point, hash_to_scalar};
use crate::errors::CoinError;
use crate::utils::shard_from_last_byte;

/// Public half of a wallet: where coins are sent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentAddress {
    pub public_spend: RistrettoPoint,
    pub public_view: RistrettoPoint,
}

impl PaymentAddress {
    pub fn to_bytes(&self) -> [u8; 64] {
        let mut bytes = [0u8; 64];
        bytes[..32].copy_from_slice(self.public_spend.compress().as_bytes());
        bytes[32..].copy_from_slice(self.public_view.compress().as_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoinError> {
        if bytes.len() != 64 {
            return Err(CoinError::Encoding(format!(
                "payment address of {} bytes",
                bytes.len()
            )));
        }
        Ok(PaymentAddress {
            public_spend: decompress_point(&bytes[..32], "public spend key")?,
            public_view: decompress_point(&bytes[32..], "public view key")?,
        })
    }

    pub fn is_burning(&self) -> bool {
        self.public_spend == BURNING_ADDRESS.public_spend
    }

    pub fn shard_id(&self, num_shards: u8) -> u8 {
        shard_from_last_byte(self.public_spend.compress().as_bytes()[31], num_shards)
    }
}

/// Key pair that detects and opens a wallet's coins without being able to spend them.
///
/// Its raw form is the 64-byte `secret || public_spend` record the coin indexer persists.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct OtaKey {
    secret: Scalar,
    public_spend: RistrettoPoint,
}

impl OtaKey {
    pub fn new(secret: Scalar, public_spend: RistrettoPoint) -> Self {
        OtaKey {
            secret,
            public_spend,
        }
    }

    pub fn secret(&self) -> &Scalar {
        &self.secret
    }

    pub fn public_spend(&self) -> &RistrettoPoint {
        &self.public_spend
    }

    pub fn to_raw(&self) -> [u8; 64] {
        let mut raw = [0u8; 64];
        raw[..32].copy_from_slice(self.secret.as_bytes());
        raw[32..].copy_from_slice(self.public_spend.compress().as_bytes());
        raw
    }

    pub fn from_raw(raw: &[u8]) -> Result<Self, CoinError> {
        if raw.len() != 64 {
            return Err(CoinError::Encoding(format!("OTA key of {} bytes", raw.len())));
        }
        let secret = canonical_scalar(&raw[..32])
            .ok_or_else(|| CoinError::Encoding("non-canonical OTA secret".to_string()))?;
        Ok(OtaKey {
            secret,
            public_spend: decompress_point(&raw[32..], "OTA public spend")?,
        })
    }

    pub fn shard_id(&self, num_shards: u8) -> u8 {
        shard_from_last_byte(self.public_spend.compress().as_bytes()[31], num_shards)
    }
}

impl std::fmt::Debug for OtaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtaKey")
            .field("public_spend", &hex::encode(self.public_spend.compress().as_bytes()))
            .finish()
    }
}

/// Everything a wallet knows about its own keys. A view-only key set has no spend secret.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KeySet {
    private_key: Option<Scalar>,
    view_secret: Scalar,
    public_spend: RistrettoPoint,
    public_view: RistrettoPoint,
}

impl KeySet {
    pub fn random<T: RngCore + CryptoRng>(rng: &mut T) -> Self {
        Self::from_private_key(Scalar::random(rng))
    }

    pub fn from_private_key(private_key: Scalar) -> Self {
        let view_secret = hash_to_scalar(&[VIEW_KEY_LABEL, private_key.as_bytes()]);
        KeySet {
            private_key: Some(private_key),
            view_secret,
            public_spend: private_key * BASE_POINT,
            public_view: view_secret * BASE_POINT,
        }
    }

    pub fn view_only(ota_key: &OtaKey) -> Self {
        KeySet {
            private_key: None,
            view_secret: *ota_key.secret(),
            public_spend: *ota_key.public_spend(),
            public_view: ota_key.secret() * BASE_POINT,
        }
    }

    pub fn private_key(&self) -> Result<&Scalar, CoinError> {
        self.private_key.as_ref().ok_or(CoinError::MissingSpendKey)
    }

    pub fn view_secret(&self) -> &Scalar {
        &self.view_secret
    }

    pub fn public_spend(&self) -> &RistrettoPoint {
        &self.public_spend
    }

    pub fn payment_address(&self) -> PaymentAddress {
        PaymentAddress {
            public_spend: self.public_spend,
            public_view: self.public_view,
        }
    }

    pub fn ota_key(&self) -> OtaKey {
        OtaKey::new(self.view_secret, self.public_spend)
    }

    pub fn shard_id(&self, num_shards: u8) -> u8 {
        self.payment_address().shard_id(num_shards)
    }

    pub(crate) fn public_spend_last_byte(&self) -> u8 {
        self.public_spend.compress().as_bytes()[31]
    }
}

/// One requested output of a transaction.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentInfo {
    pub address: PaymentAddress,
    pub amount: u64,
    pub message: Vec<u8>,
}

impl PaymentInfo {
    pub fn new(address: PaymentAddress, amount: u64) -> Self {
        PaymentInfo {
            address,
            amount,
            message: vec![],
        }
    }

    pub fn with_message(mut self, message: Vec<u8>) -> Self {
        self.message = message;
        self
    }

    pub fn burn(amount: u64) -> Self {
        PaymentInfo::new(*BURNING_ADDRESS, amount)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_chacha::ChaCha20Rng;
    use rand_core::SeedableRng;

    #[quickcheck]
    fn ota_key_raw_form_should_be_stable(seed: u64) -> bool {
        let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(seed);
        let keys = KeySet::random(&mut csprng);
        let raw = keys.ota_key().to_raw();
        OtaKey::from_raw(&raw).map(|k| k.to_raw() == raw).unwrap_or(false)
    }

    #[quickcheck]
    fn view_only_keys_should_share_the_payment_address(seed: u64) -> bool {
        let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(seed);
        let keys = KeySet::random(&mut csprng);
        let view_only = KeySet::view_only(&keys.ota_key());
        view_only.payment_address() == keys.payment_address() && view_only.private_key().is_err()
    }

    #[test]
    fn burning_address_should_be_recognized() {
        assert!(PaymentInfo::burn(10).address.is_burning());
        let mut csprng: ChaCha20Rng = SeedableRng::seed_from_u64(1);
        assert!(!KeySet::random(&mut csprng).payment_address().is_burning());
    }
}
