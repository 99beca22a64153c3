use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::v2::Reader;
use crate::constants::{
    BASE_POINT, COIN_VERSION_V1, MAX_COIN_MESSAGE_SIZE, RANDOMNESS_BASE, SND_BASE,
};
use crate::crypto::decompress_point;
use crate::errors::CoinError;
use crate::utils::shard_from_last_byte;

/// Legacy coin owned directly by a long-term public key, fields in the clear.
/// It only appears as the input of a conversion transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinV1 {
    public_key: RistrettoPoint,
    commitment: RistrettoPoint,
    snd: Scalar,
    randomness: Scalar,
    value: u64,
    info: Vec<u8>,
}

fn v1_commitment(value: u64, snd: &Scalar, randomness: &Scalar) -> RistrettoPoint {
    Scalar::from(value) * BASE_POINT + snd * *SND_BASE + randomness * *RANDOMNESS_BASE
}

impl CoinV1 {
    pub fn new<T: RngCore + CryptoRng>(
        owner: &RistrettoPoint,
        value: u64,
        info: Vec<u8>,
        rng: &mut T,
    ) -> Result<Self, CoinError> {
        if info.len() > MAX_COIN_MESSAGE_SIZE {
            return Err(CoinError::MessageTooLong {
                given: info.len(),
                max: MAX_COIN_MESSAGE_SIZE,
            });
        }
        let snd = Scalar::random(rng);
        let randomness = Scalar::random(rng);
        Ok(CoinV1 {
            public_key: *owner,
            commitment: v1_commitment(value, &snd, &randomness),
            snd,
            randomness,
            value,
            info,
        })
    }

    pub fn public_key(&self) -> &RistrettoPoint {
        &self.public_key
    }

    pub fn commitment(&self) -> &RistrettoPoint {
        &self.commitment
    }

    pub fn snd(&self) -> &Scalar {
        &self.snd
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn info(&self) -> &[u8] {
        &self.info
    }

    pub fn shard_id(&self, num_shards: u8) -> u8 {
        shard_from_last_byte(self.public_key.compress().as_bytes()[31], num_shards)
    }

    pub fn verify_commitment(&self) -> bool {
        v1_commitment(self.value, &self.snd, &self.randomness) == self.commitment
    }

    /// `(privateKey + snd)^-1 · G`, the value recorded when the coin is spent.
    pub fn serial_number(&self, private_key: &Scalar) -> Result<RistrettoPoint, CoinError> {
        let sum = private_key + self.snd;
        if sum == Scalar::ZERO {
            return Err(CoinError::Encoding(
                "serial number derivator cancels the key".to_string(),
            ));
        }
        Ok(sum.invert() * BASE_POINT)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(1 + 32 * 4 + 8 + 1 + self.info.len());
        bytes.push(COIN_VERSION_V1);
        bytes.extend_from_slice(self.public_key.compress().as_bytes());
        bytes.extend_from_slice(self.commitment.compress().as_bytes());
        bytes.extend_from_slice(self.snd.as_bytes());
        bytes.extend_from_slice(self.randomness.as_bytes());
        bytes.extend_from_slice(&self.value.to_be_bytes());
        bytes.push(self.info.len() as u8);
        bytes.extend_from_slice(&self.info);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoinError> {
        let mut reader = Reader::new(bytes);
        let version = reader.take(1)?[0];
        if version != COIN_VERSION_V1 {
            return Err(CoinError::Encoding(format!("coin version {}", version)));
        }
        let public_key = decompress_point(reader.take(32)?, "coin public key")?;
        let commitment = decompress_point(reader.take(32)?, "coin commitment")?;
        let snd = reader.scalar("serial number derivator")?;
        let randomness = reader.scalar("coin randomness")?;
        let mut value = [0u8; 8];
        value.copy_from_slice(reader.take(8)?);
        let info_len = reader.take(1)?[0] as usize;
        let info = reader.take(info_len)?.to_vec();
        if !reader.is_empty() {
            return Err(CoinError::Encoding("trailing bytes after coin".to_string()));
        }
        Ok(CoinV1 {
            public_key,
            commitment,
            snd,
            randomness,
            value: u64::from_be_bytes(value),
            info,
        })
    }
}

impl Serialize for CoinV1 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for CoinV1 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        CoinV1::from_bytes(&bytes).map_err(D::Error::custom)
    }
}
