use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::{asset_tag_blinder, token_base, TokenId};
use crate::amount::{
    mask_amount, mask_randomness, open_message, seal_message, unmask_amount, unmask_randomness,
};
use crate::constants::{
    BASE_POINT, BURNING_ADDRESS, COIN_MESSAGE_TAG_SIZE, COIN_VERSION_V2, MAX_COIN_MESSAGE_SIZE,
    RANDOMNESS_BASE,
};
use crate::crypto::{
    canonical_scalar, commit_with_base, decompress_point, key_image_base, one_time_scalar,
    scalar_to_u64,
};
use crate::errors::CoinError;
use crate::keys::{KeySet, OtaKey};
use crate::utils::shard_from_last_byte;

/// Ephemeral public value and output position a recipient needs to rebuild the shared secret.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TxRandom {
    pub point: RistrettoPoint,
    pub index: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Secrets {
    Plain {
        value: u64,
        randomness: Scalar,
        message: Vec<u8>,
        // Sender-side ephemeral scalar, needed once to conceal the coin.
        ephemeral: Option<Scalar>,
    },
    Concealed {
        amount: Scalar,
        mask: Scalar,
        message: Vec<u8>,
    },
}

/// A one-time-address coin.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CoinV2 {
    public_key: RistrettoPoint,
    commitment: RistrettoPoint,
    secrets: Secrets,
    tx_random: TxRandom,
    asset_tag: Option<RistrettoPoint>,
    key_image: Option<RistrettoPoint>,
}

impl CoinV2 {
    pub(crate) fn new_plain(
        public_key: RistrettoPoint,
        value: u64,
        randomness: Scalar,
        message: Vec<u8>,
        tx_random: TxRandom,
        asset_tag: Option<RistrettoPoint>,
        ephemeral: Option<Scalar>,
    ) -> Result<Self, CoinError> {
        if message.len() > MAX_COIN_MESSAGE_SIZE {
            return Err(CoinError::MessageTooLong {
                given: message.len(),
                max: MAX_COIN_MESSAGE_SIZE,
            });
        }
        let base = asset_tag.unwrap_or(BASE_POINT);
        Ok(CoinV2 {
            public_key,
            commitment: commit_with_base(&base, value, &randomness),
            secrets: Secrets::Plain {
                value,
                randomness,
                message,
                ephemeral,
            },
            tx_random,
            asset_tag,
            key_image: None,
        })
    }

    pub fn public_key(&self) -> &RistrettoPoint {
        &self.public_key
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.public_key.compress().to_bytes()
    }

    pub fn commitment(&self) -> &RistrettoPoint {
        &self.commitment
    }

    pub fn tx_random(&self) -> &TxRandom {
        &self.tx_random
    }

    pub fn asset_tag(&self) -> Option<&RistrettoPoint> {
        self.asset_tag.as_ref()
    }

    pub fn key_image(&self) -> Option<&RistrettoPoint> {
        self.key_image.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.secrets, Secrets::Concealed { .. })
    }

    pub fn value(&self) -> Option<u64> {
        match &self.secrets {
            Secrets::Plain { value, .. } => Some(*value),
            Secrets::Concealed { .. } => None,
        }
    }

    pub fn randomness(&self) -> Option<&Scalar> {
        match &self.secrets {
            Secrets::Plain { randomness, .. } => Some(randomness),
            Secrets::Concealed { .. } => None,
        }
    }

    /// Plaintext message of a plain coin, sealed bytes of an encrypted one.
    pub fn message(&self) -> &[u8] {
        match &self.secrets {
            Secrets::Plain { message, .. } | Secrets::Concealed { message, .. } => message,
        }
    }

    pub fn is_burn(&self) -> bool {
        self.public_key == BURNING_ADDRESS.public_spend
    }

    pub fn shard_id(&self, num_shards: u8) -> u8 {
        shard_from_last_byte(self.public_key_bytes()[31], num_shards)
    }

    /// Generator the value is committed over: the asset tag for CA coins, `G` otherwise.
    pub fn value_base(&self) -> RistrettoPoint {
        self.asset_tag.unwrap_or(BASE_POINT)
    }

    /// Hide amount, randomness and message from everybody but the recipient.
    pub fn conceal(self, recipient_view: &RistrettoPoint) -> Result<CoinV2, CoinError> {
        let (value, randomness, message, ephemeral) = match self.secrets {
            Secrets::Plain {
                value,
                randomness,
                message,
                ephemeral,
            } => (value, randomness, message, ephemeral),
            Secrets::Concealed { .. } => return Err(CoinError::AlreadyConcealed),
        };
        let ephemeral = ephemeral.ok_or(CoinError::MissingSharedRandom)?;
        let shared_secret = ephemeral * recipient_view;
        let index = self.tx_random.index;
        let one_time = one_time_scalar(&shared_secret, index);
        Ok(CoinV2 {
            secrets: Secrets::Concealed {
                amount: mask_amount(value, &one_time),
                mask: mask_randomness(&randomness, &one_time),
                message: seal_message(&shared_secret, index, &message)?,
            },
            ..self
        })
    }

    pub fn shared_secret(&self, view_secret: &Scalar) -> RistrettoPoint {
        view_secret * self.tx_random.point
    }

    /// Ownership test. Returns the shared secret when the coin was sent to `ota_key`.
    pub fn is_owned_by(&self, ota_key: &OtaKey) -> Option<RistrettoPoint> {
        let shared_secret = self.shared_secret(ota_key.secret());
        let one_time = one_time_scalar(&shared_secret, self.tx_random.index);
        if one_time * BASE_POINT + ota_key.public_spend() == self.public_key {
            Some(shared_secret)
        } else {
            None
        }
    }

    /// Open an owned coin. The key image is attached when `keys` can spend.
    pub fn decrypt(&self, keys: &KeySet) -> Result<CoinV2, CoinError> {
        let shared_secret = self
            .is_owned_by(&keys.ota_key())
            .ok_or_else(|| CoinError::Decryption("coin is not owned by this key".to_string()))?;
        let index = self.tx_random.index;
        let one_time = one_time_scalar(&shared_secret, index);
        let (value, randomness, message) = match &self.secrets {
            Secrets::Plain {
                value,
                randomness,
                message,
                ..
            } => (*value, *randomness, message.clone()),
            Secrets::Concealed {
                amount,
                mask,
                message,
            } => (
                unmask_amount(amount, &one_time)?,
                unmask_randomness(mask, &one_time),
                open_message(&shared_secret, index, message)?,
            ),
        };
        if commit_with_base(&self.value_base(), value, &randomness) != self.commitment {
            return Err(CoinError::Decryption(
                "commitment does not open to the decrypted amount".to_string(),
            ));
        }
        let key_image = match keys.private_key() {
            Ok(private_key) => {
                Some((one_time + private_key) * key_image_base(&self.public_key))
            }
            Err(_) => self.key_image,
        };
        Ok(CoinV2 {
            public_key: self.public_key,
            commitment: self.commitment,
            secrets: Secrets::Plain {
                value,
                randomness,
                message,
                ephemeral: None,
            },
            tx_random: self.tx_random,
            asset_tag: self.asset_tag,
            key_image,
        })
    }

    /// The coin's spending key `Hs(sharedSecret || index) + privateKey`.
    pub fn private_key(&self, keys: &KeySet) -> Result<Scalar, CoinError> {
        let shared_secret = self
            .is_owned_by(&keys.ota_key())
            .ok_or_else(|| CoinError::Decryption("coin is not owned by this key".to_string()))?;
        Ok(one_time_scalar(&shared_secret, self.tx_random.index) + keys.private_key()?)
    }

    pub fn compute_key_image(&self, keys: &KeySet) -> Result<RistrettoPoint, CoinError> {
        Ok(self.private_key(keys)? * key_image_base(&self.public_key))
    }

    /// Blinder of this coin's asset tag, zero when the tag is the bare token base.
    pub fn asset_blinder(
        &self,
        shared_secret: &RistrettoPoint,
        token_id: &TokenId,
    ) -> Result<Scalar, CoinError> {
        let tag = self.asset_tag.ok_or(CoinError::AssetTagMismatch)?;
        let base = token_base(token_id);
        if tag == base {
            return Ok(Scalar::ZERO);
        }
        let blinder = asset_tag_blinder(shared_secret, self.tx_random.index);
        if base + blinder * *RANDOMNESS_BASE == tag {
            Ok(blinder)
        } else {
            Err(CoinError::AssetTagMismatch)
        }
    }

    /// Whether the coin's asset tag hides `token_id`, given the coin's shared secret.
    pub fn has_token(&self, shared_secret: &RistrettoPoint, token_id: &TokenId) -> bool {
        self.asset_blinder(shared_secret, token_id).is_ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let (amount, mask, message) = match &self.secrets {
            Secrets::Plain {
                value,
                randomness,
                message,
                ..
            } => (Scalar::from(*value), *randomness, message),
            Secrets::Concealed {
                amount,
                mask,
                message,
            } => (*amount, *mask, message),
        };
        let mut bytes = Vec::with_capacity(self.encoded_len());
        bytes.push(COIN_VERSION_V2);
        bytes.extend_from_slice(self.public_key.compress().as_bytes());
        bytes.extend_from_slice(self.commitment.compress().as_bytes());
        bytes.extend_from_slice(amount.as_bytes());
        bytes.extend_from_slice(mask.as_bytes());
        bytes.extend_from_slice(&(message.len() as u16).to_be_bytes());
        bytes.extend_from_slice(message);
        bytes.extend_from_slice(self.tx_random.point.compress().as_bytes());
        bytes.extend_from_slice(&self.tx_random.index.to_be_bytes());
        push_optional_point(&mut bytes, self.asset_tag.as_ref());
        push_optional_point(&mut bytes, self.key_image.as_ref());
        bytes
    }

    pub fn encoded_len(&self) -> usize {
        let optional = |p: Option<&RistrettoPoint>| 1 + p.map_or(0, |_| 32);
        1 + 32 * 4 + 2 + self.message().len() + 32 + 4
            + optional(self.asset_tag.as_ref())
            + optional(self.key_image.as_ref())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoinError> {
        let mut reader = Reader::new(bytes);
        let version = reader.take(1)?[0];
        if version != COIN_VERSION_V2 {
            return Err(CoinError::Encoding(format!("coin version {}", version)));
        }
        let public_key = decompress_point(reader.take(32)?, "coin public key")?;
        let commitment = decompress_point(reader.take(32)?, "coin commitment")?;
        let amount = reader.scalar("coin amount")?;
        let mask = reader.scalar("coin mask")?;
        let message_len = {
            let len = reader.take(2)?;
            u16::from_be_bytes([len[0], len[1]]) as usize
        };
        if message_len > MAX_COIN_MESSAGE_SIZE + COIN_MESSAGE_TAG_SIZE {
            return Err(CoinError::MessageTooLong {
                given: message_len,
                max: MAX_COIN_MESSAGE_SIZE + COIN_MESSAGE_TAG_SIZE,
            });
        }
        let message = reader.take(message_len)?.to_vec();
        let tx_random = TxRandom {
            point: decompress_point(reader.take(32)?, "tx random")?,
            index: {
                let mut index = [0u8; 4];
                index.copy_from_slice(reader.take(4)?);
                u32::from_be_bytes(index)
            },
        };
        let asset_tag = reader.optional_point("asset tag")?;
        let key_image = reader.optional_point("key image")?;
        if !reader.is_empty() {
            return Err(CoinError::Encoding("trailing bytes after coin".to_string()));
        }

        // A blob that opens its own commitment was never concealed.
        let base = asset_tag.unwrap_or(BASE_POINT);
        let secrets = match scalar_to_u64(&amount) {
            Some(value)
                if message.len() <= MAX_COIN_MESSAGE_SIZE
                    && commit_with_base(&base, value, &mask) == commitment =>
            {
                Secrets::Plain {
                    value,
                    randomness: mask,
                    message,
                    ephemeral: None,
                }
            }
            _ => Secrets::Concealed {
                amount,
                mask,
                message,
            },
        };
        Ok(CoinV2 {
            public_key,
            commitment,
            secrets,
            tx_random,
            asset_tag,
            key_image,
        })
    }
}

fn push_optional_point(bytes: &mut Vec<u8>, point: Option<&RistrettoPoint>) {
    match point {
        Some(point) => {
            bytes.push(1);
            bytes.extend_from_slice(point.compress().as_bytes());
        }
        None => bytes.push(0),
    }
}

pub(crate) struct Reader<'a> {
    bytes: &'a [u8],
}

impl<'a> Reader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Reader { bytes }
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], CoinError> {
        if self.bytes.len() < n {
            return Err(CoinError::Encoding(format!(
                "need {} more bytes, {} left",
                n,
                self.bytes.len()
            )));
        }
        let (head, tail) = self.bytes.split_at(n);
        self.bytes = tail;
        Ok(head)
    }

    pub(crate) fn scalar(&mut self, what: &'static str) -> Result<Scalar, CoinError> {
        canonical_scalar(self.take(32)?)
            .ok_or_else(|| CoinError::Encoding(format!("non-canonical {}", what)))
    }

    fn optional_point(&mut self, what: &'static str) -> Result<Option<RistrettoPoint>, CoinError> {
        match self.take(1)?[0] {
            0 => Ok(None),
            1 => Ok(Some(decompress_point(self.take(32)?, what)?)),
            flag => Err(CoinError::Encoding(format!("{} flag {}", what, flag))),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Serialize for CoinV2 {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for CoinV2 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        CoinV2::from_bytes(&bytes).map_err(D::Error::custom)
    }
}
