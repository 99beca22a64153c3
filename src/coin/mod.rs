use std::fmt;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, RngCore};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::{trace, warn};

use crate::config::PrivacyContext;
use crate::constants::{
    ASSET_TAG_BLINDER_LABEL, BASE_POINT, CONFIDENTIAL_ASSET_ID, COIN_VERSION_V1, COIN_VERSION_V2,
    PRV_TOKEN_ID, RANDOMNESS_BASE,
};
use crate::crypto::{hash_to_point, hash_to_scalar, one_time_scalar};
use crate::errors::CoinError;
use crate::keys::PaymentInfo;
use crate::state::StateStore;
use crate::utils::shard_from_last_byte;

mod v1;
mod v2;

pub use v1::CoinV1;
pub use v2::{CoinV2, TxRandom};

// Attempts at landing a one-time key in the recipient's shard before giving up.
const MAX_SHARD_SEARCH: usize = 1024;

/// 32-byte token identifier.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct TokenId(pub [u8; 32]);

impl TokenId {
    pub const fn from_last_byte(byte: u8) -> Self {
        let mut id = [0u8; 32];
        id[31] = byte;
        TokenId(id)
    }

    pub fn from_hex(s: &str) -> Result<Self, CoinError> {
        let bytes = hex::decode(s).map_err(|e| CoinError::Encoding(e.to_string()))?;
        let id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| CoinError::Encoding("token id must be 32 bytes".to_string()))?;
        Ok(TokenId(id))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn is_native(&self) -> bool {
        *self == PRV_TOKEN_ID
    }

    /// Store bucket holding coins of this token: native coins apart, every other token
    /// under the confidential-asset umbrella.
    pub fn bucket(&self) -> TokenId {
        if self.is_native() {
            PRV_TOKEN_ID
        } else {
            CONFIDENTIAL_ASSET_ID
        }
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({})", hex::encode(self.0))
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&hex::encode(self.0))
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            TokenId::from_hex(&s).map_err(D::Error::custom)
        } else {
            <[u8; 32]>::deserialize(deserializer).map(TokenId)
        }
    }
}

/// The unblinded asset tag `Hp(tokenID)`.
pub fn token_base(token_id: &TokenId) -> RistrettoPoint {
    hash_to_point(token_id.as_bytes())
}

pub fn asset_tag_blinder(shared_secret: &RistrettoPoint, index: u32) -> Scalar {
    hash_to_scalar(&[
        ASSET_TAG_BLINDER_LABEL,
        shared_secret.compress().as_bytes(),
        &index.to_be_bytes(),
    ])
}

/// Either coin version, as read back from the state store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Coin {
    V1(CoinV1),
    V2(CoinV2),
}

impl Coin {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoinError> {
        match bytes.first() {
            Some(&COIN_VERSION_V1) => CoinV1::from_bytes(bytes).map(Coin::V1),
            Some(&COIN_VERSION_V2) => CoinV2::from_bytes(bytes).map(Coin::V2),
            Some(version) => Err(CoinError::Encoding(format!("coin version {}", version))),
            None => Err(CoinError::Encoding("empty coin".to_string())),
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Coin::V1(coin) => coin.to_bytes(),
            Coin::V2(coin) => coin.to_bytes(),
        }
    }

    pub fn version(&self) -> u8 {
        match self {
            Coin::V1(_) => COIN_VERSION_V1,
            Coin::V2(_) => COIN_VERSION_V2,
        }
    }

    pub fn public_key(&self) -> &RistrettoPoint {
        match self {
            Coin::V1(coin) => coin.public_key(),
            Coin::V2(coin) => coin.public_key(),
        }
    }

    pub fn commitment(&self) -> &RistrettoPoint {
        match self {
            Coin::V1(coin) => coin.commitment(),
            Coin::V2(coin) => coin.commitment(),
        }
    }

    pub fn value(&self) -> Option<u64> {
        match self {
            Coin::V1(coin) => Some(coin.value()),
            Coin::V2(coin) => coin.value(),
        }
    }

    pub fn is_burn(&self) -> bool {
        match self {
            Coin::V1(_) => false,
            Coin::V2(coin) => coin.is_burn(),
        }
    }

    pub fn shard_id(&self, num_shards: u8) -> u8 {
        match self {
            Coin::V1(coin) => coin.shard_id(num_shards),
            Coin::V2(coin) => coin.shard_id(num_shards),
        }
    }

    pub fn into_v2(self) -> Result<CoinV2, CoinError> {
        match self {
            Coin::V2(coin) => Ok(coin),
            Coin::V1(_) => Err(CoinError::Encoding("expected a version 2 coin".to_string())),
        }
    }
}

/// What the sender keeps about an output it created.
#[derive(Clone, Copy, Debug)]
pub struct SharedSecret {
    pub point: RistrettoPoint,
    pub index: u32,
    /// Blinder of the output's asset tag, zero when the tag is unblinded or absent.
    pub asset_blinder: Scalar,
}

/// Derive a fresh plain coin paying `payment`, the `index`-th output of its transaction.
///
/// The one-time key lands in the recipient's shard and is unused on chain; a token coin
/// gets an asset tag, blinded when `blind_asset` is set. Burn payments keep the burning
/// key itself and an unblinded tag.
pub fn derive_ota<T: RngCore + CryptoRng>(
    ctx: &PrivacyContext,
    store: &dyn StateStore,
    payment: &PaymentInfo,
    token_id: &TokenId,
    index: u32,
    blind_asset: bool,
    rng: &mut T,
) -> Result<(CoinV2, SharedSecret), CoinError> {
    let address = &payment.address;
    let randomness = Scalar::random(rng);
    let bucket = token_id.bucket();

    if address.is_burning() {
        let ephemeral = Scalar::random(rng);
        let shared_secret = ephemeral * address.public_view;
        let asset_tag = (!token_id.is_native()).then(|| token_base(token_id));
        let coin = CoinV2::new_plain(
            address.public_spend,
            payment.amount,
            randomness,
            payment.message.clone(),
            TxRandom {
                point: ephemeral * BASE_POINT,
                index,
            },
            asset_tag,
            Some(ephemeral),
        )?;
        return Ok((
            coin,
            SharedSecret {
                point: shared_secret,
                index,
                asset_blinder: Scalar::ZERO,
            },
        ));
    }

    let num_shards = ctx.config().num_shards;
    let target_shard = address.shard_id(num_shards);
    let max_tries = ctx.config().max_ota_tries;
    for attempt in 0..max_tries {
        let (ephemeral, public_key, shared_secret) = {
            let mut found = None;
            for _ in 0..MAX_SHARD_SEARCH {
                let ephemeral = Scalar::random(rng);
                let shared_secret = ephemeral * address.public_view;
                let public_key =
                    one_time_scalar(&shared_secret, index) * BASE_POINT + address.public_spend;
                let last_byte = public_key.compress().as_bytes()[31];
                if shard_from_last_byte(last_byte, num_shards) == target_shard {
                    found = Some((ephemeral, public_key, shared_secret));
                    break;
                }
            }
            found.ok_or(CoinError::OtaCollision(MAX_SHARD_SEARCH))?
        };
        if store.has_onetime_address(&bucket, &public_key.compress().to_bytes())? {
            warn!(attempt, token = %token_id, "derived one-time address already on chain");
            continue;
        }

        let asset_blinder = if !token_id.is_native() && blind_asset {
            asset_tag_blinder(&shared_secret, index)
        } else {
            Scalar::ZERO
        };
        let asset_tag = (!token_id.is_native())
            .then(|| token_base(token_id) + asset_blinder * *RANDOMNESS_BASE);
        let coin = CoinV2::new_plain(
            public_key,
            payment.amount,
            randomness,
            payment.message.clone(),
            TxRandom {
                point: ephemeral * BASE_POINT,
                index,
            },
            asset_tag,
            Some(ephemeral),
        )?;
        trace!(attempt, index, shard = target_shard, "derived one-time address");
        return Ok((
            coin,
            SharedSecret {
                point: shared_secret,
                index,
                asset_blinder,
            },
        ));
    }
    Err(CoinError::OtaCollision(max_tries))
}
