use bulletproofs::{BulletproofGens, PedersenGens};
use curve25519_dalek::constants::RISTRETTO_BASEPOINT_POINT;
use curve25519_dalek::ristretto::RistrettoPoint;
use sha2::Sha512;

use crate::coin::TokenId;
use crate::keys::PaymentAddress;

pub(crate) static MERLIN_RANGE_PROOF_LABEL: &[u8] = b"ringct_output_range_proof";
pub(crate) static MERLIN_SERIAL_NUMBER_LABEL: &[u8] = b"ringct_serial_number_proof";
pub(crate) static SCHNORR_SIGNING_CONTEXT: &[u8] = b"ringct_no_privacy_signature";

pub(crate) static ONE_TIME_ADDRESS_LABEL: &[u8] = b"ringct_one_time_address";
pub(crate) static VIEW_KEY_LABEL: &[u8] = b"ringct_view_key";
pub(crate) static ASSET_TAG_BLINDER_LABEL: &[u8] = b"ringct_asset_tag_blinder";
pub(crate) static COIN_MESSAGE_KEY_LABEL: &[u8] = b"ringct_coin_message_key";
pub(crate) static KEY_IMAGE_BASE_LABEL: &[u8] = b"ringct_key_image_base";
pub(crate) static MLSAG_LABEL: &[u8] = b"ringct_mlsag";
pub(crate) static MLSAG_CA_LABEL: &[u8] = b"ringct_mlsag_confidential_asset";

static SND_BASE_HASH_INPUT: &[u8] = b"ringct_serial_number_derivator_base";
static BURNING_SPEND_HASH_INPUT: &[u8] = b"ringct_burning_address_spend";
static BURNING_VIEW_HASH_INPUT: &[u8] = b"ringct_burning_address_view";

/// Generator of one-time public keys and of native coin values.
pub const BASE_POINT: RistrettoPoint = RISTRETTO_BASEPOINT_POINT;

pub const COIN_VERSION_V1: u8 = 1;
pub const COIN_VERSION_V2: u8 = 2;
pub const TX_VERSION: u8 = 2;
/// Leading byte of `Transaction::to_bytes`.
pub const TX_ENCODING_VERSION: u8 = 0;

pub const MAX_COIN_MESSAGE_SIZE: usize = 255;
/// Poly1305 tag appended to a concealed coin message.
pub const COIN_MESSAGE_TAG_SIZE: usize = 16;

pub const RANGE_PROOF_BITS: usize = 64;
pub const MAX_RANGE_PROOF_PARTIES: usize = 32;

/// The native coin.
pub const PRV_TOKEN_ID: TokenId = TokenId::from_last_byte(4);
/// Umbrella bucket holding every confidential-asset coin regardless of its hidden token.
pub const CONFIDENTIAL_ASSET_ID: TokenId = TokenId::from_last_byte(5);

lazy_static! {
    pub static ref PC_GENS: PedersenGens = PedersenGens::default();
    pub static ref BP_GENS: BulletproofGens =
        BulletproofGens::new(RANGE_PROOF_BITS, MAX_RANGE_PROOF_PARTIES);
    /// Generator of commitment randomness and of the MLSAG balance columns.
    pub static ref RANDOMNESS_BASE: RistrettoPoint = PC_GENS.B_blinding;
    pub static ref SND_BASE: RistrettoPoint =
        RistrettoPoint::hash_from_bytes::<Sha512>(SND_BASE_HASH_INPUT);
    pub static ref BURNING_ADDRESS: PaymentAddress = PaymentAddress {
        public_spend: RistrettoPoint::hash_from_bytes::<Sha512>(BURNING_SPEND_HASH_INPUT),
        public_view: RistrettoPoint::hash_from_bytes::<Sha512>(BURNING_VIEW_HASH_INPUT),
    };
}
