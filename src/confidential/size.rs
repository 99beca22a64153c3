//! Closed-form transaction sizes, computed from the bincode layout without building anything.
//!
//! Ring index widths are assumed at four bytes each, so estimates sit slightly above the real
//! encoding for young chains.
use crate::constants::{COIN_MESSAGE_TAG_SIZE, RANGE_PROOF_BITS};

const LEN_PREFIX: usize = 8;
const ENUM_TAG: usize = 4;
const POINT: usize = 32;
const ESTIMATED_INDEX_BYTES: usize = 4;
const SCHNORR_SIGNATURE: usize = 64;

/// Inputs, outputs and the longest output message of one transaction core.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxShape {
    pub num_inputs: usize,
    pub num_outputs: usize,
    pub message_len: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SizeParams {
    /// Native transfer behind a ring.
    Transfer {
        shape: TxShape,
        ring_size: usize,
        info_len: usize,
    },
    /// Native fee half plus confidential-asset token half.
    Token {
        fee: TxShape,
        token: TxShape,
        ring_size: usize,
        info_len: usize,
    },
    /// v1 inputs in the clear, no ring.
    Conversion {
        shape: TxShape,
        input_info_len: usize,
        info_len: usize,
    },
    Reward {
        message_len: usize,
        token: bool,
    },
}

impl SizeParams {
    pub fn has_privacy(&self) -> bool {
        matches!(self, SizeParams::Transfer { .. } | SizeParams::Token { .. })
    }
}

// version, tx type, lock time, fee, token id, shard byte, proof tag and the length prefixes
// of info, sig and sig_pub_key.
fn core_len(info_len: usize, proof_len: usize, sig_len: usize, sig_pub_key_len: usize) -> usize {
    1 + ENUM_TAG + 8 + 8 + 32 + 1 + ENUM_TAG + 3 * LEN_PREFIX
        + info_len
        + proof_len
        + sig_len
        + sig_pub_key_len
}

fn range_proof_len(parties: usize) -> usize {
    let lg_n = (RANGE_PROOF_BITS * parties.max(1).next_power_of_two()).trailing_zeros() as usize;
    LEN_PREFIX + 7 * POINT + 2 * POINT * lg_n + 2 * POINT
}

fn coin_len(message_len: usize, asset_tag: bool) -> usize {
    let tag = if asset_tag { 1 + POINT } else { 1 };
    LEN_PREFIX + 1 + 4 * POINT + 2 + message_len + POINT + 4 + tag + 1
}

fn ring_core_len(shape: &TxShape, ring_size: usize, confidential: bool, info_len: usize) -> usize {
    let synthetic = if confidential { 2 } else { 1 };
    let cols = shape.num_inputs + synthetic;
    let key_images = LEN_PREFIX + POINT * shape.num_inputs;
    let outputs = LEN_PREFIX
        + shape.num_outputs * coin_len(shape.message_len + COIN_MESSAGE_TAG_SIZE, confidential);
    let range_proof = ENUM_TAG
        + if confidential {
            LEN_PREFIX + shape.num_outputs * range_proof_len(1)
        } else {
            range_proof_len(shape.num_outputs)
        };
    let signature = 1 + POINT + 1 + 2 + POINT * ring_size * cols;
    let sig_pub_key = 2 + ring_size * shape.num_inputs * (1 + ESTIMATED_INDEX_BYTES);
    core_len(info_len, key_images + outputs + range_proof, signature, sig_pub_key)
}

/// Estimated encoded size in bytes, encoding version byte included.
pub fn estimate_size_bytes(params: &SizeParams) -> usize {
    let body = match params {
        SizeParams::Transfer {
            shape,
            ring_size,
            info_len,
        } => ring_core_len(shape, *ring_size, false, *info_len),
        SizeParams::Token {
            fee,
            token,
            ring_size,
            info_len,
        } => {
            ring_core_len(fee, *ring_size, false, 0)
                + ring_core_len(token, *ring_size, true, *info_len)
        }
        SizeParams::Conversion {
            shape,
            input_info_len,
            info_len,
        } => {
            let input = LEN_PREFIX + 1 + 4 * POINT + 8 + 1 + input_info_len + POINT + 3 * POINT;
            let proof = LEN_PREFIX
                + shape.num_inputs * input
                + LEN_PREFIX
                + shape.num_outputs * coin_len(shape.message_len, false);
            core_len(*info_len, proof, SCHNORR_SIGNATURE, POINT)
        }
        SizeParams::Reward { message_len, token } => {
            core_len(0, coin_len(*message_len, *token), SCHNORR_SIGNATURE, POINT)
        }
    };
    1 + ENUM_TAG + body
}

/// Estimated size rounded up to whole kilobytes.
pub fn estimate_size(params: &SizeParams) -> u64 {
    (estimate_size_bytes(params) as u64 + 1023) / 1024
}
