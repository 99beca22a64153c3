use curve25519_dalek::ristretto::RistrettoPoint;

/// Minimal big-endian bytes of an index; zero encodes as no bytes at all.
pub(crate) fn index_to_be_bytes(index: u64) -> Vec<u8> {
    let bytes = index.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    bytes[first..].to_vec()
}

pub(crate) fn index_from_be_bytes(bytes: &[u8]) -> Option<u64> {
    if bytes.len() > 8 {
        return None;
    }
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

/// Shard owning a public key, taken from the key's last byte.
pub(crate) fn shard_from_last_byte(last_byte: u8, num_shards: u8) -> u8 {
    last_byte % num_shards.max(1)
}

pub(crate) fn point_hex(point: &RistrettoPoint) -> String {
    hex::encode(point.compress().as_bytes())
}
