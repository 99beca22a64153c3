use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::RingError;
use crate::utils::{index_from_be_bytes, index_to_be_bytes};

/// On-chain positions of every ring member, row by row.
///
/// Encoded as `[rows][cols]` followed by `[len][big-endian index]` per cell, indexes written
/// with as few bytes as possible.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SigPubKey {
    indexes: Vec<Vec<u64>>,
}

impl SigPubKey {
    pub fn new(indexes: Vec<Vec<u64>>) -> Result<Self, RingError> {
        let cols = indexes.first().map_or(0, Vec::len);
        if indexes.is_empty() || cols == 0 {
            return Err(RingError::IndexEncoding("empty index matrix".to_string()));
        }
        if indexes.len() > u8::MAX as usize || cols > u8::MAX as usize {
            return Err(RingError::IndexEncoding(format!(
                "{}x{} matrix does not fit the header",
                indexes.len(),
                cols
            )));
        }
        if indexes.iter().any(|row| row.len() != cols) {
            return Err(RingError::IndexEncoding(
                "index matrix is not rectangular".to_string(),
            ));
        }
        Ok(SigPubKey { indexes })
    }

    pub fn rows(&self) -> usize {
        self.indexes.len()
    }

    pub fn cols(&self) -> usize {
        self.indexes[0].len()
    }

    pub fn indexes(&self) -> &[Vec<u64>] {
        &self.indexes
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![self.rows() as u8, self.cols() as u8];
        for index in self.indexes.iter().flatten() {
            let be = index_to_be_bytes(*index);
            bytes.push(be.len() as u8);
            bytes.extend_from_slice(&be);
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, RingError> {
        if bytes.len() < 2 {
            return Err(RingError::IndexEncoding("missing header".to_string()));
        }
        let (rows, cols) = (bytes[0] as usize, bytes[1] as usize);
        let mut offset = 2;
        let mut indexes = Vec::with_capacity(rows);
        for _ in 0..rows {
            let mut row = Vec::with_capacity(cols);
            for _ in 0..cols {
                let len = *bytes
                    .get(offset)
                    .ok_or_else(|| RingError::IndexEncoding("truncated".to_string()))?
                    as usize;
                let be = bytes
                    .get(offset + 1..offset + 1 + len)
                    .ok_or_else(|| RingError::IndexEncoding("truncated".to_string()))?;
                if be.first() == Some(&0) {
                    return Err(RingError::IndexEncoding("non-minimal index".to_string()));
                }
                let index = index_from_be_bytes(be).ok_or_else(|| {
                    RingError::IndexEncoding(format!("index of {} bytes", len))
                })?;
                row.push(index);
                offset += 1 + len;
            }
            indexes.push(row);
        }
        if offset != bytes.len() {
            return Err(RingError::IndexEncoding("trailing bytes".to_string()));
        }
        SigPubKey::new(indexes)
    }
}

impl Serialize for SigPubKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for SigPubKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        SigPubKey::from_bytes(&bytes).map_err(D::Error::custom)
    }
}
