//! Multilayered linkable spontaneous anonymous group signatures.
//!
//! A ring is an `n × (m + k)` matrix of points. The first `m` columns hold one-time public keys
//! and are linked through key images; the last `k` columns are synthetic balance columns
//! (commitment-to-zero, and the asset-tag difference for confidential assets) signed over the
//! randomness generator `H`. The signer must know the discrete log of every point of one row.
use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;
use rand_core::{CryptoRng, OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use tracing::error;
use zeroize::Zeroize;

use crate::constants::{BASE_POINT, MLSAG_CA_LABEL, MLSAG_LABEL, RANDOMNESS_BASE};
use crate::crypto::{canonical_scalar, decompress_point, is_identity, key_image_base};
use crate::errors::MlsagError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MlsagVariant {
    /// Key columns plus one commitment-to-zero column.
    Plain,
    /// Key columns plus the asset-tag difference and commitment-to-zero columns.
    ConfidentialAsset,
}

impl MlsagVariant {
    pub fn synthetic_columns(self) -> usize {
        match self {
            MlsagVariant::Plain => 1,
            MlsagVariant::ConfidentialAsset => 2,
        }
    }

    fn label(self) -> &'static [u8] {
        match self {
            MlsagVariant::Plain => MLSAG_LABEL,
            MlsagVariant::ConfidentialAsset => MLSAG_CA_LABEL,
        }
    }

    fn prefix(self) -> u8 {
        match self {
            MlsagVariant::Plain => 0,
            MlsagVariant::ConfidentialAsset => 1,
        }
    }

    fn from_prefix(prefix: u8) -> Result<Self, MlsagError> {
        match prefix {
            0 => Ok(MlsagVariant::Plain),
            1 => Ok(MlsagVariant::ConfidentialAsset),
            p => Err(MlsagError::MalformedSignature(format!("variant prefix {}", p))),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ring {
    variant: MlsagVariant,
    rows: Vec<Vec<RistrettoPoint>>,
}

impl Ring {
    pub fn new(variant: MlsagVariant, rows: Vec<Vec<RistrettoPoint>>) -> Result<Self, MlsagError> {
        let cols = rows.first().map_or(0, Vec::len);
        if rows.is_empty() || rows.len() > u8::MAX as usize {
            return Err(MlsagError::MalformedRing(format!("{} rows", rows.len())));
        }
        if cols <= variant.synthetic_columns() || cols > u8::MAX as usize {
            return Err(MlsagError::MalformedRing(format!("{} columns", cols)));
        }
        if let Some(i) = rows.iter().position(|row| row.len() != cols) {
            return Err(MlsagError::MalformedRing(format!(
                "row {} has {} columns, expected {}",
                i,
                rows[i].len(),
                cols
            )));
        }
        Ok(Ring { variant, rows })
    }

    pub fn variant(&self) -> MlsagVariant {
        self.variant
    }

    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    pub fn cols(&self) -> usize {
        self.rows[0].len()
    }

    pub fn key_columns(&self) -> usize {
        self.cols() - self.variant.synthetic_columns()
    }

    pub fn row(&self, i: usize) -> &[RistrettoPoint] {
        &self.rows[i]
    }

    pub fn matrix(&self) -> &[Vec<RistrettoPoint>] {
        &self.rows
    }

    fn base(&self, column: usize) -> RistrettoPoint {
        if column < self.key_columns() {
            BASE_POINT
        } else {
            *RANDOMNESS_BASE
        }
    }
}

fn challenge(
    ring: &Ring,
    message: &[u8],
    row: &[RistrettoPoint],
    l: &[RistrettoPoint],
    r: &[RistrettoPoint],
) -> Scalar {
    let mut hasher = Sha512::new();
    hasher.update(ring.variant.label());
    hasher.update(message);
    for (j, point) in row.iter().enumerate() {
        hasher.update(point.compress().as_bytes());
        hasher.update(l[j].compress().as_bytes());
        if let Some(r) = r.get(j) {
            hasher.update(r.compress().as_bytes());
        }
    }
    Scalar::from_hash(hasher)
}

/// `L` and `R` points of one row given its response scalars and incoming challenge.
fn row_commitments(
    ring: &Ring,
    i: usize,
    responses: &[Scalar],
    c: &Scalar,
    key_images: &[RistrettoPoint],
) -> (Vec<RistrettoPoint>, Vec<RistrettoPoint>) {
    let row = ring.row(i);
    let l = row
        .iter()
        .enumerate()
        .map(|(j, p)| responses[j] * ring.base(j) + c * p)
        .collect();
    let r = key_images
        .iter()
        .enumerate()
        .map(|(j, ki)| responses[j] * key_image_base(&row[j]) + c * ki)
        .collect();
    (l, r)
}

/// A ring together with the real row's private keys, ready to sign.
pub struct Mlsag {
    ring: Ring,
    private_keys: Vec<Scalar>,
    pi: usize,
    key_images: Vec<RistrettoPoint>,
}

impl Mlsag {
    /// Bind keys to a ring. Every key must open its column of row `pi`, synthetic balance
    /// columns included; a mismatch is a construction bug and nothing gets signed.
    pub fn new(ring: Ring, private_keys: Vec<Scalar>, pi: usize) -> Result<Self, MlsagError> {
        if private_keys.len() != ring.cols() {
            return Err(MlsagError::KeyCountMismatch {
                expected: ring.cols(),
                given: private_keys.len(),
            });
        }
        if pi >= ring.rows() {
            return Err(MlsagError::RealIndexOutOfRange {
                pi,
                rows: ring.rows(),
            });
        }
        for (column, (x, point)) in private_keys.iter().zip(ring.row(pi)).enumerate() {
            if x * ring.base(column) != *point {
                error!(
                    column,
                    key_columns = ring.key_columns(),
                    "private key does not open the real row, refusing to sign"
                );
                return Err(MlsagError::BalanceMismatch { column });
            }
        }
        let key_images = ring
            .row(pi)
            .iter()
            .zip(&private_keys)
            .take(ring.key_columns())
            .map(|(p, x)| x * key_image_base(p))
            .collect();
        Ok(Mlsag {
            ring,
            private_keys,
            pi,
            key_images,
        })
    }

    pub fn ring(&self) -> &Ring {
        &self.ring
    }

    pub fn key_images(&self) -> &[RistrettoPoint] {
        &self.key_images
    }

    pub fn sign(&self, message: &[u8]) -> MlsagSignature {
        self.sign_with_rng(message, &mut OsRng)
    }

    pub fn sign_with_rng<T: RngCore + CryptoRng>(
        &self,
        message: &[u8],
        rng: &mut T,
    ) -> MlsagSignature {
        let ring = &self.ring;
        let (n, cols, pi) = (ring.rows(), ring.cols(), self.pi);
        let real_row = ring.row(pi);

        let mut alpha: Vec<Scalar> = (0..cols).map(|_| Scalar::random(rng)).collect();
        let l: Vec<RistrettoPoint> = (0..cols).map(|j| alpha[j] * ring.base(j)).collect();
        let r: Vec<RistrettoPoint> = (0..ring.key_columns())
            .map(|j| alpha[j] * key_image_base(&real_row[j]))
            .collect();

        let mut c = vec![Scalar::ZERO; n];
        let mut responses = vec![vec![Scalar::ZERO; cols]; n];
        c[(pi + 1) % n] = challenge(ring, message, real_row, &l, &r);

        let mut i = (pi + 1) % n;
        while i != pi {
            responses[i] = (0..cols).map(|_| Scalar::random(rng)).collect();
            let (l, r) = row_commitments(ring, i, &responses[i], &c[i], &self.key_images);
            c[(i + 1) % n] = challenge(ring, message, ring.row(i), &l, &r);
            i = (i + 1) % n;
        }
        for j in 0..cols {
            responses[pi][j] = alpha[j] - c[pi] * self.private_keys[j];
        }
        alpha.zeroize();

        MlsagSignature {
            variant: ring.variant,
            c: c[0],
            key_images: self.key_images.clone(),
            responses,
        }
    }
}

impl Drop for Mlsag {
    fn drop(&mut self) {
        self.private_keys.zeroize();
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MlsagSignature {
    variant: MlsagVariant,
    c: Scalar,
    key_images: Vec<RistrettoPoint>,
    responses: Vec<Vec<Scalar>>,
}

impl MlsagSignature {
    pub fn variant(&self) -> MlsagVariant {
        self.variant
    }

    pub fn key_images(&self) -> &[RistrettoPoint] {
        &self.key_images
    }

    /// Key images are carried by the proof; the stored signature leaves them out.
    pub fn without_key_images(&self) -> MlsagSignature {
        MlsagSignature {
            key_images: vec![],
            ..self.clone()
        }
    }

    pub fn with_key_images(self, key_images: Vec<RistrettoPoint>) -> MlsagSignature {
        MlsagSignature { key_images, ..self }
    }

    /// Recompute the challenge chain around `ring`. Never panics.
    pub fn verify(&self, ring: &Ring, message: &[u8]) -> bool {
        if self.variant != ring.variant
            || self.responses.len() != ring.rows()
            || self.responses.iter().any(|row| row.len() != ring.cols())
            || self.key_images.len() != ring.key_columns()
            || self.key_images.iter().any(is_identity)
        {
            return false;
        }
        let mut c = self.c;
        for i in 0..ring.rows() {
            let (l, r) = row_commitments(ring, i, &self.responses[i], &c, &self.key_images);
            c = challenge(ring, message, ring.row(i), &l, &r);
        }
        c == self.c
    }

    /// `prefix | c | kiCount | key images | rows | cols | responses`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let rows = self.responses.len();
        let cols = self.responses.first().map_or(0, Vec::len);
        let mut bytes = Vec::with_capacity(36 + 32 * (self.key_images.len() + rows * cols));
        bytes.push(self.variant.prefix());
        bytes.extend_from_slice(self.c.as_bytes());
        bytes.push(self.key_images.len() as u8);
        for ki in &self.key_images {
            bytes.extend_from_slice(ki.compress().as_bytes());
        }
        bytes.push(rows as u8);
        bytes.push(cols as u8);
        for r in self.responses.iter().flatten() {
            bytes.extend_from_slice(r.as_bytes());
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, MlsagError> {
        let mut cursor = Cursor { bytes, offset: 0 };
        let variant = MlsagVariant::from_prefix(cursor.take(1)?[0])?;
        let c = cursor.scalar()?;
        let ki_count = cursor.take(1)?[0] as usize;
        let mut key_images = Vec::with_capacity(ki_count);
        for _ in 0..ki_count {
            let ki = decompress_point(cursor.take(32)?, "key image")
                .map_err(|e| MlsagError::MalformedSignature(e.to_string()))?;
            key_images.push(ki);
        }
        let dims = cursor.take(2)?;
        let (rows, cols) = (dims[0] as usize, dims[1] as usize);
        if rows == 0 || cols == 0 {
            return Err(MlsagError::MalformedSignature(format!(
                "{}x{} responses",
                rows, cols
            )));
        }
        if cursor.remaining() != rows * cols * 32 {
            return Err(MlsagError::MalformedSignature(format!(
                "{} bytes for {}x{} responses",
                cursor.remaining(),
                rows,
                cols
            )));
        }
        let mut responses = Vec::with_capacity(rows);
        for _ in 0..rows {
            let row = (0..cols)
                .map(|_| cursor.scalar())
                .collect::<Result<Vec<_>, _>>()?;
            responses.push(row);
        }
        Ok(MlsagSignature {
            variant,
            c,
            key_images,
            responses,
        })
    }
}

struct Cursor<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], MlsagError> {
        let slice = self
            .bytes
            .get(self.offset..self.offset + len)
            .ok_or_else(|| {
                MlsagError::MalformedSignature(format!("truncated at byte {}", self.offset))
            })?;
        self.offset += len;
        Ok(slice)
    }

    fn scalar(&mut self) -> Result<Scalar, MlsagError> {
        canonical_scalar(self.take(32)?)
            .ok_or_else(|| MlsagError::MalformedSignature("non-canonical scalar".to_string()))
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }
}

impl Serialize for MlsagSignature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.to_bytes())
    }
}

impl<'de> Deserialize<'de> for MlsagSignature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        MlsagSignature::from_bytes(&bytes).map_err(serde::de::Error::custom)
    }
}
