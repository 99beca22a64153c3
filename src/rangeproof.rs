//! 64-bit Bulletproofs range proofs over output commitments.
//!
//! Native outputs share one aggregated proof, padded with identity commitments to a power of
//! two. Confidential-asset outputs are committed over their own asset tag, so each gets its
//! own proof with that tag as the value generator.
use bulletproofs::{PedersenGens, RangeProof};
use curve25519_dalek::ristretto::{CompressedRistretto, RistrettoPoint};
use curve25519_dalek::scalar::Scalar;
use curve25519_dalek::traits::Identity;
use merlin::Transcript;
use rand_core::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::constants::{
    BP_GENS, MAX_RANGE_PROOF_PARTIES, MERLIN_RANGE_PROOF_LABEL, PC_GENS, RANDOMNESS_BASE,
    RANGE_PROOF_BITS,
};
use crate::errors::RangeProofError;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum OutputRangeProof {
    Aggregated(RangeProof),
    PerOutput(Vec<RangeProof>),
}

fn check_count(count: usize) -> Result<(), RangeProofError> {
    if count == 0 {
        return Err(RangeProofError::Empty);
    }
    if count > MAX_RANGE_PROOF_PARTIES {
        return Err(RangeProofError::TooManyOutputs {
            given: count,
            max: MAX_RANGE_PROOF_PARTIES,
        });
    }
    Ok(())
}

fn asset_gens(asset_tag: &RistrettoPoint) -> PedersenGens {
    PedersenGens {
        B: *asset_tag,
        B_blinding: *RANDOMNESS_BASE,
    }
}

/// One aggregated proof for native outputs committed as `v·G + r·H`.
pub fn prove_native<T: RngCore + CryptoRng>(
    values: &[u64],
    blindings: &[Scalar],
    rng: &mut T,
) -> Result<OutputRangeProof, RangeProofError> {
    check_count(values.len())?;
    if values.len() != blindings.len() {
        return Err(RangeProofError::ShapeMismatch);
    }
    let parties = values.len().next_power_of_two();
    let mut values = values.to_vec();
    let mut blindings = blindings.to_vec();
    values.resize(parties, 0);
    blindings.resize(parties, Scalar::ZERO);

    let mut transcript = Transcript::new(MERLIN_RANGE_PROOF_LABEL);
    let (proof, _) = RangeProof::prove_multiple_with_rng(
        &BP_GENS,
        &PC_GENS,
        &mut transcript,
        &values,
        &blindings,
        RANGE_PROOF_BITS,
        rng,
    )?;
    Ok(OutputRangeProof::Aggregated(proof))
}

/// One proof per output, each over its asset tag.
pub fn prove_confidential<T: RngCore + CryptoRng>(
    values: &[u64],
    blindings: &[Scalar],
    asset_tags: &[RistrettoPoint],
    rng: &mut T,
) -> Result<OutputRangeProof, RangeProofError> {
    check_count(values.len())?;
    if values.len() != blindings.len() || values.len() != asset_tags.len() {
        return Err(RangeProofError::ShapeMismatch);
    }
    let mut proofs = Vec::with_capacity(values.len());
    for ((value, blinding), tag) in values.iter().zip(blindings).zip(asset_tags) {
        let mut transcript = Transcript::new(MERLIN_RANGE_PROOF_LABEL);
        let (proof, _) = RangeProof::prove_single_with_rng(
            &BP_GENS,
            &asset_gens(tag),
            &mut transcript,
            *value,
            blinding,
            RANGE_PROOF_BITS,
            rng,
        )?;
        proofs.push(proof);
    }
    Ok(OutputRangeProof::PerOutput(proofs))
}

impl OutputRangeProof {
    /// Check the proof against the outputs' commitments; `asset_tags` is required for
    /// per-output proofs.
    pub fn verify(
        &self,
        commitments: &[RistrettoPoint],
        asset_tags: &[RistrettoPoint],
    ) -> Result<(), RangeProofError> {
        check_count(commitments.len())?;
        match self {
            OutputRangeProof::Aggregated(proof) => {
                let mut compressed: Vec<CompressedRistretto> =
                    commitments.iter().map(RistrettoPoint::compress).collect();
                compressed.resize(
                    commitments.len().next_power_of_two(),
                    RistrettoPoint::identity().compress(),
                );
                let mut transcript = Transcript::new(MERLIN_RANGE_PROOF_LABEL);
                proof.verify_multiple(
                    &BP_GENS,
                    &PC_GENS,
                    &mut transcript,
                    &compressed,
                    RANGE_PROOF_BITS,
                )?;
            }
            OutputRangeProof::PerOutput(proofs) => {
                if proofs.len() != commitments.len() || asset_tags.len() != commitments.len() {
                    return Err(RangeProofError::ShapeMismatch);
                }
                for ((proof, commitment), tag) in proofs.iter().zip(commitments).zip(asset_tags) {
                    let mut transcript = Transcript::new(MERLIN_RANGE_PROOF_LABEL);
                    proof.verify_single(
                        &BP_GENS,
                        &asset_gens(tag),
                        &mut transcript,
                        &commitment.compress(),
                        RANGE_PROOF_BITS,
                    )?;
                }
            }
        }
        Ok(())
    }
}
