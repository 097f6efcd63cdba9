use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup, VariableBaseMSM};
use ark_ff::Zero;
use ark_std::{end_timer, start_timer};

use crate::player_idx::PlayerIdx;
use crate::utils::BarycentricDomain;
use crate::Error;

// The committee shares a secret `s = f(0)` of a degree `t` polynomial `f`,
// the player `j` knows `s_j = f(x_j)`, everyone knows `pk = s.g2` and `pk_j = s_j.g2`.
// A partial signature of the player `j` on a message `m` in G1 is `s_j.m`.
// Any `t + 1` of them interpolate to `s.m` in the exponent, which verifies against `pk`.

/// A player's signature share on a message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartialSig<C: Pairing> {
    pub signer: PlayerIdx,
    pub sig: C::G1Affine,
}

/// `s_j.m`
pub fn partial_sign<C: Pairing>(signer: PlayerIdx, share: C::ScalarField, message: C::G1Affine) -> PartialSig<C> {
    PartialSig {
        signer,
        sig: (message * share).into_affine(),
    }
}

/// Checks the partial signature against the signer's public share: `e(m, pk_j) = e(sig_j, g2)`.
pub fn verify_partial<C: Pairing>(
    message: C::G1Affine,
    public_share: C::G2Affine,
    partial: &PartialSig<C>,
) -> Result<(), Error> {
    if C::pairing(message, public_share) != C::pairing(partial.sig, C::G2Affine::generator()) {
        return Err(Error::InvalidPartialSignature(partial.signer));
    }
    Ok(())
}

/// Interpolates the partial signatures of distinct signers at `0`.
///
/// Needs strictly more than `t` of them, more than `t + 1` are fine as long as all of them are valid.
/// The result isn't verified here, see `ThresholdVk::verify`.
pub fn recover<C: Pairing>(partials: &[PartialSig<C>], t: usize) -> Result<C::G1Affine, Error> {
    if partials.len() <= t {
        return Err(Error::InsufficientContributions { have: partials.len(), need: t + 1 });
    }
    for (j, p) in partials.iter().enumerate() {
        if partials[..j].iter().any(|q| q.signer == p.signer) {
            return Err(Error::DuplicateDealer(p.signer));
        }
    }
    let _t = start_timer!(|| format!("Recovery from {} partial signatures", partials.len()));
    let xs: Vec<C::ScalarField> = partials.iter()
        .map(|p| p.signer.scalar())
        .collect();
    let lis_at_0 = BarycentricDomain::from_set(xs).lagrange_basis_at(C::ScalarField::zero());
    let sigs: Vec<C::G1Affine> = partials.iter()
        .map(|p| p.sig)
        .collect();
    let sig = C::G1::msm(&sigs, &lis_at_0)
        .map_err(|_| Error::InvariantViolation("basis and signature counts differ"))?;
    end_timer!(_t);
    Ok(sig.into_affine())
}

/// Verifies threshold signatures against the distributed public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ThresholdVk<C: Pairing> {
    pub pk: C::G2Affine,
}

impl<C: Pairing> ThresholdVk<C> {
    pub fn new(pk: C::G2Affine) -> Self {
        Self { pk }
    }

    /// `e(sig, g2) = e(m, pk)`
    pub fn verify(&self, message: C::G1Affine, sig: C::G1Affine) -> Result<(), Error> {
        if sig.is_zero() || !crate::bls::vanilla::verify::<C>(self.pk, message, sig) {
            return Err(Error::InvalidThresholdSignature);
        }
        Ok(())
    }
}
