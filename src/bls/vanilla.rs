use ark_ec::pairing::Pairing;
use ark_ec::{AffineRepr, CurveGroup};
use ark_std::rand::Rng;
use ark_std::UniformRand;

/// BLS keypair with the public key in G2 and signatures in G1.
/// Dealers use it to authenticate their share records.
pub struct BlsSigner<C: Pairing> {
    sk: C::ScalarField,
    pub bls_pk_g2: C::G2Affine,
}

impl<C: Pairing> Clone for BlsSigner<C> {
    fn clone(&self) -> Self {
        Self { sk: self.sk, bls_pk_g2: self.bls_pk_g2 }
    }
}

impl<C: Pairing> BlsSigner<C> {
    pub fn new<R: Rng>(rng: &mut R) -> Self {
        Self::from_secret(C::ScalarField::rand(rng))
    }

    pub fn from_secret(sk: C::ScalarField) -> Self {
        let bls_pk_g2 = C::G2Affine::generator() * sk;
        let bls_pk_g2 = bls_pk_g2.into_affine();
        Self { sk, bls_pk_g2 }
    }

    /// Signs the message, already hashed to G1.
    pub fn sign(&self, m: C::G1Affine) -> C::G1Affine {
        (m * self.sk).into_affine()
    }
}

/// `e(sig, g2) = e(m, pk)`
pub fn verify<C: Pairing>(pk: C::G2Affine, m: C::G1Affine, sig: C::G1Affine) -> bool {
    C::pairing(sig, C::G2Affine::generator()) == C::pairing(m, pk)
}
