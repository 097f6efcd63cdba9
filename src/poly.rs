use ark_ec::{AffineRepr, CurveGroup, PrimeGroup};
use ark_ff::Zero;
use ark_poly::univariate::DensePolynomial;
use ark_poly::{DenseUVPolynomial, Polynomial};
use ark_std::rand::Rng;
use ark_std::vec::Vec;

use crate::player_idx::PlayerIdx;

/// A dealer's secret polynomial `f` of degree `t`, `f(0)` is the dealer's contribution to the shared secret.
pub type SecretPoly<F> = DensePolynomial<F>;

/// Samples a secret polynomial of degree exactly `t`.
pub fn random_secret<F: ark_ff::PrimeField, R: Rng>(t: usize, rng: &mut R) -> SecretPoly<F> {
    DensePolynomial::rand(t, rng)
}

/// Evaluates the secret polynomial at the player's index, that's the player's share `f(x_j)`.
pub fn eval<F: ark_ff::PrimeField>(secret: &SecretPoly<F>, player: PlayerIdx) -> F {
    secret.evaluate(&player.scalar())
}

/// Commitment to a polynomial in the exponent: `A_k = a_k.g` for `f(X) = a_0 + a_1.X + ... + a_t.X^t`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicPoly<G: CurveGroup> {
    coeffs: Vec<G::Affine>,
}

impl<G: CurveGroup> PublicPoly<G> {
    /// Commits to the secret polynomial with the group generator.
    pub fn commit(secret: &SecretPoly<G::ScalarField>) -> Self {
        let g = G::generator();
        let coeffs: Vec<G> = secret.coeffs.iter()
            .map(|a_k| g * a_k)
            .collect();
        Self {
            coeffs: G::normalize_batch(&coeffs),
        }
    }

    pub fn from_coeffs(coeffs: Vec<G::Affine>) -> Self {
        Self { coeffs }
    }

    pub fn coeffs(&self) -> &[G::Affine] {
        &self.coeffs
    }

    /// The degree, counting trailing identity coefficients in.
    /// Zero for the empty polynomial.
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Whether the leading coefficient is not the identity, i.e. `degree()` is exact.
    pub fn is_exact_degree(&self) -> bool {
        self.coeffs.last()
            .map_or(false, |a_t| !a_t.is_zero())
    }

    /// `f(0).g`
    pub fn constant(&self) -> G {
        self.coeffs.first()
            .map_or(G::zero(), |a_0| a_0.into_group())
    }

    /// `f(x).g`, evaluated with Horner's rule.
    pub fn evaluate_at(&self, x: G::ScalarField) -> G {
        self.coeffs.iter()
            .rev()
            .fold(G::zero(), |acc, a_k| acc * x + a_k)
    }

    pub fn evaluate(&self, player: PlayerIdx) -> G {
        self.evaluate_at(player.scalar())
    }

    /// Commitment to the sum of the polynomials, all of them have to be of the same degree.
    pub fn sum(polys: &[&Self]) -> Self {
        let len = polys.iter()
            .map(|p| p.coeffs.len())
            .max()
            .unwrap_or(0);
        let coeffs: Vec<G> = (0..len).map(|k| {
            polys.iter()
                .filter_map(|p| p.coeffs.get(k))
                .fold(G::zero(), |acc, a_k| acc + a_k)
        }).collect();
        Self {
            coeffs: G::normalize_batch(&coeffs),
        }
    }
}

#[cfg(test)]
mod tests {
    use ark_bls12_381::{Fr, G2Projective};
    use ark_std::test_rng;

    use super::*;
    use crate::player_idx::player_idxs;

    #[test]
    fn commitment_agrees_with_evaluations() {
        let rng = &mut test_rng();

        let t = 4;
        let f = random_secret::<Fr, _>(t, rng);
        let commitment = PublicPoly::<G2Projective>::commit(&f);
        assert_eq!(commitment.degree(), t);
        assert!(commitment.is_exact_degree());
        assert_eq!(commitment.constant(), G2Projective::generator() * f.coeffs[0]);
        for j in player_idxs(7).unwrap() {
            assert_eq!(commitment.evaluate(j), G2Projective::generator() * eval(&f, j));
        }
    }

    #[test]
    fn sum_commits_to_sum() {
        let rng = &mut test_rng();

        let (f1, f2) = (random_secret::<Fr, _>(2, rng), random_secret::<Fr, _>(2, rng));
        let c1 = PublicPoly::<G2Projective>::commit(&f1);
        let c2 = PublicPoly::<G2Projective>::commit(&f2);
        let sum = PublicPoly::sum(&[&c1, &c2]);
        assert_eq!(sum, PublicPoly::commit(&(&f1 + &f2)));
    }
}
