//! Lagrange interpolation over the player indices, and small helpers.

use ark_ff::Field;
use ark_std::iter;
use ark_std::vec::Vec;

/// A set of interpolation points together with the precomputed weights.
/// The points are arbitrary distinct field elements, the players that happened to contribute.
/// After the weights are computed, evaluating an interpolant at a point takes `O(n)`.
pub struct BarycentricDomain<F: Field> {
    /// Interpolation points `x_1,...,x_n`.
    xs: Vec<F>,
    /// Inverted barycentric weights of the points,
    /// `1 / w_j = prod(x_j - x_k, k != j), j = 1,...,n`.
    ws_inv: Vec<F>,
}

impl<F: Field> BarycentricDomain<F> {

    /// Computes the weights of the set `x_1, ..., x_n` in `O(n^2)` using the formula
    /// `1 / w_j = prod(x_j - x_k, k != j), j = 1,...,n`.
    pub fn from_set(xs: Vec<F>) -> Self {
        let ws_inv = xs.iter().map(|xj| xs.iter()
            .filter_map(|xk| (xk != xj).then_some(*xj - xk))
            .product(),
        ).collect();
        Self {
            xs,
            ws_inv,
        }
    }

    /// Evaluates the Lagrange basis polynomials over the set `x_1, ..., x_n` at `z`.
    /// Returns `L_j(z), j = 1,...,n`, where `deg(L_j) = n - 1`, `L_j(x_j) = 1` and `L_j(x_k) = 0` for `k != j`.
    // Follows the formulae from https://people.maths.ox.ac.uk/trefethen/barycentric.pdf, p.3.
    // `z` must not be one of the interpolation points, `0` never is.
    pub fn lagrange_basis_at(&self, z: F) -> Vec<F> {
        let (cs, l_at_z) = self._lagrange_basis_at(z);
        // L_j(z) = c_j.l(z)
        cs.iter()
            .map(|cj| l_at_z * cj)
            .collect()
    }

    pub fn evaluate(&self, ys: &[F], z: F) -> F {
        let (cs, l_at_z) = self._lagrange_basis_at(z);
        l_at_z * cs.into_iter()
            .zip(ys)
            .map(|(cj, yj)| cj * yj)
            .sum::<F>()
    }

    fn _lagrange_basis_at(&self, z: F) -> (Vec<F>, F) {
        // z - x_1, ..., z - x_n
        let z_minus_xs: Vec<F> = iter::repeat(z).zip(&self.xs)
            .map(|(z, xj)| z - xj)
            .collect();

        // l(z) = (z - x_1) ... (z - x_n)
        let l_at_z: F = z_minus_xs.iter()
            .product();

        // c_j = w_j / (z - x_j) = 1 / [(1 / w_j) * (z - x_j)]
        let cs = {
            let mut cs_inv: Vec<F> = self.ws_inv.iter().zip(z_minus_xs)
                .map(|(wj_inv, z_minus_xj)| z_minus_xj * wj_inv)
                .collect();
            ark_ff::batch_inversion(&mut cs_inv);
            cs_inv
        };

        (cs, l_at_z)
    }
}

/// Median of the values, the upper one for even counts.
pub fn median<T: Ord + Copy>(values: &[T]) -> Option<T> {
    let mut sorted = values.to_vec();
    sorted.sort_unstable();
    sorted.get(sorted.len() / 2).copied()
}

pub fn hex(bytes: &[u8]) -> String {
    bytes.iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
