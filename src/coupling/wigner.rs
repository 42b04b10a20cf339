//! Wigner-D rotation of spherical tensors (spec.md §4.1), used to propagate
//! a reference onsite anisotropy to every symmetry-equivalent sublattice
//! (spec.md §4.4).

use nalgebra::{DMatrix, Matrix3};
use num_complex::Complex;

use crate::coupling::stevens::StevensExpansion;
use crate::coupling::su2::{euler_zyz, wigner_d_element};
use crate::C64;

/// The `(2S+1)x(2S+1)` unitary representing Cartesian rotation `r` acting on
/// spin-`s` kets, `U_{m1,m2}(R) = D^s_{m1,m2}(alpha,beta,gamma)`.
pub fn rotation_operator(s: f64, r: &Matrix3<f64>) -> DMatrix<C64> {
    let n = (2.0 * s).round() as usize + 1;
    let (alpha, beta, gamma) = euler_zyz(r);
    DMatrix::<C64>::from_fn(n, n, |a, b| {
        let m1 = s - a as f64;
        let m2 = s - b as f64;
        wigner_d_element(s, m1, m2, alpha, beta, gamma)
    })
}

/// Rotate a Stevens expansion by the Cartesian rotation `r`: conjugate the
/// cached `Lambda` by the spin-`s` rotation operator and re-decompose.
pub fn rotate_stevens_expansion(
    exp: &StevensExpansion,
    r: &Matrix3<f64>,
) -> crate::error::Result<StevensExpansion> {
    let u = rotation_operator(exp.spin_s, r);
    let rotated_lambda = &u * exp.lambda() * u.adjoint();
    StevensExpansion::from_hermitian(&rotated_lambda, exp.spin_s)
}

/// Rotate an explicit Hermitian onsite matrix (SU(N) mode) by the
/// Cartesian rotation `r` acting on the physical spin-`s` irrep that the
/// matrix's `N = 2s+1` dimension represents.
pub fn rotate_hermitian_matrix(op: &DMatrix<C64>, s: f64, r: &Matrix3<f64>) -> DMatrix<C64> {
    let u = rotation_operator(s, r);
    let rotated = &u * op * u.adjoint();
    // enforce exact Hermiticity against roundoff
    (&rotated + rotated.adjoint()) * Complex::from(0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rotation_is_noop() {
        let s = 1.5;
        let r = Matrix3::identity();
        let u = rotation_operator(s, &r);
        let n = (2.0 * s).round() as usize + 1;
        let id = DMatrix::<C64>::identity(n, n);
        assert!((u - id).norm() < 1e-8);
    }
}
