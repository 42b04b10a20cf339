//! Shared su(2) machinery: explicit spin matrices for spin `j` (half-integer
//! or integer), used both to build Stevens operators (spec.md §4.2) and
//! Wigner-D rotation matrices (spec.md §4.1's "Wigner-D rotation of
//! spherical tensors") from the same recursive construction.

use nalgebra::DMatrix;
use num_complex::Complex;

use crate::C64;

/// `N = 2j+1`-dimensional `(Sx, Sy, Sz)` matrices for spin `j`.
pub fn spin_matrices(j: f64) -> (DMatrix<C64>, DMatrix<C64>, DMatrix<C64>) {
    let n = (2.0 * j).round() as usize + 1;
    let mut sz = DMatrix::<C64>::zeros(n, n);
    let mut splus = DMatrix::<C64>::zeros(n, n);
    // basis ordered m = j, j-1, ..., -j (row/col index 0..n-1)
    for a in 0..n {
        let m = j - a as f64;
        sz[(a, a)] = Complex::from(m);
        if a + 1 < n {
            let mp = j - (a + 1) as f64;
            // S+ |j,m> = sqrt(j(j+1) - m(m+1)) |j,m+1>
            let coeff = (j * (j + 1.0) - mp * (mp + 1.0)).max(0.0).sqrt();
            splus[(a, a + 1)] = Complex::from(coeff);
        }
    }
    let sminus = splus.adjoint();
    let sx = (&splus + &sminus) * Complex::from(0.5);
    let sy = (&splus - &sminus) * Complex::new(0.0, -0.5);
    (sx, sy, sz)
}

/// Factorial as `f64`, valid for the small non-negative integers this crate
/// needs (k <= 6, so arguments stay well under 20).
pub fn factorial(n: i64) -> f64 {
    if n < 0 {
        return 0.0;
    }
    (1..=n).fold(1.0, |acc, k| acc * k as f64)
}

/// Wigner small-d matrix element `d^j_{m1,m2}(beta)` via the standard
/// Jacobi-polynomial sum.
pub fn wigner_small_d(j: f64, m1: f64, m2: f64, beta: f64) -> f64 {
    let jf = j;
    let smin = 0.max((m2 - m1).round() as i64 * -1).max(0);
    let smin = smin.max(((m1 - m2).round() as i64) * -1).max(0).max(
        // s must keep all factorial arguments nonnegative
        0,
    );
    let s_lo = {
        let a = (m1 - m2).ceil() as i64;
        0.max(-a)
    };
    let s_hi = {
        let a = (jf + m1).floor() as i64;
        let b = (jf - m2).floor() as i64;
        a.min(b)
    };
    let _ = smin;
    let mut total = 0.0;
    let cb = (beta / 2.0).cos();
    let sb = (beta / 2.0).sin();
    let mut s = s_lo;
    while s <= s_hi {
        let denom = factorial((jf + m1).round() as i64 - s)
            * factorial(s)
            * factorial((m2 - m1).round() as i64 + s)
            * factorial((jf - m2).round() as i64 - s);
        if denom != 0.0 {
            let num = (factorial((jf + m1).round() as i64)
                * factorial((jf - m1).round() as i64)
                * factorial((jf + m2).round() as i64)
                * factorial((jf - m2).round() as i64))
            .sqrt();
            let sign = if ((m2 - m1).round() as i64 + s).rem_euclid(2) == 0 {
                1.0
            } else {
                -1.0
            };
            let pow_cos = (2.0 * jf + m1 - m2 - 2.0 * s as f64).round() as i32;
            let pow_sin = (m2 - m1 + 2.0 * s as f64).round() as i32;
            let cb_pow = if pow_cos >= 0 { cb.powi(pow_cos) } else { 0.0 };
            let sb_pow = if pow_sin >= 0 { sb.powi(pow_sin) } else { 0.0 };
            total += sign * (num / denom) * cb_pow * sb_pow;
        }
        s += 1;
    }
    total
}

/// Full Wigner-D matrix element `D^j_{m1,m2}(alpha,beta,gamma)` for the
/// `(2j+1)`-dimensional irrep.
pub fn wigner_d_element(j: f64, m1: f64, m2: f64, alpha: f64, beta: f64, gamma: f64) -> C64 {
    let d = wigner_small_d(j, m1, m2, beta);
    Complex::from_polar(d, -m1 * alpha - m2 * gamma)
}

/// ZYZ Euler angles `(alpha, beta, gamma)` decomposing the Cartesian rotation
/// `r` as `Rz(alpha) Ry(beta) Rz(gamma)`.
pub fn euler_zyz(r: &nalgebra::Matrix3<f64>) -> (f64, f64, f64) {
    let r33 = r[(2, 2)].clamp(-1.0, 1.0);
    let beta = r33.acos();
    if beta.abs() > 1e-9 && (beta - std::f64::consts::PI).abs() > 1e-9 {
        let alpha = r[(1, 2)].atan2(r[(0, 2)]);
        let gamma = r[(2, 1)].atan2(-r[(2, 0)]);
        (alpha, beta, gamma)
    } else {
        // gimbal lock: beta = 0 or pi, only alpha+gamma (or alpha-gamma) is determined
        let alpha = r[(1, 0)].atan2(r[(0, 0)]);
        (alpha, beta, 0.0)
    }
}
