//! Stevens-operator expansion of single-ion anisotropy (spec.md §4.2).

use nalgebra::{DMatrix, DVector, Vector3};
use num_complex::Complex;

use crate::coupling::su2::{spin_matrices, wigner_d_element};
use crate::error::{Result, SpinError};
use crate::C64;

/// Real coefficients `c_{k,q}` for `k in {2,4,6}`, plus the highest order
/// actually populated. Odd-`k` coefficients are rejected at construction
/// time (spec.md §3, §4.2).
#[derive(Debug, Clone)]
pub struct StevensExpansion {
    pub c2: [f64; 5],
    pub c4: [f64; 9],
    pub c6: [f64; 13],
    pub kmax: u32,
    /// Spin quantum number the expansion was built for; determines the
    /// dimension `N = 2S+1` of the cached quantum operator.
    pub spin_s: f64,
    /// `Lambda = sum_{k,q} c_{k,q} O_{k,q}`, cached for quantum evaluation
    /// and reused as the coherent-state kernel for the classical limit.
    lambda: DMatrix<C64>,
}

/// Builds the `(2k+1)` Hermitian tesseral Stevens operators `O_{k,q}` for a
/// single rank `k`, from the spherical tensor operators `T^k_q` obtained by
/// the standard ladder recursion `[J-, T^k_q] = sqrt((k+q)(k-q+1)) T^k_{q-1}`
/// seeded at `T^k_k \propto (J+)^k`.
pub fn stevens_operators_for_rank(s: f64, k: u32) -> Vec<DMatrix<C64>> {
    let (sx, sy, sz) = spin_matrices(s);
    let n = sz.nrows();
    let splus = &sx + Complex::new(0.0, 1.0) * &sy;
    let sminus = &sx - Complex::new(0.0, 1.0) * &sy;

    let kf = k as f64;
    // seed T^k_k = (-1)^k / 2^k * (J+)^k  (up to overall normalization,
    // which cancels in the least-squares projection used by `decompose`)
    let mut t_k_k = DMatrix::<C64>::identity(n, n);
    for _ in 0..k {
        t_k_k = &t_k_k * &splus;
    }
    let sign = if k % 2 == 1 { -1.0 } else { 1.0 };
    t_k_k *= Complex::from(sign / 2f64.powi(k as i32));

    let mut t: Vec<DMatrix<C64>> = vec![DMatrix::<C64>::zeros(n, n); 2 * k as usize + 1];
    t[2 * k as usize] = t_k_k; // index q+k, q=k at the end
    for q in (-(k as i32) + 1..=k as i32).rev() {
        let qf = q as f64;
        let denom = ((kf + qf) * (kf - qf + 1.0)).sqrt();
        let prev = t[(q + k as i32) as usize].clone();
        let commutator = &sminus * &prev - &prev * &sminus;
        let next = if denom > 1e-12 {
            commutator / Complex::from(denom)
        } else {
            DMatrix::<C64>::zeros(n, n)
        };
        t[(q - 1 + k as i32) as usize] = next;
    }

    let tq = |q: i32| -> DMatrix<C64> { t[(q + k as i32) as usize].clone() };

    let mut ops = Vec::with_capacity(2 * k as usize + 1);
    for q in -(k as i32)..=(k as i32) {
        let o = if q == 0 {
            tq(0)
        } else if q > 0 {
            let sign_q = if q % 2 == 0 { 1.0 } else { -1.0 };
            (tq(-q) + tq(q) * Complex::from(sign_q)) / Complex::from(2f64.sqrt())
        } else {
            let qq = -q;
            let sign_q = if qq % 2 == 0 { 1.0 } else { -1.0 };
            (tq(qq) - tq(-qq) * Complex::from(sign_q)) * Complex::new(0.0, 1.0)
                / Complex::from(2f64.sqrt())
        };
        // enforce exact Hermiticity (numerical roundoff from the ladder recursion)
        let o_herm = (&o + o.adjoint()) * Complex::from(0.5);
        ops.push(o_herm);
    }
    ops
}

fn hilbert_trace_ip(a: &DMatrix<C64>, b: &DMatrix<C64>) -> C64 {
    (a.adjoint() * b).trace()
}

impl StevensExpansion {
    /// Decompose a Hermitian operator on `C^{2S+1}` into Stevens
    /// coefficients via `c = tr(O^dagger A) / tr(O^dagger O)` (spec.md
    /// §4.2). Rejects (fails) if any odd-order projection exceeds `1e-12`.
    pub fn from_hermitian(op: &DMatrix<C64>, spin_s: f64) -> Result<Self> {
        let n = (2.0 * spin_s).round() as usize + 1;
        assert_eq!(op.nrows(), n, "operator dimension must be 2S+1");

        let mut c2 = [0.0; 5];
        let mut c4 = [0.0; 9];
        let mut c6 = [0.0; 13];
        let mut kmax = 0u32;

        for k in [1u32, 2, 3, 4, 5, 6] {
            if k as usize >= n {
                continue;
            }
            let ops = stevens_operators_for_rank(spin_s, k);
            for (idx, o) in ops.iter().enumerate() {
                let q = idx as i32 - k as i32;
                let num = hilbert_trace_ip(o, op);
                let den = hilbert_trace_ip(o, o);
                let c = if den.norm() > 1e-14 {
                    (num / den).re
                } else {
                    0.0
                };
                if k % 2 == 1 {
                    if c.abs() > 1e-12 {
                        return Err(SpinError::UnsupportedAnisotropy {
                            k,
                            residual: c.abs(),
                        });
                    }
                    continue;
                }
                match k {
                    2 => c2[(q + 2) as usize] = c,
                    4 => c4[(q + 4) as usize] = c,
                    6 => c6[(q + 6) as usize] = c,
                    _ => unreachable!(),
                }
                if c.abs() > 1e-12 {
                    kmax = kmax.max(k);
                }
            }
        }

        let mut expansion = StevensExpansion {
            c2,
            c4,
            c6,
            kmax,
            spin_s,
            lambda: DMatrix::<C64>::zeros(n, n),
        };
        expansion.lambda = expansion.build_lambda();
        Ok(expansion)
    }

    /// Build a zero expansion for spin `spin_s` (e.g. for sites with no
    /// anisotropy).
    pub fn zero(spin_s: f64) -> Self {
        let n = (2.0 * spin_s).round() as usize + 1;
        StevensExpansion {
            c2: [0.0; 5],
            c4: [0.0; 9],
            c6: [0.0; 13],
            kmax: 0,
            spin_s,
            lambda: DMatrix::<C64>::zeros(n, n),
        }
    }

    fn build_lambda(&self) -> DMatrix<C64> {
        let n = (2.0 * self.spin_s).round() as usize + 1;
        let mut lambda = DMatrix::<C64>::zeros(n, n);
        for (k, coeffs) in [(2u32, &self.c2[..]), (4, &self.c4[..]), (6, &self.c6[..])] {
            if coeffs.iter().all(|c| c.abs() < 1e-15) {
                continue;
            }
            let ops = stevens_operators_for_rank(self.spin_s, k);
            for (idx, o) in ops.iter().enumerate() {
                lambda += o * Complex::from(coeffs[idx]);
            }
        }
        lambda
    }

    /// `Lambda = sum c_{k,q} O_{k,q}`, cached.
    pub fn lambda(&self) -> &DMatrix<C64> {
        &self.lambda
    }

    /// Quantum evaluation: `Re(Z^dagger Lambda Z)` (spec.md §4.5).
    pub fn quantum_energy(&self, z: &DVector<C64>) -> f64 {
        (z.adjoint() * &self.lambda * z)[(0, 0)].re
    }

    /// Classical evaluation: build the SU(2) coherent state along the
    /// direction of `s` (magnitude `|s|` is taken to be the spin quantum
    /// number used to build `Lambda`) and evaluate `Re(<Z|Lambda|Z>)`, with
    /// the gradient obtained by central differences on the unit sphere.
    ///
    /// This is the classical (`S -> infinity` direction, finite-`S`
    /// magnitude) limit of the quantum evaluation above, and both paths
    /// share the same cached `Lambda` (spec.md §4.2's two evaluation modes).
    pub fn energy_and_gradient_for_classical_anisotropy(&self, s: Vector3<f64>) -> (f64, Vector3<f64>) {
        let mag = s.norm();
        if mag < 1e-14 {
            return (0.0, Vector3::zeros());
        }
        let n = s / mag;
        let e0 = self.coherent_energy(&n);

        let h = 1e-6;
        let mut grad = Vector3::zeros();
        for axis in 0..3 {
            let mut ep = s;
            ep[axis] += h;
            let mut em = s;
            em[axis] -= h;
            let ep_e = self.coherent_energy(&(ep / ep.norm()));
            let em_e = self.coherent_energy(&(em / em.norm()));
            grad[axis] = (ep_e - em_e) / (2.0 * h);
        }
        (e0, grad)
    }

    fn coherent_energy(&self, n: &Vector3<f64>) -> f64 {
        let s = self.spin_s;
        let dim = (2.0 * s).round() as usize + 1;
        if self.lambda.nrows() != dim {
            return 0.0;
        }
        let theta = n.z.clamp(-1.0, 1.0).acos();
        let phi = n.y.atan2(n.x);
        let (alpha, beta, gamma) = (phi, theta, 0.0);
        let mut ket = DVector::<C64>::zeros(dim);
        for a in 0..dim {
            let m1 = s - a as f64;
            ket[a] = wigner_d_element(s, m1, s, alpha, beta, gamma);
        }
        let norm = ket.norm();
        if norm > 1e-12 {
            ket /= Complex::from(norm);
        }
        (ket.adjoint() * &self.lambda * &ket)[(0, 0)].re
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn zero_operator_decomposes_to_zero() {
        let n = 6; // S = 5/2
        let op = DMatrix::<C64>::zeros(n, n);
        let exp = StevensExpansion::from_hermitian(&op, 2.5).unwrap();
        assert_eq!(exp.kmax, 0);
        assert!(exp.c2.iter().all(|c| c.abs() < 1e-9));
    }

    #[test]
    fn diagonal_operator_gives_pure_c20() {
        let s = 2.5;
        let n = 6;
        let ops = stevens_operators_for_rank(s, 2);
        let o20 = ops[2].clone(); // q=0 is index k=2
        let op = &o20 * Complex::from(3.0);
        let exp = StevensExpansion::from_hermitian(&op, s).unwrap();
        assert_abs_diff_eq!(exp.c2[2], 3.0, epsilon = 1e-6);
        for (idx, c) in exp.c2.iter().enumerate() {
            if idx != 2 {
                assert_abs_diff_eq!(*c, 0.0, epsilon = 1e-6);
            }
        }
        let _ = n;
    }
}
