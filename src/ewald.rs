//! Ewald engine: periodic dipole-dipole interaction tensor, precomputed in
//! real+reciprocal space, with energy/gradient/delta evaluated by FFT
//! convolution against the moment field (spec.md §2 item 4, §4.3, §8 item 8).

use nalgebra::{Matrix3, Vector3};
use ndarray::{Array3, Axis};
use ndrustfft::{ndfft, ndifft, FftHandler};
use num_complex::Complex;

use crate::crystal::Crystal;
use crate::grid::Grid;
use crate::units::Units;

type C64 = Complex<f64>;

/// Real-space / reciprocal-space truncation multipliers from spec.md §4.3:
/// `rmax = 6 sqrt(2) sigma`, `kmax = 6 sqrt(2) / sigma`.
const TRUNC_FACTOR: f64 = 6.0 * std::f64::consts::SQRT_2;

fn erfc(x: f64) -> f64 {
    // Abramowitz & Stegun 7.1.26, accurate to ~1.5e-7; avoids pulling in a
    // special-functions crate for a single scalar function.
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let y = 1.0
        - (((((1.061405429 * t - 1.453152027) * t) + 1.421413741) * t - 0.284496736) * t
            + 0.254829592)
            * t
            * (-x * x).exp();
    1.0 - sign * y
}

/// The precomputed periodic dipole-dipole tensor `A[Delta cell, i, j]` plus
/// the cached FFT machinery used to convolve it against a moment field
/// (spec.md §3's `Ewald`).
pub struct Ewald {
    latsize: (usize, usize, usize),
    nsub: usize,
    /// `A[Delta cell, i, j]`, row-major over `(dc0, dc1, dc2, i, j)`.
    tensor: Vec<Matrix3<f64>>,
    /// Fourier transform of `tensor` along the three cell axes, cached once
    /// at construction (spec.md §4.3, §5: "no plan is ever shared between
    /// threads" — each `Ewald` owns its own handlers and is not `Sync`
    /// across a shared mutable borrow).
    a_hat: Vec<Matrix3<C64>>,
    fft0: std::cell::RefCell<FftHandler<f64>>,
    fft1: std::cell::RefCell<FftHandler<f64>>,
    fft2: std::cell::RefCell<FftHandler<f64>>,
    units: Units,
}

impl Ewald {
    /// Precompute the Ewald tensor for a crystal tiled `latsize` times, with
    /// Gaussian splitting parameter `sigma = L/3`, `L = cbrt(V)` (spec.md
    /// §4.3).
    pub fn new(cryst: &Crystal, latsize: (usize, usize, usize), units: Units) -> Self {
        let nsub = cryst.natoms();
        let l_full = Matrix3::from_columns(&[
            cryst.latvecs.column(0) * latsize.0 as f64,
            cryst.latvecs.column(1) * latsize.1 as f64,
            cryst.latvecs.column(2) * latsize.2 as f64,
        ]);
        let volume = l_full.determinant().abs();
        let g_full = l_full
            .transpose()
            .try_inverse()
            .expect("supercell lattice vectors must be invertible")
            * (2.0 * std::f64::consts::PI);
        let l_len = volume.cbrt();
        let sigma = l_len / 3.0;
        let rmax = TRUNC_FACTOR * sigma;
        let kmax = TRUNC_FACTOR / sigma;

        // real and reciprocal image ranges: enough whole supercells/reciprocal
        // vectors to cover the truncation radius along each lattice direction
        let nmax = image_range(&l_full, rmax);
        let mmax = image_range(&g_full, kmax);

        let mut tensor = vec![Matrix3::<f64>::zeros(); latsize.0 * latsize.1 * latsize.2 * nsub * nsub];
        let idx = |dc0: usize, dc1: usize, dc2: usize, i: usize, j: usize| -> usize {
            (((dc0 * latsize.1 + dc1) * latsize.2 + dc2) * nsub + i) * nsub + j
        };

        for dc0 in 0..latsize.0 {
            for dc1 in 0..latsize.1 {
                for dc2 in 0..latsize.2 {
                    let cell_frac = Vector3::new(dc0 as f64, dc1 as f64, dc2 as f64);
                    for i in 0..nsub {
                        for j in 0..nsub {
                            let delta_r = cryst.latvecs * cell_frac
                                + cryst.cartesian(&cryst.positions[j])
                                - cryst.cartesian(&cryst.positions[i]);
                            let a = ewald_tensor_at(
                                &delta_r, &l_full, &g_full, volume, sigma, nmax, mmax,
                            );
                            tensor[idx(dc0, dc1, dc2, i, j)] = a * units.mu_0;
                        }
                    }
                }
            }
        }

        let fft0 = std::cell::RefCell::new(FftHandler::<f64>::new(latsize.0.max(1)));
        let fft1 = std::cell::RefCell::new(FftHandler::<f64>::new(latsize.1.max(1)));
        let fft2 = std::cell::RefCell::new(FftHandler::<f64>::new(latsize.2.max(1)));

        let mut ewald = Ewald {
            latsize,
            nsub,
            tensor,
            a_hat: Vec::new(),
            fft0,
            fft1,
            fft2,
            units,
        };
        ewald.a_hat = ewald.transform_tensor();
        ewald
    }

    fn tensor_component_field(&self, i: usize, j: usize, row: usize, col: usize) -> Array3<C64> {
        let (l0, l1, l2) = self.latsize;
        Array3::from_shape_fn((l0, l1, l2), |(c0, c1, c2)| {
            let idx = (((c0 * l1 + c1) * l2 + c2) * self.nsub + i) * self.nsub + j;
            Complex::from(self.tensor[idx][(row, col)])
        })
    }

    fn transform_tensor(&mut self) -> Vec<Matrix3<C64>> {
        let (l0, l1, l2) = self.latsize;
        let mut out = vec![Matrix3::<C64>::zeros(); l0 * l1 * l2 * self.nsub * self.nsub];
        for i in 0..self.nsub {
            for j in 0..self.nsub {
                for row in 0..3 {
                    for col in 0..3 {
                        let field = self.tensor_component_field(i, j, row, col);
                        let transformed = self.fft3_forward(field);
                        for c0 in 0..l0 {
                            for c1 in 0..l1 {
                                for c2 in 0..l2 {
                                    let out_idx =
                                        (((c0 * l1 + c1) * l2 + c2) * self.nsub + i) * self.nsub + j;
                                    out[out_idx][(row, col)] = transformed[[c0, c1, c2]];
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn fft3_forward(&self, field: Array3<C64>) -> Array3<C64> {
        self.fft3(field, true)
    }

    fn fft3_inverse(&self, field: Array3<C64>) -> Array3<C64> {
        self.fft3(field, false)
    }

    fn fft3(&self, mut field: Array3<C64>, forward: bool) -> Array3<C64> {
        let mut scratch = field.clone();
        for (axis, handler) in [&self.fft0, &self.fft1, &self.fft2].into_iter().enumerate().map(|(k, h)| (Axis(k), h)) {
            let mut handler = handler.borrow_mut();
            if forward {
                ndfft(&field, &mut scratch, &mut handler, axis.index());
            } else {
                ndifft(&field, &mut scratch, &mut handler, axis.index());
            }
            std::mem::swap(&mut field, &mut scratch);
        }
        field
    }

    /// Dipole-dipole energy `E = 1/2 (mu * A) * mu` evaluated via FFT
    /// convolution (spec.md §4.3).
    pub fn energy(&self, moments: &Grid<Vector3<f64>>) -> f64 {
        let (l0, l1, l2) = self.latsize;
        let mut total = 0.0;
        for alpha in 0..3 {
            let mu_hat_alpha: Vec<Array3<C64>> = (0..self.nsub)
                .map(|i| {
                    let field = Array3::from_shape_fn((l0, l1, l2), |(c0, c1, c2)| {
                        Complex::from(moments.get((c0, c1, c2), i)[alpha])
                    });
                    self.fft3_forward(field)
                })
                .collect();
            for beta in 0..3 {
                let mu_hat_beta = if beta == alpha {
                    mu_hat_alpha.clone()
                } else {
                    (0..self.nsub)
                        .map(|i| {
                            let field = Array3::from_shape_fn((l0, l1, l2), |(c0, c1, c2)| {
                                Complex::from(moments.get((c0, c1, c2), i)[beta])
                            });
                            self.fft3_forward(field)
                        })
                        .collect()
                };
                for c0 in 0..l0 {
                    for c1 in 0..l1 {
                        for c2 in 0..l2 {
                            for i in 0..self.nsub {
                                for j in 0..self.nsub {
                                    let idx = (((c0 * l1 + c1) * l2 + c2) * self.nsub + i) * self.nsub + j;
                                    let a_ab = self.a_hat[idx][(alpha, beta)];
                                    total += (mu_hat_alpha[i][[c0, c1, c2]].conj()
                                        * a_ab
                                        * mu_hat_beta[j][[c0, c1, c2]])
                                        .re;
                                }
                            }
                        }
                    }
                }
            }
        }
        0.5 * total / (l0 * l1 * l2) as f64
    }

    /// Per-site negative-gradient field `phi = IRFFT(A_hat mu_hat)`, so that
    /// `grad_E[site] = mu_B * g(site)^T * phi(site)` (spec.md §4.3).
    pub fn field(&self, moments: &Grid<Vector3<f64>>) -> Grid<Vector3<f64>> {
        let (l0, l1, l2) = self.latsize;

        let mu_hat_axes: Vec<Vec<Array3<C64>>> = (0..3)
            .map(|axis| {
                (0..self.nsub)
                    .map(|i| {
                        let field = Array3::from_shape_fn((l0, l1, l2), |(c0, c1, c2)| {
                            Complex::from(moments.get((c0, c1, c2), i)[axis])
                        });
                        self.fft3_forward(field)
                    })
                    .collect()
            })
            .collect();

        let mut phi_hat_axes: Vec<Vec<Array3<C64>>> = (0..3)
            .map(|_| (0..self.nsub).map(|_| Array3::zeros((l0, l1, l2))).collect())
            .collect();

        for c0 in 0..l0 {
            for c1 in 0..l1 {
                for c2 in 0..l2 {
                    for i in 0..self.nsub {
                        for alpha in 0..3 {
                            let mut acc = Complex::from(0.0);
                            for j in 0..self.nsub {
                                let idx = (((c0 * l1 + c1) * l2 + c2) * self.nsub + i) * self.nsub + j;
                                for beta in 0..3 {
                                    acc += self.a_hat[idx][(alpha, beta)]
                                        * mu_hat_axes[beta][j][[c0, c1, c2]];
                                }
                            }
                            phi_hat_axes[alpha][i][[c0, c1, c2]] = acc;
                        }
                    }
                }
            }
        }

        let phi_axes: Vec<Vec<Array3<C64>>> = phi_hat_axes
            .into_iter()
            .map(|per_sub| per_sub.into_iter().map(|f| self.fft3_inverse(f)).collect())
            .collect();

        Grid::from_fn(self.latsize, self.nsub, |c0, c1, c2, sub| {
            Vector3::new(
                phi_axes[0][sub][[c0, c1, c2]].re,
                phi_axes[1][sub][[c0, c1, c2]].re,
                phi_axes[2][sub][[c0, c1, c2]].re,
            )
        })
    }

    /// Cartesian gradient `grad_E[site] = mu_B g^T phi[site]`.
    pub fn gradient(&self, moments: &Grid<Vector3<f64>>, gs: &[Matrix3<f64>]) -> Grid<Vector3<f64>> {
        let phi = self.field(moments);
        Grid::from_fn(self.latsize, self.nsub, |c0, c1, c2, sub| {
            self.units.mu_b * gs[sub].transpose() * phi.get((c0, c1, c2), sub)
        })
    }

    /// Single-site delta energy for a Monte Carlo proposal (spec.md §4.3):
    /// `dE = d_s . grad_E[site] + 1/2 d_mu . A[0,i,i] . d_mu`.
    pub fn local_energy_change(
        &self,
        moments: &Grid<Vector3<f64>>,
        gs: &[Matrix3<f64>],
        cell: (usize, usize, usize),
        sub: usize,
        delta_s: Vector3<f64>,
    ) -> f64 {
        let grad = self.gradient(moments, gs);
        let delta_mu = self.units.mu_b * gs[sub] * delta_s;
        let a00 = self.tensor[(((cell.0 * self.latsize.1 + cell.1) * self.latsize.2 + cell.2)
            * self.nsub
            + sub)
            * self.nsub
            + sub];
        delta_s.dot(grad.get(cell, sub)) + 0.5 * delta_mu.dot(&(a00 * delta_mu))
    }
}

fn image_range(lattice: &Matrix3<f64>, cutoff: f64) -> (i64, i64, i64) {
    let mut n = [0i64; 3];
    for axis in 0..3 {
        let col = lattice.column(axis);
        let len = col.norm().max(1e-12);
        n[axis] = (cutoff / len).ceil() as i64 + 1;
    }
    (n[0], n[1], n[2])
}

#[allow(clippy::too_many_arguments)]
fn ewald_tensor_at(
    delta_r: &Vector3<f64>,
    l_full: &Matrix3<f64>,
    g_full: &Matrix3<f64>,
    volume: f64,
    sigma: f64,
    nmax: (i64, i64, i64),
    mmax: (i64, i64, i64),
) -> Matrix3<f64> {
    let mut a = Matrix3::<f64>::zeros();
    let prefac = 1.0 / (4.0 * std::f64::consts::PI);

    for n0 in -nmax.0..=nmax.0 {
        for n1 in -nmax.1..=nmax.1 {
            for n2 in -nmax.2..=nmax.2 {
                let shift = l_full * Vector3::new(n0 as f64, n1 as f64, n2 as f64);
                let r_vec = delta_r + shift;
                let r = r_vec.norm();
                if r < 1e-10 {
                    continue;
                }
                let rhat = r_vec / r;
                let x = r / (std::f64::consts::SQRT_2 * sigma);
                let g0 = (2.0 / std::f64::consts::PI).sqrt() * (r / sigma) * (-r * r / (2.0 * sigma * sigma)).exp();
                let term_diag = (erfc(x) + g0) / r.powi(3);
                let term_outer = (erfc(x) + (1.0 + r * r / (3.0 * sigma * sigma)) * g0) * 3.0 / r.powi(3);
                let outer = rhat * rhat.transpose();
                a += prefac * (Matrix3::identity() * term_diag - outer * term_outer);
            }
        }
    }

    for m0 in -mmax.0..=mmax.0 {
        for m1 in -mmax.1..=mmax.1 {
            for m2 in -mmax.2..=mmax.2 {
                if m0 == 0 && m1 == 0 && m2 == 0 {
                    continue;
                }
                let k_vec = g_full * Vector3::new(m0 as f64, m1 as f64, m2 as f64);
                let k2 = k_vec.dot(&k_vec);
                let weight = (-sigma * sigma * k2 / 2.0).exp() / k2;
                let kk = k_vec * k_vec.transpose();
                a += (1.0 / volume) * weight * kk * (k_vec.dot(delta_r)).cos();
            }
        }
    }

    if delta_r.norm() < 1e-10 {
        let self_term = -1.0 / (3.0 * (2.0 * std::f64::consts::PI).powf(1.5) * sigma.powi(3));
        a += Matrix3::identity() * self_term;
    }

    a
}
