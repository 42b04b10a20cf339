//! Linear spin-wave theory: quadratic boson Hamiltonian assembly, the
//! para-unitary Bogoliubov diagonalization, and the dynamical structure
//! factor built from a caller-chosen broadening kernel (spec.md §3, §4.8,
//! §4.9, §4.10).
//!
//! The dipole-mode assembly follows the local-frame Holstein-Primakoff
//! linearization of Toth & Lake (2015), which is also the formalism the
//! onsite-diagonal and bilinear-block formulas below are drawn from
//! verbatim. SU(N) mode is handled separately in [`sun`].

pub mod sun;

use std::f64::consts::PI;
use std::sync::Arc;

use faer::linalg::triangular_solve::solve_upper_triangular_in_place;
use faer::{perm, unzip, zip, Col, Mat, Par, Side};
use indicatif::ParallelProgressIterator;
use nalgebra::{Matrix3, Vector3};
use num_complex::Complex;
use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::constants::J;
use crate::crystal::Bond;
use crate::error::{Result, SpinError};
use crate::hamiltonian::Onsite;
use crate::system::{InteractionsStorage, Mode, System};
use crate::utils::block_matrix;
use crate::C64;

fn frobenius_norm(m: &Mat<C64>) -> f64 {
    let mut acc = 0.0_f64;
    for c in 0..m.ncols() {
        for r in 0..m.nrows() {
            acc += m[(r, c)].norm_sqr();
        }
    }
    acc.sqrt()
}

const ZERO_ENERGY_TOL: f64 = 1e-12;

/// A broadening kernel applied across bands (spec.md §4.9's "Broadening").
#[derive(Clone)]
pub enum Kernel {
    /// Returns band data directly, no smearing.
    Delta,
    Lorentzian { gamma: f64 },
    Gaussian { sigma: f64 },
    /// Arbitrary caller-supplied `(omega, delta_omega) -> weight`, integral 1.
    Custom(Arc<dyn Fn(f64, f64) -> f64 + Send + Sync>),
}

impl Kernel {
    /// Full width at half maximum, used by [`crate::kpm`]'s order estimate
    /// (spec.md §4.10); `None` for kernels that do not carry one (`Delta`,
    /// most `Custom` kernels), which the KPM path surfaces as
    /// `KernelWidthMissing`.
    pub fn fwhm(&self) -> Option<f64> {
        match self {
            Kernel::Delta => None,
            Kernel::Lorentzian { gamma } => Some(2.0 * gamma),
            Kernel::Gaussian { sigma } => Some(2.0 * (2.0 * 2f64.ln()).sqrt() * sigma),
            Kernel::Custom(_) => None,
        }
    }

    /// Name used in [`crate::error::SpinError::KernelWidthMissing`].
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::Delta => "delta",
            Kernel::Lorentzian { .. } => "lorentzian",
            Kernel::Gaussian { .. } => "gaussian",
            Kernel::Custom(_) => "custom",
        }
    }

    pub fn eval(&self, domega: f64, center_omega: f64) -> f64 {
        match self {
            Kernel::Delta => {
                if domega.abs() < 1e-9 {
                    1.0
                } else {
                    0.0
                }
            }
            Kernel::Lorentzian { gamma } => (gamma / PI) / (domega * domega + gamma * gamma),
            Kernel::Gaussian { sigma } => {
                (-0.5 * (domega / sigma).powi(2)).exp() / (sigma * (2.0 * PI).sqrt())
            }
            Kernel::Custom(f) => f(domega, center_omega),
        }
    }
}

/// Which global-Cartesian `(alpha, beta)` pair correlations `S^{alpha,beta}`
/// to compute and how to combine them into a caller-facing value (spec.md
/// §3's `MeasureSpec`, §4.9's per-`(alpha,beta)` intensity step). `alpha`,
/// `beta` index into `{x=0, y=1, z=2}`.
#[derive(Clone)]
pub struct MeasureSpec {
    correlations: Vec<(usize, usize)>,
    combiner: Arc<dyn Fn(&Vector3<f64>, &[C64]) -> Vec<f64> + Send + Sync>,
}

impl MeasureSpec {
    /// Custom `(alpha, beta)` index pairs and combiner; `combiner` receives
    /// `corr[k]`, the thermally-weighted `S^{alpha_k,beta_k}` for the `k`-th
    /// entry of `correlations`, and produces the caller-facing output.
    pub fn new(
        correlations: Vec<(usize, usize)>,
        combiner: impl Fn(&Vector3<f64>, &[C64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        MeasureSpec { correlations, combiner: Arc::new(combiner) }
    }

    /// The unpolarized trace `Re(S^xx + S^yy + S^zz)`, a single scalar per
    /// band (spec.md §4.9's default "Intensity (band form)").
    pub fn unpolarized_trace() -> Self {
        MeasureSpec {
            correlations: vec![(0, 0), (1, 1), (2, 2)],
            combiner: Arc::new(|_, corr| vec![corr.iter().map(|c| c.re).sum()]),
        }
    }

    /// All nine `(alpha, beta)` pairs, each reported as a separate component
    /// in `x, y, z` row-major order — the general polarized structure
    /// factor tensor (spec.md §8 scenario E1's per-component `tr S^{alpha
    /// beta}`).
    pub fn all_components() -> Self {
        let correlations = (0..3).flat_map(|a| (0..3).map(move |b| (a, b))).collect();
        MeasureSpec {
            correlations,
            combiner: Arc::new(|_, corr| corr.iter().map(|c| c.re).collect()),
        }
    }

    /// A single `(alpha, beta)` component.
    pub fn component(alpha: usize, beta: usize) -> Self {
        MeasureSpec {
            correlations: vec![(alpha, beta)],
            combiner: Arc::new(|_, corr| vec![corr[0].re]),
        }
    }
}

/// Thermal occupation prefactor `|1 + n_B(omega)| = |1/(1 - e^{-omega/kT})|`
/// (spec.md §4.9), with the `omega -> 0` limit handled by sign.
pub(crate) fn thermal_prefactor(omega: f64, kt: f64) -> f64 {
    if kt <= 0.0 {
        return if omega > 0.0 { 1.0 } else { 0.0 };
    }
    if omega.abs() < ZERO_ENERGY_TOL {
        return if omega >= 0.0 { 1.0 } else { 0.0 };
    }
    (1.0 / (1.0 - (-omega / kt).exp())).abs()
}

/// One incident bond direction `i -> j` reconstructed from homogeneous
/// storage, including the reverse of any bond that was culled on the other
/// endpoint (spec.md §3's `isculled`).
struct IncidentBond {
    bond: Bond,
    bilin: Matrix3<f64>,
}

fn incident_bonds(sys: &System, sub: usize) -> Vec<IncidentBond> {
    let homog = match &sys.interactions {
        InteractionsStorage::Homogeneous(v) => v,
        InteractionsStorage::Inhomogeneous(_) => {
            log::warn!(
                "spin-wave theory uses only the home-cell couplings of an inhomogeneous system"
            );
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for pc in homog[sub].pair.iter().filter(|pc| !pc.isculled) {
        out.push(IncidentBond {
            bond: pc.bond,
            bilin: pc.bilin.as_matrix(),
        });
    }
    for (other, interactions) in homog.iter().enumerate() {
        for pc in interactions
            .pair
            .iter()
            .filter(|pc| pc.isculled && pc.bond.j == sub)
        {
            let _ = other;
            let rev = pc.bond.reverse();
            out.push(IncidentBond {
                bond: rev,
                bilin: pc.bilin.as_matrix().transpose(),
            });
        }
    }
    out
}

/// Local frame `R` whose third column is the (unit) ordered-moment
/// direction, used for the Holstein-Primakoff linearization (spec.md §4.8).
fn local_frame(s: Vector3<f64>) -> Matrix3<f64> {
    let n = s.normalize();
    let helper = if n.z.abs() < 0.9 {
        Vector3::z()
    } else {
        Vector3::x()
    };
    let x = helper.cross(&n).normalize();
    let y = n.cross(&x);
    Matrix3::from_columns(&[x, y, n])
}

/// A frozen snapshot of a `System` plus the per-site local frames used to
/// build its spin-wave Hamiltonian (spec.md §3's `SpinWaveTheory`).
pub struct SpinWaveTheory {
    pub system: System,
    local_frames: Vec<Matrix3<f64>>,
    sqrt_s: Vec<f64>,
    /// Diagonal floor added to `H` before Cholesky so the decomposition
    /// succeeds at a true (possibly marginal) energy minimum (spec.md §4.8).
    pub energy_eps: f64,
}

impl SpinWaveTheory {
    pub fn new(system: System) -> Self {
        let nsub = system.nsub();
        let local_frames = (0..nsub)
            .map(|sub| local_frame(*system.dipoles.get((0, 0, 0), sub)))
            .collect();
        let sqrt_s = system.site_infos.iter().map(|si| si.s.sqrt()).collect();
        SpinWaveTheory {
            system,
            local_frames,
            sqrt_s,
            energy_eps: 1e-8,
        }
    }

    fn nsub(&self) -> usize {
        self.system.nsub()
    }

    /// Assemble `H(q)` (dipole mode) per spec.md §4.8.
    fn hamiltonian_dipole(&self, q: &Vector3<f64>) -> Mat<C64> {
        let l = self.nsub();
        let mut h11 = Mat::<C64>::zeros(l, l);
        let mut h12 = Mat::<C64>::zeros(l, l);
        let mut h22 = Mat::<C64>::zeros(l, l);

        for i in 0..l {
            let s_i = self.system.site_infos[i].s;
            let onsite_diag = match &self.system.interactions.get((0, 0, 0), i).onsite {
                Onsite::Classical(exp) => {
                    -3.0 * s_i * exp.c2[2] - 40.0 * s_i.powi(3) * exp.c4[4]
                        - 168.0 * s_i.powi(5) * exp.c6[6]
                }
                Onsite::Explicit(_) => 0.0,
            };
            let b = self.system.extfield.get((0, 0, 0), i);
            let g = self.system.site_infos[i].g;
            let eff_b = self.system.units.mu_b * (g.transpose() * b);
            let zeeman = eff_b.dot(&self.local_frames[i].column(2).into_owned()) * 0.5;
            h11[(i, i)] += C64::from(onsite_diag + zeeman);
            h22[(i, i)] += C64::from(onsite_diag + zeeman);

            for ib in incident_bonds(&self.system, i) {
                let j = ib.bond.j;
                let s = (s_i * self.system.site_infos[j].s).sqrt();
                let rt = self.local_frames[i].transpose() * ib.bilin * self.local_frames[j] * s;

                let phase = (J * (2.0 * PI) * q.dot(&ib.bond.n.map(|x| x as f64))).exp();

                let p = 0.25
                    * (rt[(0, 0)] - rt[(1, 1)]
                        - Complex::new(0.0, 1.0) * rt[(0, 1)]
                        - Complex::new(0.0, 1.0) * rt[(1, 0)]);
                let qq = 0.25
                    * (rt[(0, 0)] + rt[(1, 1)] - Complex::new(0.0, 1.0) * rt[(0, 1)]
                        + Complex::new(0.0, 1.0) * rt[(1, 0)]);

                h11[(i, j)] += p * phase;
                h22[(j, i)] += p.conj() * phase.conj();
                h12[(i, j)] += qq * phase;

                h11[(i, i)] += C64::from(-0.5 * rt[(2, 2)]);
                h22[(i, i)] += C64::from(-0.5 * rt[(2, 2)]);
            }
        }

        let h12_adj = h12.adjoint().to_owned();
        let mut h = block_matrix(&h11, &h12, &h12_adj, &h22);
        h = (h.clone() + h.adjoint()) * C64::from(0.5);
        for k in 0..2 * l {
            h[(k, k)] += C64::from(self.energy_eps);
        }
        h
    }

    fn hamiltonian(&self, q: &Vector3<f64>) -> Mat<C64> {
        match self.system.mode {
            Mode::SUN => sun::hamiltonian_sun(&self.system, q, self.energy_eps),
            _ => self.hamiltonian_dipole(q),
        }
    }

    /// Public accessor for `H(q)` used by the [`crate::kpm`] path, which
    /// works directly with the quadratic Hamiltonian rather than its
    /// Bogoliubov diagonalization (spec.md §4.10).
    pub fn hamiltonian_at(&self, q: &Vector3<f64>) -> Mat<C64> {
        self.hamiltonian(q)
    }

    /// Number of boson flavors (`L` in spec.md's `2L x 2L` convention): one
    /// per sublattice in dipole/largeS mode, `sum(Ns[sub] - 1)` in SU(N)
    /// mode (spec.md §4.8.1).
    pub fn nbands(&self) -> usize {
        match self.system.mode {
            Mode::SUN => self.system.ns.iter().map(|n| n - 1).sum(),
            _ => self.nsub(),
        }
    }

    /// `energies(sys, qs)` (spec.md §4.9's "Dispersion of a path"):
    /// para-unitary Bogoliubov diagonalization at every `q`, returning the
    /// first `L` (physical, `omega >= 0`) eigenvalues.
    pub fn dispersion(&self, qs: &[Vector3<f64>]) -> Result<Vec<Vec<f64>>> {
        qs.into_par_iter()
            .progress_count(qs.len() as u64)
            .map(|q| self.energies_at_q(q).map(|(e, _)| e))
            .collect()
    }

    /// Diagonalize `H(q)` via the para-unitary Bogoliubov transform of
    /// spec.md §4.9, returning `(omega, T)` with `T` the transformation used
    /// by [`Self::intensities_at_q`].
    fn energies_at_q(&self, q: &Vector3<f64>) -> Result<(Vec<f64>, Mat<C64>)> {
        let l = self.nbands();
        let h = self.hamiltonian(q);
        let n = h.nrows();

        let chol = h.clone().llt(Side::Lower).map_err(|_| SpinError::NotAGroundState {
            matrix_norm: frobenius_norm(&h),
        })?;
        let k = chol.L().adjoint().to_owned(); // upper triangular K with K^dagger K = H... see below

        // K here is L^dagger (upper triangular) so that K^dagger K = L L^dagger = H.
        let mut i_tilde = Mat::<C64>::zeros(n, n);
        for idx in 0..n {
            i_tilde[(idx, idx)] = if idx < l { C64::from(1.0) } else { C64::from(-1.0) };
        }

        // form K Itilde K^dagger and diagonalize
        let kik = &k * &i_tilde * k.adjoint();
        let kik = (kik.clone() + kik.adjoint()) * C64::from(0.5);
        let eig = kik
            .self_adjoint_eigen(Side::Lower)
            .map_err(|_| SpinError::NotAGroundState { matrix_norm: frobenius_norm(&h) })?;
        let eigvals_raw: Vec<f64> = eig.S().column_vector().iter().map(|x| x.re).collect();
        let eigvecs = eig.U().to_owned();

        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let key = |idx: usize| {
                let v = eigvals_raw[idx];
                (if v >= 0.0 { 0 } else { 1 }, -v.abs())
            };
            key(a).partial_cmp(&key(b)).unwrap()
        });

        let mut lambda_sorted = Col::<f64>::zeros(n);
        let mut u_sorted = Mat::<C64>::zeros(n, n);
        for (new_idx, &old_idx) in order.iter().enumerate() {
            lambda_sorted[new_idx] = eigvals_raw[old_idx];
            for r in 0..n {
                u_sorted[(r, new_idx)] = eigvecs[(r, old_idx)];
            }
        }

        let omegas: Vec<f64> = (0..l).map(|idx| 2.0 / lambda_sorted[idx].abs().max(1e-300)).collect();

        let mut inv_sqrt_lambda = Col::<C64>::zeros(n);
        for idx in 0..n {
            let lam = lambda_sorted[idx].abs().max(1e-300);
            inv_sqrt_lambda[idx] = C64::from(1.0 / lam.sqrt());
        }
        let rhs = &u_sorted * inv_sqrt_lambda.as_diagonal();
        let mut t = rhs.clone();
        solve_upper_triangular_in_place(k.as_ref(), t.as_mut(), Par::Seq);

        Ok((omegas, t))
    }

    /// `dynamical_structure_factor(qs, omegas, kernel, kt)` (spec.md §4.9's
    /// "Intensity" and "Broadening"): for each `q` compute the per-band
    /// energies and (unpolarized trace) intensities, then smear across the
    /// requested `omegas` with `kernel`.
    pub fn dynamical_structure_factor(
        &self,
        qs: &[Vector3<f64>],
        omegas: &[f64],
        kernel: &Kernel,
        kt: f64,
    ) -> Result<Vec<Vec<f64>>> {
        qs.into_par_iter()
            .progress_count(qs.len() as u64)
            .map(|q| {
                let (band_omegas, band_intensities) = self.intensities_at_q(q, kt)?;
                let mut row = vec![0.0; omegas.len()];
                for (b, &wb) in band_omegas.iter().enumerate() {
                    for (k, &w) in omegas.iter().enumerate() {
                        row[k] += kernel.eval(w - wb, wb) * band_intensities[b];
                    }
                }
                Ok(row)
            })
            .collect()
    }

    /// One-boson matrix elements of the global Cartesian spin observables
    /// `S^x, S^y, S^z`, indexed flat by boson flavor (spec.md §3's
    /// `MeasureSpec` "observables", §4.9's observable tensor): in dipole
    /// mode the Holstein-Primakoff coefficient `sqrt(S_i/2) (R_i[alpha,0] -
    /// i R_i[alpha,1])` of the local-frame `R_i`; in SU(N) mode the
    /// condensate-to-flavor matrix element of the physical spin operator
    /// (spec.md §4.8), via [`sun::one_boson_spin_amplitudes`].
    fn observable_amplitudes(&self, q: &Vector3<f64>) -> Vec<[C64; 3]> {
        if self.system.mode == Mode::SUN {
            return sun::one_boson_spin_amplitudes(&self.system, q);
        }
        let l = self.nsub();
        (0..l)
            .map(|i| {
                let phase = (J * (2.0 * PI) * q.dot(&self.system.crystal.positions[i])).exp();
                let amp = (self.sqrt_s[i] / 2f64.sqrt()) * phase;
                let r = &self.local_frames[i];
                [0usize, 1, 2].map(|alpha| amp * C64::new(r[(alpha, 0)], -r[(alpha, 1)]))
            })
            .collect()
    }

    /// Per-band, per-`(alpha,beta)` correlator `S^{alpha,beta}(q, band) =
    /// A_alpha(q, band) A_beta(q, band)^*` for every pair named by `measure`
    /// (spec.md §4.9's "Intensity (band form)" generalized to the full
    /// polarization tensor), contracting the one-boson observable
    /// amplitudes against the Bogoliubov eigenvectors `T`.
    fn band_correlations_at_q(
        &self,
        q: &Vector3<f64>,
        measure: &MeasureSpec,
    ) -> Result<(Vec<f64>, Vec<Vec<C64>>)> {
        let (omegas, t) = self.energies_at_q(q)?;
        let l = self.nbands();
        let amps = self.observable_amplitudes(q);

        let mut out = vec![vec![C64::from(0.0); measure.correlations.len()]; l];
        for b in 0..l {
            let mut a = [C64::from(0.0); 3];
            for i in 0..l {
                for (alpha, slot) in a.iter_mut().enumerate() {
                    *slot += amps[i][alpha] * t[(i, b)] + amps[i][alpha].conj() * t[(l + i, b)];
                }
            }
            for (k, &(alpha, beta)) in measure.correlations.iter().enumerate() {
                out[b][k] = a[alpha] * a[beta].conj();
            }
        }
        Ok((omegas, out))
    }

    /// Per-band intensities for an arbitrary [`MeasureSpec`] (spec.md §3's
    /// `MeasureSpec` applied per §4.9): the thermal prefactor is folded into
    /// each `(alpha,beta)` correlator before the combiner runs.
    pub fn intensities_at_q_with_measure(
        &self,
        q: &Vector3<f64>,
        measure: &MeasureSpec,
        kt: f64,
    ) -> Result<(Vec<f64>, Vec<Vec<f64>>)> {
        let (omegas, corr) = self.band_correlations_at_q(q, measure)?;
        let out = omegas
            .iter()
            .zip(corr.into_iter())
            .map(|(&w, band)| {
                let prefac = thermal_prefactor(w, kt);
                let scaled: Vec<C64> = band.iter().map(|c| *c * prefac).collect();
                (measure.combiner)(q, &scaled)
            })
            .collect();
        Ok((omegas, out))
    }

    /// `tr S^{alpha,alpha}(q)`: the three global-Cartesian diagonal
    /// dynamical structure factor components, summed over all bands
    /// (spec.md §8 scenario E1's "three nonzero diagonal tr S^{alpha
    /// beta}" values).
    pub fn diagonal_structure_factor_trace(&self, q: &Vector3<f64>, kt: f64) -> Result<[f64; 3]> {
        let (_omegas, per_band) = self.intensities_at_q_with_measure(q, &MeasureSpec::all_components(), kt)?;
        let mut totals = [0.0; 3];
        for band in &per_band {
            // MeasureSpec::all_components row-major order: (0,0) (0,1) (0,2) (1,0) (1,1) (1,2) (2,0) (2,1) (2,2)
            totals[0] += band[0];
            totals[1] += band[4];
            totals[2] += band[8];
        }
        Ok(totals)
    }

    /// Per-band (unpolarized) intensity at one `q` (spec.md §4.9's
    /// "Intensity (band form)"), the default single-scalar
    /// [`MeasureSpec::unpolarized_trace`] reduction used by
    /// [`Self::dynamical_structure_factor`] and
    /// [`Self::measured_intensities_at_q`].
    fn intensities_at_q(&self, q: &Vector3<f64>, kt: f64) -> Result<(Vec<f64>, Vec<f64>)> {
        let (omegas, per_band) =
            self.intensities_at_q_with_measure(q, &MeasureSpec::unpolarized_trace(), kt)?;
        let intensities = per_band.into_iter().map(|v| v[0]).collect();
        Ok((omegas, intensities))
    }

    /// Holstein-Primakoff transverse observable vectors `(O_x, O_y)` used by
    /// [`crate::kpm`]'s dipole-mode Chebyshev moments (spec.md §4.9's
    /// observable tensor, §4.10's per-pair moments); the `x, y` slice of
    /// [`Self::observable_amplitudes`].
    pub(crate) fn transverse_observables(&self, q: &Vector3<f64>) -> (Vec<C64>, Vec<C64>) {
        let amps = self.observable_amplitudes(q);
        let a_x = amps.iter().map(|a| a[0]).collect();
        let a_y = amps.iter().map(|a| a[1]).collect();
        (a_x, a_y)
    }

    /// [`Self::intensities_at_q`] multiplied by the per-sublattice magnetic
    /// form factor average, `f(|q|^2)` (spec.md §4.9's form-factor step,
    /// §8 test 10). Sublattices without a `form_factor` ion contribute a
    /// factor of 1.
    pub fn measured_intensities_at_q(&self, q: &Vector3<f64>, kt: f64) -> Result<(Vec<f64>, Vec<f64>)> {
        let (omegas, intensities) = self.intensities_at_q(q, kt)?;
        let q_cart = self.system.crystal.recip_vectors() * q;
        let q2 = q_cart.norm_squared();
        let mut ffs = Vec::with_capacity(self.nsub());
        for si in &self.system.site_infos {
            let f = match &si.form_factor {
                Some(ion) => crate::formfactor::lookup(ion)?.evaluate(q2),
                None => 1.0,
            };
            ffs.push(f);
        }
        let mean_ff = if ffs.is_empty() {
            1.0
        } else {
            ffs.iter().sum::<f64>() / ffs.len() as f64
        };
        let scaled = intensities
            .into_iter()
            .map(|v| v * mean_ff * mean_ff)
            .collect();
        Ok((omegas, scaled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crystal::symop::tests_support::cubic_crystal;
    use crate::hamiltonian::SiteInfo;
    use approx::assert_abs_diff_eq;
    use nalgebra::Matrix3;

    fn ferromagnet() -> SpinWaveTheory {
        let cryst = cubic_crystal();
        let site_infos = vec![SiteInfo::new(1.0, Matrix3::identity() * 2.0); cryst.natoms()];
        let sys = System::new(cryst, (1, 1, 1), site_infos, Mode::Dipole);
        SpinWaveTheory::new(sys)
    }

    #[test]
    fn ferromagnet_with_no_coupling_has_zero_gap() {
        let swt = ferromagnet();
        let e = swt.dispersion(&[Vector3::zeros()]).unwrap();
        assert_eq!(e.len(), 1);
        assert!(e[0].iter().all(|x| x.is_finite()));
    }

    #[test]
    fn hamiltonian_is_hermitian_at_random_q() {
        // spec.md §8 test 5: "Hermiticity of H(q)".
        let swt = ferromagnet();
        let q = Vector3::new(0.37, -0.21, 0.58);
        let h = swt.hamiltonian_at(&q);
        for r in 0..h.nrows() {
            for c in 0..h.ncols() {
                assert_abs_diff_eq!(h[(r, c)].re, h[(c, r)].re, epsilon = 1e-12);
                assert_abs_diff_eq!(h[(r, c)].im, -h[(c, r)].im, epsilon = 1e-12);
            }
        }
    }
}
