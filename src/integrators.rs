//! Time integration of the classical equation of motion: norm-preserving
//! implicit midpoint, and Langevin damping/noise on top of it (spec.md §2
//! item 6, §4.6).

use nalgebra::{DVector, Vector3};
use num_complex::Complex;
use rand_distr::{Distribution, StandardNormal};

use crate::grid::Grid;
use crate::system::{Mode, System};
use crate::C64;

/// Norm-preserving implicit midpoint integrator for the LL/SU(N) equation of
/// motion (spec.md §4.6).
///
/// Dipole mode solves `s' = s + dt (s'+s)/2 x B((s'+s)/2)` by fixed-point
/// iteration and renormalizes `s' = kappa s'/|s'|`; SU(N) mode solves the
/// analogous unitary flow on coherent kets and renormalizes to unit norm.
#[derive(Debug, Clone, Copy)]
pub struct ImplicitMidpoint {
    pub dt: f64,
    /// Maximum fixed-point iterations before giving up (the reference
    /// implementation iterates until convergence; this is a safety bound).
    pub max_iters: usize,
}

impl ImplicitMidpoint {
    pub fn new(dt: f64) -> Self {
        ImplicitMidpoint {
            dt,
            max_iters: 100,
        }
    }

    /// Advance `sys` by one step of size `self.dt`.
    pub fn step(&self, sys: &mut System) {
        match sys.mode {
            Mode::SUN => self.step_sun(sys),
            _ => self.step_dipole(sys),
        }
    }

    fn step_dipole(&self, sys: &mut System) {
        let latsize = sys.latsize;
        let nsub = sys.nsub();
        let s_old = sys.dipoles.clone();
        let mut s_new = s_old.clone();

        for _ in 0..self.max_iters {
            let midpoint = average_grids(&s_old, &s_new);
            let field = effective_field(sys, &midpoint);
            let mut max_delta = 0.0_f64;
            for c0 in 0..latsize.0 {
                for c1 in 0..latsize.1 {
                    for c2 in 0..latsize.2 {
                        for sub in 0..nsub {
                            let cell = (c0, c1, c2);
                            let s0 = *s_old.get(cell, sub);
                            let m = *midpoint.get(cell, sub);
                            let b = *field.get(cell, sub);
                            let candidate = s0 + self.dt * m.cross(&b);
                            let delta = (candidate - *s_new.get(cell, sub)).norm();
                            max_delta = max_delta.max(delta);
                            *s_new.get_mut(cell, sub) = candidate;
                        }
                    }
                }
            }
            if max_delta < 1e-12 * self.dt.max(1e-300) {
                break;
            }
        }

        for c0 in 0..latsize.0 {
            for c1 in 0..latsize.1 {
                for c2 in 0..latsize.2 {
                    for sub in 0..nsub {
                        let cell = (c0, c1, c2);
                        let kappa = *sys.kappas.get(cell, sub);
                        let v = s_new.get_mut(cell, sub);
                        let n = v.norm();
                        if n > 1e-300 {
                            *v *= kappa / n;
                        }
                    }
                }
            }
        }
        sys.dipoles = s_new;
    }

    fn step_sun(&self, sys: &mut System) {
        let latsize = sys.latsize;
        let nsub = sys.nsub();
        let z_old = sys.coherents.clone();
        let mut z_new = z_old.clone();

        for _ in 0..self.max_iters {
            let midpoint = average_coherents(&z_old, &z_new);
            let mut max_delta = 0.0_f64;
            for c0 in 0..latsize.0 {
                for c1 in 0..latsize.1 {
                    for c2 in 0..latsize.2 {
                        for sub in 0..nsub {
                            let cell = (c0, c1, c2);
                            let z0 = z_old.get(cell, sub).clone();
                            let zm = midpoint.get(cell, sub).clone();
                            let heff = sys.effective_hamiltonian_coherent(cell, sub, &zm);
                            // i Z' = i Z + dt H_eff(Zm) Zm  =>  Z' = Z - i dt H_eff Zm
                            let candidate = &z0 - Complex::new(0.0, 1.0) * self.dt * (&heff * &zm);
                            let delta = (&candidate - z_new.get(cell, sub)).norm();
                            max_delta = max_delta.max(delta);
                            *z_new.get_mut(cell, sub) = candidate;
                        }
                    }
                }
            }
            if max_delta < 1e-12 * self.dt.max(1e-300) {
                break;
            }
        }

        for c0 in 0..latsize.0 {
            for c1 in 0..latsize.1 {
                for c2 in 0..latsize.2 {
                    for sub in 0..nsub {
                        let cell = (c0, c1, c2);
                        let z = z_new.get_mut(cell, sub);
                        let n = z.norm();
                        if n > 1e-300 {
                            *z /= Complex::from(n);
                        }
                    }
                }
            }
        }
        sys.coherents = z_new;
        sys.sync_dipoles_from_coherents();
    }
}

/// Langevin damping + noise added on top of the deterministic midpoint flow
/// (spec.md §4.6): `ds = B x s dt - lambda s x (s x B) dt + sqrt(2 lambda kT)
/// s x xi dt`, implemented as the deterministic midpoint step followed by a
/// Gaussian perturbation projected onto the tangent sphere (dipole) or
/// tangent hyperplane of the unit-norm ket (SU(N)).
#[derive(Debug, Clone, Copy)]
pub struct Langevin {
    pub dt: f64,
    pub damping: f64,
    pub kt: f64,
}

impl Langevin {
    pub fn new(dt: f64, damping: f64, kt: f64) -> Self {
        Langevin { dt, damping, kt }
    }

    pub fn step(&self, sys: &mut System) {
        let midpoint = ImplicitMidpoint::new(self.dt);
        match sys.mode {
            Mode::SUN => self.step_sun(sys, &midpoint),
            _ => self.step_dipole(sys, &midpoint),
        }
    }

    fn step_dipole(&self, sys: &mut System, midpoint: &ImplicitMidpoint) {
        let latsize = sys.latsize;
        let nsub = sys.nsub();
        let field = effective_field(sys, &sys.dipoles);
        let noise_amp = (2.0 * self.damping * self.kt).max(0.0).sqrt();

        let mut deterministic = sys.dipoles.clone();
        for c0 in 0..latsize.0 {
            for c1 in 0..latsize.1 {
                for c2 in 0..latsize.2 {
                    for sub in 0..nsub {
                        let cell = (c0, c1, c2);
                        let s = *sys.dipoles.get(cell, sub);
                        let b = *field.get(cell, sub);
                        let damping_term = s.cross(&s.cross(&b));
                        let xi = Vector3::new(
                            StandardNormal.sample(&mut sys.rng),
                            StandardNormal.sample(&mut sys.rng),
                            StandardNormal.sample(&mut sys.rng),
                        );
                        let stochastic = s.cross(&xi) * noise_amp;
                        let drift = s.cross(&b) - self.damping * damping_term;
                        *deterministic.get_mut(cell, sub) =
                            s + self.dt * drift + self.dt * stochastic;
                    }
                }
            }
        }
        sys.dipoles = deterministic;
        midpoint.step(sys);
    }

    fn step_sun(&self, sys: &mut System, midpoint: &ImplicitMidpoint) {
        // Same structure in the SU(N) tangent hyperplane: perturb by a
        // Gaussian ket orthogonal to the current state, then renormalize via
        // the deterministic midpoint's unitary flow.
        let latsize = sys.latsize;
        let nsub = sys.nsub();
        let noise_amp = (2.0 * self.damping * self.kt).max(0.0).sqrt();
        let mut perturbed = sys.coherents.clone();
        for c0 in 0..latsize.0 {
            for c1 in 0..latsize.1 {
                for c2 in 0..latsize.2 {
                    for sub in 0..nsub {
                        let cell = (c0, c1, c2);
                        let z = sys.coherents.get(cell, sub).clone();
                        let n = z.len();
                        let mut xi = DVector::<C64>::zeros(n);
                        for k in 0..n {
                            xi[k] = Complex::new(
                                StandardNormal.sample(&mut sys.rng),
                                StandardNormal.sample(&mut sys.rng),
                            );
                        }
                        // project xi onto the tangent hyperplane of z (remove the
                        // component along z itself)
                        let overlap: C64 = z.dotc(&xi);
                        let xi_perp = &xi - &z * overlap;
                        let candidate = &z + Complex::from(self.dt.sqrt() * noise_amp) * xi_perp;
                        *perturbed.get_mut(cell, sub) = candidate;
                    }
                }
            }
        }
        sys.coherents = perturbed;
        for v in sys.coherents.as_mut_slice() {
            let n = v.norm();
            if n > 1e-300 {
                *v /= Complex::from(n);
            }
        }
        sys.sync_dipoles_from_coherents();
        midpoint.step(sys);
    }
}

fn average_grids(a: &Grid<Vector3<f64>>, b: &Grid<Vector3<f64>>) -> Grid<Vector3<f64>> {
    Grid::from_fn(a.latsize, a.nsub, |c0, c1, c2, sub| {
        0.5 * (a.get((c0, c1, c2), sub) + b.get((c0, c1, c2), sub))
    })
}

fn average_coherents(a: &Grid<DVector<C64>>, b: &Grid<DVector<C64>>) -> Grid<DVector<C64>> {
    Grid::from_fn(a.latsize, a.nsub, |c0, c1, c2, sub| {
        (a.get((c0, c1, c2), sub) + b.get((c0, c1, c2), sub)) * Complex::from(0.5)
    })
}

/// `B = -grad_s E` evaluated at a (possibly midpoint) dipole configuration,
/// by temporarily substituting it into the system (spec.md §4.5's
/// `set_energy_grad_dipoles!`, reused here as the effective field entering
/// the equation of motion).
fn effective_field(sys: &System, config: &Grid<Vector3<f64>>) -> Grid<Vector3<f64>> {
    let mut grad = sys.energy_grad_dipoles_for(config);
    for v in grad.as_mut_slice() {
        *v = -*v;
    }
    grad
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crystal::symop::tests_support::cubic_crystal;
    use crate::hamiltonian::SiteInfo;
    use nalgebra::Matrix3;

    #[test]
    fn implicit_midpoint_preserves_norm() {
        let cryst = cubic_crystal();
        let site_infos = vec![SiteInfo::new(1.0, Matrix3::identity()); cryst.natoms()];
        let mut sys = System::new(cryst, (2, 2, 2), site_infos, Mode::Dipole);
        sys.set_external_field(Vector3::new(0.1, 0.2, 0.3));

        let integrator = ImplicitMidpoint::new(0.01);
        for _ in 0..20 {
            integrator.step(&mut sys);
        }
        for (c0, c1, c2, sub) in sys.dipoles.iter_sites().collect::<Vec<_>>() {
            let norm = sys.dipoles.get((c0, c1, c2), sub).norm();
            assert!((norm - 1.0).abs() < 1e-10, "norm drifted: {norm}");
        }
    }
}
