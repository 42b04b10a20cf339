//! SU(N) spin-wave Hamiltonian assembly (spec.md §4.8 "SU(N) mode", §4.8.1).
//!
//! Bosons are indexed by flavor `2..N` at each site (the condensate direction
//! is index 1); onsite coupling and general pair terms are expanded into the
//! ten matrix elements of §4.8.1 and accumulated into the `[H11 H12; H12† H22]`
//! block layout shared with the dipole-mode assembly.

use std::f64::consts::PI;

use faer::Mat;
use nalgebra::{Matrix3, Vector3};
use num_complex::Complex;

use crate::constants::J;
use crate::crystal::Bond;
use crate::hamiltonian::Onsite;
use crate::system::{InteractionsStorage, System};
use crate::utils::block_matrix;
use crate::C64;
use nalgebra::DMatrix;

/// One bond incident on `sub` carrying general (SU(N)) pair terms, with `A`
/// always acting on `sub` and `B` on the other endpoint — the reverse of a
/// culled bond has its `(A, B)` pair swapped to preserve this convention
/// (mirrors [`crate::system::System::effective_hamiltonian_coherent`]).
struct IncidentGeneral {
    bond: Bond,
    pairs: Vec<(DMatrix<C64>, DMatrix<C64>)>,
}

/// Expand a 3x3 bilinear exchange matrix `J` on a bond `i -> j` into the
/// `(A, B)` Hermitian operator-pair form spec.md §4.8 "SU(N) mode" requires
/// ("bilinear *and* general pair terms are expanded into ten matrix
/// elements"): `s_i . J . s_j = sum_{ab} J_{ab} S^a_i S^b_j`, with `A =
/// J_{ab} S^a` carrying the scalar coefficient and `B = S^b` left bare.
/// Near-zero entries of `J` are skipped.
fn bilinear_to_general(j_mat: &Matrix3<f64>, s_i: f64, s_j: f64) -> Vec<(DMatrix<C64>, DMatrix<C64>)> {
    let (sx_i, sy_i, sz_i) = crate::coupling::su2::spin_matrices(s_i);
    let (sx_j, sy_j, sz_j) = crate::coupling::su2::spin_matrices(s_j);
    let ops_i = [sx_i, sy_i, sz_i];
    let ops_j = [sx_j, sy_j, sz_j];
    let mut out = Vec::new();
    for a in 0..3 {
        for b in 0..3 {
            let coeff = j_mat[(a, b)];
            if coeff.abs() < 1e-13 {
                continue;
            }
            out.push((&ops_i[a] * Complex::from(coeff), ops_j[b].clone()));
        }
    }
    out
}

fn incident_general(sys: &System, sub: usize) -> Vec<IncidentGeneral> {
    let homog = match &sys.interactions {
        InteractionsStorage::Homogeneous(v) => v,
        InteractionsStorage::Inhomogeneous(_) => {
            log::warn!(
                "SU(N) spin-wave theory uses only the home-cell couplings of an inhomogeneous system"
            );
            return Vec::new();
        }
    };
    let mut out = Vec::new();
    for pc in homog[sub].pair.iter().filter(|pc| !pc.isculled) {
        let mut pairs = bilinear_to_general(
            &pc.bilin.as_matrix(),
            sys.site_infos[sub].s,
            sys.site_infos[pc.bond.j].s,
        );
        pairs.extend(pc.general.iter().cloned());
        if pairs.is_empty() {
            continue;
        }
        out.push(IncidentGeneral { bond: pc.bond, pairs });
    }
    for interactions in homog.iter() {
        for pc in interactions.pair.iter().filter(|pc| pc.isculled && pc.bond.j == sub) {
            let rev = pc.bond.reverse();
            let mut pairs = bilinear_to_general(
                &pc.bilin.as_matrix(),
                sys.site_infos[pc.bond.i].s,
                sys.site_infos[sub].s,
            );
            pairs.extend(pc.general.iter().cloned());
            let swapped: Vec<_> = pairs.into_iter().map(|(a, b)| (b, a)).collect();
            if swapped.is_empty() {
                continue;
            }
            out.push(IncidentGeneral { bond: rev, pairs: swapped });
        }
    }
    out
}

/// Assemble `H(q)` in SU(N) mode per spec.md §4.8.1.
pub fn hamiltonian_sun(sys: &System, q: &Vector3<f64>, energy_eps: f64) -> Mat<C64> {
    let nsub = sys.nsub();
    let flavor_counts: Vec<usize> = sys.ns.iter().map(|n| n.saturating_sub(1)).collect();
    let mut offsets = vec![0usize; nsub];
    let mut running = 0usize;
    for sub in 0..nsub {
        offsets[sub] = running;
        running += flavor_counts[sub];
    }
    let l = running;

    let mut h11 = Mat::<C64>::zeros(l, l);
    let mut h12 = Mat::<C64>::zeros(l, l);
    let mut h22 = Mat::<C64>::zeros(l, l);

    // onsite: c_{mn} = 1/2 (op[m,n] - delta_{mn} op[N,N]), m,n in 2..N.
    for sub in 0..nsub {
        let n_dim = sys.ns[sub];
        if n_dim < 2 {
            continue;
        }
        let off = offsets[sub];
        let last = n_dim - 1;
        let op = match &sys.interactions.get((0, 0, 0), sub).onsite {
            Onsite::Explicit(m) => m.clone(),
            Onsite::Classical(_) => DMatrix::<C64>::zeros(n_dim, n_dim),
        };
        for m1 in 2..=n_dim {
            let km = m1 - 2;
            for n1 in 2..=n_dim {
                let kn = n1 - 2;
                let delta = if m1 == n1 { 1.0 } else { 0.0 };
                let c = 0.5 * (op[(m1 - 1, n1 - 1)] - Complex::from(delta) * op[(last, last)]);
                h11[(off + km, off + kn)] += c;
                h22[(off + kn, off + km)] += c;
            }
        }
    }

    // general pair terms, ten-matrix-element template of spec.md §4.8.1.
    for sub in 0..nsub {
        for ib in incident_general(sys, sub) {
            let j_sub = ib.bond.j;
            let n_i = sys.ns[sub];
            let n_j = sys.ns[j_sub];
            let nmin = n_i.min(n_j);
            if nmin < 2 {
                continue;
            }
            let off_i = offsets[sub];
            let off_j = offsets[j_sub];
            let last_a = n_i - 1;
            let last_b = n_j - 1;
            let phase = (J * (2.0 * PI) * q.dot(&ib.bond.n.map(|x| x as f64))).exp();
            let phase_conj = phase.conj();

            for (a, b) in &ib.pairs {
                for m1 in 2..=nmin {
                    let km = m1 - 2;
                    for n1 in 2..=nmin {
                        let kn = n1 - 2;
                        let delta = if m1 == n1 { 1.0 } else { 0.0 };

                        let c1 = 0.5 * (a[(m1 - 1, n1 - 1)] - Complex::from(delta) * a[(last_a, last_a)])
                            * b[(last_b, last_b)];
                        let c2 = 0.5
                            * a[(last_a, last_a)]
                            * (b[(m1 - 1, n1 - 1)] - Complex::from(delta) * b[(last_b, last_b)]);
                        let c3 = 0.5 * a[(m1 - 1, last_a)] * b[(last_b, n1 - 1)];
                        let c4 = 0.5 * a[(last_a, m1 - 1)] * b[(n1 - 1, last_b)];
                        let c5 = 0.5 * a[(m1 - 1, last_a)] * b[(n1 - 1, last_b)];

                        h11[(off_i + km, off_i + kn)] += c1;
                        h22[(off_i + kn, off_i + km)] += c1;

                        h11[(off_j + km, off_j + kn)] += c2;
                        h22[(off_j + kn, off_j + km)] += c2;

                        h11[(off_i + km, off_j + kn)] += c3 * phase;
                        h22[(off_j + kn, off_i + km)] += c3 * phase_conj;

                        h11[(off_j + kn, off_i + km)] += c4 * phase_conj;
                        h22[(off_i + km, off_j + kn)] += c4 * phase;

                        h12[(off_i + km, off_j + kn)] += c5 * phase;
                        h12[(off_j + kn, off_i + km)] += c5 * phase_conj;
                    }
                }
            }
        }
    }

    let h12_adj = h12.adjoint().to_owned();
    let mut h = block_matrix(&h11, &h12, &h12_adj, &h22);
    h = (h.clone() + h.adjoint()) * C64::from(0.5);
    for k in 0..2 * l {
        h[(k, k)] += C64::from(energy_eps);
    }
    h
}

/// Flavor dimension of the SU(N) boson basis, `sum_sub (N_sub - 1)` —
/// the row/column count of [`hamiltonian_sun`]'s `H11` block.
pub fn flavor_dim(sys: &System) -> usize {
    sys.ns.iter().map(|n| n.saturating_sub(1)).sum()
}

/// Linear-order (one-boson) matrix elements of the physical spin operators
/// `S^x, S^y, S^z` in the SU(N) boson basis, indexed flat by flavor in the
/// same `offset + (m1 - 2)` order [`hamiltonian_sun`] uses for `H11`/`H22`.
///
/// To linear order in the flavor bosons, `<Z|S^alpha|Z> ~= S^alpha[0,0] +
/// sum_flavor (S^alpha[0,flavor] a_flavor + S^alpha[flavor,0] a_flavor^dagger)`
/// (condensate at basis index 0, per this module's §4.8 convention), so the
/// coefficient of the annihilation operator is `S^alpha[0, flavor]`.
pub fn one_boson_spin_amplitudes(sys: &System, q: &Vector3<f64>) -> Vec<[C64; 3]> {
    let nsub = sys.nsub();
    let l = flavor_dim(sys);
    let mut out = vec![[C64::from(0.0); 3]; l];
    let mut offset = 0usize;
    for sub in 0..nsub {
        let n_dim = sys.ns[sub];
        if n_dim < 2 {
            offset += n_dim.saturating_sub(1);
            continue;
        }
        let s = sys.site_infos[sub].s;
        let (sx, sy, sz) = crate::coupling::su2::spin_matrices(s);
        let ops = [sx, sy, sz];
        let phase = (J * (2.0 * PI) * q.dot(&sys.crystal.positions[sub])).exp();
        for m1 in 2..=n_dim {
            let row = m1 - 1;
            let km = m1 - 2;
            let mut amp = [C64::from(0.0); 3];
            for (k, op) in ops.iter().enumerate() {
                amp[k] = phase * op[(0, row)];
            }
            out[offset + km] = amp;
        }
        offset += n_dim - 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crystal::symop::tests_support::cubic_crystal;
    use crate::hamiltonian::SiteInfo;
    use crate::system::Mode;
    use nalgebra::Matrix3;

    #[test]
    fn hermitian_with_no_couplings() {
        let cryst = cubic_crystal();
        let site_infos = vec![SiteInfo::new(1.0, Matrix3::identity()); cryst.natoms()];
        let sys = System::new(cryst, (1, 1, 1), site_infos, Mode::SUN);
        let h = hamiltonian_sun(&sys, &Vector3::new(0.1, 0.2, 0.3), 1e-8);
        for r in 0..h.nrows() {
            for c in 0..h.ncols() {
                assert!((h[(r, c)] - h[(c, r)].conj()).norm() < 1e-12);
            }
        }
    }
}
