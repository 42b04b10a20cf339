//! Crystal & symmetry (spec.md §2 item 1, §3, §4.1, §8 item 1).
//!
//! A `Crystal` wraps a user-supplied (and, per spec.md §1, trusted) list of
//! symmetry operations together with the lattice and atom positions; this
//! module never parses a CIF file or a space-group symbol — that provider
//! lives outside this crate.

mod bond;
mod symop;

pub use bond::Bond;
pub use symop::SymOp;

use nalgebra::{Matrix3, Vector3};

/// A unit cell: lattice vectors, sublattice positions, and the symmetry
/// operations that act on them.
///
/// Invariants (spec.md §3): `symops` is assumed closed under composition
/// modulo lattice translation (spec.md §8 item 1 is exactly a test of this);
/// atoms sharing a `classes` entry share a `types` entry; positions are
/// unique modulo `symprec`.
#[derive(Debug, Clone)]
pub struct Crystal {
    /// Columns are the three lattice vectors, in Å.
    pub latvecs: Matrix3<f64>,
    /// Fractional coordinates in `[0, 1)^3`, one per atom.
    pub positions: Vec<Vector3<f64>>,
    /// A string tag per atom (chemical species, e.g.).
    pub types: Vec<String>,
    /// Equivalence class index per atom (atoms related by `symops`).
    pub classes: Vec<usize>,
    /// The symmetry operations `(R, t)` of the space group, in fractional
    /// coordinates.
    pub symops: Vec<SymOp>,
    /// Numerical tolerance used for all position/matrix comparisons.
    pub symprec: f64,
}

impl Crystal {
    /// Build a crystal from explicit symmetry operations (spec.md §6's
    /// `Crystal(latvecs, positions[, spacegroup_symbol])` constructor, minus
    /// the spacegroup-symbol lookup which is out of scope per spec.md §1).
    ///
    /// Positions are sorted by class then lexicographic fractional
    /// coordinate, matching the invariant in spec.md §6.
    pub fn new(
        latvecs: Matrix3<f64>,
        mut positions: Vec<Vector3<f64>>,
        mut types: Vec<String>,
        symops: Vec<SymOp>,
        symprec: f64,
    ) -> Self {
        for p in positions.iter_mut() {
            wrap_frac_in_place(p);
        }
        let classes = compute_classes(&positions, &symops, symprec);

        // sort by (class, lexicographic fractional coordinate)
        let n = positions.len();
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            classes[a].cmp(&classes[b]).then_with(|| {
                let pa = positions[a];
                let pb = positions[b];
                pa.x.partial_cmp(&pb.x)
                    .unwrap()
                    .then(pa.y.partial_cmp(&pb.y).unwrap())
                    .then(pa.z.partial_cmp(&pb.z).unwrap())
            })
        });
        positions = order.iter().map(|&i| positions[i]).collect();
        types = order.iter().map(|&i| types[i].clone()).collect();
        let classes = order.iter().map(|&i| classes[i]).collect::<Vec<_>>();
        // re-derive class labels 0..k in sorted order
        let classes = renumber_classes(&classes);

        Crystal {
            latvecs,
            positions,
            types,
            classes,
            symops,
            symprec,
        }
    }

    pub fn natoms(&self) -> usize {
        self.positions.len()
    }

    pub fn volume(&self) -> f64 {
        self.latvecs.determinant().abs()
    }

    pub fn recip_vectors(&self) -> Matrix3<f64> {
        // columns of latvecs^-T times 2 pi
        self.latvecs
            .transpose()
            .try_inverse()
            .expect("lattice vectors must be invertible")
            * (2.0 * std::f64::consts::PI)
    }

    pub fn cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.latvecs * frac
    }

    /// Cartesian rotation matrix for a fractional-coordinate symmetry
    /// operation: `R_s = latvecs . s.R . latvecs^-1` (spec.md §4.1).
    pub fn cartesian_rotation(&self, r_frac: &Matrix3<f64>) -> Matrix3<f64> {
        let linv = self
            .latvecs
            .try_inverse()
            .expect("lattice vectors must be invertible");
        self.latvecs * r_frac * linv
    }

    /// Locate the atom index at fractional position `p` (mod 1), within
    /// `symprec`. Returns `None` if no atom matches.
    pub fn find_atom(&self, p: &Vector3<f64>) -> Option<usize> {
        let mut q = *p;
        wrap_frac_in_place(&mut q);
        self.positions.iter().position(|a| {
            let mut d = a - q;
            wrap_delta_in_place(&mut d);
            d.norm() < self.symprec
        })
    }

    /// Apply a symmetry operation to atom `i`, returning the destination
    /// atom index and the lattice-vector shift absorbed by wrapping back
    /// into `[0,1)^3`.
    pub fn apply_symop_to_atom(&self, op: &SymOp, i: usize) -> (usize, Vector3<f64>) {
        let p = op.r * self.positions[i] + op.t;
        let mut wrapped = p;
        let shift = frac_floor(&mut wrapped);
        let j = self
            .find_atom(&wrapped)
            .expect("symmetry operation maps atom outside the crystal's orbit");
        (j, shift)
    }

    /// Apply a symmetry operation to a bond, returning the image bond.
    ///
    /// `n` is the integer cell offset of `j` relative to `i`; a symop maps
    /// atom `i` to `i'` with some lattice shift `u_i`, atom `j` to `j'` with
    /// shift `u_j`, and the new cell offset is `round(R n + u_j - u_i)`.
    pub fn apply_symop_to_bond(&self, op: &SymOp, b: Bond) -> Bond {
        let (i2, shift_i) = self.apply_symop_to_atom(op, b.i);
        let j_frac_cell = self.positions[b.j] + b.n.map(|x| x as f64);
        let p = op.r * j_frac_cell + op.t;
        let mut wrapped = p;
        let shift_j = frac_floor(&mut wrapped);
        let j2 = self
            .find_atom(&wrapped)
            .expect("symmetry operation maps atom outside the crystal's orbit");
        let n2 = shift_j - shift_i;
        Bond {
            i: i2,
            j: j2,
            n: round_vec(&n2),
        }
    }

    /// Verify that `symops` is closed under composition modulo lattice
    /// translation (spec.md §8 item 1).
    pub fn symmetry_is_closed(&self) -> bool {
        for s in &self.symops {
            for t in &self.symops {
                let composed = s.compose(t);
                if !self.symops.iter().any(|u| u.approx_eq(&composed, self.symprec)) {
                    return false;
                }
            }
        }
        true
    }

    /// The self-symmetry group of a bond: operations (possibly combined with
    /// a bond-reversal flag) that map `b` to itself or to `reverse(b)`
    /// (spec.md §4.1).
    pub fn bond_stabilizer(&self, b: Bond) -> Vec<(SymOp, i32)> {
        let rb = b.reverse();
        let mut out = Vec::new();
        for s in &self.symops {
            let image = self.apply_symop_to_bond(s, b);
            if image == b {
                out.push((s.clone(), 1));
            } else if image == rb {
                out.push((s.clone(), -1));
            }
        }
        out
    }

    /// Enumerate every bond symmetry-related to `b_ref`, one entry per
    /// (starting atom, orbit member) pair, together with the operation that
    /// produced it (spec.md §4.1's `all_symmetry_related_couplings`).
    pub fn bond_orbit(&self, b_ref: Bond) -> Vec<(Bond, SymOp, i32)> {
        let mut seen: Vec<Bond> = Vec::new();
        let mut out = Vec::new();
        for s in &self.symops {
            let image = self.apply_symop_to_bond(s, b_ref);
            let (canon, sign) = image.canonical_with_sign();
            if seen.iter().any(|b| *b == canon) {
                continue;
            }
            seen.push(canon);
            out.push((image, s.clone(), sign));
        }
        out
    }
}

fn wrap_frac_in_place(p: &mut Vector3<f64>) {
    for k in 0..3 {
        p[k] -= p[k].floor();
    }
}

fn wrap_delta_in_place(d: &mut Vector3<f64>) {
    for k in 0..3 {
        d[k] -= d[k].round();
    }
}

/// Wraps `p` into `[0,1)^3` in place, returning the integer shift subtracted.
fn frac_floor(p: &mut Vector3<f64>) -> Vector3<f64> {
    let mut shift = Vector3::zeros();
    for k in 0..3 {
        let f = p[k].floor();
        shift[k] = f;
        p[k] -= f;
    }
    shift
}

fn round_vec(v: &Vector3<f64>) -> Vector3<i32> {
    Vector3::new(
        v.x.round() as i32,
        v.y.round() as i32,
        v.z.round() as i32,
    )
}

fn compute_classes(positions: &[Vector3<f64>], symops: &[SymOp], symprec: f64) -> Vec<usize> {
    let n = positions.len();
    let mut classes = vec![usize::MAX; n];
    let mut next_class = 0usize;
    for i in 0..n {
        if classes[i] != usize::MAX {
            continue;
        }
        classes[i] = next_class;
        for s in symops {
            let p = s.r * positions[i] + s.t;
            let mut wrapped = p;
            wrap_frac_in_place(&mut wrapped);
            if let Some(j) = positions.iter().position(|a| {
                let mut d = a - wrapped;
                wrap_delta_in_place(&mut d);
                d.norm() < symprec
            }) {
                if classes[j] == usize::MAX {
                    classes[j] = next_class;
                }
            }
        }
        next_class += 1;
    }
    classes
}

fn renumber_classes(classes: &[usize]) -> Vec<usize> {
    let mut map = std::collections::HashMap::new();
    let mut next = 0usize;
    classes
        .iter()
        .map(|&c| {
            *map.entry(c).or_insert_with(|| {
                let v = next;
                next += 1;
                v
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_cubic() -> Crystal {
        let latvecs = Matrix3::identity();
        let positions = vec![Vector3::new(0.0, 0.0, 0.0)];
        let types = vec!["A".to_string()];
        let symops = vec![SymOp::identity()];
        Crystal::new(latvecs, positions, types, symops, 1e-6)
    }

    #[test]
    fn single_atom_crystal_is_closed() {
        let c = identity_cubic();
        assert!(c.symmetry_is_closed());
    }

    #[test]
    fn cubic_point_group_is_closed() {
        // full cubic point group (48 ops) acting on a single atom at the origin
        let c = crate::crystal::symop::tests_support::cubic_crystal();
        assert!(c.symmetry_is_closed());
    }

    #[test]
    fn bond_reverse_is_involution() {
        let b = Bond::new(0, 1, Vector3::new(1, 0, 0));
        assert_eq!(b.reverse().reverse(), b);
    }
}
