use nalgebra::{Matrix3, Vector3};

/// A crystal symmetry operation `(R, t)` acting on fractional coordinates as
/// `x -> R x + t` (spec.md §3).
#[derive(Debug, Clone)]
pub struct SymOp {
    /// Orthogonal, integer-in-fractional-coordinates rotation/reflection part.
    pub r: Matrix3<f64>,
    /// Translation part, in `[0, 1)^3`.
    pub t: Vector3<f64>,
}

impl SymOp {
    pub fn new(r: Matrix3<f64>, t: Vector3<f64>) -> Self {
        SymOp { r, t }
    }

    pub fn identity() -> Self {
        SymOp {
            r: Matrix3::identity(),
            t: Vector3::zeros(),
        }
    }

    /// Compose `self` after `other`: `x -> self.R (other.R x + other.t) + self.t`.
    pub fn compose(&self, other: &SymOp) -> SymOp {
        let r = self.r * other.r;
        let mut t = self.r * other.t + self.t;
        for k in 0..3 {
            t[k] -= t[k].floor();
        }
        SymOp { r, t }
    }

    pub fn approx_eq(&self, other: &SymOp, tol: f64) -> bool {
        if (self.r - other.r).norm() > tol {
            return false;
        }
        let mut dt = self.t - other.t;
        for k in 0..3 {
            dt[k] -= dt[k].round();
        }
        dt.norm() < tol
    }
}

#[cfg(test)]
pub(crate) mod tests_support {
    use super::*;
    use crate::crystal::Crystal;

    /// The 48 signed-permutation matrices of the full cubic point group,
    /// used to exercise `Crystal::symmetry_is_closed` on a nontrivial group.
    pub fn cubic_point_group() -> Vec<SymOp> {
        let perms = [
            [0usize, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];
        let signs: [[f64; 3]; 8] = [
            [1.0, 1.0, 1.0],
            [1.0, 1.0, -1.0],
            [1.0, -1.0, 1.0],
            [1.0, -1.0, -1.0],
            [-1.0, 1.0, 1.0],
            [-1.0, 1.0, -1.0],
            [-1.0, -1.0, 1.0],
            [-1.0, -1.0, -1.0],
        ];
        let mut ops = Vec::with_capacity(48);
        for perm in perms.iter() {
            for sign in signs.iter() {
                let mut r = Matrix3::<f64>::zeros();
                for (col, &row) in perm.iter().enumerate() {
                    r[(row, col)] = sign[col];
                }
                ops.push(SymOp::new(r, Vector3::zeros()));
            }
        }
        ops
    }

    pub fn cubic_crystal() -> Crystal {
        Crystal::new(
            Matrix3::identity(),
            vec![Vector3::new(0.0, 0.0, 0.0)],
            vec!["A".to_string()],
            cubic_point_group(),
            1e-6,
        )
    }
}
