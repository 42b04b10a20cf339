//! Histogram binning and reciprocal-space path utilities (spec.md §4.11).

use std::f64::consts::PI;

use itertools::Itertools;
use nalgebra::{Matrix4, Vector3, Vector4};

/// A 4-vector histogram over `(q_x, q_y, q_z, omega)`, mapped through a
/// covector matrix before binning (spec.md §4.11).
#[derive(Debug, Clone)]
pub struct BinningParameters {
    pub binstart: Vector4<f64>,
    pub binend: Vector4<f64>,
    pub binwidth: Vector4<f64>,
    /// Rows are the covectors that project a `(q, omega)` 4-vector onto each
    /// histogram axis.
    pub covectors: Matrix4<f64>,
}

impl BinningParameters {
    pub fn new(
        binstart: Vector4<f64>,
        binend: Vector4<f64>,
        binwidth: Vector4<f64>,
        covectors: Matrix4<f64>,
    ) -> Self {
        BinningParameters {
            binstart,
            binend,
            binwidth,
            covectors,
        }
    }

    /// `bin_index(value) = 1 + floor((Cv - binstart)/binwidth)` (spec.md
    /// §4.11), 1-indexed; a single-count bin `k` covers `[binstart +
    /// (k-1)*w, binstart + k*w)`, and the last bin along each axis is
    /// extended to include `binend`.
    pub fn bin_index(&self, value: &Vector4<f64>) -> [i64; 4] {
        let projected = self.covectors * value;
        let mut idx = [0i64; 4];
        for axis in 0..4 {
            let n = self.numbins()[axis];
            let raw = ((projected[axis] - self.binstart[axis]) / self.binwidth[axis]).floor();
            let mut k = 1 + raw as i64;
            if k > n as i64 {
                k = n as i64;
            }
            idx[axis] = k;
        }
        idx
    }

    /// `numbins(bs,be,bw) = ceil((be-bs)/bw)` per axis.
    pub fn numbins(&self) -> [usize; 4] {
        let mut out = [0usize; 4];
        for axis in 0..4 {
            let span = self.binend[axis] - self.binstart[axis];
            out[axis] = (span / self.binwidth[axis]).ceil().max(1.0) as usize;
        }
        out
    }
}

/// `slice_2D_binning_parameters(omegas, q0, q1, n_bins, w; plane_normal)`
/// (spec.md §4.11): a cut along `q1 - q0` with `n_bins` bins, transverse
/// directions integrated over a single bin of width `w`.
pub fn slice_2d_binning_parameters(
    omegas: &[f64],
    q0: Vector3<f64>,
    q1: Vector3<f64>,
    n_bins: usize,
    w: f64,
    plane_normal: Vector3<f64>,
) -> BinningParameters {
    let c_hat = (q1 - q0).normalize();
    let t_hat = plane_normal.cross(&c_hat).normalize();
    let c_perp_hat = t_hat.cross(&c_hat).normalize();

    let mut covectors = Matrix4::zeros();
    covectors.fixed_view_mut::<1, 3>(0, 0).copy_from(&c_hat.transpose());
    covectors.fixed_view_mut::<1, 3>(1, 0).copy_from(&t_hat.transpose());
    covectors.fixed_view_mut::<1, 3>(2, 0).copy_from(&c_perp_hat.transpose());
    covectors[(3, 3)] = 1.0;

    let length = (q1 - q0).dot(&c_hat);
    let start0 = q0.dot(&c_hat);
    let omega_start = *omegas.first().unwrap_or(&0.0);
    let omega_end = *omegas.last().unwrap_or(&0.0);
    let omega_width = if omegas.len() > 1 {
        (omega_end - omega_start) / (omegas.len() - 1) as f64
    } else {
        1.0
    };

    let binstart = Vector4::new(start0, -w / 2.0, -w / 2.0, omega_start);
    let binend = Vector4::new(start0 + length, w / 2.0, w / 2.0, omega_end);
    let binwidth = Vector4::new(length / n_bins as f64, w, w, omega_width);

    BinningParameters::new(binstart, binend, binwidth, covectors)
}

/// `reciprocal_space_path_bins(omegas, qs, density)` (spec.md §4.11):
/// concatenate segment-wise bins along a multi-corner reciprocal-space path,
/// returning the binning parameters for each segment plus a `markers[k]`
/// index map giving the histogram column of each path corner.
pub fn reciprocal_space_path_bins(
    omegas: &[f64],
    qs: &[Vector3<f64>],
    density: f64,
) -> (Vec<BinningParameters>, Vec<usize>) {
    let mut segments = Vec::with_capacity(qs.len().saturating_sub(1));
    let mut markers = vec![0usize];
    let mut offset = 0usize;
    for (&q0, &q1) in qs.iter().tuple_windows() {
        let seg_len = (q1 - q0).norm();
        let nbins = ((density * seg_len).round() as usize).max(1);
        let plane_normal = Vector3::z();
        let params = slice_2d_binning_parameters(omegas, q0, q1, nbins, 1.0, plane_normal);
        segments.push(params);
        offset += nbins;
        markers.push(offset);
    }
    (segments, markers)
}

/// `powder_average(radius, n_points, f)` (SPEC_FULL.md §3): samples `f` at
/// `n_points` directions spread quasi-uniformly over the sphere of the given
/// `radius` via a Fibonacci lattice, and returns their mean. `f` is typically
/// a per-`q` intensity evaluator, so the result approximates the
/// orientation-averaged signal measured from a powder sample.
pub fn powder_average<F>(radius: f64, n_points: usize, mut f: F) -> Vec<f64>
where
    F: FnMut(Vector3<f64>) -> Vec<f64>,
{
    let points = fibonacci_sphere(n_points);
    let mut acc: Option<Vec<f64>> = None;
    for dir in points {
        let sample = f(dir * radius);
        acc = Some(match acc {
            None => sample,
            Some(mut a) => {
                for (ai, si) in a.iter_mut().zip(sample.iter()) {
                    *ai += *si;
                }
                a
            }
        });
    }
    let mut out = acc.unwrap_or_default();
    let n = n_points.max(1) as f64;
    for v in out.iter_mut() {
        *v /= n;
    }
    out
}

/// Quasi-uniform points on the unit sphere via the Fibonacci lattice
/// construction (golden-angle spiral in `cos(theta)`), a standard
/// low-discrepancy alternative to rejection sampling for powder averages.
fn fibonacci_sphere(n_points: usize) -> Vec<Vector3<f64>> {
    if n_points == 0 {
        return Vec::new();
    }
    let golden_angle = PI * (3.0 - 5.0_f64.sqrt());
    (0..n_points)
        .map(|i| {
            let y = 1.0 - 2.0 * (i as f64 + 0.5) / n_points as f64;
            let r = (1.0 - y * y).max(0.0).sqrt();
            let theta = golden_angle * i as f64;
            Vector3::new(theta.cos() * r, y, theta.sin() * r)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbins_rounds_up() {
        let params = BinningParameters::new(
            Vector4::new(0.0, 0.0, 0.0, 0.0),
            Vector4::new(1.0, 1.0, 1.0, 10.0),
            Vector4::new(0.3, 1.0, 1.0, 1.0),
            Matrix4::identity(),
        );
        assert_eq!(params.numbins()[0], 4);
        assert_eq!(params.numbins()[3], 10);
    }

    #[test]
    fn bin_index_clamps_to_last_bin_at_binend() {
        let params = BinningParameters::new(
            Vector4::new(0.0, 0.0, 0.0, 0.0),
            Vector4::new(1.0, 1.0, 1.0, 1.0),
            Vector4::new(0.5, 1.0, 1.0, 1.0),
            Matrix4::identity(),
        );
        let idx = params.bin_index(&Vector4::new(1.0, 0.0, 0.0, 0.0));
        assert_eq!(idx[0], 2);
    }

    #[test]
    fn path_markers_are_cumulative() {
        let qs = vec![Vector3::zeros(), Vector3::new(1.0, 0.0, 0.0), Vector3::new(1.0, 1.0, 0.0)];
        let omegas: Vec<f64> = (0..5).map(|i| i as f64).collect();
        let (segments, markers) = reciprocal_space_path_bins(&omegas, &qs, 10.0);
        assert_eq!(segments.len(), 2);
        assert_eq!(markers.len(), 3);
        assert_eq!(markers[0], 0);
        assert!(markers[2] >= markers[1]);
    }

    #[test]
    fn powder_average_of_constant_field_is_that_constant() {
        let out = powder_average(1.5, 200, |_q| vec![3.0, -1.0]);
        assert!((out[0] - 3.0).abs() < 1e-9);
        assert!((out[1] - (-1.0)).abs() < 1e-9);
    }

    #[test]
    fn fibonacci_sphere_points_lie_on_unit_sphere() {
        let pts = fibonacci_sphere(50);
        assert_eq!(pts.len(), 50);
        for p in pts {
            assert!((p.norm() - 1.0).abs() < 1e-9);
        }
    }
}
