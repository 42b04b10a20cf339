//! Per-sublattice interactions: onsite anisotropy and pair couplings
//! (spec.md §2 item 3, §3).

use nalgebra::{DMatrix, Matrix3};

use crate::coupling::stevens::StevensExpansion;
use crate::crystal::Bond;
use crate::C64;

/// Per-atom static data (spec.md §3's `SiteInfo`).
#[derive(Debug, Clone)]
pub struct SiteInfo {
    /// Spin quantum number, `S > 0`.
    pub s: f64,
    /// g-tensor, 3x3.
    pub g: Matrix3<f64>,
    /// Magnetic form factor ion label, if any (spec.md §4.9/§8 test 10).
    pub form_factor: Option<String>,
}

impl SiteInfo {
    pub fn new(s: f64, g: Matrix3<f64>) -> Self {
        SiteInfo {
            s,
            g,
            form_factor: None,
        }
    }

    pub fn with_form_factor(mut self, ion: impl Into<String>) -> Self {
        self.form_factor = Some(ion.into());
        self
    }

    pub fn hilbert_dim(&self) -> usize {
        (2.0 * self.s).round() as usize + 1
    }
}

/// Bilinear part of a pair coupling: a scalar Heisenberg coupling or a full
/// 3x3 matrix (spec.md §4.4's classification).
#[derive(Debug, Clone)]
pub enum Bilinear {
    Scalar(f64),
    Matrix(Matrix3<f64>),
}

impl Bilinear {
    pub fn as_matrix(&self) -> Matrix3<f64> {
        match self {
            Bilinear::Scalar(j) => Matrix3::identity() * *j,
            Bilinear::Matrix(m) => *m,
        }
    }

    /// Classify a general 3x3 matrix as scalar or full, per spec.md §4.4:
    /// "if J ~= J[0,0]*I treat as bilin scalar".
    pub fn classify(m: &Matrix3<f64>, tol: f64) -> Self {
        let scalar = m[(0, 0)];
        let diff = (m - Matrix3::identity() * scalar).norm();
        if diff < tol {
            Bilinear::Scalar(scalar)
        } else {
            Bilinear::Matrix(*m)
        }
    }
}

/// A single pair coupling on one bond of an orbit (spec.md §3's
/// `PairCoupling`).
#[derive(Debug, Clone)]
pub struct PairCoupling {
    pub bond: Bond,
    /// `true` if this is the non-canonical element of a reverse-equivalent
    /// pair; culled terms are skipped in single-sum loops and restored by
    /// symmetry (spec.md §3, §4.5).
    pub isculled: bool,
    pub bilin: Bilinear,
    pub biquad: Option<f64>,
    /// Sparse tensor decomposition for general N x N operator pairs
    /// (SU(N) mode only).
    pub general: Vec<(DMatrix<C64>, DMatrix<C64>)>,
}

impl PairCoupling {
    pub fn new(bond: Bond, isculled: bool, bilin: Bilinear) -> Self {
        PairCoupling {
            bond,
            isculled,
            bilin,
            biquad: None,
            general: Vec::new(),
        }
    }
}

/// The onsite anisotropy of a sublattice: a Stevens expansion in classical
/// (and `largeS`) mode, or an explicit Hermitian matrix in SU(N) mode
/// (spec.md §3's `Interactions`).
#[derive(Debug, Clone)]
pub enum Onsite {
    Classical(StevensExpansion),
    Explicit(DMatrix<C64>),
}

impl Onsite {
    pub fn zero_classical(s: f64) -> Self {
        Onsite::Classical(StevensExpansion::zero(s))
    }

    pub fn zero_explicit(n: usize) -> Self {
        Onsite::Explicit(DMatrix::<C64>::zeros(n, n))
    }
}

/// Per-sublattice interactions: onsite anisotropy plus the ordered sequence
/// of pair couplings emanating from that sublattice (spec.md §3).
#[derive(Debug, Clone)]
pub struct Interactions {
    pub onsite: Onsite,
    pub pair: Vec<PairCoupling>,
}

impl Interactions {
    pub fn new(onsite: Onsite) -> Self {
        Interactions {
            onsite,
            pair: Vec::new(),
        }
    }
}
