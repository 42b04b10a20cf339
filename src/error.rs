//! Error kinds surfaced by the public API (spec.md §7).

use thiserror::Error;

use crate::crystal::Bond;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SpinError>;

/// Failure kinds, one per row of spec.md §7's error table.
///
/// Validation errors are raised at `set_*!` time so a `System` handed to a
/// downstream component is always internally consistent; numerical errors
/// (Cholesky, eigensolve) are never silenced.
#[derive(Debug, Error)]
pub enum SpinError {
    #[error("coupling matrix is not invariant under the self-symmetries of bond {bond:?} (max residual {matrix_norm:.3e})")]
    SymmetryViolation { bond: Bond, matrix_norm: f64 },

    #[error("symmetry-related bond {bond:?} wraps the system (|n| >= latsize along some axis)")]
    BondWrapsSystem { bond: Bond },

    #[error("onsite anisotropy has an unsupported odd-order Stevens component (k={k}, residual {residual:.3e})")]
    UnsupportedAnisotropy { k: u32, residual: f64 },

    #[error("biquadratic coupling is not supported in SU(N) mode (site {site})")]
    UnsupportedBiquadratic { site: usize },

    #[error("reference configuration is not a local energy minimum: Cholesky of H(q) failed (matrix norm {matrix_norm:.3e})")]
    NotAGroundState { matrix_norm: f64 },

    #[error("unstable excitation at q={q:?}: eigenvalue sign pattern inconsistent after sort")]
    InstabilityAtQ { q: [f64; 3] },

    #[error("KPM kernel {kernel} was used without specifying a FWHM")]
    KernelWidthMissing { kernel: &'static str },

    #[error("parallel tempering communication failure between replicas {rank_a} and {rank_b}: {reason}")]
    TemperingCommFailure {
        rank_a: usize,
        rank_b: usize,
        reason: String,
    },

    #[error("magnetic form factor for ion '{ion}' is not in the tabulated set")]
    FormFactorElementUnknown { ion: String },
}
