//! Symmetry-aware lattice spin Hamiltonians, classical spin dynamics, and
//! linear spin-wave theory.
//!
//! The crate is organized the way the calculation itself proceeds: a
//! [`crystal`] and its symmetry group constrain the allowed [`coupling`]s
//! that assemble into a [`hamiltonian`] living on a [`system::System`];
//! from there one either runs classical dynamics (direct energy/gradient
//! evaluation, optionally with long-range [`ewald`] dipole sums, driven by
//! [`integrators`] and [`sampling`]) or linearizes around an ordered state
//! with [`spinwave`] and post-processes the spectrum with [`kpm`].
//! [`binning`] and [`formfactor`] are shared glue for turning raw spectra
//! into instrument-comparable cuts.

use num_complex::Complex;

pub mod binning;
pub mod constants;
pub mod coupling;
pub mod crystal;
pub mod error;
pub mod ewald;
pub mod formfactor;
pub mod grid;
pub mod hamiltonian;
pub mod integrators;
pub mod kpm;
pub mod sampling;
pub mod spinwave;
pub mod system;
pub mod units;
mod utils;

#[cfg(feature = "python")]
pub mod python;

/// Complex double precision, used throughout for quantum amplitudes and
/// Bogoliubov transformations.
pub type C64 = Complex<f64>;

pub use crystal::Crystal;
pub use error::{Result, SpinError};
pub use system::{Mode, System};
