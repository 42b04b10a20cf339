//! PyO3 bindings over the Rust API (spec.md §9's replacement for the
//! original's interactive `@ncpolyvar` surface; SPEC_FULL §2.1/§4.14).
//!
//! This mirrors the teacher's `lib.rs`/`spinwave.rs` split: the actual
//! numerical work stays in the rest of this crate, and this module is a
//! thin conversion layer between `numpy`/PyO3 types and the crate's native
//! `nalgebra`/`faer` types, exposed as a `rust` extension module exactly as
//! the teacher's `spinw-python` crate does.

use nalgebra::{Matrix3, Vector3};
use numpy::{PyArray1, PyArray2, PyReadonlyArray1, PyReadonlyArray2, ToPyArray};
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

use crate::crystal::{Bond, Crystal, SymOp};
use crate::hamiltonian::SiteInfo;
use crate::spinwave::{Kernel, SpinWaveTheory};
use crate::system::{Mode, System};

fn to_matrix3(arr: PyReadonlyArray2<f64>) -> PyResult<Matrix3<f64>> {
    let a = arr.as_array();
    if a.shape() != [3, 3] {
        return Err(PyValueError::new_err("expected a 3x3 array"));
    }
    Ok(Matrix3::from_fn(|r, c| a[[r, c]]))
}

fn to_vector3(arr: PyReadonlyArray1<f64>) -> PyResult<Vector3<f64>> {
    let a = arr.as_array();
    if a.len() != 3 {
        return Err(PyValueError::new_err("expected a length-3 array"));
    }
    Ok(Vector3::new(a[0], a[1], a[2]))
}

/// Python-facing `Crystal` (spec.md §6's `Crystal(latvecs, positions, ...)`
/// constructor, minus the spacegroup-symbol lookup which stays out of scope
/// per spec.md §1 — symmetry operations must be supplied explicitly).
#[pyclass(frozen, name = "Crystal")]
pub struct PyCrystal {
    pub(crate) inner: Crystal,
}

#[pymethods]
impl PyCrystal {
    #[new]
    #[pyo3(signature = (latvecs, positions, types, rotations, translations, symprec=1e-6))]
    fn new(
        latvecs: PyReadonlyArray2<f64>,
        positions: Vec<PyReadonlyArray1<f64>>,
        types: Vec<String>,
        rotations: Vec<PyReadonlyArray2<f64>>,
        translations: Vec<PyReadonlyArray1<f64>>,
        symprec: f64,
    ) -> PyResult<Self> {
        let latvecs = to_matrix3(latvecs)?;
        let positions = positions
            .into_iter()
            .map(to_vector3)
            .collect::<PyResult<Vec<_>>>()?;
        let symops = rotations
            .into_iter()
            .zip(translations)
            .map(|(r, t)| Ok(SymOp::new(to_matrix3(r)?, to_vector3(t)?)))
            .collect::<PyResult<Vec<_>>>()?;
        Ok(PyCrystal {
            inner: Crystal::new(latvecs, positions, types, symops, symprec),
        })
    }

    fn natoms(&self) -> usize {
        self.inner.natoms()
    }

    fn volume(&self) -> f64 {
        self.inner.volume()
    }

    fn symmetry_is_closed(&self) -> bool {
        self.inner.symmetry_is_closed()
    }
}

/// Python-facing `System` (spec.md §6).
#[pyclass(name = "System")]
pub struct PySystem {
    pub(crate) inner: System,
}

fn mode_from_str(s: &str) -> PyResult<Mode> {
    match s {
        "dipole" => Ok(Mode::Dipole),
        "largeS" | "large_s" => Ok(Mode::LargeS),
        "SUN" | "sun" => Ok(Mode::SUN),
        other => Err(PyValueError::new_err(format!("unknown mode '{other}'"))),
    }
}

#[pymethods]
impl PySystem {
    #[new]
    #[pyo3(signature = (crystal, latsize, spins, gs, mode))]
    fn new(
        crystal: &PyCrystal,
        latsize: (usize, usize, usize),
        spins: Vec<f64>,
        gs: Vec<PyReadonlyArray2<f64>>,
        mode: &str,
    ) -> PyResult<Self> {
        let mode = mode_from_str(mode)?;
        let site_infos = spins
            .into_iter()
            .zip(gs)
            .map(|(s, g)| Ok(SiteInfo::new(s, to_matrix3(g)?)))
            .collect::<PyResult<Vec<_>>>()?;
        Ok(PySystem {
            inner: System::new(crystal.inner.clone(), latsize, site_infos, mode),
        })
    }

    fn set_external_field(&mut self, b: PyReadonlyArray1<f64>) -> PyResult<()> {
        self.inner.set_external_field(to_vector3(b)?);
        Ok(())
    }

    #[pyo3(signature = (j, i, jsite, n, biquad=None))]
    fn set_exchange(
        &mut self,
        j: PyReadonlyArray2<f64>,
        i: usize,
        jsite: usize,
        n: (i32, i32, i32),
        biquad: Option<f64>,
    ) -> PyResult<()> {
        let j = to_matrix3(j)?;
        let bond = Bond::new(i, jsite, nalgebra::Vector3::new(n.0, n.1, n.2));
        self.inner
            .set_exchange(j, bond, biquad)
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    fn enable_dipole_dipole(&mut self) {
        self.inner.enable_dipole_dipole();
    }

    fn energy(&self) -> f64 {
        self.inner.energy()
    }

    fn forces<'py>(&self, py: Python<'py>) -> Bound<'py, PyArray2<f64>> {
        let grid = self.inner.forces();
        let nsites = grid.ncells() * grid.nsub;
        let flat: Vec<f64> = grid
            .as_slice()
            .iter()
            .flat_map(|v| [v.x, v.y, v.z])
            .collect();
        PyArray1::from_vec(py, flat)
            .reshape([nsites, 3])
            .expect("forces buffer always has 3*N elements")
    }
}

/// Python-facing `SpinWaveTheory` (spec.md §6's `SpinWaveTheory`,
/// `dispersion`, `intensities`).
#[pyclass(name = "SpinWaveTheory")]
pub struct PySpinWaveTheory {
    inner: SpinWaveTheory,
}

#[pymethods]
impl PySpinWaveTheory {
    #[new]
    fn new(system: &PySystem) -> PyResult<Self> {
        // `SpinWaveTheory` owns a deep copy of the System snapshot (spec.md
        // §3), matching the `System`'s `Clone`-free ownership story by going
        // through the same resize-to-self-size path used internally.
        let snapshot = system.inner.resize_supercell(system.inner.latsize);
        Ok(PySpinWaveTheory {
            inner: SpinWaveTheory::new(snapshot),
        })
    }

    /// `dispersion(swt, qs)` (spec.md §6): returns an `|qs| x L` array.
    fn dispersion<'py>(
        &self,
        py: Python<'py>,
        qs: Vec<PyReadonlyArray1<f64>>,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let qs = qs.into_iter().map(to_vector3).collect::<PyResult<Vec<_>>>()?;
        let bands = self
            .inner
            .dispersion(&qs)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let l = self.inner.nbands();
        let flat: Vec<f64> = bands.into_iter().flatten().collect();
        PyArray1::from_vec(py, flat)
            .reshape([qs.len(), l])
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }

    /// `intensities(swt, qpoints; energies, kT)` (spec.md §6), delta-kernel
    /// and Lorentzian broadening are both reachable from Python; richer
    /// kernel customization stays a Rust-side-only API.
    #[pyo3(signature = (qs, energies, kt=0.0, gamma=None))]
    fn intensities<'py>(
        &self,
        py: Python<'py>,
        qs: Vec<PyReadonlyArray1<f64>>,
        energies: PyReadonlyArray1<f64>,
        kt: f64,
        gamma: Option<f64>,
    ) -> PyResult<Bound<'py, PyArray2<f64>>> {
        let qs = qs.into_iter().map(to_vector3).collect::<PyResult<Vec<_>>>()?;
        let omegas: Vec<f64> = energies.as_array().to_vec();
        let kernel = match gamma {
            Some(g) => Kernel::Lorentzian { gamma: g },
            None => Kernel::Delta,
        };
        let rows = self
            .inner
            .dynamical_structure_factor(&qs, &omegas, &kernel, kt)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        let flat: Vec<f64> = rows.into_iter().flatten().collect();
        PyArray1::from_vec(py, flat)
            .reshape([qs.len(), omegas.len()])
            .map_err(|e| PyValueError::new_err(e.to_string()))
    }
}

/// `set_onsite_coupling!(sys, op, sublattice)` exposed as a free function
/// taking an explicit Hermitian matrix (spec.md §9's recommended replacement
/// for the original's symbolic Stevens-operator builder).
#[pyfunction]
fn set_onsite_coupling(
    sys: &mut PySystem,
    op: PyReadonlyArray2<crate::C64>,
    sublattice: usize,
) -> PyResult<()> {
    let mat = op.as_array();
    let n = mat.shape()[0];
    let dmat = nalgebra::DMatrix::<crate::C64>::from_fn(n, n, |r, c| mat[[r, c]]);
    if sys.inner.mode == Mode::SUN {
        sys.inner.set_onsite_coupling_sun(dmat, sublattice);
    } else {
        let s = sys.inner.site_infos[sublattice].s;
        let stv = crate::coupling::stevens::StevensExpansion::from_hermitian(&dmat, s)
            .map_err(|e| PyValueError::new_err(e.to_string()))?;
        sys.inner.set_onsite_coupling_classical(stv, sublattice);
    }
    Ok(())
}

/// A Python module implemented in Rust (spec.md §9, matching the teacher's
/// `#[pymodule] fn rust(...)`).
#[pymodule]
fn rust(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyCrystal>()?;
    m.add_class::<PySystem>()?;
    m.add_class::<PySpinWaveTheory>()?;
    m.add_function(wrap_pyfunction!(set_onsite_coupling, m)?)?;
    Ok(())
}
