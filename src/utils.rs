use crate::C64;
use faer::traits::ComplexField;
use faer::Mat;
/// Utility functions for the calculations.

/// Create a block matrix from four sub-matrices.
#[inline]
pub fn block_matrix<T: ComplexField>(TL: &Mat<T>, TR: &Mat<T>, BL: &Mat<T>, BR: &Mat<T>) -> Mat<T> {
    let n_rows = TL.nrows() + BL.nrows();
    let n_cols = TL.ncols() + TR.ncols();
    let mut result = Mat::<T>::zeros(n_rows, n_cols);

    result
        .submatrix_mut(0, 0, TL.nrows(), TL.ncols())
        .copy_from(TL);
    result
        .submatrix_mut(0, TL.ncols(), TR.nrows(), TR.ncols())
        .copy_from(TR);
    result
        .submatrix_mut(TL.nrows(), 0, BL.nrows(), BL.ncols())
        .copy_from(BL);
    result
        .submatrix_mut(TL.nrows(), TR.ncols(), BR.nrows(), BR.ncols())
        .copy_from(BR);

    result
}
