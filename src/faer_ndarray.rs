//! Thin bridge between `ndarray` arrays and `faer` decompositions.
//!
//! All user-facing matrices in this crate are `ndarray` types; faer supplies
//! the self-adjoint eigendecomposition and the SVD. Views are zero-copy for
//! standard layouts and fall back to an owned compact copy for layouts faer
//! kernels cannot traverse (negative or zero strides).

use dyn_stack::{MemBuffer, MemStack};
use faer::linalg::svd::{self, ComputeSvdVectors};
use faer::{Mat, MatRef, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FaerLinalgError {
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("self-adjoint eigendecomposition failed: {0:?}")]
    SelfAdjointEigen(faer::linalg::solvers::EvdError),
}

pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides can alias or reverse memory traversal;
        // materialize a compact owned copy for those layouts.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = if let Some(owned) = &self.owned {
            let strides = owned.strides();
            (
                owned.as_ptr(),
                owned.nrows(),
                owned.ncols(),
                strides[0],
                strides[1],
            )
        } else {
            (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            )
        };
        // SAFETY: pointer/shape/strides either come directly from a live
        // ndarray view with positive strides, or from the owned compact copy
        // stored inside this wrapper, valid for the returned view lifetime.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((mat.nrows(), mat.ncols()));
    for j in 0..mat.ncols() {
        for i in 0..mat.nrows() {
            out[[i, j]] = mat[(i, j)];
        }
    }
    out
}

fn diag_to_array(diag: faer::diag::DiagRef<'_, f64>) -> Array1<f64> {
    let mat = diag.column_vector().as_mat();
    let mut out = Array1::<f64>::zeros(mat.nrows());
    for i in 0..mat.nrows() {
        out[i] = mat[(i, 0)];
    }
    out
}

/// Self-adjoint eigendecomposition: `(eigenvalues, eigenvectors)` with
/// eigenvectors stored as columns.
pub trait FaerEigh {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerEigh for ArrayBase<S, Ix2> {
    fn eigh(&self, side: Side) -> Result<(Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let eigen = faer_view
            .as_ref()
            .self_adjoint_eigen(side)
            .map_err(FaerLinalgError::SelfAdjointEigen)?;
        let values = diag_to_array(eigen.S());
        let vectors = mat_to_array(eigen.U());
        Ok((values, vectors))
    }
}

/// Full SVD: `(U, singular_values, V^T)`.
pub trait FaerSvd {
    fn svd_full(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn svd_full(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        let faer_view = FaerArrayView::new(self);
        let faer_mat = faer_view.as_ref();
        let (rows, cols) = faer_mat.shape();

        let mut singular = faer::diag::Diag::<f64>::zeros(rows.min(cols));
        let mut u_storage = Mat::<f64>::zeros(rows, rows);
        let mut v_storage = Mat::<f64>::zeros(cols, cols);

        let par = get_global_parallelism();
        let mut mem = MemBuffer::new(svd::svd_scratch::<f64>(
            rows,
            cols,
            ComputeSvdVectors::Full,
            ComputeSvdVectors::Full,
            par,
            Default::default(),
        ));
        let stack = MemStack::new(&mut mem);

        svd::svd(
            faer_mat,
            singular.as_mut(),
            Some(u_storage.as_mut()),
            Some(v_storage.as_mut()),
            par,
            stack,
            Default::default(),
        )
        .map_err(|_| FaerLinalgError::SvdNoConvergence)?;

        let singular_values = diag_to_array(singular.as_ref());
        let u = mat_to_array(u_storage.as_ref());
        let v_ref = v_storage.as_ref();
        let mut vt = Array2::<f64>::zeros((v_ref.ncols(), v_ref.nrows()));
        for j in 0..v_ref.nrows() {
            for i in 0..v_ref.ncols() {
                vt[[i, j]] = v_ref[(j, i)];
            }
        }
        Ok((u, singular_values, vt))
    }
}

/// Relative cutoff for small singular values, matching the numpy `pinv`
/// default the reference implementation relies on.
const PINV_RCOND: f64 = 1e-15;

/// Moore-Penrose pseudo-inverse via SVD.
///
/// Rank-deficient inputs (duplicate stations, degenerate correlation
/// structures) yield the minimum-norm generalized inverse instead of an
/// error.
pub fn pseudo_inverse<S: Data<Elem = f64>>(
    a: &ArrayBase<S, Ix2>,
) -> Result<Array2<f64>, FaerLinalgError> {
    let (m, n) = a.dim();
    if m == 0 || n == 0 {
        return Ok(Array2::zeros((n, m)));
    }
    let (u, s, vt) = a.svd_full()?;
    let s_max = s.iter().cloned().fold(0.0f64, f64::max);
    let cutoff = PINV_RCOND * s_max;

    // A+ = V diag(1/s) U^T over singular values above the cutoff.
    let mut out = Array2::<f64>::zeros((n, m));
    for (k, &sv) in s.iter().enumerate() {
        if sv <= cutoff {
            continue;
        }
        let inv = 1.0 / sv;
        for i in 0..n {
            let vik = vt[[k, i]] * inv;
            if vik == 0.0 {
                continue;
            }
            for j in 0..m {
                out[[i, j]] += vik * u[[j, k]];
            }
        }
    }
    Ok(out)
}
