//! Positive semi-definite repair for covariance and correlation matrices.
//!
//! Covariance matrices assembled from correlation models and floating-point
//! block algebra can end up with slightly negative eigenvalues. The
//! functions here project such matrices back onto the PSD cone, either with
//! a single eigenvalue clip or with the alternating-projection scheme used
//! by statsmodels' `corr_nearest`.

use crate::faer_ndarray::{FaerEigh, FaerLinalgError};
use faer::Side;
use ndarray::{Array1, Array2};
use thiserror::Error;

/// Default eigenvalue clipping threshold: effectively zero.
pub const DEFAULT_CLIP_THRESHOLD: f64 = 1e-15;

/// Iteration budget factor for [`corr_nearest`]: the maximum iteration count
/// is `n_fact` times the matrix dimension.
pub const DEFAULT_N_FACT: usize = 100;

#[derive(Debug, Error)]
pub enum StabilizeError {
    #[error("matrix is not square: {rows}x{cols}")]
    NotSquare { rows: usize, cols: usize },
    #[error(transparent)]
    Linalg(#[from] FaerLinalgError),
}

/// Outcome of a stabilization pass.
///
/// `converged` is false only for the iterative [`corr_nearest`] when the
/// iteration budget ran out; the best available correction is still
/// returned, so callers degrade gracefully but can observe the failure.
#[derive(Debug, Clone)]
pub struct Stabilized {
    pub matrix: Array2<f64>,
    pub adjusted: bool,
    pub converged: bool,
    pub iterations: usize,
}

fn check_square(matrix: &Array2<f64>) -> Result<usize, StabilizeError> {
    let (rows, cols) = matrix.dim();
    if rows != cols {
        return Err(StabilizeError::NotSquare { rows, cols });
    }
    Ok(rows)
}

/// Clip eigenvalues below `threshold` up to `threshold` and reconstruct.
///
/// Returns the reconstructed matrix and whether any eigenvalue was clipped.
pub fn clip_eigenvalues(
    matrix: &Array2<f64>,
    threshold: f64,
) -> Result<(Array2<f64>, bool), StabilizeError> {
    check_square(matrix)?;
    let (evals, evecs) = matrix.eigh(Side::Lower)?;
    let clipped = evals.iter().any(|&v| v < threshold);
    let adjusted = evals.mapv(|v| v.max(threshold));
    // V * diag(adjusted) * V^T, scaling eigenvector columns in place.
    let scaled = &evecs * &adjusted;
    Ok((scaled.dot(&evecs.t()), clipped))
}

/// Return `matrix` untouched when it is already PSD at `threshold`,
/// otherwise the eigenvalue-clipped reconstruction.
pub fn ensure_psd(matrix: &Array2<f64>, threshold: f64) -> Result<Array2<f64>, StabilizeError> {
    let (repaired, clipped) = clip_eigenvalues(matrix, threshold)?;
    if clipped {
        Ok(repaired)
    } else {
        Ok(matrix.clone())
    }
}

/// Split a covariance matrix into its correlation matrix and the vector of
/// standard deviations.
pub fn cov_to_corr(cov: &Array2<f64>) -> Result<(Array2<f64>, Array1<f64>), StabilizeError> {
    let n = check_square(cov)?;
    let std = Array1::from_iter((0..n).map(|i| cov[[i, i]].sqrt()));
    let mut corr = cov.clone();
    for i in 0..n {
        for j in 0..n {
            corr[[i, j]] /= std[i] * std[j];
        }
    }
    Ok((corr, std))
}

/// Rescale a correlation matrix back into a covariance matrix.
pub fn corr_to_cov(corr: &Array2<f64>, std: &Array1<f64>) -> Array2<f64> {
    let mut cov = corr.clone();
    for i in 0..corr.nrows() {
        for j in 0..corr.ncols() {
            cov[[i, j]] *= std[i] * std[j];
        }
    }
    cov
}

/// One-shot nearest correlation matrix: clip eigenvalues once and
/// renormalize the diagonal to 1. Cheaper than [`corr_nearest`], with a
/// larger distance to the input.
pub fn corr_clipped(corr: &Array2<f64>, threshold: f64) -> Result<Stabilized, StabilizeError> {
    let (repaired, clipped) = clip_eigenvalues(corr, threshold)?;
    if !clipped {
        return Ok(Stabilized {
            matrix: corr.clone(),
            adjusted: false,
            converged: true,
            iterations: 0,
        });
    }
    let n = repaired.nrows();
    let std = Array1::from_iter((0..n).map(|i| repaired[[i, i]].sqrt()));
    let mut normalized = repaired;
    for i in 0..n {
        for j in 0..n {
            normalized[[i, j]] /= std[i] * std[j];
        }
    }
    Ok(Stabilized {
        matrix: normalized,
        adjusted: true,
        converged: true,
        iterations: 1,
    })
}

/// Nearest PSD correlation matrix by alternating projection (clip the
/// eigenvalues of a running difference matrix, reset the diagonal to 1).
///
/// Stops as soon as a clipping pass leaves the matrix unchanged. If the
/// budget of `n_fact * k` iterations runs out the best correction so far is
/// returned with `converged = false`.
pub fn corr_nearest(
    corr: &Array2<f64>,
    threshold: f64,
    n_fact: usize,
) -> Result<Stabilized, StabilizeError> {
    let k = check_square(corr)?;
    let mut diff = Array2::<f64>::zeros((k, k));
    let mut x_new = corr.clone();
    let max_iterations = k * n_fact;

    for iteration in 0..max_iterations {
        let x_adj = &x_new - &diff;
        let (x_psd, clipped) = clip_eigenvalues(&x_adj, threshold)?;
        if !clipped {
            return Ok(Stabilized {
                matrix: x_psd,
                adjusted: iteration > 0,
                converged: true,
                iterations: iteration + 1,
            });
        }
        diff = &x_psd - &x_adj;
        x_new = x_psd;
        for i in 0..k {
            x_new[[i, i]] = 1.0;
        }
    }

    log::warn!(
        "nearest-correlation projection did not converge within {max_iterations} iterations"
    );
    Ok(Stabilized {
        matrix: x_new,
        adjusted: true,
        converged: false,
        iterations: max_iterations,
    })
}

/// Method selector for [`cov_nearest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NearestMethod {
    Clipped,
    Nearest,
}

/// Nearest PSD covariance matrix, leaving the variances on the diagonal
/// unchanged: convert to correlation, repair, convert back.
pub fn cov_nearest(
    cov: &Array2<f64>,
    method: NearestMethod,
    threshold: f64,
    n_fact: usize,
) -> Result<Stabilized, StabilizeError> {
    let (corr, std) = cov_to_corr(cov)?;
    let repaired = match method {
        NearestMethod::Clipped => corr_clipped(&corr, threshold)?,
        NearestMethod::Nearest => corr_nearest(&corr, threshold, n_fact)?,
    };
    Ok(Stabilized {
        matrix: corr_to_cov(&repaired.matrix, &std),
        ..repaired
    })
}
