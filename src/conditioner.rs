//! Bayesian conditioning of the shaking distribution at the target sites.
//!
//! Implements the multivariate-normal conditioning scheme of Engler,
//! Worden, Thompson & Jaiswal (2022), "Partitioning Ground Motion
//! Uncertainty When Conditioned on Station Data" (BSSA 112(2)), eqns B8/B9
//! and B18/B19: the posterior of the normalized between-event residual is
//! computed from the station residuals, then propagated to a conditioned
//! mean and conditioned between-/within-event covariance at the target
//! sites through a generalized-least-squares gain matrix.

use crate::assemble::{ImtSelection, ObservationVectors};
use crate::faer_ndarray::{FaerLinalgError, pseudo_inverse};
use crate::stabilize::{StabilizeError, ensure_psd};
use crate::types::Imt;
use ndarray::{Array1, Array2, Axis, s};
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConditionError {
    #[error(transparent)]
    Linalg(#[from] FaerLinalgError),
    #[error(transparent)]
    Stabilize(#[from] StabilizeError),
}

/// Immutable per-(GMM, target-IMT) bundle consumed by [`condition`].
///
/// Built once per unit of work and never shared across units, so the
/// parallel orchestrator needs no synchronization.
#[derive(Debug, Clone)]
pub struct ConditioningContext {
    /// Name of the ground-motion model, for diagnostics only.
    pub gmm: String,
    pub selection: ImtSelection,
    pub vectors: ObservationVectors,
    /// Between-event loading of the stacked station vector, `T_D`.
    pub between_loading: Array2<f64>,
    /// Cross-IMT between-event correlation over the bracketed IMT list.
    pub corr_between: Array2<f64>,
    /// Pseudo-inverse of the station within-event covariance matrix.
    pub station_cov_inv: Array2<f64>,
}

/// Unconditioned GMM prediction at the target sites for the target IMT.
#[derive(Debug, Clone)]
pub struct TargetPrediction {
    pub mu: Array1<f64>,
    pub tau: Array1<f64>,
    pub phi: Array1<f64>,
}

/// Within-event covariance blocks linking targets and stations.
#[derive(Debug, Clone)]
pub struct TargetCovariances {
    /// `cov(W_Y, W_D)`, shaped (targets, stacked stations).
    pub target_station: Array2<f64>,
    /// `cov(W_D, W_Y)`, shaped (stacked stations, targets).
    pub station_target: Array2<f64>,
    /// `cov(W_Y, W_Y)`, shaped (targets, targets).
    pub target_target: Array2<f64>,
}

/// Scalar summary of the event term inferred from the stations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct NominalBias {
    pub mean: f64,
    pub stddev: f64,
}

/// Conditioned distribution at the target sites for one (GMM, target IMT).
#[derive(Debug, Clone)]
pub struct ConditionedDistribution {
    pub imt: Imt,
    pub mean: Array1<f64>,
    pub within_cov: Array2<f64>,
    pub between_cov: Array2<f64>,
    pub bias: NominalBias,
}

impl ConditionedDistribution {
    /// Total conditioned covariance: within-event plus between-event.
    pub fn total_cov(&self) -> Array2<f64> {
        &self.within_cov + &self.between_cov
    }
}

fn mean_of_diagonal(matrix: &Array2<f64>) -> f64 {
    let n = matrix.nrows();
    if n == 0 {
        return 0.0;
    }
    (0..n).map(|i| matrix[[i, i]]).sum::<f64>() / n as f64
}

/// Target-side between-event loading `T_Y0`: a tau column for the target
/// slot, zero columns for the bracketing slots (an unobserved target IMT
/// carries no direct between-event term of its own).
fn target_between_loading(selection: &ImtSelection, tau: &Array1<f64>) -> Array2<f64> {
    let tau_col = tau.clone().insert_axis(Axis(1));
    match selection {
        ImtSelection::Native(_) => tau_col,
        ImtSelection::Bracketed { observed, .. } => {
            let mut loading = Array2::<f64>::zeros((tau.len(), observed.len() + 1));
            loading.slice_mut(s![.., 0..1]).assign(&tau_col);
            loading
        }
    }
}

/// Compute the conditioned distribution at the target sites.
pub fn condition(
    ctx: &ConditioningContext,
    target: &TargetPrediction,
    cov: &TargetCovariances,
) -> Result<ConditionedDistribution, ConditionError> {
    let T_D = &ctx.between_loading;
    let cov_WD_WD_inv = &ctx.station_cov_inv;
    let zeta_D = &ctx.vectors.residuals;

    // Posterior distribution of the normalized between-event residual
    // H | Y_D = y_D (Engler et al. 2022, eqns B8 and B9).
    let weighted_loading = cov_WD_WD_inv.dot(T_D);
    let precision = T_D.t().dot(&weighted_loading) + pseudo_inverse(&ctx.corr_between)?;
    let cov_HD_HD_yD = pseudo_inverse(&precision)?;
    let mu_HD_yD = cov_HD_HD_yD.dot(&weighted_loading.t().dot(zeta_D));

    // Conditional between-event residual B | Y_D = y_D at the stations.
    let mu_BD_yD = T_D.dot(&mu_HD_yD);
    let cov_BD_BD_yD = T_D.dot(&cov_HD_HD_yD).dot(&T_D.t());
    let bias = NominalBias {
        mean: mu_BD_yD.mean().unwrap_or(0.0),
        stddev: mean_of_diagonal(&cov_BD_BD_yD).sqrt(),
    };
    log::info!(
        "GMM: {}, IMT: {}, nominal bias mean: {:.3}, nominal bias stddev: {:.3}",
        ctx.gmm,
        ctx.selection.target_imt(),
        bias.mean,
        bias.stddev,
    );

    // Generalized-least-squares gain relating the stations to the targets.
    let RC = cov.target_station.dot(cov_WD_WD_inv);

    // Conditioned mean: unconditioned mean, plus the between-event term
    // scaled by the posterior of the normalized residual, plus the gain
    // applied to the de-biased station residuals.
    let mu_HN_yD = mu_HD_yD[0];
    let mean =
        &target.mu + &(&target.tau * mu_HN_yD) + RC.dot(&(zeta_D - &mu_BD_yD));

    // Conditioned within-event covariance; floating point can push entries
    // slightly negative, which is physically invalid.
    let mut within_cov = &cov.target_target - &RC.dot(&cov.station_target);
    within_cov.mapv_inplace(|v| v.max(0.0));

    // Conditioned between-event covariance through the scaling matrix C.
    let C = target_between_loading(&ctx.selection, &target.tau) - RC.dot(T_D);
    let mut between_cov = C.dot(&cov_HD_HD_yD).dot(&C.t());
    between_cov.mapv_inplace(|v| v.max(0.0));

    // The elementwise clips can leave the matrices marginally indefinite;
    // both must behave as covariance matrices downstream.
    let within_cov = ensure_psd(&within_cov, 0.0)?;
    let between_cov = ensure_psd(&between_cov, 0.0)?;

    Ok(ConditionedDistribution {
        imt: ctx.selection.target_imt(),
        mean,
        within_cov,
        between_cov,
        bias,
    })
}
