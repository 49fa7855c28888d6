//! Spatial and cross-IMT correlation models.
//!
//! The conditioning engine only consumes the traits defined here; the
//! concrete models are the published defaults used when the caller does not
//! inject anything else: Jayaram & Baker (2009) for spatial correlation,
//! Baker & Jayaram (2008) for within-event cross-IMT correlation and
//! Goda & Atkinson (2009) for between-event cross-IMT correlation.

use crate::types::Imt;
use ndarray::Array2;
use std::f64::consts::PI;

/// Spatial correlation of within-event residuals for a single IMT.
pub trait SpatialCorrelation: Send + Sync {
    /// Elementwise correlation in [0, 1] for a distance matrix in km.
    fn correlation_matrix(&self, distances_km: &Array2<f64>, imt: Imt) -> Array2<f64>;
}

/// Within-event cross-IMT correlation at a single location.
pub trait CrossImtWithin: Send + Sync {
    /// Correlation coefficient in [-1, 1].
    fn correlation(&self, imt_a: Imt, imt_b: Imt) -> f64;
}

/// Between-event cross-IMT correlation.
pub trait CrossImtBetween: Send + Sync {
    /// Correlation coefficient in [-1, 1].
    fn correlation(&self, imt_a: Imt, imt_b: Imt) -> f64;

    /// Full correlation matrix for an ordered IMT list.
    fn correlation_matrix(&self, imts: &[Imt]) -> Array2<f64> {
        let m = imts.len();
        let mut out = Array2::<f64>::eye(m);
        for i in 0..m {
            for j in (i + 1)..m {
                let rho = self.correlation(imts[i], imts[j]);
                out[[i, j]] = rho;
                out[[j, i]] = rho;
            }
        }
        out
    }
}

/// Effective period used by the cross-IMT models, which treat PGA as
/// short-period spectral acceleration.
fn effective_period(imt: Imt) -> f64 {
    match imt.period() {
        Some(period) if period > 0.0 => period,
        _ => 0.05,
    }
}

/// Jayaram & Baker (2009) spatial correlation model.
///
/// The correlation length depends on whether the vs30 values in the region
/// show clustering (case 2 of the paper) or not (case 1).
#[derive(Debug, Clone, Copy)]
pub struct Jb2009 {
    pub vs30_clustering: bool,
}

impl SpatialCorrelation for Jb2009 {
    fn correlation_matrix(&self, distances_km: &Array2<f64>, imt: Imt) -> Array2<f64> {
        let period = imt.period().unwrap_or(0.0);
        let b = if period < 1.0 {
            if self.vs30_clustering {
                // eq. (18)
                40.7 - 15.0 * period
            } else {
                // eq. (17)
                8.5 + 17.2 * period
            }
        } else {
            // eq. (19)
            22.0 + 3.7 * period
        };
        distances_km.mapv(|h| (-3.0 * h / b).exp())
    }
}

/// Baker & Jayaram (2008) correlation of epsilon across spectral periods,
/// used here for the within-event component.
#[derive(Debug, Clone, Copy, Default)]
pub struct BakerJayaram2008;

impl CrossImtWithin for BakerJayaram2008 {
    fn correlation(&self, imt_a: Imt, imt_b: Imt) -> f64 {
        if imt_a == imt_b {
            return 1.0;
        }
        let t1 = effective_period(imt_a);
        let t2 = effective_period(imt_b);
        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let c1 = 1.0 - (PI / 2.0 - 0.366 * (t_max / t_min.max(0.109)).ln()).cos();
        let c2 = if t_max < 0.2 {
            1.0 - 0.105 * (1.0 - 1.0 / (1.0 + (100.0 * t_max - 5.0).exp()))
                * ((t_max - t_min) / (t_max - 0.0099))
        } else {
            0.0
        };
        let c3 = if t_max < 0.109 { c2 } else { c1 };
        let c4 = c1 + 0.5 * (c3.sqrt() - c3) * (1.0 + (PI * t_min / 0.109).cos());

        if t_max <= 0.109 {
            c2
        } else if t_min > 0.109 {
            c1
        } else if t_max < 0.2 {
            c2.min(c4)
        } else {
            c4
        }
    }
}

/// Goda & Atkinson (2009) correlation of between-event residuals across
/// spectral periods.
#[derive(Debug, Clone, Copy, Default)]
pub struct GodaAtkinson2009;

impl CrossImtBetween for GodaAtkinson2009 {
    fn correlation(&self, imt_a: Imt, imt_b: Imt) -> f64 {
        if imt_a == imt_b {
            return 1.0;
        }
        let t1 = effective_period(imt_a);
        let t2 = effective_period(imt_b);
        let t_min = t1.min(t2);
        let t_max = t1.max(t2);

        let i_tmin = if t_min < 0.25 { 1.0 } else { 0.0 };
        let theta1 = 1.374;
        let theta2 = 5.586;
        let theta3 = 0.728;
        let angle = PI / 2.0
            - (theta1
                + theta2 * i_tmin * (t_min / t_max).powf(theta3) * (t_min / 0.25).log10())
                * (t_max / t_min).log10();
        let delta = 1.0 + (-1.5 * (t_max / t_min).log10()).cos();
        ((1.0 - angle.cos() + delta) / 3.0).min(1.0)
    }
}
