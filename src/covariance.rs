//! Within-event covariance matrices between arbitrary pairs of
//! (site-set, IMT-set).
//!
//! The correlation structure for differing IMTs at differing locations is
//! taken as Markovian: the cross correlation of IMTs i and j at a common
//! location times the spatial correlation over the separating distance. The
//! spatial factor for an off-diagonal IMT pair is the elementwise maximum of
//! the two single-IMT spatial correlation matrices.

use crate::correlation::{CrossImtWithin, SpatialCorrelation};
use crate::geo;
use crate::types::{Imt, SiteCollection};
use ndarray::{Array1, Array2, Zip, s};

/// Builds dense within-event covariance blocks from a spatial correlation
/// model and a within-event cross-IMT correlation model.
pub struct SpatialCovarianceBuilder<'a> {
    spatial: &'a dyn SpatialCorrelation,
    cross_within: &'a dyn CrossImtWithin,
}

impl<'a> SpatialCovarianceBuilder<'a> {
    pub fn new(
        spatial: &'a dyn SpatialCorrelation,
        cross_within: &'a dyn CrossImtWithin,
    ) -> Self {
        Self {
            spatial,
            cross_within,
        }
    }

    fn correlation_block(
        &self,
        distances: &Array2<f64>,
        imt_a: Imt,
        imt_b: Imt,
    ) -> Array2<f64> {
        if imt_a == imt_b {
            return self.spatial.correlation_matrix(distances, imt_a);
        }
        let rho_a = self.spatial.correlation_matrix(distances, imt_a);
        let rho_b = self.spatial.correlation_matrix(distances, imt_b);
        let coeff = self.cross_within.correlation(imt_a, imt_b);
        let mut out = rho_a;
        Zip::from(&mut out).and(&rho_b).for_each(|a, &b| {
            *a = a.max(b) * coeff;
        });
        out
    }

    /// Block correlation matrix over `(imts_a x sites_a)` rows and
    /// `(imts_b x sites_b)` columns, station-major within each IMT block.
    pub fn cross_correlation(
        &self,
        sites_a: &SiteCollection,
        sites_b: &SiteCollection,
        imts_a: &[Imt],
        imts_b: &[Imt],
    ) -> Array2<f64> {
        let distances = geo::distance_matrix(sites_a, sites_b);
        let (na, nb) = distances.dim();
        let mut out = Array2::<f64>::zeros((imts_a.len() * na, imts_b.len() * nb));
        for (bi, &imt_a) in imts_a.iter().enumerate() {
            for (bj, &imt_b) in imts_b.iter().enumerate() {
                let block = self.correlation_block(&distances, imt_a, imt_b);
                out.slice_mut(s![bi * na..(bi + 1) * na, bj * nb..(bj + 1) * nb])
                    .assign(&block);
            }
        }
        out
    }

    /// Covariance `diag(sigma_a) . rho . diag(sigma_b)` with the stddev
    /// vectors stacked in the same block layout as the correlation matrix.
    pub fn cross_covariance(
        &self,
        sites_a: &SiteCollection,
        sites_b: &SiteCollection,
        imts_a: &[Imt],
        imts_b: &[Imt],
        sigma_a: &Array1<f64>,
        sigma_b: &Array1<f64>,
    ) -> Array2<f64> {
        debug_assert_eq!(sigma_a.len(), imts_a.len() * sites_a.len());
        debug_assert_eq!(sigma_b.len(), imts_b.len() * sites_b.len());
        let mut cov = self.cross_correlation(sites_a, sites_b, imts_a, imts_b);
        for i in 0..cov.nrows() {
            for j in 0..cov.ncols() {
                cov[[i, j]] *= sigma_a[i] * sigma_b[j];
            }
        }
        cov
    }

    /// Station-to-station within-event covariance for the conditioning IMTs,
    /// with the additional variance of converted observations added on the
    /// diagonal.
    pub fn station_covariance(
        &self,
        stations: &SiteCollection,
        imts: &[Imt],
        phi: &Array1<f64>,
        var_addon: &Array1<f64>,
    ) -> Array2<f64> {
        let mut cov = self.cross_covariance(stations, stations, imts, imts, phi, phi);
        for i in 0..cov.nrows() {
            cov[[i, i]] += var_addon[i];
        }
        cov
    }
}
