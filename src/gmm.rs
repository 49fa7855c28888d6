//! Ground-motion model interface.
//!
//! The conditioning engine receives concrete model instances through this
//! trait; there is no registry lookup by name. Regional or ad-hoc
//! adjustments compose as decorators over the same interface, see
//! [`AddBetweenWithinStds`].

use crate::types::{Imt, Rupture, SiteCollection};
use ndarray::Array2;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GmmError {
    #[error(
        "the ground-motion model {gmm} defines only the total standard deviation; \
         conditioning requires the inter- and intra-event components, either from \
         the model itself or by wrapping it in AddBetweenWithinStds"
    )]
    NoInterIntraStdDevs { gmm: String },
    #[error("ground-motion model {gmm} failed to predict: {detail}")]
    PredictionFailed { gmm: String, detail: String },
}

/// Between-event (tau) and within-event (phi) standard deviations, shaped
/// `(num_imts, num_sites)` like the accompanying means.
#[derive(Debug, Clone)]
pub struct EventTermStdDevs {
    pub tau: Array2<f64>,
    pub phi: Array2<f64>,
}

/// Predictions of one ground-motion model over a site collection.
///
/// `mean` is in natural-log units of the intensity measure; `total` is the
/// total aleatory standard deviation. Models that cannot decompose `total`
/// into between/within components leave `event_terms` empty and are rejected
/// by the conditioning engine before any matrix algebra runs.
#[derive(Debug, Clone)]
pub struct GmmPredictions {
    imts: Vec<Imt>,
    pub mean: Array2<f64>,
    pub total: Array2<f64>,
    pub event_terms: Option<EventTermStdDevs>,
}

impl GmmPredictions {
    pub fn new(
        imts: Vec<Imt>,
        mean: Array2<f64>,
        total: Array2<f64>,
        event_terms: Option<EventTermStdDevs>,
    ) -> Self {
        Self {
            imts,
            mean,
            total,
            event_terms,
        }
    }

    pub fn imts(&self) -> &[Imt] {
        &self.imts
    }

    pub fn num_sites(&self) -> usize {
        self.mean.ncols()
    }

    /// Row index of `imt` in the prediction arrays.
    pub fn row(&self, imt: Imt) -> Option<usize> {
        self.imts.iter().position(|&m| m == imt)
    }

    /// The between/within decomposition, or the capability error that makes
    /// this model unusable for conditioning.
    pub fn event_terms(&self, gmm: &str) -> Result<&EventTermStdDevs, GmmError> {
        self.event_terms.as_ref().ok_or_else(|| {
            GmmError::NoInterIntraStdDevs {
                gmm: gmm.to_string(),
            }
        })
    }
}

/// A ground-motion model: predicts the lognormal shaking distribution for a
/// rupture at a set of sites.
pub trait GroundMotionModel: Send + Sync {
    fn name(&self) -> &str;

    fn predict(
        &self,
        rupture: &Rupture,
        sites: &SiteCollection,
        imts: &[Imt],
    ) -> Result<GmmPredictions, GmmError>;

    /// Whether predictions carry the between/within decomposition. Models
    /// answering `false` are rejected before any unit of work is scheduled.
    fn provides_event_terms(&self) -> bool {
        true
    }
}

/// Decorator adding a between/within decomposition to a model that only
/// defines the total standard deviation.
///
/// `within_between_ratio` is phi/tau; the split preserves the total:
/// `tau = total / sqrt(1 + r^2)`, `phi = r * tau`.
#[derive(Debug, Clone)]
pub struct AddBetweenWithinStds<G> {
    inner: G,
    within_between_ratio: f64,
}

impl<G: GroundMotionModel> AddBetweenWithinStds<G> {
    pub fn new(inner: G, within_between_ratio: f64) -> Self {
        Self {
            inner,
            within_between_ratio,
        }
    }
}

impl<G: GroundMotionModel> GroundMotionModel for AddBetweenWithinStds<G> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn predict(
        &self,
        rupture: &Rupture,
        sites: &SiteCollection,
        imts: &[Imt],
    ) -> Result<GmmPredictions, GmmError> {
        let mut predictions = self.inner.predict(rupture, sites, imts)?;
        if predictions.event_terms.is_none() {
            let r2 = self.within_between_ratio * self.within_between_ratio;
            let tau = predictions.total.mapv(|sigma| (sigma * sigma / (1.0 + r2)).sqrt());
            let phi = tau.mapv(|t| self.within_between_ratio * t);
            predictions.event_terms = Some(EventTermStdDevs { tau, phi });
        }
        Ok(predictions)
    }

    fn provides_event_terms(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Location, SiteId};
    use approx::assert_relative_eq;
    use ndarray::Array1;

    struct TotalOnly;

    impl GroundMotionModel for TotalOnly {
        fn name(&self) -> &str {
            "TotalOnly"
        }

        fn predict(
            &self,
            _rupture: &Rupture,
            sites: &SiteCollection,
            imts: &[Imt],
        ) -> Result<GmmPredictions, GmmError> {
            let shape = (imts.len(), sites.len());
            Ok(GmmPredictions::new(
                imts.to_vec(),
                Array2::zeros(shape),
                Array2::from_elem(shape, 0.8),
                None,
            ))
        }

        fn provides_event_terms(&self) -> bool {
            false
        }
    }

    fn fixture() -> (Rupture, SiteCollection) {
        let rupture = Rupture {
            magnitude: 6.0,
            hypocenter: Location {
                lon: 13.0,
                lat: 42.0,
                depth_km: 10.0,
            },
        };
        let sites = SiteCollection::new(
            vec![SiteId(0), SiteId(1)],
            Array1::from(vec![13.0, 13.1]),
            Array1::from(vec![42.0, 42.1]),
            Array1::from_elem(2, 760.0),
        )
        .expect("valid sites");
        (rupture, sites)
    }

    #[test]
    fn total_only_model_reports_missing_event_terms() {
        let (rupture, sites) = fixture();
        let predictions = TotalOnly
            .predict(&rupture, &sites, &[Imt::Pga])
            .expect("prediction should succeed");
        assert!(matches!(
            predictions.event_terms("TotalOnly"),
            Err(GmmError::NoInterIntraStdDevs { .. })
        ));
    }

    #[test]
    fn decorator_splits_total_preserving_its_magnitude() {
        let (rupture, sites) = fixture();
        let wrapped = AddBetweenWithinStds::new(TotalOnly, 1.5);
        assert!(wrapped.provides_event_terms());
        let predictions = wrapped
            .predict(&rupture, &sites, &[Imt::Pga])
            .expect("prediction should succeed");
        let terms = predictions
            .event_terms("TotalOnly")
            .expect("decorated model must carry event terms");
        let tau = terms.tau[[0, 0]];
        let phi = terms.phi[[0, 0]];
        assert_relative_eq!(phi / tau, 1.5, epsilon = 1e-12);
        assert_relative_eq!((tau * tau + phi * phi).sqrt(), 0.8, epsilon = 1e-12);
    }
}
