//! Drives the per-(GMM, target-IMT) conditioning computation.
//!
//! Every (GMM, target-IMT) pair is an independent unit of work over shared
//! read-only inputs; units run on the rayon pool and the whole batch fails
//! on the first error, since a partially populated result set cannot feed
//! downstream GMF sampling. Completion order is irrelevant: results are
//! merged into dense arrays by (gmm, imt) index.

use crate::assemble::{
    AssemblyError, assemble_observations, between_event_loading, select_conditioning_imts,
};
use crate::conditioner::{
    ConditionError, ConditionedDistribution, ConditioningContext, NominalBias, TargetCovariances,
    TargetPrediction, condition,
};
use crate::correlation::{CrossImtBetween, CrossImtWithin, SpatialCorrelation};
use crate::covariance::SpatialCovarianceBuilder;
use crate::faer_ndarray::pseudo_inverse;
use crate::gmm::{GmmError, GmmPredictions, GroundMotionModel};
use crate::types::{Imt, Rupture, SiteCollection, SiteId, StationData};
use ndarray::{Array3, Array4, s};
use rayon::iter::{IntoParallelIterator, ParallelIterator};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestrationError {
    #[error(transparent)]
    Gmm(#[from] GmmError),
    #[error(transparent)]
    Assembly(#[from] AssemblyError),
    #[error(transparent)]
    Conditioning(#[from] ConditionError),
    #[error("station and target site collections share site ids {shared:?}")]
    OverlappingSites { shared: Vec<SiteId> },
    #[error("the station table has no spectral IMT columns to condition on")]
    NoObservedImts,
    #[error("none of the requested target IMTs is supported for conditioning")]
    NoTargetImts,
    #[error("{gmm} returned predictions shaped {got:?} for {expected:?} (imts, sites)")]
    PredictionShape {
        gmm: String,
        expected: (usize, usize),
        got: (usize, usize),
    },
}

/// Shared read-only inputs of one conditioning run.
pub struct ConditioningInputs<'a> {
    pub rupture: &'a Rupture,
    pub station_sites: &'a SiteCollection,
    pub station_data: &'a StationData,
    pub target_sites: &'a SiteCollection,
    pub spatial: &'a dyn SpatialCorrelation,
    pub cross_between: &'a dyn CrossImtBetween,
    pub cross_within: &'a dyn CrossImtWithin,
}

/// Dense conditioned results over every (GMM, target IMT) pair.
///
/// `mean` is indexed `[gmm, imt, site]`; the covariance arrays are indexed
/// `[gmm, imt, site, site]`.
#[derive(Debug, Clone)]
pub struct ConditionedFieldSet {
    pub gmm_names: Vec<String>,
    pub imts: Vec<Imt>,
    pub site_ids: Vec<SiteId>,
    pub mean: Array3<f64>,
    pub within_cov: Array4<f64>,
    pub between_cov: Array4<f64>,
    bias: Vec<NominalBias>,
}

impl ConditionedFieldSet {
    pub fn num_gmms(&self) -> usize {
        self.gmm_names.len()
    }

    pub fn num_imts(&self) -> usize {
        self.imts.len()
    }

    pub fn num_sites(&self) -> usize {
        self.site_ids.len()
    }

    /// Nominal event-bias diagnostics for one (gmm, imt) slot.
    pub fn bias(&self, gmm_idx: usize, imt_idx: usize) -> NominalBias {
        self.bias[gmm_idx * self.imts.len() + imt_idx]
    }

    /// Total conditioned covariance (within plus between) for one slot.
    pub fn total_cov(&self, gmm_idx: usize, imt_idx: usize) -> ndarray::Array2<f64> {
        let within = self.within_cov.slice(s![gmm_idx, imt_idx, .., ..]);
        let between = self.between_cov.slice(s![gmm_idx, imt_idx, .., ..]);
        &within + &between
    }
}

struct GmmUnitInputs {
    name: String,
    station: GmmPredictions,
    target: GmmPredictions,
}

fn check_prediction_shape(
    gmm: &str,
    predictions: &GmmPredictions,
    expected: (usize, usize),
) -> Result<(), OrchestrationError> {
    let shape_error = |got| OrchestrationError::PredictionShape {
        gmm: gmm.to_string(),
        expected,
        got,
    };
    if predictions.mean.dim() != expected {
        return Err(shape_error(predictions.mean.dim()));
    }
    if predictions.total.dim() != expected {
        return Err(shape_error(predictions.total.dim()));
    }
    if let Some(terms) = &predictions.event_terms {
        if terms.tau.dim() != expected {
            return Err(shape_error(terms.tau.dim()));
        }
        if terms.phi.dim() != expected {
            return Err(shape_error(terms.phi.dim()));
        }
    }
    Ok(())
}

/// Compute the conditioned mean and covariance of the shaking at the target
/// sites for every (GMM, target IMT) pair.
pub fn compute_conditioned_fields(
    inputs: &ConditioningInputs<'_>,
    gmms: &[&dyn GroundMotionModel],
    target_imts: &[Imt],
) -> Result<ConditionedFieldSet, OrchestrationError> {
    let station_ids: BTreeSet<SiteId> = inputs.station_sites.sids().iter().copied().collect();
    let shared: Vec<SiteId> = inputs
        .target_sites
        .sids()
        .iter()
        .copied()
        .filter(|sid| station_ids.contains(sid))
        .collect();
    if !shared.is_empty() {
        return Err(OrchestrationError::OverlappingSites { shared });
    }

    let imts: Vec<Imt> = target_imts
        .iter()
        .copied()
        .filter(|&imt| {
            if imt.is_spectral() {
                true
            } else {
                log::warn!("conditioned fields are not available for {imt}");
                false
            }
        })
        .collect();
    if imts.is_empty() {
        return Err(OrchestrationError::NoTargetImts);
    }

    let observed = inputs.station_data.observed_spectral_imts();
    if observed.is_empty() {
        return Err(OrchestrationError::NoObservedImts);
    }

    // Reject models lacking the between/within decomposition before any
    // unit of work is scheduled.
    for gmm in gmms {
        if !gmm.provides_event_terms() {
            return Err(GmmError::NoInterIntraStdDevs {
                gmm: gmm.name().to_string(),
            }
            .into());
        }
    }

    // One prediction pass per GMM at the stations and at the targets; the
    // resulting arrays are shared read-only by every unit of that GMM.
    let per_gmm: Vec<GmmUnitInputs> = gmms
        .iter()
        .map(|gmm| {
            let name = gmm.name().to_string();
            let station = gmm.predict(inputs.rupture, inputs.station_sites, &observed)?;
            check_prediction_shape(&name, &station, (observed.len(), inputs.station_sites.len()))?;
            station.event_terms(&name)?;
            let target = gmm.predict(inputs.rupture, inputs.target_sites, &imts)?;
            check_prediction_shape(&name, &target, (imts.len(), inputs.target_sites.len()))?;
            target.event_terms(&name)?;
            Ok(GmmUnitInputs {
                name,
                station,
                target,
            })
        })
        .collect::<Result<_, OrchestrationError>>()?;

    let builder = SpatialCovarianceBuilder::new(inputs.spatial, inputs.cross_within);

    let units: Vec<(usize, usize)> = (0..per_gmm.len())
        .flat_map(|g| (0..imts.len()).map(move |m| (g, m)))
        .collect();

    let mut results: Vec<((usize, usize), ConditionedDistribution)> = units
        .into_par_iter()
        .map(|(g, m)| {
            compute_unit(inputs, &builder, &per_gmm[g], imts[m], &observed)
                .map(|distribution| ((g, m), distribution))
        })
        .collect::<Result<_, OrchestrationError>>()?;
    results.sort_by_key(|((g, m), _)| (*g, *m));

    let num_gmms = per_gmm.len();
    let num_imts = imts.len();
    let num_sites = inputs.target_sites.len();
    let mut mean = Array3::<f64>::zeros((num_gmms, num_imts, num_sites));
    let mut within_cov = Array4::<f64>::zeros((num_gmms, num_imts, num_sites, num_sites));
    let mut between_cov = Array4::<f64>::zeros((num_gmms, num_imts, num_sites, num_sites));
    let mut bias = Vec::with_capacity(num_gmms * num_imts);
    for ((g, m), distribution) in results {
        mean.slice_mut(s![g, m, ..]).assign(&distribution.mean);
        within_cov
            .slice_mut(s![g, m, .., ..])
            .assign(&distribution.within_cov);
        between_cov
            .slice_mut(s![g, m, .., ..])
            .assign(&distribution.between_cov);
        bias.push(distribution.bias);
    }

    Ok(ConditionedFieldSet {
        gmm_names: per_gmm.into_iter().map(|g| g.name).collect(),
        imts,
        site_ids: inputs.target_sites.sids().to_vec(),
        mean,
        within_cov,
        between_cov,
        bias,
    })
}

fn compute_unit(
    inputs: &ConditioningInputs<'_>,
    builder: &SpatialCovarianceBuilder<'_>,
    gmm: &GmmUnitInputs,
    target_imt: Imt,
    observed: &[Imt],
) -> Result<ConditionedDistribution, OrchestrationError> {
    let selection = select_conditioning_imts(target_imt, observed)?;

    let station_terms = gmm.station.event_terms(&gmm.name)?;
    let vectors = assemble_observations(
        inputs.station_data,
        &gmm.station,
        station_terms,
        &selection,
    )?;
    let between_loading =
        between_event_loading(&selection, &vectors.tau, inputs.station_sites.len());
    let corr_between = inputs
        .cross_between
        .correlation_matrix(&selection.bracketed_imts());

    let conditioning_imts = selection.conditioning_imts().to_vec();
    let station_cov = builder.station_covariance(
        inputs.station_sites,
        &conditioning_imts,
        &vectors.phi,
        &vectors.var_addon,
    );
    let station_cov_inv = pseudo_inverse(&station_cov).map_err(ConditionError::from)?;

    let row = gmm
        .target
        .row(target_imt)
        .ok_or(AssemblyError::MissingPrediction { imt: target_imt })?;
    let target_terms = gmm.target.event_terms(&gmm.name)?;
    let target = TargetPrediction {
        mu: gmm.target.mean.row(row).to_owned(),
        tau: target_terms.tau.row(row).to_owned(),
        phi: target_terms.phi.row(row).to_owned(),
    };

    let target_station = builder.cross_covariance(
        inputs.target_sites,
        inputs.station_sites,
        &[target_imt],
        &conditioning_imts,
        &target.phi,
        &vectors.phi,
    );
    let station_target = builder.cross_covariance(
        inputs.station_sites,
        inputs.target_sites,
        &conditioning_imts,
        &[target_imt],
        &vectors.phi,
        &target.phi,
    );
    let target_target = builder.cross_covariance(
        inputs.target_sites,
        inputs.target_sites,
        &[target_imt],
        &[target_imt],
        &target.phi,
        &target.phi,
    );

    let ctx = ConditioningContext {
        gmm: gmm.name.clone(),
        selection,
        vectors,
        between_loading,
        corr_between,
        station_cov_inv,
    };
    let covariances = TargetCovariances {
        target_station,
        station_target,
        target_target,
    };
    condition(&ctx, &target, &covariances).map_err(Into::into)
}
