#![deny(dead_code)]
#![deny(unused_imports)]
#![allow(non_snake_case)]

//! Conditioned ground-motion fields.
//!
//! Combines ground-motion-model predictions with recorded station
//! observations to produce the posterior (conditioned) mean and covariance
//! of shaking intensity at a set of target sites, following Engler et al.
//! (2022). The ground-motion models and the correlation models are
//! injected by the caller through the traits in [`gmm`] and [`correlation`];
//! this crate owns the conditioning algebra, the covariance assembly, the
//! numerical PSD repair and the parallel orchestration.

pub mod assemble;
pub mod conditioner;
pub mod correlation;
pub mod covariance;
pub mod faer_ndarray;
pub mod geo;
pub mod gmm;
pub mod orchestrate;
pub mod stabilize;
pub mod types;

pub use assemble::{
    AssemblyError, ImtSelection, ObservationVectors, assemble_observations,
    between_event_loading, select_conditioning_imts,
};
pub use conditioner::{
    ConditionError, ConditionedDistribution, ConditioningContext, NominalBias,
    TargetCovariances, TargetPrediction, condition,
};
pub use correlation::{
    BakerJayaram2008, CrossImtBetween, CrossImtWithin, GodaAtkinson2009, Jb2009,
    SpatialCorrelation,
};
pub use covariance::SpatialCovarianceBuilder;
pub use gmm::{
    AddBetweenWithinStds, EventTermStdDevs, GmmError, GmmPredictions, GroundMotionModel,
};
pub use orchestrate::{
    ConditionedFieldSet, ConditioningInputs, OrchestrationError, compute_conditioned_fields,
};
pub use stabilize::{
    NearestMethod, Stabilized, StabilizeError, clip_eigenvalues, corr_clipped, corr_nearest,
    cov_nearest, ensure_psd,
};
pub use types::{
    DataError, Imt, Location, ObservationColumn, ParseImtError, Rupture, SiteCollection, SiteId,
    StationData,
};
