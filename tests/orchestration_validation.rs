//! Input validation, capability gating and bracketing behaviour of the
//! orchestrator.

use conditioned_gmf::{
    AddBetweenWithinStds, AssemblyError, BakerJayaram2008, ConditioningInputs, EventTermStdDevs,
    GmmError, GmmPredictions, GodaAtkinson2009, GroundMotionModel, Imt, Jb2009, Location,
    ObservationColumn, OrchestrationError, Rupture, SiteCollection, SiteId, StationData,
    compute_conditioned_fields,
};
use approx::assert_abs_diff_eq;
use ndarray::{Array1, Array2};

struct UniformGmm {
    mean: f64,
    tau: f64,
    phi: f64,
}

impl GroundMotionModel for UniformGmm {
    fn name(&self) -> &str {
        "UniformGmm"
    }

    fn predict(
        &self,
        _rupture: &Rupture,
        sites: &SiteCollection,
        imts: &[Imt],
    ) -> Result<GmmPredictions, GmmError> {
        let shape = (imts.len(), sites.len());
        let total = (self.tau * self.tau + self.phi * self.phi).sqrt();
        Ok(GmmPredictions::new(
            imts.to_vec(),
            Array2::from_elem(shape, self.mean),
            Array2::from_elem(shape, total),
            Some(EventTermStdDevs {
                tau: Array2::from_elem(shape, self.tau),
                phi: Array2::from_elem(shape, self.phi),
            }),
        ))
    }
}

/// A model exposing only the total standard deviation.
struct TotalOnlyGmm {
    sigma: f64,
}

impl GroundMotionModel for TotalOnlyGmm {
    fn name(&self) -> &str {
        "TotalOnlyGmm"
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
            Array2::from_elem(shape, self.sigma),
            None,
        ))
    }

    fn provides_event_terms(&self) -> bool {
        false
    }
}

fn rupture() -> Rupture {
    Rupture {
        magnitude: 6.5,
        hypocenter: Location {
            lon: 13.0,
            lat: 42.0,
            depth_km: 10.0,
        },
    }
}

fn site_collection(first_id: u32, points: &[(f64, f64)]) -> SiteCollection {
    SiteCollection::new(
        (first_id..first_id + points.len() as u32).map(SiteId).collect(),
        points.iter().map(|p| p.0).collect(),
        points.iter().map(|p| p.1).collect(),
        Array1::from_elem(points.len(), 760.0),
    )
    .expect("valid site collection")
}

const SPATIAL: Jb2009 = Jb2009 {
    vs30_clustering: false,
};

struct Fixture {
    rupture: Rupture,
    station_sites: SiteCollection,
    station_data: StationData,
    target_sites: SiteCollection,
}

fn fixture() -> Fixture {
    let station_sites = site_collection(1000, &[(13.0, 42.0), (13.2, 42.1)]);
    let mut station_data = StationData::new(2);
    station_data
        .insert(Imt::Sa(0.2), ObservationColumn::recorded(vec![1.1, 0.8]))
        .expect("column length matches");
    station_data
        .insert(Imt::Sa(1.0), ObservationColumn::recorded(vec![0.5, 0.4]))
        .expect("column length matches");
    let target_sites = site_collection(0, &[(13.05, 42.02), (13.4, 42.3)]);
    Fixture {
        rupture: rupture(),
        station_sites,
        station_data,
        target_sites,
    }
}

impl Fixture {
    fn inputs(&self) -> ConditioningInputs<'_> {
        ConditioningInputs {
            rupture: &self.rupture,
            station_sites: &self.station_sites,
            station_data: &self.station_data,
            target_sites: &self.target_sites,
            spatial: &SPATIAL,
            cross_between: &GodaAtkinson2009,
            cross_within: &BakerJayaram2008,
        }
    }
}

#[test]
fn total_only_model_is_rejected_before_any_unit_runs() {
    let fixture = fixture();
    let gmm = TotalOnlyGmm { sigma: 0.8 };
    let err = compute_conditioned_fields(&fixture.inputs(), &[&gmm], &[Imt::Sa(0.2)]).unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Gmm(GmmError::NoInterIntraStdDevs { .. })
    ));
}

#[test]
fn between_within_decorator_unlocks_a_total_only_model() {
    let fixture = fixture();
    let gmm = AddBetweenWithinStds::new(TotalOnlyGmm { sigma: 0.8 }, 2.0);
    let fields = compute_conditioned_fields(&fixture.inputs(), &[&gmm], &[Imt::Sa(0.2)])
        .expect("decorated model should condition");
    assert_eq!(fields.num_gmms(), 1);
    assert_eq!(fields.imts, vec![Imt::Sa(0.2)]);
    assert!(fields.mean[[0, 0, 0]].is_finite());
}

#[test]
fn null_observation_in_conditioning_column_aborts_the_run() {
    let mut fixture = fixture();
    fixture
        .station_data
        .insert(
            Imt::Sa(0.2),
            ObservationColumn {
                median: vec![Some(1.1), None],
                extra_std: vec![0.0, 0.0],
            },
        )
        .expect("column length matches");
    let gmm = UniformGmm {
        mean: 0.0,
        tau: 0.3,
        phi: 0.6,
    };
    let err = compute_conditioned_fields(&fixture.inputs(), &[&gmm], &[Imt::Sa(0.2)]).unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::Assembly(AssemblyError::IncompleteStationData {
            imt: Imt::Sa(_),
            num_nulls: 1,
        })
    ));
}

#[test]
fn null_in_an_unused_column_is_harmless() {
    let mut fixture = fixture();
    // the SA(1.0) column has a hole, but conditioning SA(0.2) never reads it
    fixture
        .station_data
        .insert(
            Imt::Sa(1.0),
            ObservationColumn {
                median: vec![Some(0.5), None],
                extra_std: vec![0.0, 0.0],
            },
        )
        .expect("column length matches");
    let gmm = UniformGmm {
        mean: 0.0,
        tau: 0.3,
        phi: 0.6,
    };
    compute_conditioned_fields(&fixture.inputs(), &[&gmm], &[Imt::Sa(0.2)])
        .expect("native conditioning of SA(0.2) should succeed");
}

#[test]
fn non_spectral_target_imts_are_filtered_with_a_warning() {
    let fixture = fixture();
    let gmm = UniformGmm {
        mean: 0.0,
        tau: 0.3,
        phi: 0.6,
    };
    let fields =
        compute_conditioned_fields(&fixture.inputs(), &[&gmm], &[Imt::Pgv, Imt::Sa(0.2)])
            .expect("the spectral target should survive filtering");
    assert_eq!(fields.imts, vec![Imt::Sa(0.2)]);

    let err = compute_conditioned_fields(&fixture.inputs(), &[&gmm], &[Imt::Pgv, Imt::Mmi])
        .unwrap_err();
    assert!(matches!(err, OrchestrationError::NoTargetImts));
}

#[test]
fn overlapping_station_and_target_ids_are_rejected() {
    let fixture = fixture();
    // reuse a station id among the targets
    let target_sites = site_collection(1001, &[(13.4, 42.3)]);
    let inputs = ConditioningInputs {
        target_sites: &target_sites,
        ..fixture.inputs()
    };
    let gmm = UniformGmm {
        mean: 0.0,
        tau: 0.3,
        phi: 0.6,
    };
    let err = compute_conditioned_fields(&inputs, &[&gmm], &[Imt::Sa(0.2)]).unwrap_err();
    assert!(matches!(
        err,
        OrchestrationError::OverlappingSites { shared } if shared == vec![SiteId(1001)]
    ));
}

#[test]
fn station_table_without_spectral_columns_is_rejected() {
    let fixture = fixture();
    let mut station_data = StationData::new(2);
    station_data
        .insert(Imt::Pgv, ObservationColumn::recorded(vec![4.0, 3.0]))
        .expect("column length matches");
    let inputs = ConditioningInputs {
        station_data: &station_data,
        ..fixture.inputs()
    };
    let gmm = UniformGmm {
        mean: 0.0,
        tau: 0.3,
        phi: 0.6,
    };
    let err = compute_conditioned_fields(&inputs, &[&gmm], &[Imt::Sa(0.2)]).unwrap_err();
    assert!(matches!(err, OrchestrationError::NoObservedImts));
}

#[test]
fn results_are_indexed_by_gmm_and_imt() {
    let fixture = fixture();
    let weak = UniformGmm {
        mean: -1.0,
        tau: 0.3,
        phi: 0.6,
    };
    let strong = UniformGmm {
        mean: 1.0,
        tau: 0.3,
        phi: 0.6,
    };
    // SA(0.5) is bracketed, the others are native
    let targets = [Imt::Sa(0.2), Imt::Sa(0.5), Imt::Sa(1.0)];
    let fields = compute_conditioned_fields(&fixture.inputs(), &[&weak, &strong], &targets)
        .expect("conditioning should succeed");

    assert_eq!(fields.num_gmms(), 2);
    assert_eq!(fields.num_imts(), 3);
    assert_eq!(fields.num_sites(), 2);
    assert_eq!(fields.mean.dim(), (2, 3, 2));
    assert_eq!(fields.within_cov.dim(), (2, 3, 2, 2));
    assert_eq!(fields.site_ids, vec![SiteId(0), SiteId(1)]);

    // the two models see the same observations but different priors, so the
    // model with the lower prior mean conditions to a lower field
    for imt_idx in 0..3 {
        for site in 0..2 {
            let weak_mean = fields.mean[[0, imt_idx, site]];
            let strong_mean = fields.mean[[1, imt_idx, site]];
            assert!(weak_mean.is_finite() && strong_mean.is_finite());
            assert!(weak_mean < strong_mean);
        }
    }

    // total covariance is the sum of the two components
    let total = fields.total_cov(1, 1);
    for i in 0..2 {
        for j in 0..2 {
            assert_abs_diff_eq!(
                total[[i, j]],
                fields.within_cov[[1, 1, i, j]] + fields.between_cov[[1, 1, i, j]],
                epsilon = 1e-15
            );
        }
    }
}
