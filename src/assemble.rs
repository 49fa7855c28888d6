//! Selection and assembly of the conditioning inputs for one target IMT.
//!
//! Chooses which observed IMTs condition a target IMT, validates the
//! station table for completeness, and stacks the per-station observation
//! and prediction vectors in the block layout the covariance builder and
//! conditioner expect: station-major within each conditioning IMT, IMT
//! blocks concatenated in selection order.

use crate::gmm::{EventTermStdDevs, GmmPredictions};
use crate::types::{Imt, StationData};
use ndarray::{Array1, Array2, Axis};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AssemblyError {
    #[error(
        "the station data contains {num_nulls} null values for {imt}; \
         fill or discard these rows before conditioning"
    )]
    IncompleteStationData { imt: Imt, num_nulls: usize },
    #[error("no observed spectral IMTs are available to condition {imt}")]
    NoUsableObservations { imt: Imt },
    #[error("{imt} was selected for conditioning but is missing from the station table")]
    MissingObservedImt { imt: Imt },
    #[error("{imt} was selected for conditioning but the GMM predictions do not cover it")]
    MissingPrediction { imt: Imt },
}

/// The observed IMTs chosen to condition one target IMT.
///
/// The two cases need different data downstream (the bracketed case
/// zero-pads the between-event loading for the unobserved target slot), so
/// they are kept apart instead of being collapsed into a flag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImtSelection {
    /// The target IMT itself was recorded at the stations.
    Native(Imt),
    /// The target IMT was not recorded; conditioning uses the observed IMTs
    /// adjacent in period (two inside the observed range, one outside it).
    Bracketed { target: Imt, observed: Vec<Imt> },
}

impl ImtSelection {
    /// The observed IMTs whose station columns feed the conditioning.
    pub fn conditioning_imts(&self) -> &[Imt] {
        match self {
            ImtSelection::Native(imt) => std::slice::from_ref(imt),
            ImtSelection::Bracketed { observed, .. } => observed,
        }
    }

    /// The IMT list indexing the between-event residual vector: the target
    /// IMT first, then the conditioning IMTs in the bracketed case.
    pub fn bracketed_imts(&self) -> Vec<Imt> {
        match self {
            ImtSelection::Native(imt) => vec![*imt],
            ImtSelection::Bracketed { target, observed } => {
                let mut imts = Vec::with_capacity(observed.len() + 1);
                imts.push(*target);
                imts.extend_from_slice(observed);
                imts
            }
        }
    }

    pub fn target_imt(&self) -> Imt {
        match self {
            ImtSelection::Native(imt) => *imt,
            ImtSelection::Bracketed { target, .. } => *target,
        }
    }
}

/// Choose the conditioning IMTs for `target` among `observed`.
///
/// The cross-IMT correlation structure is only trusted between neighbouring
/// periods, so a target inside the observed period range interpolates
/// between its two bracketing IMTs, while a target outside the range uses
/// the single nearest observed IMT.
pub fn select_conditioning_imts(
    target: Imt,
    observed: &[Imt],
) -> Result<ImtSelection, AssemblyError> {
    if observed.is_empty() {
        return Err(AssemblyError::NoUsableObservations { imt: target });
    }
    if observed.contains(&target) {
        return Ok(ImtSelection::Native(target));
    }

    let mut all_imts = observed.to_vec();
    all_imts.push(target);
    all_imts.sort();
    let idx = all_imts
        .iter()
        .position(|&imt| imt == target)
        .expect("target was just inserted");

    let conditioning = if idx == 0 {
        // below the observed period range: nearest observed IMT only
        vec![all_imts[1]]
    } else if idx == all_imts.len() - 1 {
        // above the observed period range: nearest observed IMT only
        vec![all_imts[all_imts.len() - 2]]
    } else {
        vec![all_imts[idx - 1], all_imts[idx + 1]]
    };
    Ok(ImtSelection::Bracketed {
        target,
        observed: conditioning,
    })
}

/// Station-side vectors for one unit of work, stacked per conditioning IMT.
#[derive(Debug, Clone)]
pub struct ObservationVectors {
    /// Observed medians in natural-log units.
    pub y: Array1<f64>,
    /// Additional variance of converted observations (log units).
    pub var_addon: Array1<f64>,
    /// GMM mean at the stations.
    pub mu: Array1<f64>,
    /// GMM within-event stddev at the stations.
    pub phi: Array1<f64>,
    /// GMM between-event stddev at the stations.
    pub tau: Array1<f64>,
    /// Raw residuals `y - mu`.
    pub residuals: Array1<f64>,
}

/// Validate the station table for the selected conditioning IMTs and stack
/// the observation and prediction vectors.
///
/// The completeness check runs first: a null in any conditioning column
/// aborts the unit before any matrix is assembled.
pub fn assemble_observations(
    station_data: &StationData,
    predictions: &GmmPredictions,
    terms: &EventTermStdDevs,
    selection: &ImtSelection,
) -> Result<ObservationVectors, AssemblyError> {
    let conditioning = selection.conditioning_imts();
    let num_stations = station_data.num_stations();

    for &imt in conditioning {
        let column = station_data
            .column(imt)
            .ok_or(AssemblyError::MissingObservedImt { imt })?;
        let num_nulls = column.num_nulls();
        if num_nulls > 0 {
            return Err(AssemblyError::IncompleteStationData { imt, num_nulls });
        }
        if predictions.row(imt).is_none() {
            return Err(AssemblyError::MissingPrediction { imt });
        }
    }

    let len = conditioning.len() * num_stations;
    let mut y = Array1::<f64>::zeros(len);
    let mut var_addon = Array1::<f64>::zeros(len);
    let mut mu = Array1::<f64>::zeros(len);
    let mut phi = Array1::<f64>::zeros(len);
    let mut tau = Array1::<f64>::zeros(len);

    for (block, &imt) in conditioning.iter().enumerate() {
        let column = station_data
            .column(imt)
            .expect("column presence checked above");
        let row = predictions.row(imt).expect("prediction checked above");
        for station in 0..num_stations {
            let i = block * num_stations + station;
            let median = column.median[station].expect("nulls rejected above");
            y[i] = median.ln();
            var_addon[i] = column.extra_std[station] * column.extra_std[station];
            mu[i] = predictions.mean[[row, station]];
            phi[i] = terms.phi[[row, station]];
            tau[i] = terms.tau[[row, station]];
        }
    }

    let residuals = &y - &mu;
    Ok(ObservationVectors {
        y,
        var_addon,
        mu,
        phi,
        tau,
        residuals,
    })
}

/// Between-event loading matrix `T_D` mapping the normalized between-event
/// residual vector onto the stacked station vector.
///
/// In the native case the loading is a single column of tau. In the
/// bracketed case the first column (the unobserved target slot) is zero:
/// an IMT that was never recorded contributes no direct between-event
/// information of its own, only through its correlation with the bracketing
/// IMTs.
pub fn between_event_loading(
    selection: &ImtSelection,
    tau: &Array1<f64>,
    num_stations: usize,
) -> Array2<f64> {
    match selection {
        ImtSelection::Native(_) => tau.clone().insert_axis(Axis(1)),
        ImtSelection::Bracketed { observed, .. } => {
            let k = observed.len();
            let mut loading = Array2::<f64>::zeros((k * num_stations, k + 1));
            for block in 0..k {
                for station in 0..num_stations {
                    let i = block * num_stations + station;
                    loading[[i, block + 1]] = tau[i];
                }
            }
            loading
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObservationColumn;
    use ndarray::array;

    const OBSERVED: [Imt; 3] = [Imt::Sa(0.2), Imt::Sa(0.5), Imt::Sa(1.0)];

    #[test]
    fn native_target_uses_itself() {
        let selection = select_conditioning_imts(Imt::Sa(0.5), &OBSERVED).unwrap();
        assert_eq!(selection, ImtSelection::Native(Imt::Sa(0.5)));
        assert_eq!(selection.bracketed_imts(), vec![Imt::Sa(0.5)]);
    }

    #[test]
    fn target_between_observed_periods_is_bracketed_by_both_neighbours() {
        let selection = select_conditioning_imts(Imt::Sa(0.7), &OBSERVED).unwrap();
        assert_eq!(
            selection,
            ImtSelection::Bracketed {
                target: Imt::Sa(0.7),
                observed: vec![Imt::Sa(0.5), Imt::Sa(1.0)],
            }
        );
        assert_eq!(
            selection.bracketed_imts(),
            vec![Imt::Sa(0.7), Imt::Sa(0.5), Imt::Sa(1.0)]
        );
    }

    #[test]
    fn target_below_observed_range_uses_lowest_observed_only() {
        let selection = select_conditioning_imts(Imt::Pga, &OBSERVED).unwrap();
        assert_eq!(
            selection,
            ImtSelection::Bracketed {
                target: Imt::Pga,
                observed: vec![Imt::Sa(0.2)],
            }
        );
    }

    #[test]
    fn target_above_observed_range_uses_highest_observed_only() {
        let selection = select_conditioning_imts(Imt::Sa(3.0), &OBSERVED).unwrap();
        assert_eq!(
            selection,
            ImtSelection::Bracketed {
                target: Imt::Sa(3.0),
                observed: vec![Imt::Sa(1.0)],
            }
        );
    }

    #[test]
    fn empty_observed_set_is_rejected() {
        let err = select_conditioning_imts(Imt::Pga, &[]).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::NoUsableObservations { imt: Imt::Pga }
        );
    }

    fn predictions_for(imts: &[Imt], num_stations: usize) -> GmmPredictions {
        let shape = (imts.len(), num_stations);
        GmmPredictions::new(
            imts.to_vec(),
            Array2::from_elem(shape, -1.0),
            Array2::from_elem(shape, 0.8),
            Some(EventTermStdDevs {
                tau: Array2::from_elem(shape, 0.3),
                phi: Array2::from_elem(shape, 0.6),
            }),
        )
    }

    #[test]
    fn null_in_conditioning_column_is_rejected_with_count() {
        let mut data = StationData::new(3);
        data.insert(
            Imt::Pga,
            ObservationColumn {
                median: vec![Some(0.2), None, Some(0.1)],
                extra_std: vec![0.0; 3],
            },
        )
        .unwrap();
        let predictions = predictions_for(&[Imt::Pga], 3);
        let terms = predictions.event_terms("test").unwrap();
        let selection = ImtSelection::Native(Imt::Pga);
        let err = assemble_observations(&data, &predictions, terms, &selection).unwrap_err();
        assert_eq!(
            err,
            AssemblyError::IncompleteStationData {
                imt: Imt::Pga,
                num_nulls: 1
            }
        );
    }

    #[test]
    fn vectors_are_stacked_station_major_per_imt_block() {
        let mut data = StationData::new(2);
        data.insert(Imt::Sa(0.5), ObservationColumn::recorded(vec![0.2, 0.3]))
            .unwrap();
        data.insert(
            Imt::Sa(1.0),
            ObservationColumn {
                median: vec![Some(0.1), Some(0.15)],
                extra_std: vec![0.5, 0.0],
            },
        )
        .unwrap();
        let predictions = predictions_for(&[Imt::Sa(0.5), Imt::Sa(1.0)], 2);
        let terms = predictions.event_terms("test").unwrap();
        let selection = ImtSelection::Bracketed {
            target: Imt::Sa(0.7),
            observed: vec![Imt::Sa(0.5), Imt::Sa(1.0)],
        };
        let vectors = assemble_observations(&data, &predictions, terms, &selection).unwrap();
        assert_eq!(vectors.y.len(), 4);
        assert_eq!(vectors.y[0], 0.2f64.ln());
        assert_eq!(vectors.y[2], 0.1f64.ln());
        assert_eq!(vectors.var_addon, array![0.0, 0.0, 0.25, 0.0]);
        assert_eq!(vectors.residuals[1], 0.3f64.ln() + 1.0);
    }

    #[test]
    fn native_loading_is_a_single_tau_column() {
        let selection = ImtSelection::Native(Imt::Pga);
        let tau = array![0.3, 0.4];
        let loading = between_event_loading(&selection, &tau, 2);
        assert_eq!(loading.dim(), (2, 1));
        assert_eq!(loading[[0, 0]], 0.3);
        assert_eq!(loading[[1, 0]], 0.4);
    }

    #[test]
    fn bracketed_loading_zero_pads_the_target_slot() {
        let selection = ImtSelection::Bracketed {
            target: Imt::Sa(0.7),
            observed: vec![Imt::Sa(0.5), Imt::Sa(1.0)],
        };
        let tau = array![0.30, 0.31, 0.40, 0.41];
        let loading = between_event_loading(&selection, &tau, 2);
        assert_eq!(loading.dim(), (4, 3));
        // first column (target slot) is all zeros
        for i in 0..4 {
            assert_eq!(loading[[i, 0]], 0.0);
        }
        assert_eq!(loading[[0, 1]], 0.30);
        assert_eq!(loading[[1, 1]], 0.31);
        assert_eq!(loading[[2, 2]], 0.40);
        assert_eq!(loading[[3, 2]], 0.41);
        assert_eq!(loading[[2, 1]], 0.0);
    }
}
