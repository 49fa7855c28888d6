use ndarray::Array1;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Intensity measure type.
///
/// Only the spectral measures (`Pga`, `Sa`) can participate in conditioning;
/// `Pgv` and `Mmi` are legal station-table keys but are filtered out of the
/// observed set before any conditioning IMT is selected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum Imt {
    /// Peak ground acceleration, treated as spectral acceleration at 0 s.
    Pga,
    /// Spectral acceleration at the given period in seconds.
    Sa(f64),
    /// Peak ground velocity.
    Pgv,
    /// Macroseismic intensity.
    Mmi,
}

impl Imt {
    /// Spectral period in seconds; `None` for non-spectral measures.
    pub fn period(self) -> Option<f64> {
        match self {
            Imt::Pga => Some(0.0),
            Imt::Sa(period) => Some(period),
            Imt::Pgv | Imt::Mmi => None,
        }
    }

    /// Whether this measure can be used as a conditioning or target IMT.
    pub fn is_spectral(self) -> bool {
        matches!(self, Imt::Pga | Imt::Sa(_))
    }

    fn sort_key(self) -> (f64, u8) {
        // Non-spectral measures sort after every spectral one; PGA ties with
        // SA(0.0) are broken in favour of PGA.
        match self {
            Imt::Pga => (0.0, 0),
            Imt::Sa(period) => (period, 1),
            Imt::Pgv => (f64::INFINITY, 2),
            Imt::Mmi => (f64::INFINITY, 3),
        }
    }
}

impl PartialEq for Imt {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Imt {}

impl PartialOrd for Imt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Imt {
    fn cmp(&self, other: &Self) -> Ordering {
        let (pa, ta) = self.sort_key();
        let (pb, tb) = other.sort_key();
        pa.total_cmp(&pb).then(ta.cmp(&tb))
    }
}

impl fmt::Display for Imt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Imt::Pga => write!(f, "PGA"),
            Imt::Sa(period) => write!(f, "SA({period})"),
            Imt::Pgv => write!(f, "PGV"),
            Imt::Mmi => write!(f, "MMI"),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unrecognized IMT string: {0:?}")]
pub struct ParseImtError(String);

impl FromStr for Imt {
    type Err = ParseImtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PGA" => Ok(Imt::Pga),
            "PGV" => Ok(Imt::Pgv),
            "MMI" => Ok(Imt::Mmi),
            _ => {
                let inner = s
                    .strip_prefix("SA(")
                    .and_then(|rest| rest.strip_suffix(')'))
                    .ok_or_else(|| ParseImtError(s.to_string()))?;
                let period: f64 = inner.parse().map_err(|_| ParseImtError(s.to_string()))?;
                if !(period.is_finite() && period >= 0.0) {
                    return Err(ParseImtError(s.to_string()));
                }
                Ok(Imt::Sa(period))
            }
        }
    }
}

/// Stable identifier of a site within a [`SiteCollection`].
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub u32);

impl fmt::Display for SiteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A geographic point (decimal degrees, depth in km).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lon: f64,
    pub lat: f64,
    pub depth_km: f64,
}

/// A single earthquake source description. Immutable once constructed and
/// read-only to the conditioning subsystem.
#[derive(Debug, Clone, PartialEq)]
pub struct Rupture {
    pub magnitude: f64,
    pub hypocenter: Location,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataError {
    #[error(
        "site arrays have mismatched lengths: {lons} lons, {lats} lats, {vs30} vs30, {sids} sids"
    )]
    MismatchedSiteArrays {
        lons: usize,
        lats: usize,
        vs30: usize,
        sids: usize,
    },
    #[error("duplicate site id {0} in site collection")]
    DuplicateSiteId(SiteId),
    #[error("observation column for {imt} has {got} rows, station collection has {expected}")]
    ColumnLengthMismatch {
        imt: Imt,
        expected: usize,
        got: usize,
    },
}

/// Ordered set of geographic points with the site-response parameters the
/// ground-motion models need. Two instances flow through a conditioning run:
/// the station collection and the (disjoint) target collection.
#[derive(Debug, Clone)]
pub struct SiteCollection {
    sids: Vec<SiteId>,
    lons: Array1<f64>,
    lats: Array1<f64>,
    vs30: Array1<f64>,
}

impl SiteCollection {
    pub fn new(
        sids: Vec<SiteId>,
        lons: Array1<f64>,
        lats: Array1<f64>,
        vs30: Array1<f64>,
    ) -> Result<Self, DataError> {
        if sids.len() != lons.len() || lons.len() != lats.len() || lats.len() != vs30.len() {
            return Err(DataError::MismatchedSiteArrays {
                lons: lons.len(),
                lats: lats.len(),
                vs30: vs30.len(),
                sids: sids.len(),
            });
        }
        let mut seen = sids.clone();
        seen.sort_unstable();
        for pair in seen.windows(2) {
            if pair[0] == pair[1] {
                return Err(DataError::DuplicateSiteId(pair[0]));
            }
        }
        Ok(Self {
            sids,
            lons,
            lats,
            vs30,
        })
    }

    pub fn len(&self) -> usize {
        self.sids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    pub fn sids(&self) -> &[SiteId] {
        &self.sids
    }

    pub fn lons(&self) -> &Array1<f64> {
        &self.lons
    }

    pub fn lats(&self) -> &Array1<f64> {
        &self.lats
    }

    pub fn vs30(&self) -> &Array1<f64> {
        &self.vs30
    }
}

/// One station-table column: the recorded (or converted) median per station
/// and the additional log-space uncertainty attached to converted values.
///
/// A `None` median is a hole in the table. Holes are legal until the IMT is
/// selected as a conditioning variable, at which point they are rejected
/// eagerly rather than imputed.
#[derive(Debug, Clone)]
pub struct ObservationColumn {
    pub median: Vec<Option<f64>>,
    pub extra_std: Vec<f64>,
}

impl ObservationColumn {
    /// Column of directly recorded values: no conversion uncertainty.
    pub fn recorded(median: Vec<f64>) -> Self {
        let extra_std = vec![0.0; median.len()];
        Self {
            median: median.into_iter().map(Some).collect(),
            extra_std,
        }
    }

    pub fn len(&self) -> usize {
        self.median.len()
    }

    pub fn is_empty(&self) -> bool {
        self.median.is_empty()
    }

    pub fn num_nulls(&self) -> usize {
        self.median.iter().filter(|v| v.is_none()).count()
    }
}

/// Station observation table, keyed by IMT over a fixed station collection.
#[derive(Debug, Clone)]
pub struct StationData {
    num_stations: usize,
    columns: BTreeMap<Imt, ObservationColumn>,
}

impl StationData {
    pub fn new(num_stations: usize) -> Self {
        Self {
            num_stations,
            columns: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, imt: Imt, column: ObservationColumn) -> Result<(), DataError> {
        if column.median.len() != self.num_stations || column.extra_std.len() != self.num_stations
        {
            return Err(DataError::ColumnLengthMismatch {
                imt,
                expected: self.num_stations,
                got: column.median.len().max(column.extra_std.len()),
            });
        }
        self.columns.insert(imt, column);
        Ok(())
    }

    pub fn num_stations(&self) -> usize {
        self.num_stations
    }

    pub fn column(&self, imt: Imt) -> Option<&ObservationColumn> {
        self.columns.get(&imt)
    }

    /// Observed spectral IMTs, sorted by period. PGV and MMI columns may be
    /// present in the table but never act as conditioning variables.
    pub fn observed_spectral_imts(&self) -> Vec<Imt> {
        self.columns
            .keys()
            .copied()
            .filter(|imt| imt.is_spectral())
            .collect()
    }
}
