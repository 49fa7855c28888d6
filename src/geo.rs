//! Great-circle distances between site collections.

use crate::types::SiteCollection;
use ndarray::Array2;

/// Mean Earth radius in km.
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Geodetic distance in km between two points given in decimal degrees.
///
/// Haversine formula on a spherical Earth; accurate to well below the
/// kilometre scales at which spatial correlation models operate.
pub fn geodetic_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let lon1 = lon1.to_radians();
    let lat1 = lat1.to_radians();
    let lon2 = lon2.to_radians();
    let lat2 = lat2.to_radians();
    let half_dlat = (lat1 - lat2) / 2.0;
    let half_dlon = (lon1 - lon2) / 2.0;
    let a = half_dlat.sin().powi(2) + lat1.cos() * lat2.cos() * half_dlon.sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().min(1.0).asin()
}

/// Dense distance matrix in km, shaped (len(a), len(b)).
pub fn distance_matrix(a: &SiteCollection, b: &SiteCollection) -> Array2<f64> {
    let mut out = Array2::<f64>::zeros((a.len(), b.len()));
    for i in 0..a.len() {
        let (lon_i, lat_i) = (a.lons()[i], a.lats()[i]);
        for j in 0..b.len() {
            out[[i, j]] = geodetic_distance(lon_i, lat_i, b.lons()[j], b.lats()[j]);
        }
    }
    out
}
