//! Geospatial utilities
//!
//! Great-circle math on a spherical Earth. Elevation is carried on
//! [`Location`] but ignored by every function here.

use crate::types::{Location, Sphere};

/// Earth radius in meters (WGS84 mean radius)
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Distance in meters between two points using the haversine formula
pub fn haversine_distance(a: &Location, b: &Location) -> f64 {
    let (lat1, lon1) = (a.lat().to_radians(), a.lon().to_radians());
    let (lat2, lon2) = (b.lat().to_radians(), b.lon().to_radians());

    let dlat = lat2 - lat1;
    let dlon = lon2 - lon1;

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    // Rounding can push h marginally above 1 for antipodal points
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_M * c
}

/// Distance from a point to a sphere's surface, 0 when the point is inside
pub fn distance_to_sphere(point: &Location, sphere: &Sphere) -> f64 {
    let to_center = haversine_distance(point, sphere.center());
    if to_center <= sphere.radius() {
        0.0
    } else {
        to_center - sphere.radius()
    }
}

/// Check if a point is inside (or on) a sphere
pub fn point_in_sphere(point: &Location, sphere: &Sphere) -> bool {
    haversine_distance(point, sphere.center()) <= sphere.radius()
}

/// Check if two spheres touch or overlap
pub fn spheres_intersect(a: &Sphere, b: &Sphere) -> bool {
    haversine_distance(a.center(), b.center()) <= a.radius() + b.radius()
}

/// Check if a search around `query` with `range` meters reaches `region`
///
/// A range of zero (or below) is a point query and degenerates to
/// [`point_in_sphere`]. The query radius is not bounded by the registration
/// radius limit.
pub fn search_sphere_intersects(query: &Location, range: f64, region: &Sphere) -> bool {
    if range <= 0.0 {
        return point_in_sphere(query, region);
    }
    haversine_distance(query, region.center()) <= range + region.radius()
}

/// Volume of a sphere in cubic meters
pub fn sphere_volume(radius: f64) -> f64 {
    (4.0 / 3.0) * std::f64::consts::PI * radius.powi(3)
}

/// Latitude/longitude bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

/// Approximate lat/lon bounding box around a center point
///
/// Longitude span widens with latitude; at the poles it is unbounded.
pub fn bounding_box(center: &Location, radius: f64) -> BoundingBox {
    let lat_delta = (radius / EARTH_RADIUS_M).to_degrees();
    let lon_delta = lat_delta / center.lat().to_radians().cos();

    BoundingBox {
        min_lat: center.lat() - lat_delta,
        max_lat: center.lat() + lat_delta,
        min_lon: center.lon() - lon_delta,
        max_lon: center.lon() + lon_delta,
    }
}
