//! Property-based tests for geometry, model validation and signing
//!
//! Uses proptest for arbitrary coordinates, radii and request bodies.

use mrs_core::geo::{
    distance_to_sphere, haversine_distance, point_in_sphere, search_sphere_intersects,
    EARTH_RADIUS_M,
};
use mrs_core::signing::{sign_request, verify_signature};
use mrs_core::{Identity, Location, Sphere};
use proptest::prelude::*;

fn lat() -> impl Strategy<Value = f64> {
    -90.0..=90.0f64
}

fn lon() -> impl Strategy<Value = f64> {
    -180.0..=180.0f64
}

fn location() -> impl Strategy<Value = Location> {
    (lat(), lon(), -100.0..10_000.0f64)
        .prop_map(|(lat, lon, ele)| Location::new(lat, lon, ele).unwrap())
}

fn radius() -> impl Strategy<Value = f64> {
    0.001..=1_000_000.0f64
}

// =============================================================================
// Distance
// =============================================================================

proptest! {
    /// distance(a, a) = 0
    #[test]
    fn prop_distance_to_self_is_zero(a in location()) {
        prop_assert!(haversine_distance(&a, &a).abs() < 1e-6);
    }

    /// distance(a, b) = distance(b, a)
    #[test]
    fn prop_distance_symmetric(a in location(), b in location()) {
        let ab = haversine_distance(&a, &b);
        let ba = haversine_distance(&b, &a);
        prop_assert!((ab - ba).abs() < 1e-6, "{} != {}", ab, ba);
    }

    /// Never exceeds half the circumference
    #[test]
    fn prop_distance_bounded(a in location(), b in location()) {
        let d = haversine_distance(&a, &b);
        prop_assert!(d >= 0.0);
        prop_assert!(d <= std::f64::consts::PI * EARTH_RADIUS_M + 1e-6);
    }

    /// Elevation does not affect distance
    #[test]
    fn prop_distance_ignores_elevation(a in location(), b in location(), ele in 0.0..5_000.0f64) {
        let raised = Location::new(a.lat(), a.lon(), ele).unwrap();
        prop_assert_eq!(haversine_distance(&a, &b), haversine_distance(&raised, &b));
    }
}

// =============================================================================
// Containment
// =============================================================================

proptest! {
    /// A sphere's center is inside it for any valid radius
    #[test]
    fn prop_center_inside_sphere(center in location(), r in radius()) {
        let sphere = Sphere::new(center, r).unwrap();
        prop_assert!(point_in_sphere(&center, &sphere));
        prop_assert_eq!(distance_to_sphere(&center, &sphere), 0.0);
    }

    /// A zero-range search is exactly a point containment test
    #[test]
    fn prop_zero_range_is_point_query(query in location(), center in location(), r in radius()) {
        let sphere = Sphere::new(center, r).unwrap();
        prop_assert_eq!(
            search_sphere_intersects(&query, 0.0, &sphere),
            point_in_sphere(&query, &sphere)
        );
    }

    /// Widening the search range never loses a match
    #[test]
    fn prop_search_range_monotonic(
        query in location(),
        center in location(),
        r in radius(),
        range in 0.0..1_000_000.0f64,
        extra in 0.0..1_000_000.0f64,
    ) {
        let sphere = Sphere::new(center, r).unwrap();
        if search_sphere_intersects(&query, range, &sphere) {
            prop_assert!(search_sphere_intersects(&query, range + extra, &sphere));
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

proptest! {
    #[test]
    fn prop_latitude_out_of_range_rejected(excess in 0.000_001..1_000.0f64, lon in lon()) {
        prop_assert!(Location::new(90.0 + excess, lon, 0.0).is_err());
        prop_assert!(Location::new(-90.0 - excess, lon, 0.0).is_err());
    }

    #[test]
    fn prop_longitude_out_of_range_rejected(lat in lat(), excess in 0.000_001..1_000.0f64) {
        prop_assert!(Location::new(lat, 180.0 + excess, 0.0).is_err());
        prop_assert!(Location::new(lat, -180.0 - excess, 0.0).is_err());
    }

    #[test]
    fn prop_radius_bounds(center in location(), r in -1_000_000.0..=0.0f64, over in 0.001..1e9f64) {
        prop_assert!(Sphere::new(center, r).is_err());
        prop_assert!(Sphere::new(center, 1_000_000.0 + over).is_err());
    }

    #[test]
    fn prop_volume_increases_with_radius(center in location(), a in radius(), b in radius()) {
        let sa = Sphere::new(center, a).unwrap();
        let sb = Sphere::new(center, b).unwrap();
        if a < b {
            prop_assert!(sa.volume() <= sb.volume());
        }
    }
}

// =============================================================================
// Signing
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// Any signed request verifies with the signer's key, and not once the body changes
    #[test]
    fn prop_sign_verify_roundtrip(
        user in "[a-z]{3,10}",
        segment in "[a-z0-9]{1,12}",
        body in proptest::collection::vec(any::<u8>(), 1..256),
        flip in any::<usize>(),
    ) {
        let identity = Identity::generate(&user, "example.com").unwrap();
        let url = format!("https://example.com/{}", segment);
        let path = format!("/{}", segment);

        let created = 1_700_000_000;
        let headers = sign_request("POST", &url, Some(body.as_slice()), Some(&identity), created)
            .unwrap()
            .into_map();
        let key = identity.public_key_bytes();

        prop_assert!(verify_signature("POST", &path, Some(body.as_slice()), &headers, &key));

        let mut tampered = body.clone();
        let idx = flip % tampered.len();
        tampered[idx] ^= 0x01;
        prop_assert!(!verify_signature("POST", &path, Some(tampered.as_slice()), &headers, &key));
    }
}
