//! Domain model for the MRS protocol
//!
//! Coordinates and spheres validate on construction and on deserialization,
//! so any value of these types that exists is in range.

use crate::error::{MrsError, Result};
use crate::geo::sphere_volume;
use crate::validation::sanitize_service_point_uri;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

/// Largest radius a registration may claim, in meters
pub const MAX_RADIUS_M: f64 = 1_000_000.0;

// ============================================================================
// Location
// ============================================================================

/// A point in 3D space using WGS84 coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LocationWire", into = "LocationWire")]
pub struct Location {
    lat: f64,
    lon: f64,
    ele: f64,
}

#[derive(Serialize, Deserialize)]
struct LocationWire {
    lat: f64,
    lon: f64,
    #[serde(default)]
    ele: f64,
}

impl Location {
    /// Create a location, validating latitude and longitude ranges
    pub fn new(lat: f64, lon: f64, ele: f64) -> Result<Self> {
        if !(-90.0..=90.0).contains(&lat) {
            return Err(MrsError::validation(format!(
                "Latitude must be between -90 and 90, got {}",
                lat
            )));
        }
        if !(-180.0..=180.0).contains(&lon) {
            return Err(MrsError::validation(format!(
                "Longitude must be between -180 and 180, got {}",
                lon
            )));
        }
        if !ele.is_finite() {
            return Err(MrsError::validation(format!(
                "Elevation must be finite, got {}",
                ele
            )));
        }
        Ok(Self { lat, lon, ele })
    }

    /// Create a location at ground level
    pub fn point(lat: f64, lon: f64) -> Result<Self> {
        Self::new(lat, lon, 0.0)
    }

    pub fn lat(&self) -> f64 {
        self.lat
    }

    pub fn lon(&self) -> f64 {
        self.lon
    }

    /// Elevation in meters
    pub fn ele(&self) -> f64 {
        self.ele
    }
}

impl TryFrom<LocationWire> for Location {
    type Error = MrsError;

    fn try_from(wire: LocationWire) -> Result<Self> {
        Location::new(wire.lat, wire.lon, wire.ele)
    }
}

impl From<Location> for LocationWire {
    fn from(loc: Location) -> Self {
        Self {
            lat: loc.lat,
            lon: loc.lon,
            ele: loc.ele,
        }
    }
}

// ============================================================================
// Sphere
// ============================================================================

/// A spherical region, the only geometry the protocol supports
///
/// Wire shape: `{"type": "sphere", "center": {...}, "radius": r}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "SphereWire", into = "SphereWire")]
pub struct Sphere {
    center: Location,
    radius: f64,
}

#[derive(Serialize, Deserialize)]
struct SphereWire {
    #[serde(rename = "type")]
    kind: String,
    center: Location,
    radius: f64,
}

impl Sphere {
    /// Geometry type tag used on the wire
    pub const TYPE: &'static str = "sphere";

    /// Create a sphere; radius must be in (0, 1,000,000] meters
    pub fn new(center: Location, radius: f64) -> Result<Self> {
        if radius.is_nan() || radius <= 0.0 {
            return Err(MrsError::validation(format!(
                "Radius must be positive, got {}",
                radius
            )));
        }
        if radius > MAX_RADIUS_M {
            return Err(MrsError::validation(format!(
                "Radius must be <= 1,000,000 meters, got {}",
                radius
            )));
        }
        Ok(Self { center, radius })
    }

    pub fn center(&self) -> &Location {
        &self.center
    }

    /// Radius in meters
    pub fn radius(&self) -> f64 {
        self.radius
    }

    /// Volume in cubic meters
    pub fn volume(&self) -> f64 {
        sphere_volume(self.radius)
    }
}

impl TryFrom<SphereWire> for Sphere {
    type Error = MrsError;

    fn try_from(wire: SphereWire) -> Result<Self> {
        if wire.kind != Sphere::TYPE {
            return Err(MrsError::validation(format!(
                "Unsupported space type: {}",
                wire.kind
            )));
        }
        Sphere::new(wire.center, wire.radius)
    }
}

impl From<Sphere> for SphereWire {
    fn from(sphere: Sphere) -> Self {
        Self {
            kind: Sphere::TYPE.to_string(),
            center: sphere.center,
            radius: sphere.radius,
        }
    }
}

// ============================================================================
// Registration
// ============================================================================

/// A registration binding a space to a service point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    /// Server-assigned identifier
    pub id: String,

    /// Claimed region
    pub space: Sphere,

    /// The space explicitly declines to expose a service point
    #[serde(default)]
    pub foad: bool,

    /// Identity (`user@domain`) of the registrant
    pub owner: String,

    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created: DateTime<Utc>,

    #[serde(deserialize_with = "timestamp::deserialize")]
    pub updated: DateTime<Utc>,

    /// Server the registration was first made at, when received via referral
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_server: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,

    #[serde(default = "default_version")]
    pub version: u64,

    /// Service endpoint; invalid values from remote servers are dropped
    #[serde(
        default,
        deserialize_with = "deserialize_service_point",
        skip_serializing_if = "Option::is_none"
    )]
    pub service_point: Option<String>,

    /// Distance from the query location, only set in search results
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
}

fn default_version() -> u64 {
    1
}

fn deserialize_service_point<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    // Non-string values are treated like invalid URIs
    let raw: Option<Value> = Option::deserialize(deserializer)?;
    Ok(sanitize_service_point_uri(raw.as_ref().and_then(Value::as_str)))
}

impl Registration {
    /// Parse a registration received from a server
    pub fn from_json(value: &Value) -> Result<Self> {
        Registration::deserialize(value)
            .map_err(|e| MrsError::validation(format!("Malformed registration: {}", e)))
    }

    /// Volume of the claimed space, used to rank specific claims first
    pub fn volume(&self) -> f64 {
        self.space.volume()
    }

    /// Whether a usable service point is attached
    pub fn has_service_point(&self) -> bool {
        !self.foad && self.service_point.is_some()
    }
}

/// Body of a `POST /register` request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RegistrationRequest {
    pub space: Sphere,
    pub foad: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_point: Option<String>,
}

impl RegistrationRequest {
    /// Build a registration request
    ///
    /// A service point is required unless `foad` is set, and is held to the
    /// strict URI policy whenever one is given.
    pub fn new(space: Sphere, service_point: Option<&str>, foad: bool) -> Result<Self> {
        let service_point = match service_point.map(str::trim).filter(|s| !s.is_empty()) {
            Some(uri) => Some(crate::validation::validate_service_point_uri(uri)?),
            None if foad => None,
            None => {
                return Err(MrsError::validation(
                    "service_point is required when foad is false",
                ))
            }
        };

        Ok(Self {
            space,
            foad,
            service_point,
        })
    }
}

// ============================================================================
// Referral / Search results
// ============================================================================

/// A pointer to another MRS server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Referral {
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl Referral {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }
}

/// Aggregated outcome of a federated search
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    /// Registrations, most specific space first, then nearest first
    pub results: Vec<Registration>,

    /// Servers contacted, in the order they were contacted
    pub servers_queried: Vec<String>,

    /// Servers contacted beyond the seeds
    pub referrals_followed: usize,

    #[serde(rename = "total_time_ms", serialize_with = "serialize_millis")]
    pub total_time: Duration,
}

fn serialize_millis<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64() * 1000.0)
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// The most specific matching registration
    pub fn best(&self) -> Option<&Registration> {
        self.results.first()
    }
}

// ============================================================================
// Server metadata
// ============================================================================

/// Metadata published at `/.well-known/mrs`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub url: String,
    pub mrs_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator: Option<String>,
    pub authoritative_regions: Vec<Sphere>,
    pub known_peers: Vec<Referral>,
    pub capabilities: Map<String, Value>,
}

impl ServerInfo {
    /// Parse the well-known document served by `url`
    ///
    /// Regions with a geometry other than sphere are ignored, as are peers
    /// that do not parse.
    pub fn from_json(value: &Value, url: impl Into<String>) -> Result<Self> {
        let obj = value
            .as_object()
            .ok_or_else(|| MrsError::validation("Server info must be a JSON object"))?;

        let authoritative_regions = obj
            .get("authoritative_regions")
            .and_then(Value::as_array)
            .map(|regions| {
                regions
                    .iter()
                    .filter(|r| r.get("type").and_then(Value::as_str) == Some(Sphere::TYPE))
                    .filter_map(|r| match Sphere::deserialize(r) {
                        Ok(sphere) => Some(sphere),
                        Err(e) => {
                            debug!(error = %e, "Skipping malformed authoritative region");
                            None
                        }
                    })
                    .collect()
            })
            .unwrap_or_default();

        let known_peers = obj
            .get("known_peers")
            .and_then(Value::as_array)
            .map(|peers| {
                peers
                    .iter()
                    .filter_map(|p| Referral::deserialize(p).ok())
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            url: url.into(),
            mrs_version: obj
                .get("mrs_version")
                .and_then(Value::as_str)
                .unwrap_or("unknown")
                .to_string(),
            operator: obj.get("operator").and_then(Value::as_str).map(String::from),
            authoritative_regions,
            known_peers,
            capabilities: obj
                .get("capabilities")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        })
    }
}

/// Response of `GET /auth/me`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    pub id: String,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub can_register: bool,
    #[serde(default)]
    pub registration_count: u64,
}

/// Response of `GET /registrations`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationPage {
    #[serde(default)]
    pub registrations: Vec<Registration>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub limit: u64,
    #[serde(default)]
    pub offset: u64,
}

/// Lenient timestamp parsing: RFC 3339, or a naive ISO 8601 time taken as UTC
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::de::Error;
    use serde::{Deserialize, Deserializer};

    pub fn parse(s: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw)))
    }

    pub fn deserialize_option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid timestamp: {}", raw))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registration_json() -> Value {
        json!({
            "id": "reg_123",
            "space": {
                "type": "sphere",
                "center": {"lat": -33.8568, "lon": 151.2153, "ele": 0.0},
                "radius": 50.0
            },
            "service_point": "https://sydneyopera.house/mrs",
            "foad": false,
            "owner": "user@example.com",
            "created": "2025-01-01T00:00:00Z",
            "updated": "2025-01-01T00:00:00"
        })
    }

    #[test]
    fn test_location_ranges() {
        assert!(Location::new(90.0, 180.0, 0.0).is_ok());
        assert!(Location::new(-90.0, -180.0, 0.0).is_ok());
        assert!(Location::new(91.0, 0.0, 0.0).unwrap_err().is_validation());
        assert!(Location::new(0.0, -181.0, 0.0).unwrap_err().is_validation());
        assert!(Location::new(f64::NAN, 0.0, 0.0).is_err());
    }

    #[test]
    fn test_location_wire_defaults_elevation() {
        let loc: Location = serde_json::from_value(json!({"lat": 1.0, "lon": 2.0})).unwrap();
        assert_eq!(loc.ele(), 0.0);

        let bad = serde_json::from_value::<Location>(json!({"lat": 95.0, "lon": 2.0}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_sphere_radius_bounds() {
        let center = Location::point(0.0, 0.0).unwrap();
        assert!(Sphere::new(center, 0.0).is_err());
        assert!(Sphere::new(center, -5.0).is_err());
        assert!(Sphere::new(center, 1_000_001.0).is_err());
        assert!(Sphere::new(center, MAX_RADIUS_M).is_ok());
    }

    #[test]
    fn test_sphere_wire_shape() {
        let sphere = Sphere::new(Location::point(1.0, 2.0).unwrap(), 10.0).unwrap();
        let value = serde_json::to_value(sphere).unwrap();
        let center = json!({"lat": 1.0, "lon": 2.0, "ele": 0.0});
        assert_eq!(
            value,
            json!({"type": "sphere", "center": center, "radius": 10.0})
        );

        let polygon =
            json!({"type": "polygon", "center": {"lat": 1.0, "lon": 2.0}, "radius": 10.0});
        assert!(serde_json::from_value::<Sphere>(polygon).is_err());
    }

    #[test]
    fn test_registration_parse() {
        let reg = Registration::from_json(&registration_json()).unwrap();
        assert_eq!(reg.id, "reg_123");
        assert_eq!(reg.version, 1);
        assert_eq!(reg.distance, None);
        assert_eq!(reg.service_point.as_deref(), Some("https://sydneyopera.house/mrs"));
        assert!(reg.has_service_point());
    }

    #[test]
    fn test_registration_drops_unsafe_service_point() {
        let mut value = registration_json();
        value["service_point"] = json!("javascript:alert(1)");
        let reg = Registration::from_json(&value).unwrap();
        assert_eq!(reg.service_point, None);
    }

    #[test]
    fn test_registration_drops_non_string_service_point() {
        for bad in [json!(12345), json!({"uri": "https://x.example"}), json!(true), json!(["a"])] {
            let mut value = registration_json();
            value["service_point"] = bad;
            let reg = Registration::from_json(&value).unwrap();
            assert_eq!(reg.service_point, None);
            assert_eq!(reg.id, "reg_123");
        }

        let mut value = registration_json();
        value["service_point"] = json!(null);
        assert_eq!(Registration::from_json(&value).unwrap().service_point, None);
    }

    #[test]
    fn test_registration_rejects_other_geometry() {
        let mut value = registration_json();
        value["space"]["type"] = json!("polygon");
        assert!(Registration::from_json(&value).unwrap_err().is_validation());
    }

    #[test]
    fn test_registration_request_requires_service_point() {
        let space = Sphere::new(Location::point(0.0, 0.0).unwrap(), 100.0).unwrap();
        assert!(RegistrationRequest::new(space, None, false).is_err());
        assert!(RegistrationRequest::new(space, Some("http://x.example"), false).is_err());

        let foad = RegistrationRequest::new(space, None, true).unwrap();
        let body = serde_json::to_value(&foad).unwrap();
        assert_eq!(body["foad"], json!(true));
        assert!(body.get("service_point").is_none());
    }

    #[test]
    fn test_server_info_ignores_unknown_regions() {
        let value = json!({
            "mrs_version": "0.5.0",
            "server": "https://mrs.example",
            "authoritative_regions": [
                {"type": "sphere", "center": {"lat": 0.0, "lon": 0.0}, "radius": 1000.0},
                {"type": "polygon", "points": []}
            ],
            "known_peers": [{"server": "https://peer.example", "hint": "Australia"}],
            "capabilities": {"geometry_types": ["sphere"]}
        });
        let info = ServerInfo::from_json(&value, "https://mrs.example").unwrap();
        assert_eq!(info.mrs_version, "0.5.0");
        assert_eq!(info.authoritative_regions.len(), 1);
        assert_eq!(info.known_peers[0].hint.as_deref(), Some("Australia"));
        assert!(info.capabilities.contains_key("geometry_types"));
    }

    #[test]
    fn test_search_result_serializes_millis() {
        let result = SearchResult {
            results: vec![],
            servers_queried: vec!["https://a.example".to_string()],
            referrals_followed: 0,
            total_time: Duration::from_millis(1500),
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["total_time_ms"], json!(1500.0));
    }
}
