//! In-memory MRS servers
//!
//! [`MockServer`] implements the protocol endpoints against in-memory state;
//! [`MockNetwork`] routes requests to servers by base URL and implements
//! [`Transport`], so the resolver and client run unchanged against it.
//!
//! Servers can be told to misbehave with a [`MockFault`] to exercise failure
//! handling, and count the requests they receive so tests can assert that a
//! server is contacted at most once.

use async_trait::async_trait;
use chrono::Utc;
use mrs_core::geo::{haversine_distance, search_sphere_intersects};
use mrs_core::{Location, MrsError, Referral, Registration, Result, Sphere};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing::debug;

use super::{find_header, HttpRequest, HttpResponse, Method, Transport};
use crate::search::normalize_server_url;

/// Identity of the user every mock server starts with
pub const DEFAULT_USER: &str = "test@localhost";

/// Bearer token of [`DEFAULT_USER`]
pub const DEFAULT_TOKEN: &str = "test-token-12345";

/// Ways a mock server can fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MockFault {
    #[default]
    None,
    /// Connection refused before any HTTP exchange
    Offline,
    /// Every request answers with this status and an error body
    Status(u16),
    /// Every request answers 200 with an HTML body
    NonJson,
}

#[derive(Debug, Default)]
struct MockState {
    /// token -> identity
    tokens: HashMap<String, String>,
    peers: Vec<Referral>,
    /// Insertion order is the order search results are scanned in
    registrations: Vec<Registration>,
    requests: usize,
    fault: MockFault,
    latency: Option<Duration>,
}

/// In-memory MRS server
#[derive(Debug)]
pub struct MockServer {
    url: String,
    operator: String,
    state: Mutex<MockState>,
}

type Reply = (u16, Value);

fn error_reply(status: u16, message: &str) -> Reply {
    (status, json!({"status": "error", "message": message}))
}

impl MockServer {
    /// Create a server with the default test user
    pub fn new(url: impl Into<String>) -> Self {
        let server = Self {
            url: normalize_server_url(&url.into()),
            operator: DEFAULT_USER.to_string(),
            state: Mutex::new(MockState::default()),
        };
        server.add_user(DEFAULT_USER, DEFAULT_TOKEN);
        server
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    // =========================================================================
    // Test setup
    // =========================================================================

    /// Add a user that authenticates with `token`
    pub fn add_user(&self, identity: &str, token: &str) {
        self.state()
            .tokens
            .insert(token.to_string(), identity.to_string());
    }

    /// Advertise a peer, returned as a referral from every search
    pub fn add_peer(&self, server: &str, hint: Option<&str>) {
        let mut referral = Referral::new(server);
        referral.hint = hint.map(String::from);
        self.state().peers.push(referral);
    }

    /// Add a registration owned by `owner`; returns its id
    pub fn add_registration(
        &self,
        space: Sphere,
        service_point: Option<&str>,
        owner: &str,
    ) -> String {
        let registration = new_registration(space, service_point, service_point.is_none(), owner);
        let id = registration.id.clone();
        self.state().registrations.push(registration);
        id
    }

    /// Insert a registration as-is
    ///
    /// If its `distance` is set, searches report that distance instead of
    /// computing one, which lets tests return the same id with different
    /// distances from different servers.
    pub fn insert_registration(&self, registration: Registration) {
        let mut state = self.state();
        state.registrations.retain(|r| r.id != registration.id);
        state.registrations.push(registration);
    }

    pub fn set_fault(&self, fault: MockFault) {
        self.state().fault = fault;
    }

    pub fn fault(&self) -> MockFault {
        self.state().fault
    }

    /// Delay every response by `latency`
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.state().latency = latency;
    }

    fn latency(&self) -> Option<Duration> {
        self.state().latency
    }

    /// Requests received, including failed ones
    pub fn request_count(&self) -> usize {
        self.state().requests
    }

    pub fn registration_count(&self) -> usize {
        self.state().registrations.len()
    }

    fn record_request(&self) {
        self.state().requests += 1;
    }

    // =========================================================================
    // Request handling
    // =========================================================================

    fn authenticate(&self, headers: &BTreeMap<String, String>) -> Option<String> {
        let token = find_header(headers, "Authorization")?.strip_prefix("Bearer ")?;
        self.state().tokens.get(token).cloned()
    }

    /// Handle one request against `path`
    pub fn handle(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
        headers: &BTreeMap<String, String>,
    ) -> Reply {
        let empty = json!({});
        let body = body.unwrap_or(&empty);

        match (method, path) {
            (Method::Get, "/.well-known/mrs") => self.handle_wellknown(),
            (Method::Post, "/search") => self.handle_search(body),
            (Method::Post, "/register") => match self.authenticate(headers) {
                Some(identity) => self.handle_register(body, &identity),
                None => error_reply(401, "Unauthorized"),
            },
            (Method::Post, "/release") => match self.authenticate(headers) {
                Some(identity) => self.handle_release(body, &identity),
                None => error_reply(401, "Unauthorized"),
            },
            (Method::Get, "/registrations") => match self.authenticate(headers) {
                Some(identity) => self.handle_list(&identity),
                None => error_reply(401, "Unauthorized"),
            },
            (Method::Get, "/auth/me") => match self.authenticate(headers) {
                Some(identity) => self.handle_auth_me(&identity),
                None => error_reply(401, "Unauthorized"),
            },
            _ => error_reply(404, "Not found"),
        }
    }

    fn handle_wellknown(&self) -> Reply {
        let peers = self.state().peers.clone();
        (
            200,
            json!({
                "mrs_version": "0.5.0",
                "server": self.url,
                "operator": self.operator,
                "authoritative_regions": [],
                "known_peers": peers,
                "capabilities": {
                    "geometry_types": ["sphere"],
                    "max_radius": 1_000_000,
                },
            }),
        )
    }

    fn handle_search(&self, body: &Value) -> Reply {
        let location = match body.get("location").map(Location::deserialize) {
            Some(Ok(location)) => location,
            Some(Err(e)) => return error_reply(400, &e.to_string()),
            None => return error_reply(400, "location is required"),
        };
        let range = body.get("range").and_then(Value::as_f64).unwrap_or(0.0);

        let state = self.state();
        let mut results: Vec<Registration> = state
            .registrations
            .iter()
            .filter(|r| search_sphere_intersects(&location, range, &r.space))
            .map(|r| {
                let mut hit = r.clone();
                hit.distance = Some(
                    r.distance
                        .unwrap_or_else(|| haversine_distance(&location, r.space.center())),
                );
                hit
            })
            .collect();
        results.sort_by(|a, b| {
            let a_distance = a.distance.unwrap_or(f64::INFINITY);
            let b_distance = b.distance.unwrap_or(f64::INFINITY);
            a.volume()
                .total_cmp(&b.volume())
                .then(a_distance.total_cmp(&b_distance))
        });

        (
            200,
            json!({
                "status": "ok",
                "results": results,
                "referrals": state.peers,
            }),
        )
    }

    fn handle_register(&self, body: &Value, identity: &str) -> Reply {
        let space = match body.get("space") {
            Some(space) if space.get("type").and_then(Value::as_str) != Some(Sphere::TYPE) => {
                return error_reply(400, "Only sphere geometry supported")
            }
            Some(space) if space.get("radius").map_or(true, Value::is_null) => {
                return error_reply(400, "radius is required")
            }
            Some(space) => match Sphere::deserialize(space) {
                Ok(sphere) => sphere,
                Err(_) => return error_reply(400, "radius must be between 0 and 1,000,000"),
            },
            None => return error_reply(400, "space is required"),
        };
        let foad = body.get("foad").and_then(Value::as_bool).unwrap_or(false);
        let service_point = body.get("service_point").and_then(Value::as_str);

        if !foad && service_point.map_or(true, str::is_empty) {
            return error_reply(400, "service_point required when foad is false");
        }

        let registration = new_registration(space, service_point, foad, identity);
        self.state().registrations.push(registration.clone());
        debug!(
            server = %self.url,
            id = %registration.id,
            owner = %identity,
            "Mock registration created"
        );

        (
            201,
            json!({"status": "registered", "registration": registration}),
        )
    }

    fn handle_release(&self, body: &Value, identity: &str) -> Reply {
        let Some(id) = body.get("id").and_then(Value::as_str) else {
            return error_reply(400, "id is required");
        };

        let mut state = self.state();
        let Some(pos) = state.registrations.iter().position(|r| r.id == id) else {
            return error_reply(404, "Registration not found");
        };
        if state.registrations[pos].owner != identity {
            return error_reply(403, "Not authorized");
        }

        state.registrations.remove(pos);
        (200, json!({"status": "released", "id": id}))
    }

    fn handle_list(&self, identity: &str) -> Reply {
        let owned: Vec<Registration> = self
            .state()
            .registrations
            .iter()
            .filter(|r| r.owner == identity)
            .map(|r| Registration {
                distance: None,
                ..r.clone()
            })
            .collect();

        (
            200,
            json!({
                "registrations": owned,
                "total": owned.len(),
                "limit": 100,
                "offset": 0,
            }),
        )
    }

    fn handle_auth_me(&self, identity: &str) -> Reply {
        let count = self
            .state()
            .registrations
            .iter()
            .filter(|r| r.owner == identity)
            .count();

        (
            200,
            json!({
                "id": identity,
                "created_at": "2026-01-01T00:00:00Z",
                "can_register": true,
                "registration_count": count,
            }),
        )
    }
}

fn new_registration(
    space: Sphere,
    service_point: Option<&str>,
    foad: bool,
    owner: &str,
) -> Registration {
    let now = Utc::now();
    Registration {
        id: format!("reg_{}", uuid::Uuid::new_v4().simple()),
        space,
        foad,
        owner: owner.to_string(),
        created: now,
        updated: now,
        origin_server: None,
        origin_id: None,
        version: 1,
        service_point: service_point.map(String::from),
        distance: None,
    }
}

/// A set of mock servers reachable by base URL
#[derive(Debug, Default)]
pub struct MockNetwork {
    servers: RwLock<BTreeMap<String, Arc<MockServer>>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the server at `url`, creating it if needed
    pub fn server(&self, url: &str) -> Arc<MockServer> {
        let url = normalize_server_url(url);
        let mut servers = self.servers.write().unwrap_or_else(PoisonError::into_inner);
        servers
            .entry(url.clone())
            .or_insert_with(|| Arc::new(MockServer::new(url)))
            .clone()
    }

    /// Total requests received across all servers
    pub fn total_requests(&self) -> usize {
        self.servers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|s| s.request_count())
            .sum()
    }

    /// Find the server whose base URL prefixes `url`, and the remaining path
    fn route(&self, url: &str) -> Option<(Arc<MockServer>, String)> {
        let servers = self.servers.read().unwrap_or_else(PoisonError::into_inner);
        servers
            .iter()
            .filter_map(|(base, server)| {
                let rest = url.strip_prefix(base.as_str())?;
                if rest.is_empty() || rest.starts_with('/') || rest.starts_with('?') {
                    Some((base.len(), server.clone(), rest))
                } else {
                    None
                }
            })
            .max_by_key(|(len, _, _)| *len)
            .map(|(_, server, rest)| {
                let path = rest.split('?').next().unwrap_or_default();
                let path = if path.is_empty() { "/" } else { path };
                (server, path.to_string())
            })
    }
}

#[async_trait]
impl Transport for MockNetwork {
    async fn request(&self, request: HttpRequest) -> Result<HttpResponse> {
        let started = Instant::now();
        let (server, path) = self
            .route(&request.url)
            .ok_or_else(|| MrsError::connection(&request.url, "No route to host"))?;

        server.record_request();
        if let Some(latency) = server.latency() {
            tokio::time::sleep(latency).await;
        }

        let (status, body) = match server.fault() {
            MockFault::Offline => {
                return Err(MrsError::connection(&request.url, "Connection refused"));
            }
            MockFault::Status(status) => {
                let body = json!({"status": "error", "message": "Injected failure"});
                (status, body.to_string())
            }
            MockFault::NonJson => (200, "<html>Service Unavailable</html>".to_string()),
            MockFault::None => {
                let (status, json) =
                    server.handle(request.method, &path, request.json.as_ref(), &request.headers);
                (status, json.to_string())
            }
        };

        debug!(
            method = %request.method,
            url = %request.url,
            status = status,
            "Mock request handled"
        );
        Ok(HttpResponse::new(status, BTreeMap::new(), body, started.elapsed()))
    }

    fn description(&self) -> &str {
        "mock"
    }
}
