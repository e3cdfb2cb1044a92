//! Federated search resolver
//!
//! A search is a breadth-first crawl over servers. Each queried server answers
//! with matching registrations plus referrals to peers; referrals are queued
//! one level deeper. Every server is contacted at most once per search, the
//! crawl is capped by depth and by total servers contacted, and a failing
//! server is logged and skipped.
//!
//! The queue is strictly FIFO in discovery order. When two referrals lead to
//! the same server, the first one enqueued decides its depth.

use mrs_core::geo::haversine_distance;
use mrs_core::{Location, MrsError, Referral, Registration, Result, SearchResult};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::transport::{HttpRequest, Transport};

/// Canonical form of a server URL: trailing slashes removed
pub fn normalize_server_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}

/// Crawl limits
#[derive(Debug, Clone, PartialEq)]
pub struct ResolverConfig {
    /// Deepest referral level that is still queried (seeds are depth 0)
    pub max_depth: usize,

    /// Most servers contacted in one search
    pub max_servers: usize,

    /// Timeout for each individual server query
    pub per_call_timeout: Duration,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            max_servers: 20,
            per_call_timeout: Duration::from_secs(30),
        }
    }
}

/// Body of a `POST /search` response
#[derive(Debug, Default, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<Value>,
    #[serde(default)]
    referrals: Vec<Value>,
}

/// State scoped to a single search
#[derive(Debug, Default)]
struct Crawl {
    queue: VecDeque<(String, usize)>,
    visited: HashSet<String>,
    /// Visited servers in contact order
    visit_order: Vec<String>,
    results: Vec<Registration>,
    /// Registration id -> position in `results`
    index: HashMap<String, usize>,
}

impl Crawl {
    fn seeded(seeds: &[String]) -> Self {
        let mut crawl = Self::default();
        for seed in seeds {
            crawl.queue.push_back((normalize_server_url(seed), 0));
        }
        crawl
    }

    fn mark_visited(&mut self, server: &str) {
        if self.visited.insert(server.to_string()) {
            self.visit_order.push(server.to_string());
        }
    }

    /// Record a registration; duplicates replace the known copy only when strictly closer
    fn merge(&mut self, registration: Registration) {
        match self.index.get(&registration.id) {
            Some(&pos) => {
                let known = self.results[pos].distance.unwrap_or(f64::INFINITY);
                if registration.distance.is_some_and(|d| d < known) {
                    self.results[pos] = registration;
                }
            }
            None => {
                self.index.insert(registration.id.clone(), self.results.len());
                self.results.push(registration);
            }
        }
    }

    fn absorb(
        &mut self,
        server: &str,
        depth: usize,
        location: &Location,
        response: SearchResponse,
    ) {
        for value in response.results {
            let mut registration = match Registration::from_json(&value) {
                Ok(registration) => registration,
                Err(e) => {
                    warn!(server = %server, error = %e, "Skipping unparseable registration");
                    continue;
                }
            };
            if registration.distance.is_none() {
                registration.distance =
                    Some(haversine_distance(location, registration.space.center()));
            }
            self.merge(registration);
        }

        for value in response.referrals {
            let referral = match Referral::deserialize(&value) {
                Ok(referral) => referral,
                Err(e) => {
                    debug!(server = %server, error = %e, "Skipping malformed referral");
                    continue;
                }
            };
            let target = normalize_server_url(&referral.server);
            if !self.visited.contains(&target) {
                debug!(
                    from = %server,
                    to = %target,
                    hint = referral.hint.as_deref().unwrap_or(""),
                    depth = depth + 1,
                    "Following referral"
                );
                self.queue.push_back((target, depth + 1));
            }
        }
    }

    /// Smallest region first, then nearest; missing distances sort last
    fn into_sorted(mut self) -> (Vec<Registration>, Vec<String>) {
        self.results.sort_by(|a, b| {
            a.volume().total_cmp(&b.volume()).then_with(|| {
                a.distance
                    .unwrap_or(f64::INFINITY)
                    .total_cmp(&b.distance.unwrap_or(f64::INFINITY))
            })
        });
        (self.results, self.visit_order)
    }
}

/// Runs federated searches over a [`Transport`]
#[derive(Debug, Clone)]
pub struct SearchResolver {
    transport: Arc<dyn Transport>,
    config: ResolverConfig,
}

impl SearchResolver {
    pub fn new(transport: Arc<dyn Transport>, config: ResolverConfig) -> Self {
        Self { transport, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Search from `seeds`, following referrals
    ///
    /// A `range` of 0 is an exact point query.
    ///
    /// # Errors
    /// `Validation` for an empty seed list or a negative or non-finite range.
    /// Individual server failures never fail the search.
    pub async fn search(
        &self,
        location: &Location,
        range: f64,
        seeds: &[String],
    ) -> Result<SearchResult> {
        self.search_with_cancellation(location, range, seeds, &CancellationToken::new())
            .await
    }

    /// Like [`search`](Self::search), stopping early once `cancel` fires
    ///
    /// Cancellation abandons the in-flight request and returns whatever was
    /// accumulated so far, sorted as usual.
    #[instrument(
        skip_all,
        fields(lat = location.lat(), lon = location.lon(), range = range, seeds = seeds.len())
    )]
    pub async fn search_with_cancellation(
        &self,
        location: &Location,
        range: f64,
        seeds: &[String],
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        if seeds.is_empty() {
            return Err(MrsError::validation("At least one seed server is required"));
        }
        if !range.is_finite() || range < 0.0 {
            return Err(MrsError::validation(format!(
                "Search range must be a non-negative number of meters, got {}",
                range
            )));
        }

        let started = Instant::now();
        let mut crawl = Crawl::seeded(seeds);

        while crawl.visited.len() < self.config.max_servers {
            let Some((server, depth)) = crawl.queue.pop_front() else {
                break;
            };
            if crawl.visited.contains(&server) {
                continue;
            }
            if depth > self.config.max_depth {
                debug!(
                    server = %server,
                    depth = depth,
                    max_depth = self.config.max_depth,
                    "Skipping server beyond referral depth"
                );
                continue;
            }
            if cancel.is_cancelled() {
                info!(pending = crawl.queue.len() + 1, "Search cancelled");
                break;
            }

            crawl.mark_visited(&server);
            debug!(server = %server, depth = depth, "Querying server");

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(server = %server, "Search cancelled during request");
                    break;
                }
                outcome = self.query_with_timeout(&server, location, range) => outcome,
            };

            match outcome {
                Ok(response) => crawl.absorb(&server, depth, location, response),
                Err(e) => {
                    warn!(server = %server, depth = depth, error = %e, "Federated query failed");
                }
            }
        }

        let seed_count = seeds.len();
        let (results, servers_queried) = crawl.into_sorted();
        let result = SearchResult {
            referrals_followed: servers_queried.len().saturating_sub(seed_count),
            results,
            servers_queried,
            total_time: started.elapsed(),
        };

        info!(
            results = result.results.len(),
            servers = result.servers_queried.len(),
            referrals = result.referrals_followed,
            elapsed_ms = result.total_time.as_millis() as u64,
            "Search complete"
        );
        Ok(result)
    }

    async fn query_with_timeout(
        &self,
        server: &str,
        location: &Location,
        range: f64,
    ) -> Result<SearchResponse> {
        let timeout = self.config.per_call_timeout;
        match tokio::time::timeout(timeout, self.query_server(server, location, range)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(MrsError::connection(
                server,
                format!("Request timed out after {:?}", timeout),
            )),
        }
    }

    async fn query_server(
        &self,
        server: &str,
        location: &Location,
        range: f64,
    ) -> Result<SearchResponse> {
        let request = HttpRequest::post(
            format!("{}/search", server),
            json!({"location": location, "range": range}),
        );
        let response = self.transport.request(request).await?;

        if response.status != 200 {
            return Err(MrsError::federation(
                server,
                format!("Server returned {}: {}", response.status, response.message()),
            )
            .with_status(response.status));
        }

        let body = response
            .json
            .ok_or_else(|| MrsError::federation(server, "Server returned non-JSON response"))?;

        SearchResponse::deserialize(&body)
            .map_err(|e| MrsError::federation(server, format!("Malformed search response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use mrs_core::Sphere;

    fn registration(id: &str, radius: f64, distance: Option<f64>) -> Registration {
        Registration {
            id: id.to_string(),
            space: Sphere::new(Location::point(0.0, 0.0).unwrap(), radius).unwrap(),
            foad: true,
            owner: "test@localhost".to_string(),
            created: Utc::now(),
            updated: Utc::now(),
            origin_server: None,
            origin_id: None,
            version: 1,
            service_point: None,
            distance,
        }
    }

    #[test]
    fn test_normalize_server_url() {
        assert_eq!(normalize_server_url("https://a.example/"), "https://a.example");
        assert_eq!(normalize_server_url("https://a.example//"), "https://a.example");
        assert_eq!(normalize_server_url(" https://a.example "), "https://a.example");
        assert_eq!(normalize_server_url("https://a.example/mrs"), "https://a.example/mrs");
    }

    #[test]
    fn test_default_config() {
        let config = ResolverConfig::default();
        assert_eq!(config.max_depth, 5);
        assert_eq!(config.max_servers, 20);
        assert_eq!(config.per_call_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_merge_keeps_closer_copy() {
        let mut crawl = Crawl::default();
        crawl.merge(registration("r1", 100.0, Some(50.0)));
        crawl.merge(registration("r1", 100.0, Some(80.0)));
        assert_eq!(crawl.results[0].distance, Some(50.0));

        crawl.merge(registration("r1", 100.0, Some(10.0)));
        assert_eq!(crawl.results.len(), 1);
        assert_eq!(crawl.results[0].distance, Some(10.0));
    }

    #[test]
    fn test_merge_tie_keeps_first() {
        let mut crawl = Crawl::default();
        let mut first = registration("r1", 100.0, Some(20.0));
        first.owner = "first@localhost".to_string();
        crawl.merge(first);
        crawl.merge(registration("r1", 100.0, Some(20.0)));
        assert_eq!(crawl.results[0].owner, "first@localhost");
    }

    #[test]
    fn test_sort_volume_then_distance() {
        let mut crawl = Crawl::default();
        crawl.merge(registration("large-near", 1000.0, Some(5.0)));
        crawl.merge(registration("small-far", 10.0, Some(50.0)));
        crawl.merge(registration("small-unknown", 10.0, None));
        crawl.merge(registration("small-near", 10.0, Some(1.0)));

        let (results, _) = crawl.into_sorted();
        let ids: Vec<&str> = results.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["small-near", "small-far", "small-unknown", "large-near"]);
    }

    #[test]
    fn test_seeds_are_normalized() {
        let crawl = Crawl::seeded(&["https://a.example/".to_string()]);
        assert_eq!(crawl.queue.front(), Some(&("https://a.example".to_string(), 0)));
    }

    #[test]
    fn test_absorb_computes_distance_and_queues_referrals() {
        let location = Location::point(0.001, 0.0).unwrap();
        let mut crawl = Crawl::default();
        crawl.mark_visited("https://a.example");

        let response = SearchResponse {
            results: vec![
                serde_json::to_value(registration("r1", 500.0, None)).unwrap(),
                json!({"id": "broken"}),
            ],
            referrals: vec![
                json!({"server": "https://a.example/"}),
                json!({"server": "https://b.example/", "hint": "peer"}),
                json!({"hint": "no server"}),
            ],
        };
        crawl.absorb("https://a.example", 0, &location, response);

        assert_eq!(crawl.results.len(), 1);
        let distance = crawl.results[0].distance.unwrap();
        assert!((distance - 111.19).abs() < 1.0);
        assert_eq!(crawl.queue, VecDeque::from([("https://b.example".to_string(), 1)]));
    }

    #[tokio::test]
    async fn test_search_rejects_bad_input() {
        let resolver = SearchResolver::new(
            Arc::new(crate::transport::MockNetwork::new()),
            ResolverConfig::default(),
        );
        let location = Location::point(0.0, 0.0).unwrap();

        let err = resolver.search(&location, 0.0, &[]).await.unwrap_err();
        assert!(err.is_validation());

        let seeds = vec!["https://a.example".to_string()];
        let err = resolver.search(&location, -1.0, &seeds).await.unwrap_err();
        assert!(err.is_validation());
        let err = resolver.search(&location, f64::NAN, &seeds).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_search_without_reachable_servers_is_empty() {
        let resolver = SearchResolver::new(
            Arc::new(crate::transport::MockNetwork::new()),
            ResolverConfig::default(),
        );
        let location = Location::point(0.0, 0.0).unwrap();
        let result = resolver
            .search(&location, 0.0, &["https://nowhere.example".to_string()])
            .await
            .unwrap();

        assert!(result.is_empty());
        assert_eq!(result.servers_queried, vec!["https://nowhere.example".to_string()]);
        assert_eq!(result.referrals_followed, 0);
    }
}
