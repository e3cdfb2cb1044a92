//! MRS client facade
//!
//! Composes the key registry, transport and search resolver into the
//! protocol operations, mapping HTTP status codes onto [`MrsError`] kinds:
//!
//! | Operation | 401 / 403 | 404 | other non-2xx | non-JSON |
//! |---|---|---|---|---|
//! | register | Authentication | Validation | Validation | Connection |
//! | release | Authentication | NotFound | Connection | - |
//! | list | Authentication (401) | Connection | Connection | Connection |
//! | server info | Connection | Connection | Connection | Connection |
//! | verify auth | Authentication (401) | Connection | Connection | Connection |
//!
//! Authenticated operations fail with `Authentication` before any request
//! when no bearer token is stored for the target server.

use chrono::{DateTime, Utc};
use mrs_core::{
    AuthInfo, Identity, Location, MrsError, PublicKeyExport, Registration, RegistrationPage,
    RegistrationRequest, Result, SearchResult, ServerInfo,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::keys::KeyRegistry;
use crate::search::{normalize_server_url, SearchResolver};
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, Transport};

/// Entry point for MRS operations
///
/// Construct once and share; all state lives in the registry and transport
/// handed in at construction.
#[derive(Debug, Clone)]
pub struct MrsClient {
    config: ClientConfig,
    registry: Arc<KeyRegistry>,
    transport: Arc<dyn Transport>,
    resolver: SearchResolver,
}

impl MrsClient {
    pub fn new(
        config: ClientConfig,
        registry: Arc<KeyRegistry>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let resolver = SearchResolver::new(transport.clone(), config.resolver_config());
        Self {
            config,
            registry,
            transport,
            resolver,
        }
    }

    /// Client over HTTPS using the configured timeout
    pub fn with_defaults(config: ClientConfig, registry: Arc<KeyRegistry>) -> Result<Self> {
        let transport = HttpTransport::new(config.timeout())?;
        Ok(Self::new(config, registry, Arc::new(transport)))
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<KeyRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &SearchResolver {
        &self.resolver
    }

    fn server_url(&self, server: Option<&str>) -> String {
        normalize_server_url(&self.config.effective_server(server))
    }

    /// Bearer headers for `server`, or an error naming it
    fn require_auth(&self, server: &str) -> Result<Vec<(String, String)>> {
        let headers = self.registry.auth_headers(server);
        if headers.is_empty() {
            return Err(MrsError::authentication(format!(
                "No authentication configured for {}",
                server
            )));
        }
        Ok(headers)
    }

    fn json_body(server: &str, response: HttpResponse) -> Result<Value> {
        response.json.ok_or_else(|| {
            MrsError::connection(server, "Server returned non-JSON response")
                .with_status(response.status)
        })
    }

    // =========================================================================
    // Search
    // =========================================================================

    /// Federated search starting from the effective server
    pub async fn search(&self, location: Location, range: f64) -> Result<SearchResult> {
        let seeds = [self.server_url(None)];
        self.resolver.search(&location, range, &seeds).await
    }

    /// Federated search starting from the given servers
    pub async fn search_servers(
        &self,
        location: Location,
        range: f64,
        servers: &[String],
    ) -> Result<SearchResult> {
        self.resolver.search(&location, range, servers).await
    }

    /// Federated search from the effective server that stops when `cancel` fires
    pub async fn search_with_cancellation(
        &self,
        location: Location,
        range: f64,
        cancel: &CancellationToken,
    ) -> Result<SearchResult> {
        let seeds = [self.server_url(None)];
        self.resolver
            .search_with_cancellation(&location, range, &seeds, cancel)
            .await
    }

    // =========================================================================
    // Registrations
    // =========================================================================

    /// Register a space
    pub async fn register(
        &self,
        request: &RegistrationRequest,
        server: Option<&str>,
    ) -> Result<Registration> {
        let server = self.server_url(server);
        let headers = self.require_auth(&server)?;

        let body = serde_json::to_value(request)?;
        let response = self
            .transport
            .request(HttpRequest::post(format!("{}/register", server), body).with_headers(headers))
            .await?;

        match response.status {
            200 | 201 => {}
            401 => {
                return Err(MrsError::authentication(
                    "Authentication failed. Check your token or identity.",
                )
                .with_status(401))
            }
            403 => {
                return Err(
                    MrsError::authentication("Not authorized to register at this server.")
                        .with_status(403),
                )
            }
            _ => {
                let message = match &response.json {
                    Some(_) => response.message(),
                    None => "Unknown error".to_string(),
                };
                return Err(MrsError::validation(format!("Registration failed: {}", message)));
            }
        }

        let body = Self::json_body(&server, response)?;
        let registration = body
            .get("registration")
            .ok_or_else(|| MrsError::connection(&server, "Response is missing the registration"))
            .and_then(Registration::from_json)?;

        info!(server = %server, id = %registration.id, "Registered space");
        Ok(registration)
    }

    /// Release a registration by id
    pub async fn release(&self, id: &str, server: Option<&str>) -> Result<()> {
        let server = self.server_url(server);
        let headers = self.require_auth(&server)?;

        let request = HttpRequest::post(format!("{}/release", server), json!({"id": id}));
        let response = self.transport.request(request.with_headers(headers)).await?;

        match response.status {
            200 => {
                info!(server = %server, id = %id, "Released registration");
                Ok(())
            }
            401 => Err(MrsError::authentication("Authentication failed.").with_status(401)),
            403 => Err(
                MrsError::authentication("Not authorized to release this registration.")
                    .with_status(403),
            ),
            404 => Err(MrsError::not_found(format!("Registration {} not found", id))),
            status => Err(
                MrsError::connection(&server, format!("Release failed: {}", status))
                    .with_status(status),
            ),
        }
    }

    /// Registrations owned by the authenticated user
    pub async fn list_registrations(&self, server: Option<&str>) -> Result<RegistrationPage> {
        let server = self.server_url(server);
        let headers = self.require_auth(&server)?;

        let response = self
            .transport
            .request(HttpRequest::get(format!("{}/registrations", server)).with_headers(headers))
            .await?;

        match response.status {
            200 => {}
            401 => return Err(MrsError::authentication("Authentication failed.").with_status(401)),
            status => {
                return Err(
                    MrsError::connection(&server, format!("List failed: {}", status))
                        .with_status(status),
                )
            }
        }

        let body = Self::json_body(&server, response)?;
        let page = RegistrationPage::deserialize(&body).map_err(|e| {
            MrsError::connection(&server, format!("Malformed registration list: {}", e))
        })?;

        debug!(
            server = %server,
            count = page.registrations.len(),
            total = page.total,
            "Listed registrations"
        );
        Ok(page)
    }

    // =========================================================================
    // Server metadata
    // =========================================================================

    /// Fetch `/.well-known/mrs`
    pub async fn server_info(&self, server: Option<&str>) -> Result<ServerInfo> {
        let server = self.server_url(server);
        let response = self
            .transport
            .request(HttpRequest::get(format!("{}/.well-known/mrs", server)))
            .await?;

        if response.status != 200 {
            return Err(MrsError::connection(
                &server,
                format!("Failed to get server info: {}", response.status),
            )
            .with_status(response.status));
        }

        let body = Self::json_body(&server, response)?;
        ServerInfo::from_json(&body, server.as_str())
    }

    /// Check the stored token against `/auth/me`
    pub async fn verify_auth(&self, server: Option<&str>) -> Result<AuthInfo> {
        let server = self.server_url(server);
        let headers = self.require_auth(&server)?;

        let response = self
            .transport
            .request(HttpRequest::get(format!("{}/auth/me", server)).with_headers(headers))
            .await?;

        match response.status {
            200 => {}
            401 => {
                return Err(MrsError::authentication(
                    "Authentication failed - token may be expired.",
                )
                .with_status(401))
            }
            status => {
                return Err(
                    MrsError::connection(&server, format!("Verification failed: {}", status))
                        .with_status(status),
                )
            }
        }

        let body = Self::json_body(&server, response)?;
        AuthInfo::deserialize(&body)
            .map_err(|e| MrsError::connection(&server, format!("Malformed auth response: {}", e)))
    }

    // =========================================================================
    // Identity & tokens
    // =========================================================================

    pub fn identity(&self) -> Option<Identity> {
        self.registry.identity()
    }

    /// Generate and persist a new identity, replacing the current one
    pub async fn create_identity(&self, username: &str, domain: &str) -> Result<Identity> {
        self.registry.generate_identity(username, domain).await
    }

    pub fn export_public_key(&self) -> Result<PublicKeyExport> {
        self.registry.export_public_key()
    }

    /// Store a bearer token for `server` (the effective server if `None`)
    pub async fn store_token(
        &self,
        token: &str,
        server: Option<&str>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let server = self.server_url(server);
        self.registry.store_bearer_token(&server, token, expires_at).await
    }

    pub fn token(&self, server: Option<&str>) -> Option<String> {
        self.registry.bearer_token(&self.server_url(server))
    }

    /// Forget the token for `server`; returns whether one was stored
    pub async fn remove_token(&self, server: Option<&str>) -> Result<bool> {
        self.registry.remove_bearer_token(&self.server_url(server)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::DEFAULT_TOKEN;
    use crate::transport::{MockFault, MockNetwork};
    use mrs_core::Sphere;

    const SERVER: &str = "https://mrs.example";

    fn setup() -> (Arc<MockNetwork>, MrsClient) {
        let network = Arc::new(MockNetwork::new());
        network.server(SERVER);
        let config = ClientConfig {
            default_server: SERVER.to_string(),
            ..ClientConfig::default()
        };
        let client = MrsClient::new(config, Arc::new(KeyRegistry::in_memory()), network.clone());
        (network, client)
    }

    fn request() -> RegistrationRequest {
        let space = Sphere::new(Location::point(0.0, 0.0).unwrap(), 100.0).unwrap();
        RegistrationRequest::new(space, Some("https://service.example/api"), false).unwrap()
    }

    #[tokio::test]
    async fn test_register_without_token_makes_no_request() {
        let (network, client) = setup();
        let err = client.register(&request(), None).await.unwrap_err();
        assert!(err.is_auth());
        assert!(err.to_string().contains(SERVER));
        assert_eq!(network.total_requests(), 0);
    }

    #[tokio::test]
    async fn test_register_and_list() {
        let (_network, client) = setup();
        client.store_token(DEFAULT_TOKEN, None, None).await.unwrap();

        let registration = client.register(&request(), None).await.unwrap();
        assert!(registration.id.starts_with("reg_"));
        assert_eq!(registration.owner, "test@localhost");
        assert_eq!(registration.service_point.as_deref(), Some("https://service.example/api"));

        let page = client.list_registrations(None).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.registrations[0].id, registration.id);
    }

    #[tokio::test]
    async fn test_bad_token_is_auth_error() {
        let (_network, client) = setup();
        client.store_token("wrong", None, None).await.unwrap();

        let err = client.register(&request(), None).await.unwrap_err();
        assert!(err.is_auth());
        assert_eq!(err.status(), Some(401));

        let err = client.verify_auth(None).await.unwrap_err();
        assert!(err.is_auth());
    }

    #[tokio::test]
    async fn test_release_not_found() {
        let (_network, client) = setup();
        client.store_token(DEFAULT_TOKEN, None, None).await.unwrap();

        let err = client.release("reg_missing", None).await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Not found: Registration reg_missing not found");
    }

    #[tokio::test]
    async fn test_server_info() {
        let (network, client) = setup();
        network.server(SERVER).add_peer("https://peer.example", None);

        let info = client.server_info(None).await.unwrap();
        assert_eq!(info.url, SERVER);
        assert_eq!(info.mrs_version, "0.5.0");
        assert_eq!(info.known_peers.len(), 1);

        network.server(SERVER).set_fault(MockFault::NonJson);
        assert!(client.server_info(None).await.unwrap_err().is_connection());
    }

    #[tokio::test]
    async fn test_verify_auth() {
        let (_network, client) = setup();
        client.store_token(DEFAULT_TOKEN, None, None).await.unwrap();

        let info = client.verify_auth(None).await.unwrap();
        assert_eq!(info.id, "test@localhost");
        assert!(info.can_register);
        assert_eq!(info.registration_count, 0);
    }

    #[tokio::test]
    async fn test_token_passthroughs() {
        let (_network, client) = setup();
        assert_eq!(client.token(None), None);

        client.store_token("abc", Some("https://other.example/"), None).await.unwrap();
        assert_eq!(client.token(Some("https://other.example")).as_deref(), Some("abc"));
        assert!(client.remove_token(Some("https://other.example")).await.unwrap());
        assert_eq!(client.token(Some("https://other.example")), None);
    }
}
