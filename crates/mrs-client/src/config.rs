//! Client configuration

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::search::ResolverConfig;

pub const DEFAULT_SERVER: &str = "https://owen.iz.net";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Client settings
///
/// Every field has a default, so a partial JSON document deserializes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server used when no other is given
    pub default_server: String,

    pub max_referral_depth: usize,

    pub max_servers: usize,

    /// Per-request timeout in seconds
    pub timeout_seconds: f64,

    /// Free-form metadata per server URL
    pub servers: BTreeMap<String, BTreeMap<String, String>>,

    pub test_mode: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_server_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_server: DEFAULT_SERVER.to_string(),
            max_referral_depth: 5,
            max_servers: 20,
            timeout_seconds: 30.0,
            servers: BTreeMap::new(),
            test_mode: false,
            test_server_url: None,
        }
    }
}

impl ClientConfig {
    /// Defaults overlaid with `MRS_*` environment variables
    ///
    /// - `MRS_DEFAULT_SERVER`
    /// - `MRS_MAX_REFERRAL_DEPTH`
    /// - `MRS_MAX_SERVERS`
    /// - `MRS_TIMEOUT_SECS`
    /// - `MRS_TEST_SERVER_URL` (also enables test mode)
    ///
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(server) = lookup("MRS_DEFAULT_SERVER").filter(|s| !s.trim().is_empty()) {
            config.default_server = server.trim().to_string();
        }
        if let Some(depth) = parse_var(&lookup, "MRS_MAX_REFERRAL_DEPTH") {
            config.max_referral_depth = depth;
        }
        if let Some(max) = parse_var(&lookup, "MRS_MAX_SERVERS") {
            config.max_servers = max;
        }
        if let Some(secs) = parse_var::<f64>(&lookup, "MRS_TIMEOUT_SECS") {
            if secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok() {
                config.timeout_seconds = secs;
            } else {
                warn!(value = secs, "Ignoring out-of-range MRS_TIMEOUT_SECS");
            }
        }
        if let Some(url) = lookup("MRS_TEST_SERVER_URL").filter(|s| !s.trim().is_empty()) {
            config.test_mode = true;
            config.test_server_url = Some(url.trim().to_string());
        }

        config
    }

    /// Per-request timeout; values that are not a positive representable
    /// duration fall back to 30 seconds
    pub fn timeout(&self) -> Duration {
        match Duration::try_from_secs_f64(self.timeout_seconds) {
            Ok(timeout) if !timeout.is_zero() => timeout,
            _ => DEFAULT_TIMEOUT,
        }
    }

    /// Server to talk to: explicit, else the test server in test mode, else the default
    pub fn effective_server(&self, explicit: Option<&str>) -> String {
        if let Some(server) = explicit.filter(|s| !s.is_empty()) {
            return server.to_string();
        }
        if self.test_mode {
            if let Some(url) = self.test_server_url.as_deref().filter(|s| !s.is_empty()) {
                return url.to_string();
            }
        }
        self.default_server.clone()
    }

    pub fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            max_depth: self.max_referral_depth,
            max_servers: self.max_servers,
            per_call_timeout: self.timeout(),
        }
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str) -> Option<T> {
    let raw = lookup(name)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(var = name, value = %raw, "Ignoring unparseable environment variable");
            None
        }
    }
}

/// Directory holding `identity.json` and `tokens.json`
///
/// `MRS_CONFIG_DIR` overrides the platform config directory.
pub fn config_dir() -> PathBuf {
    std::env::var("MRS_CONFIG_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            directories::ProjectDirs::from("net", "mrs", "mrs")
                .map(|dirs| dirs.config_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".mrs"))
        })
}
