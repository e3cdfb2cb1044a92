//! HTTP message signatures for MRS requests
//!
//! Requests are signed in the style of RFC 9421 with Ed25519. The signature
//! base is one line per covered component, in declaration order, followed by
//! the `@signature-params` line:
//!
//! ```text
//! "@method": POST
//! "@path": /register
//! "content-digest": sha-256=:<base64 SHA-256 of body>:
//! "mrs-identity": alice@example.com
//! "@signature-params": ("@method" "@path" "content-digest" "mrs-identity");
//!     keyid="<key url>"; created=1735689600; alg="ed25519"
//! ```
//!
//! The params line is wrapped above for width; it is a single line in the base.
//! `content-digest` is covered only when a non-empty body is signed. The
//! signer and verifier must build this string byte for byte identically.

use crate::crypto::{verify_with_key, Identity};
use crate::error::{MrsError, Result};
use base64::{engine::general_purpose::STANDARD, Engine};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use tracing::debug;
use url::Url;

/// Label used in `Signature-Input` and `Signature`
pub const SIGNATURE_LABEL: &str = "sig1";

/// Only supported algorithm
pub const ALGORITHM: &str = "ed25519";

pub const HEADER_SIGNATURE_INPUT: &str = "Signature-Input";
pub const HEADER_SIGNATURE: &str = "Signature";
pub const HEADER_MRS_IDENTITY: &str = "MRS-Identity";
pub const HEADER_CONTENT_DIGEST: &str = "Content-Digest";

const COMPONENT_METHOD: &str = "@method";
const COMPONENT_PATH: &str = "@path";
const COMPONENT_DIGEST: &str = "content-digest";
const COMPONENT_IDENTITY: &str = "mrs-identity";
const COMPONENT_PARAMS: &str = "@signature-params";

/// Headers produced by signing a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    /// `sig1=(<components>); keyid=...; created=...; alg="ed25519"`
    pub signature_input: String,
    /// `sig1=:<base64 signature>:`
    pub signature: String,
    pub mrs_identity: String,
    /// Present only when a body was signed
    pub content_digest: Option<String>,
}

impl SignedHeaders {
    /// Header name/value pairs, ready to attach to a request
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        if let Some(digest) = &self.content_digest {
            pairs.push((HEADER_CONTENT_DIGEST, digest.clone()));
        }
        pairs.push((HEADER_SIGNATURE_INPUT, self.signature_input.clone()));
        pairs.push((HEADER_SIGNATURE, self.signature.clone()));
        pairs.push((HEADER_MRS_IDENTITY, self.mrs_identity.clone()));
        pairs
    }

    pub fn into_map(self) -> HashMap<String, String> {
        self.to_pairs()
            .into_iter()
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }
}

/// Parameters carried in `Signature-Input`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureParams {
    /// Covered components, in signing order
    pub components: Vec<String>,
    /// URL of the signer's published key, with key id fragment
    pub keyid: String,
    /// Unix timestamp at signing
    pub created: i64,
    pub alg: String,
}

impl SignatureParams {
    /// Parse the parameter string (the part after `sig1=`)
    ///
    /// Returns `None` for anything that is not exactly a component list
    /// followed by `keyid`, `created` and `alg`.
    pub fn parse(input: &str) -> Option<Self> {
        let input = input.trim();
        let rest = input.strip_prefix('(')?;
        let (list, params) = rest.split_once(')')?;

        let components = list
            .split_whitespace()
            .map(|c| unquote(c).map(str::to_string))
            .collect::<Option<Vec<_>>>()?;

        let mut keyid = None;
        let mut created = None;
        let mut alg = None;
        for param in params.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = param.split_once('=')?;
            match key.trim() {
                "keyid" => keyid = Some(unquote(value.trim())?.to_string()),
                "created" => created = Some(value.trim().parse::<i64>().ok()?),
                "alg" => alg = Some(unquote(value.trim())?.to_string()),
                _ => return None,
            }
        }

        Some(Self {
            components,
            keyid: keyid?,
            created: created?,
            alg: alg?,
        })
    }
}

impl fmt::Display for SignatureParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let list = self
            .components
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(" ");
        write!(
            f,
            "({}); keyid=\"{}\"; created={}; alg=\"{}\"",
            list, self.keyid, self.created, self.alg
        )
    }
}

fn unquote(s: &str) -> Option<&str> {
    s.strip_prefix('"')?.strip_suffix('"')
}

/// `sha-256=:<base64>:` digest of a body
pub fn content_digest(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    format!("sha-256=:{}:", STANDARD.encode(digest))
}

/// Path plus `?query` of a full URL, as covered by `@path`
pub fn request_target(url: &str) -> Result<String> {
    let parsed = Url::parse(url)?;
    let path = match parsed.path() {
        "" => "/",
        p => p,
    };
    Ok(match parsed.query() {
        Some(q) if !q.is_empty() => format!("{}?{}", path, q),
        _ => path.to_string(),
    })
}

/// Canonical signature base
///
/// Lines are appended in component order; `finish` appends the
/// `@signature-params` line, which must describe the same components.
struct SignatureBase {
    components: Vec<String>,
    lines: Vec<String>,
}

impl SignatureBase {
    fn new() -> Self {
        Self {
            components: Vec::with_capacity(4),
            lines: Vec::with_capacity(5),
        }
    }

    fn component(mut self, name: &str, value: &str) -> Self {
        self.components.push(name.to_string());
        self.lines.push(format!("\"{}\": {}", name, value));
        self
    }

    /// Build the base for a request; the method is covered exactly as given
    fn for_request(method: &str, path: &str, digest: Option<&str>, identity: &str) -> Self {
        let mut base = Self::new()
            .component(COMPONENT_METHOD, method)
            .component(COMPONENT_PATH, path);
        if let Some(digest) = digest {
            base = base.component(COMPONENT_DIGEST, digest);
        }
        base.component(COMPONENT_IDENTITY, identity)
    }

    fn finish(mut self, params: &str) -> String {
        self.lines
            .push(format!("\"{}\": {}", COMPONENT_PARAMS, params));
        self.lines.join("\n")
    }
}

/// Sign a request with the given identity at time `created`
///
/// An empty body is treated as no body. HTTP methods are case-sensitive, so
/// the method must be passed as it will be sent.
///
/// # Errors
/// - `Authentication` if no identity is given or it has no private key
/// - `Validation` if the URL does not parse
pub fn sign_request(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    identity: Option<&Identity>,
    created: i64,
) -> Result<SignedHeaders> {
    let identity = identity.ok_or_else(|| MrsError::authentication("No identity configured"))?;
    if !identity.has_private_key() {
        return Err(MrsError::authentication("Cannot sign without private key"));
    }

    let path = request_target(url)?;
    let digest = body.filter(|b| !b.is_empty()).map(content_digest);

    let base = SignatureBase::for_request(method, &path, digest.as_deref(), identity.id());
    let params = SignatureParams {
        components: base.components.clone(),
        keyid: identity.key_url(),
        created,
        alg: ALGORITHM.to_string(),
    }
    .to_string();
    let signature = identity.sign(base.finish(&params).as_bytes())?;

    debug!(
        identity = %identity.id(),
        method = %method,
        path = %path,
        "Signed request"
    );

    Ok(SignedHeaders {
        signature_input: format!("{}={}", SIGNATURE_LABEL, params),
        signature: format!("{}=:{}:", SIGNATURE_LABEL, STANDARD.encode(signature)),
        mrs_identity: identity.id().to_string(),
        content_digest: digest,
    })
}

/// Sign a request stamped with the current time
pub fn sign_request_now(
    method: &str,
    url: &str,
    body: Option<&[u8]>,
    identity: Option<&Identity>,
) -> Result<SignedHeaders> {
    sign_request(method, url, body, identity, chrono::Utc::now().timestamp())
}

/// Extract the parameters from a `Signature-Input` header value
///
/// Lets a verifier check `created` against its own replay window.
pub fn parse_signature_input(header: &str) -> Option<SignatureParams> {
    let params = header
        .trim()
        .strip_prefix(SIGNATURE_LABEL)?
        .strip_prefix('=')?;
    SignatureParams::parse(params)
}

fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
        .filter(|v| !v.is_empty())
}

/// Verify a signed request
///
/// `path` is the request path including any query string. Header names are
/// matched case-insensitively. The body digest is recomputed, so a body
/// altered after signing fails even if `Content-Digest` was left intact.
///
/// Never errors: malformed or missing headers verify as `false`.
pub fn verify_signature(
    method: &str,
    path: &str,
    body: Option<&[u8]>,
    headers: &HashMap<String, String>,
    public_key: &[u8],
) -> bool {
    let (Some(input), Some(signature), Some(identity)) = (
        header(headers, HEADER_SIGNATURE_INPUT),
        header(headers, HEADER_SIGNATURE),
        header(headers, HEADER_MRS_IDENTITY),
    ) else {
        return false;
    };

    let Some(params_str) = input
        .strip_prefix(SIGNATURE_LABEL)
        .and_then(|s| s.strip_prefix('='))
    else {
        return false;
    };
    let Some(params) = SignatureParams::parse(params_str) else {
        return false;
    };
    if params.alg != ALGORITHM {
        return false;
    }

    let received_digest = header(headers, HEADER_CONTENT_DIGEST);
    match (body.filter(|b| !b.is_empty()), received_digest) {
        (Some(body), Some(digest)) => {
            if content_digest(body) != digest {
                return false;
            }
        }
        (None, None) => {}
        // Digest without body, or body without digest
        _ => return false,
    }

    let base = SignatureBase::for_request(method, path, received_digest, identity);
    if base.components != params.components {
        return false;
    }
    let base = base.finish(params_str);

    let Some(encoded) = signature
        .strip_prefix(SIGNATURE_LABEL)
        .and_then(|s| s.strip_prefix("=:"))
        .and_then(|s| s.strip_suffix(':'))
    else {
        return false;
    };
    let Ok(raw) = STANDARD.decode(encoded) else {
        return false;
    };

    verify_with_key(public_key, base.as_bytes(), &raw)
}
