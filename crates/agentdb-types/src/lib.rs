mod canonical;

pub use canonical::{canonicalize, to_canonical_bytes};

use data_encoding::BASE32_NOPAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Unix epoch timestamp in seconds.
pub type Timestamp = i64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    chrono::Utc::now().timestamp()
}

/// Prefix carried by identifiers that only exist in process-local simulated storage.
pub const SIMULATED_CID_PREFIX: &str = "bafysim_";

// CIDv1 header for a raw-codec block hashed with sha2-256.
const CID_V1_RAW_SHA256: [u8; 4] = [0x01, 0x55, 0x12, 0x20];

/// Lowercase RFC 4648 base32 without padding, the multibase `b` alphabet.
pub fn base32_lower(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
}

/// Inverse of [`base32_lower`].
pub fn decode_base32_lower(s: &str) -> Option<Vec<u8>> {
    BASE32_NOPAD.decode(s.to_ascii_uppercase().as_bytes()).ok()
}

/// Decentralized identifier of an agent, e.g. `did:key:z6Mk...`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Did(String);

impl Did {
    /// Parse and validate the `did:<method>:<id>` shape.
    pub fn parse(s: &str) -> Result<Self, AgentDbError> {
        let mut parts = s.splitn(3, ':');
        let scheme = parts.next().unwrap_or_default();
        let method = parts.next().unwrap_or_default();
        let id = parts.next().unwrap_or_default();
        if scheme != "did" || method.is_empty() || id.is_empty() {
            return Err(AgentDbError::Validation(format!("malformed DID: {s:?}")));
        }
        if !method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()) {
            return Err(AgentDbError::Validation(format!("malformed DID method: {method:?}")));
        }
        if !id.chars().all(|c| c.is_ascii_graphic()) {
            return Err(AgentDbError::Validation(format!("malformed DID: {s:?}")));
        }
        Ok(Self(s.to_string()))
    }

    /// `did:key` identifier from an already multibase-encoded key.
    pub fn key(multibase_key: &str) -> Self {
        Self(format!("did:key:{multibase_key}"))
    }

    /// The DID method, e.g. `key`.
    pub fn method(&self) -> &str {
        self.0.split(':').nth(1).unwrap_or_default()
    }

    /// Everything after `did:<method>:`.
    pub fn method_specific_id(&self) -> &str {
        self.0.splitn(3, ':').nth(2).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Did {
    type Error = AgentDbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Did> for String {
    fn from(did: Did) -> Self {
        did.0
    }
}

impl fmt::Debug for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.len().min(24);
        write!(f, "Did({}..)", &self.0[..end])
    }
}

impl fmt::Display for Did {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Content identifier. Opaque to callers except for the simulated prefix.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Cid(String);

impl Cid {
    /// CIDv1 (raw codec, sha2-256) of `bytes`, multibase base32 encoded.
    pub fn for_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut buf = Vec::with_capacity(CID_V1_RAW_SHA256.len() + digest.len());
        buf.extend_from_slice(&CID_V1_RAW_SHA256);
        buf.extend_from_slice(&digest);
        Self(format!("b{}", base32_lower(&buf)))
    }

    /// Deterministic identifier for payloads held in simulated storage.
    pub fn simulated(bytes: &[u8]) -> Self {
        Self(format!(
            "{SIMULATED_CID_PREFIX}{}",
            hex::encode(Sha256::digest(bytes))
        ))
    }

    /// Validate an externally supplied CID string.
    pub fn parse(s: &str) -> Result<Self, AgentDbError> {
        if let Some(digest) = s.strip_prefix(SIMULATED_CID_PREFIX) {
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(AgentDbError::Validation(format!(
                    "malformed simulated CID: {s:?}"
                )));
            }
            return Ok(Self(s.to_string()));
        }
        if s.len() < 8 || s.len() > 128 {
            return Err(AgentDbError::Validation(format!(
                "CID has invalid length {}",
                s.len()
            )));
        }
        if !s.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(AgentDbError::Validation(format!("malformed CID: {s:?}")));
        }
        Ok(Self(s.to_string()))
    }

    /// True if this identifier is only resolvable from simulated storage.
    pub fn is_simulated(&self) -> bool {
        self.0.starts_with(SIMULATED_CID_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Cid {
    type Error = AgentDbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<Cid> for String {
    fn from(cid: Cid) -> Self {
        cid.0
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.len().min(20);
        write!(f, "Cid({}..)", &self.0[..end])
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stable identifier of a mutable stream name: `k` + base32 of the name's public key.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NameId(String);

impl NameId {
    pub fn parse(s: &str) -> Result<Self, AgentDbError> {
        let body = s
            .strip_prefix('k')
            .ok_or_else(|| AgentDbError::Validation(format!("malformed stream name: {s:?}")))?;
        if body.is_empty() || decode_base32_lower(body).is_none() {
            return Err(AgentDbError::Validation(format!("malformed stream name: {s:?}")));
        }
        Ok(Self(s.to_string()))
    }

    /// Build from already-encoded key material.
    pub fn from_key_bytes(bytes: &[u8]) -> Self {
        Self(format!("k{}", base32_lower(bytes)))
    }

    /// The key material this identifier encodes.
    pub fn key_bytes(&self) -> Vec<u8> {
        decode_base32_lower(&self.0[1..]).unwrap_or_default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for NameId {
    type Error = AgentDbError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<NameId> for String {
    fn from(id: NameId) -> Self {
        id.0
    }
}

impl fmt::Debug for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = self.0.len().min(20);
        write!(f, "NameId({}..)", &self.0[..end])
    }
}

impl fmt::Display for NameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a delegation did not authorize an access.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DenialReason {
    #[serde(rename = "issuer mismatch")]
    IssuerMismatch,
    #[serde(rename = "capability mismatch")]
    CapabilityMismatch,
    #[serde(rename = "expired")]
    Expired,
    #[serde(rename = "signature invalid")]
    SignatureInvalid,
    /// The token was issued to someone other than the reader.
    #[serde(rename = "audience mismatch")]
    AudienceMismatch,
    /// A non-owner attempted a read without presenting a token.
    #[serde(rename = "delegation required")]
    DelegationRequired,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::IssuerMismatch => "issuer mismatch",
            DenialReason::CapabilityMismatch => "capability mismatch",
            DenialReason::Expired => "expired",
            DenialReason::SignatureInvalid => "signature invalid",
            DenialReason::AudienceMismatch => "audience mismatch",
            DenialReason::DelegationRequired => "delegation required",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common error types.
#[derive(Debug, thiserror::Error)]
pub enum AgentDbError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("network failure after {attempts} attempt(s): {last_error}")]
    Network { attempts: u32, last_error: String },
    #[error("authorization denied: {0}")]
    AuthDenied(DenialReason),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("storage error: {0}")]
    Storage(String),
}
