//! Byte and text encodings for delegations.
//!
//! The byte form is canonical JSON (sorted keys, compact), so encoding the
//! same delegation always yields the same bytes and therefore the same CID.
//! The text form is URL-safe base64 of those bytes, suitable for an
//! `Authorization: Bearer` header or a query parameter.

use agentdb_types::{canonicalize, AgentDbError, Did, Timestamp};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::Signature;
use serde::Deserialize;
use serde_json::json;

use crate::delegation::{Capability, Delegation, DELEGATION_VERSION};

/// Maximum accepted size of a serialized delegation (64 KB).
pub const MAX_DELEGATION_SIZE: usize = 64 * 1024;

/// Filename used when a delegation is stored as a blob.
pub const DELEGATION_FILENAME: &str = "delegation.json";

/// MIME type of the serialized form.
pub const DELEGATION_MIME: &str = "application/json";

const BEARER_PREFIX: &str = "Bearer ";

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DelegationWire {
    v: u8,
    iss: Did,
    aud: Did,
    can: String,
    #[serde(default)]
    with: Option<String>,
    exp: Timestamp,
    sig: String,
}

impl Delegation {
    /// Canonical byte encoding. Round-trips exactly through [`Delegation::from_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut value = json!({
            "v": DELEGATION_VERSION,
            "iss": self.issuer.as_str(),
            "aud": self.audience.as_str(),
            "can": self.capability.can.as_str(),
            "exp": self.expiration,
            "sig": URL_SAFE_NO_PAD.encode(self.signature.to_bytes()),
        });
        if let Some(with) = &self.capability.with {
            value["with"] = json!(with);
        }
        canonicalize(&value).into_bytes()
    }

    /// Rebuild a delegation from its byte encoding. Does not verify it.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, AgentDbError> {
        if bytes.len() > MAX_DELEGATION_SIZE {
            return Err(AgentDbError::Validation(format!(
                "delegation is {} bytes, limit is {MAX_DELEGATION_SIZE}",
                bytes.len()
            )));
        }
        let wire: DelegationWire = serde_json::from_slice(bytes)
            .map_err(|e| AgentDbError::Validation(format!("malformed delegation: {e}")))?;
        if wire.v != DELEGATION_VERSION {
            return Err(AgentDbError::Validation(format!(
                "unsupported delegation version {}",
                wire.v
            )));
        }
        let sig_bytes: [u8; 64] = URL_SAFE_NO_PAD
            .decode(&wire.sig)
            .map_err(|e| AgentDbError::Validation(format!("malformed signature: {e}")))?
            .try_into()
            .map_err(|_| AgentDbError::Validation("signature must be 64 bytes".into()))?;

        Ok(Self {
            issuer: wire.iss,
            audience: wire.aud,
            capability: Capability {
                can: wire.can,
                with: wire.with,
            },
            expiration: wire.exp,
            signature: Signature::from_bytes(&sig_bytes),
        })
    }

    /// Printable form for text-only transports.
    pub fn to_transport_string(&self) -> String {
        URL_SAFE_NO_PAD.encode(self.to_bytes())
    }

    /// Parse the printable form produced by [`Delegation::to_transport_string`].
    pub fn from_transport_string(s: &str) -> Result<Self, AgentDbError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(AgentDbError::Validation("empty delegation token".into()));
        }
        // base64 expands 3 bytes to 4 chars; reject before decoding.
        let estimated = (s.len() * 3) / 4;
        if estimated > MAX_DELEGATION_SIZE {
            return Err(AgentDbError::Validation(format!(
                "delegation token of ~{estimated} bytes exceeds limit"
            )));
        }
        let bytes = URL_SAFE_NO_PAD
            .decode(s)
            .map_err(|e| AgentDbError::Validation(format!("delegation token is not base64: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Value for an `Authorization` header.
    pub fn to_bearer(&self) -> String {
        format!("{BEARER_PREFIX}{}", self.to_transport_string())
    }
}

/// Extract a delegation from an `Authorization: Bearer <token>` header value.
pub fn parse_bearer(header: &str) -> Result<Delegation, AgentDbError> {
    let token = header
        .strip_prefix(BEARER_PREFIX)
        .ok_or_else(|| AgentDbError::Validation("expected a Bearer credential".into()))?;
    Delegation::from_transport_string(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AgentKeypair;
    use agentdb_types::DenialReason;

    fn sample() -> (AgentKeypair, AgentKeypair, Delegation) {
        let a = AgentKeypair::generate();
        let b = AgentKeypair::generate();
        let cap = Capability::new("agent/read").on(a.did().to_string());
        let d = Delegation::issue_at(&a, &b.did(), cap, 24.0, 1_700_000_000).unwrap();
        (a, b, d)
    }

    #[test]
    fn bytes_roundtrip_preserves_identity() {
        let (_, _, d) = sample();
        let bytes = d.to_bytes();
        let d2 = Delegation::from_bytes(&bytes).unwrap();
        assert_eq!(d2, d);
        assert_eq!(d2.to_bytes(), bytes);
        assert_eq!(d2.content_address(), d.content_address());
    }

    #[test]
    fn encoding_ignores_input_key_order() {
        let (_, _, d) = sample();
        let mut value: serde_json::Value = serde_json::from_slice(&d.to_bytes()).unwrap();
        // Re-emit pretty-printed; keys come back in a different layout.
        let pretty = serde_json::to_vec_pretty(&value.take()).unwrap();
        let d2 = Delegation::from_bytes(&pretty).unwrap();
        assert_eq!(d2.to_bytes(), d.to_bytes());
    }

    #[test]
    fn transport_roundtrip_verifies() {
        let (a, _, d) = sample();
        let token = d.to_transport_string();
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        let d2 = Delegation::from_transport_string(&token).unwrap();
        assert!(d2.verify(&a.did(), "agent/read", 1_700_000_001).valid);
    }

    #[test]
    fn malformed_transport_rejected() {
        for bad in ["", "   ", "!!!not base64!!!", "aGVsbG8", "e30"] {
            assert!(matches!(
                Delegation::from_transport_string(bad),
                Err(AgentDbError::Validation(_))
            ));
        }
    }

    #[test]
    fn oversized_token_rejected() {
        let huge = "A".repeat(MAX_DELEGATION_SIZE * 2);
        assert!(Delegation::from_transport_string(&huge).is_err());
        assert!(Delegation::from_bytes(&vec![b' '; MAX_DELEGATION_SIZE + 1]).is_err());
    }

    #[test]
    fn unknown_fields_and_versions_rejected() {
        let (_, _, d) = sample();
        let mut value: serde_json::Value = serde_json::from_slice(&d.to_bytes()).unwrap();
        value["v"] = json!(2);
        assert!(Delegation::from_bytes(value.to_string().as_bytes()).is_err());
        value["v"] = json!(1);
        value["extra"] = json!(true);
        assert!(Delegation::from_bytes(value.to_string().as_bytes()).is_err());
    }

    #[test]
    fn tampered_expiration_bytes_fail_signature() {
        let (a, _, d) = sample();
        let text = String::from_utf8(d.to_bytes()).unwrap();
        let original = format!("\"exp\":{}", d.expiration());
        let forged = format!("\"exp\":{}", d.expiration() + 1);
        let tampered = text.replace(&original, &forged);
        assert_ne!(tampered, text);

        let d2 = Delegation::from_bytes(tampered.as_bytes()).unwrap();
        assert_eq!(
            d2.verify(&a.did(), "agent/read", 1_700_000_001).reason,
            Some(DenialReason::SignatureInvalid)
        );
    }

    #[test]
    fn tampered_capability_bytes_fail_signature() {
        let (a, _, d) = sample();
        let text = String::from_utf8(d.to_bytes()).unwrap();
        let tampered = text.replace("\"can\":\"agent/read\"", "\"can\":\"agent/reap\"");
        assert_ne!(tampered, text);

        let d2 = Delegation::from_bytes(tampered.as_bytes()).unwrap();
        assert_eq!(
            d2.verify(&a.did(), "agent/reap", 1_700_000_001).reason,
            Some(DenialReason::SignatureInvalid)
        );
    }

    #[test]
    fn bearer_header_roundtrip() {
        let (_, _, d) = sample();
        let header = d.to_bearer();
        assert!(header.starts_with("Bearer "));
        assert_eq!(parse_bearer(&header).unwrap(), d);
        assert!(parse_bearer("Basic abc").is_err());
    }
}
