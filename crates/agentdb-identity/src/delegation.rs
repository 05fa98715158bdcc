use agentdb_types::{canonicalize, AgentDbError, Cid, DenialReason, Did, Timestamp};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{public_key_from_did, verify_signature, AgentKeypair};

/// Encoding version stamped into every signed delegation.
pub const DELEGATION_VERSION: u8 = 1;

/// An ability plus the resource it applies to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capability {
    /// Opaque ability string, e.g. `agent/read`.
    pub can: String,
    /// Resource the ability is granted over. By convention the issuer's DID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub with: Option<String>,
}

impl Capability {
    pub fn new(can: impl Into<String>) -> Self {
        Self {
            can: can.into(),
            with: None,
        }
    }

    pub fn on(mut self, resource: impl Into<String>) -> Self {
        self.with = Some(resource.into());
        self
    }
}

/// A signed, immutable grant of one capability from issuer to audience.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Delegation {
    pub(crate) issuer: Did,
    pub(crate) audience: Did,
    pub(crate) capability: Capability,
    pub(crate) expiration: Timestamp,
    pub(crate) signature: Signature,
}

/// Outcome of [`Delegation::verify`]. Denial is a value, not an error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl Verification {
    pub fn granted() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    pub fn denied(reason: DenialReason) -> Self {
        Self {
            valid: false,
            reason: Some(reason),
        }
    }

    /// Convert into a `Result` for callers that propagate with `?`.
    pub fn into_result(self) -> Result<(), AgentDbError> {
        match self.reason {
            Some(reason) if !self.valid => Err(AgentDbError::AuthDenied(reason)),
            None if !self.valid => Err(AgentDbError::AuthDenied(DenialReason::SignatureInvalid)),
            _ => Ok(()),
        }
    }
}

impl Delegation {
    /// Issue a delegation over the issuer's own resources, valid for `ttl_hours` from now.
    pub fn issue(
        issuer: &AgentKeypair,
        audience: &Did,
        can: &str,
        ttl_hours: f64,
    ) -> Result<Self, AgentDbError> {
        let capability = Capability::new(can).on(issuer.did().to_string());
        Self::issue_at(issuer, audience, capability, ttl_hours, agentdb_types::now())
    }

    /// Issue with an explicit capability and issue time.
    pub fn issue_at(
        issuer: &AgentKeypair,
        audience: &Did,
        capability: Capability,
        ttl_hours: f64,
        issued_at: Timestamp,
    ) -> Result<Self, AgentDbError> {
        if !ttl_hours.is_finite() || ttl_hours <= 0.0 {
            return Err(AgentDbError::Validation(format!(
                "ttl_hours must be a positive number, got {ttl_hours}"
            )));
        }
        if capability.can.is_empty() {
            return Err(AgentDbError::Validation("capability must not be empty".into()));
        }
        // Float-to-int casts saturate, so absurd TTLs clamp instead of wrapping.
        let ttl_secs = (ttl_hours * 3600.0).ceil() as i64;
        let expiration = issued_at.saturating_add(ttl_secs);
        let issuer_did = issuer.did();

        let signable = signable_content(&issuer_did, audience, &capability, expiration);
        let signature = issuer.sign(signable.as_bytes());

        Ok(Self {
            issuer: issuer_did,
            audience: audience.clone(),
            capability,
            expiration,
            signature,
        })
    }

    /// Check, in order: issuer, capability, expiry, signature. Stops at the first failure.
    ///
    /// Needs nothing but the token itself; the issuer key is recovered from its DID.
    pub fn verify(
        &self,
        expected_issuer: &Did,
        expected_capability: &str,
        now: Timestamp,
    ) -> Verification {
        if &self.issuer != expected_issuer {
            return Verification::denied(DenialReason::IssuerMismatch);
        }
        if self.capability.can != expected_capability {
            return Verification::denied(DenialReason::CapabilityMismatch);
        }
        if now >= self.expiration {
            return Verification::denied(DenialReason::Expired);
        }
        if self.check_signature().is_err() {
            return Verification::denied(DenialReason::SignatureInvalid);
        }
        Verification::granted()
    }

    fn check_signature(&self) -> Result<(), AgentDbError> {
        let public_key = public_key_from_did(&self.issuer)?;
        let signable =
            signable_content(&self.issuer, &self.audience, &self.capability, self.expiration);
        verify_signature(&public_key, signable.as_bytes(), &self.signature)
    }

    /// Content address of the canonical encoding; doubles as the token id.
    pub fn content_address(&self) -> Cid {
        Cid::for_bytes(&self.to_bytes())
    }

    pub fn issuer(&self) -> &Did {
        &self.issuer
    }

    pub fn audience(&self) -> &Did {
        &self.audience
    }

    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    pub fn expiration(&self) -> Timestamp {
        self.expiration
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }
}

/// Canonical bytes the issuer signs. Key order is fixed by canonicalization.
pub(crate) fn signable_content(
    issuer: &Did,
    audience: &Did,
    capability: &Capability,
    expiration: Timestamp,
) -> String {
    let mut value = json!({
        "v": DELEGATION_VERSION,
        "iss": issuer.as_str(),
        "aud": audience.as_str(),
        "can": capability.can.as_str(),
        "exp": expiration,
    });
    if let Some(with) = &capability.with {
        value["with"] = json!(with);
    }
    canonicalize(&value)
}
