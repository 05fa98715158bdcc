use agentdb_identity::{
    multicodec_public_key, public_key_from_multicodec, verify_signature, AgentKeypair,
};
use agentdb_types::{AgentDbError, Cid, NameId};
use ed25519_dalek::Signature;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Signing key that authenticates pointer updates for one mutable stream.
///
/// Distinct from the agent's identity key; never leaves the process.
#[derive(Clone)]
pub struct StreamName {
    keypair: AgentKeypair,
}

impl StreamName {
    /// Fresh random name.
    pub fn generate() -> Self {
        Self {
            keypair: AgentKeypair::generate(),
        }
    }

    /// Deterministic name, so a restarted agent can keep publishing under it.
    pub fn from_seed(seed: &[u8]) -> Self {
        Self {
            keypair: AgentKeypair::from_seed(seed),
        }
    }

    /// Stable identifier resolvers look the stream up by.
    pub fn id(&self) -> NameId {
        NameId::from_key_bytes(&multicodec_public_key(&self.keypair.public_key_bytes()))
    }

    /// Sign a revision pointing at `cid`.
    pub fn sign_revision(&self, sequence: u64, points_to: Cid) -> Revision {
        let signable = Revision::signable_content(sequence, &points_to);
        let signature = self.keypair.sign(signable.as_bytes());
        Revision {
            name: self.id(),
            sequence,
            points_to,
            signature: hex::encode(signature.to_bytes()),
        }
    }
}

impl fmt::Debug for StreamName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamName")
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}

/// One signed pointer record. Sequence numbers strictly increase per name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Revision {
    pub name: NameId,
    pub sequence: u64,
    pub points_to: Cid,
    /// Hex-encoded Ed25519 signature over `(sequence, points_to)`.
    pub signature: String,
}

impl Revision {
    /// Check the signature against the key encoded in `name`.
    pub fn verify(&self) -> Result<(), AgentDbError> {
        let public_key = public_key_from_name(&self.name)?;
        let sig_bytes: [u8; 64] = hex::decode(&self.signature)
            .map_err(|_| AgentDbError::Validation("revision signature is not hex".into()))?
            .try_into()
            .map_err(|_| AgentDbError::Validation("revision signature must be 64 bytes".into()))?;
        let signable = Self::signable_content(self.sequence, &self.points_to);
        verify_signature(
            &public_key,
            signable.as_bytes(),
            &Signature::from_bytes(&sig_bytes),
        )
    }

    fn signable_content(sequence: u64, points_to: &Cid) -> String {
        format!("revision:{sequence}:{points_to}")
    }
}

/// Recover the verifying key a stream name was derived from.
pub fn public_key_from_name(name: &NameId) -> Result<[u8; 32], AgentDbError> {
    public_key_from_multicodec(&name.key_bytes())
        .ok_or_else(|| AgentDbError::Validation(format!("stream name {name} is not an Ed25519 key")))
}
