use agentdb_types::{AgentDbError, DenialReason, Did};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};
use std::fmt;

/// Multicodec prefix for an Ed25519 public key (varint 0xed).
const ED25519_PUB_MULTICODEC: [u8; 2] = [0xed, 0x01];

/// An agent's Ed25519 identity keypair.
#[derive(Clone)]
pub struct AgentKeypair {
    signing_key: SigningKey,
}

impl AgentKeypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        let mut csprng = rand::thread_rng();
        let signing_key = SigningKey::generate(&mut csprng);
        Self { signing_key }
    }

    /// Deterministically derive a keypair from a seed. Same seed, same DID.
    pub fn from_seed(seed: &[u8]) -> Self {
        let secret: [u8; 32] = Sha256::digest(seed).into();
        Self::from_bytes(&secret)
    }

    /// Restore from raw secret key bytes.
    pub fn from_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        Self { signing_key }
    }

    /// Raw secret key bytes.
    pub fn secret_bytes(&self) -> &[u8; 32] {
        self.signing_key.as_bytes()
    }

    /// Ed25519 public key bytes.
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    /// The Ed25519 verifying (public) key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// `did:key` identifier of the public key.
    pub fn did(&self) -> Did {
        did_from_public_key(&self.public_key_bytes())
    }

    /// Sign arbitrary bytes.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Verify a signature against this keypair's public key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key().verify(message, signature).is_ok()
    }
}

impl fmt::Debug for AgentKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AgentKeypair")
            .field("did", &self.did())
            .finish_non_exhaustive()
    }
}

/// `0xed 0x01 || key`: an Ed25519 public key tagged with its multicodec.
pub fn multicodec_public_key(public_key: &[u8; 32]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ED25519_PUB_MULTICODEC.len() + public_key.len());
    buf.extend_from_slice(&ED25519_PUB_MULTICODEC);
    buf.extend_from_slice(public_key);
    buf
}

/// Inverse of [`multicodec_public_key`]. `None` unless `bytes` is exactly a
/// tagged Ed25519 key.
pub fn public_key_from_multicodec(bytes: &[u8]) -> Option<[u8; 32]> {
    bytes
        .strip_prefix(&ED25519_PUB_MULTICODEC[..])
        .and_then(|key| key.try_into().ok())
}

/// Encode an Ed25519 public key as `did:key:z<base58btc(multicodec || key)>`.
pub fn did_from_public_key(public_key: &[u8; 32]) -> Did {
    let encoded = bs58::encode(multicodec_public_key(public_key)).into_string();
    Did::key(&format!("z{encoded}"))
}

/// Recover the Ed25519 public key a `did:key` was derived from.
pub fn public_key_from_did(did: &Did) -> Result<[u8; 32], AgentDbError> {
    if did.method() != "key" {
        return Err(AgentDbError::Validation(format!(
            "unsupported DID method: {}",
            did.method()
        )));
    }
    let encoded = did
        .method_specific_id()
        .strip_prefix('z')
        .ok_or_else(|| AgentDbError::Validation("did:key must use base58btc multibase".into()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|e| AgentDbError::Validation(format!("did:key is not base58: {e}")))?;
    public_key_from_multicodec(&bytes)
        .ok_or_else(|| AgentDbError::Validation("did:key is not a 32-byte Ed25519 key".into()))
}

/// Verify a signature given a public key, message, and signature.
pub fn verify_signature(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &Signature,
) -> Result<(), AgentDbError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|_| AgentDbError::AuthDenied(DenialReason::SignatureInvalid))?;
    verifying_key
        .verify(message, signature)
        .map_err(|_| AgentDbError::AuthDenied(DenialReason::SignatureInvalid))
}
