mod keypair;
pub mod delegation;
pub mod wire;

pub use keypair::{
    did_from_public_key, multicodec_public_key, public_key_from_did, public_key_from_multicodec,
    verify_signature, AgentKeypair,
};
pub use delegation::{Capability, Delegation, Verification};
