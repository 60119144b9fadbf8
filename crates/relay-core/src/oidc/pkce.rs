//! PKCE verifier/challenge generation for the authorization code flow.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::config::PkceMethod;

/// PKCE code verifier and challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pkce {
    pub verifier: String,
    pub challenge: String,
    pub method: PkceMethod,
}

impl Pkce {
    /// Generate a fresh verifier and its S256 challenge.
    pub fn generate(method: PkceMethod) -> Self {
        // Two v4 UUIDs give 32 random bytes
        let uuid1 = uuid::Uuid::new_v4();
        let uuid2 = uuid::Uuid::new_v4();
        let mut verifier_bytes = [0u8; 32];
        verifier_bytes[..16].copy_from_slice(uuid1.as_bytes());
        verifier_bytes[16..].copy_from_slice(uuid2.as_bytes());
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);

        let challenge = match method {
            PkceMethod::S256 => code_challenge_s256(&verifier),
        };

        Self {
            verifier,
            challenge,
            method,
        }
    }
}

pub fn code_challenge_s256(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}
