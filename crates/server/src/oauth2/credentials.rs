//! Credential Generator.
//!
//! Client secrets, authorization codes and refresh tokens must be unguessable
//! and come from the OS CSPRNG. Access tokens and client ids only need to be
//! unique, so they are UUID v4 values.

use base64::Engine;
use sha2::{Digest, Sha256};

/// Number of random bytes behind every secret value.
pub const SECRET_BYTES: usize = 32;

/// Generate a secret value: 32 bytes of OS randomness, base64url without padding.
///
/// A failing randomness source is returned to the caller, which must abort.
pub fn generate_secret() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; SECRET_BYTES];
    getrandom::fill(&mut bytes)?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes))
}

pub fn generate_access_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

pub fn generate_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Compare a presented secret with the stored one by SHA-256 digest, so the
/// comparison time does not depend on a common prefix.
pub fn secrets_match(presented: &str, expected: &str) -> bool {
    Sha256::digest(presented.as_bytes()) == Sha256::digest(expected.as_bytes())
}
