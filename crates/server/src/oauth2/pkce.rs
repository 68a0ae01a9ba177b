//! PKCE Verifier (RFC 7636).

use base64::Engine;
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Code challenge transformation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PkceMethod {
    Plain,
    S256,
}

impl PkceMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            PkceMethod::Plain => "plain",
            PkceMethod::S256 => "S256",
        }
    }
}

impl fmt::Display for PkceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PkceMethod {
    type Err = String;

    /// Method names are case-sensitive.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(PkceMethod::Plain),
            "S256" => Ok(PkceMethod::S256),
            other => Err(format!("unsupported code_challenge_method: {other}")),
        }
    }
}

/// Compute the S256 challenge for a verifier.
pub fn s256_challenge(verifier: &str) -> String {
    let digest = Sha256::digest(verifier.as_bytes());
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest)
}

/// Check a verifier against the stored challenge. An absent method means `plain`.
pub fn verify(challenge: &str, method: Option<PkceMethod>, verifier: &str) -> bool {
    match method.unwrap_or(PkceMethod::Plain) {
        PkceMethod::Plain => verifier.as_bytes() == challenge.as_bytes(),
        PkceMethod::S256 => s256_challenge(verifier) == challenge,
    }
}
