//! PKCE (RFC 7636) verifier/challenge generation.
//!
//! Each login attempt gets a fresh [`PkceAttempt`]: a high-entropy code
//! verifier, its S256 challenge, and an independent anti-CSRF state token.
//! Attempts are never persisted or reused, and their secrets are wiped on drop.

use std::fmt;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use vouchersnap_common::{Error, Result};

/// Only S256 is ever sent; `plain` is not supported.
pub const CHALLENGE_METHOD: &str = "S256";

/// Random bytes behind the verifier (86 base64url characters).
const VERIFIER_BYTES: usize = 64;
/// Random bytes behind the state token (43 base64url characters).
const STATE_BYTES: usize = 32;

/// Verifier, challenge and state for one authorization attempt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct PkceAttempt {
    code_verifier: String,
    code_challenge: String,
    state: String,
}

impl PkceAttempt {
    /// Generate a new attempt from the operating system CSPRNG.
    ///
    /// # Errors
    /// - The random source is unavailable
    pub fn new() -> Result<Self> {
        let code_verifier = random_token(VERIFIER_BYTES)?;
        let state = random_token(STATE_BYTES)?;
        let code_challenge = challenge_for(&code_verifier);

        Ok(Self {
            code_verifier,
            code_challenge,
            state,
        })
    }

    /// The secret verifier, presented only to the token endpoint.
    pub fn code_verifier(&self) -> &str {
        &self.code_verifier
    }

    /// The public challenge sent with the authorization request.
    pub fn code_challenge(&self) -> &str {
        &self.code_challenge
    }

    /// Anti-CSRF state echoed back by the authorization server.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Compare a returned state with ours without short-circuiting.
    pub fn state_matches(&self, returned: &str) -> bool {
        self.state.as_bytes().ct_eq(returned.as_bytes()).into()
    }
}

impl fmt::Debug for PkceAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PkceAttempt")
            .field("code_verifier", &"[REDACTED]")
            .field("code_challenge", &self.code_challenge)
            .field("state", &"[REDACTED]")
            .finish()
    }
}

/// Create a fresh attempt.
pub fn new_attempt() -> Result<PkceAttempt> {
    PkceAttempt::new()
}

/// Derive the S256 challenge: BASE64URL-NOPAD(SHA256(verifier)).
pub fn challenge_for(code_verifier: &str) -> String {
    let digest = Sha256::digest(code_verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(digest)
}

fn random_token(len: usize) -> Result<String> {
    let mut bytes = vec![0u8; len];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| Error::Random(e.to_string()))?;
    let token = URL_SAFE_NO_PAD.encode(&bytes);
    bytes.zeroize();
    Ok(token)
}
