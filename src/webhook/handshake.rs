//! Subscription-verification handshake.
//!
//! The provider calls `GET /webhook?hub.mode=subscribe&hub.verify_token=..&hub.challenge=..`
//! before activating delivery; we echo the challenge only when the token matches.

/// Outcome of a verification attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    /// Echo this challenge back verbatim with a success status.
    Verified(String),
    /// Answer with a forbidden status and no body.
    Rejected,
}

/// Check a verification request against the configured token.
///
/// An empty `expected_token` (relay not configured) rejects everything.
pub fn verify(mode: &str, token: &str, challenge: &str, expected_token: &str) -> Verification {
    if expected_token.is_empty() {
        return Verification::Rejected;
    }
    if mode == "subscribe" && token == expected_token {
        Verification::Verified(challenge.to_string())
    } else {
        Verification::Rejected
    }
}
