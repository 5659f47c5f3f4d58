//! Bearer token verification.
//!
//! Tokens are compact JWS structures (`header.payload.signature`) signed with
//! HMAC-SHA256 over a shared secret. Verification is deliberately strict and
//! ordered so no claim is ever trusted before the signature checks out:
//!
//! 1. **Structure**: exactly three non-empty dot-separated segments.
//! 2. **Algorithm**: the header must declare `HS256` — any other value is
//!    rejected outright, which closes the classic algorithm-confusion hole
//!    (`alg: none`, RS256/HS256 swaps).
//! 3. **Signature**: recomputed over the encoded `header.payload` bytes and
//!    compared in constant time (`subtle`); length mismatches are mismatches.
//! 4. **Claims**: the payload must decode to an object with a non-empty
//!    `sub`. A `role` of exactly `"admin"` grants the admin role; anything
//!    else — including an absent claim — degrades to the plain user role.
//! 5. **Expiry**: an `exp` claim in the past rejects the token.
//!
//! Callers render every [`TokenError`] as the same generic 401; the precise
//! variant is only ever logged server-side.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// The only signing algorithm this gateway accepts.
pub const ALLOWED_ALGORITHM: &str = "HS256";

/// Why a token failed verification. Never exposed to clients.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenError {
    /// Not three non-empty dot-separated segments, or undecodable segments.
    #[error("malformed token structure")]
    Malformed,

    /// Header declares an algorithm other than HS256.
    #[error("unsupported signing algorithm")]
    UnsupportedAlgorithm,

    /// Signature does not match the header and payload.
    #[error("invalid signature")]
    InvalidSignature,

    /// Payload is not an object with a non-empty `sub` claim.
    #[error("missing subject claim")]
    MissingSubject,

    /// The `exp` claim is in the past.
    #[error("token expired")]
    Expired,
}

/// Caller role derived from the verified token.
///
/// The closed set keeps downstream authorization decisions out of
/// string-comparison territory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Admin,
    User,
}

impl Role {
    /// Wire representation, as injected into `x-user-role`.
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity extracted from a cryptographically verified token.
///
/// Instances only ever exist after [`verify`] succeeded; the proxy forwarder
/// is the sole component that turns one into upstream headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedIdentity {
    /// Opaque, non-empty subject identifier.
    pub subject: String,
    /// Caller role; defaults to [`Role::User`] unless the claim is exactly
    /// `"admin"`.
    pub role: Role,
    /// Optional display claim, forwarded when present.
    pub email: Option<String>,
}

#[derive(Deserialize)]
struct Header {
    #[serde(default)]
    alg: Option<String>,
}

#[derive(Deserialize)]
struct Claims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    role: Option<String>,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

/// Verify a bearer token against the shared secret.
///
/// # Errors
///
/// Returns the precise [`TokenError`] for server-side logging; callers must
/// collapse all variants into one generic 401 for the wire.
pub fn verify(token: &str, secret: &[u8]) -> Result<AuthenticatedIdentity, TokenError> {
    let segments: Vec<&str> = token.split('.').collect();
    let (header_b64, payload_b64, signature_b64) = match segments.as_slice() {
        [h, p, s] if !h.is_empty() && !p.is_empty() && !s.is_empty() => (*h, *p, *s),
        _ => return Err(TokenError::Malformed),
    };

    // Algorithm allow-list comes before any signature work.
    let header_bytes = URL_SAFE_NO_PAD
        .decode(header_b64)
        .map_err(|_| TokenError::Malformed)?;
    let header: Header = serde_json::from_slice(&header_bytes).map_err(|_| TokenError::Malformed)?;
    if header.alg.as_deref() != Some(ALLOWED_ALGORITHM) {
        return Err(TokenError::UnsupportedAlgorithm);
    }

    // Recompute the signature over the encoded `header.payload` bytes and
    // compare in constant time. Claims are untouched until this passes.
    let provided = URL_SAFE_NO_PAD
        .decode(signature_b64)
        .map_err(|_| TokenError::InvalidSignature)?;
    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| TokenError::InvalidSignature)?;
    mac.update(header_b64.as_bytes());
    mac.update(b".");
    mac.update(payload_b64.as_bytes());
    let expected = mac.finalize().into_bytes();

    // `ct_eq` treats differing lengths as a mismatch without early exit.
    if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
        return Err(TokenError::InvalidSignature);
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|_| TokenError::Malformed)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::MissingSubject)?;

    let subject = match claims.sub {
        Some(sub) if !sub.is_empty() => sub,
        _ => return Err(TokenError::MissingSubject),
    };

    if let Some(exp) = claims.exp
        && exp <= chrono::Utc::now().timestamp()
    {
        return Err(TokenError::Expired);
    }

    // Safe default: only the exact string "admin" elevates.
    let role = match claims.role.as_deref() {
        Some("admin") => Role::Admin,
        _ => Role::User,
    };

    Ok(AuthenticatedIdentity {
        subject,
        role,
        email: claims.email,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"unit-test-secret";

    fn encode(value: &serde_json::Value) -> String {
        URL_SAFE_NO_PAD.encode(serde_json::to_vec(value).unwrap())
    }

    fn sign(signing_input: &str, secret: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(signing_input.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }

    fn make_token(header: &serde_json::Value, claims: &serde_json::Value, secret: &[u8]) -> String {
        let signing_input = format!("{}.{}", encode(header), encode(claims));
        let signature = sign(&signing_input, secret);
        format!("{signing_input}.{signature}")
    }

    fn hs256_header() -> serde_json::Value {
        serde_json::json!({"alg": "HS256", "typ": "JWT"})
    }

    #[test]
    fn test_valid_token_extracts_identity() {
        let token = make_token(
            &hs256_header(),
            &serde_json::json!({"sub": "user-42", "role": "admin", "email": "a@example.com"}),
            SECRET,
        );

        let identity = verify(&token, SECRET).unwrap();
        assert_eq!(identity.subject, "user-42");
        assert_eq!(identity.role, Role::Admin);
        assert_eq!(identity.email.as_deref(), Some("a@example.com"));
    }

    #[test]
    fn test_role_defaults_to_user() {
        let token = make_token(&hs256_header(), &serde_json::json!({"sub": "u1"}), SECRET);
        assert_eq!(verify(&token, SECRET).unwrap().role, Role::User);

        // Any non-"admin" role string degrades too, never escalates.
        let token = make_token(
            &hs256_header(),
            &serde_json::json!({"sub": "u1", "role": "Administrator"}),
            SECRET,
        );
        assert_eq!(verify(&token, SECRET).unwrap().role, Role::User);
    }

    #[test]
    fn test_wrong_segment_count_is_malformed() {
        assert_eq!(verify("a.b", SECRET), Err(TokenError::Malformed));
        assert_eq!(verify("a.b.c.d", SECRET), Err(TokenError::Malformed));
        assert_eq!(verify("..", SECRET), Err(TokenError::Malformed));
        assert_eq!(verify("", SECRET), Err(TokenError::Malformed));
    }

    #[test]
    fn test_algorithm_confusion_is_rejected() {
        let token = make_token(
            &serde_json::json!({"alg": "none"}),
            &serde_json::json!({"sub": "u1"}),
            SECRET,
        );
        assert_eq!(verify(&token, SECRET), Err(TokenError::UnsupportedAlgorithm));

        let token = make_token(
            &serde_json::json!({"alg": "HS512"}),
            &serde_json::json!({"sub": "u1"}),
            SECRET,
        );
        assert_eq!(verify(&token, SECRET), Err(TokenError::UnsupportedAlgorithm));

        let token = make_token(
            &serde_json::json!({"typ": "JWT"}),
            &serde_json::json!({"sub": "u1"}),
            SECRET,
        );
        assert_eq!(verify(&token, SECRET), Err(TokenError::UnsupportedAlgorithm));
    }

    #[test]
    fn test_tampered_signature_byte_is_rejected() {
        let token = make_token(&hs256_header(), &serde_json::json!({"sub": "u1"}), SECRET);

        // Flip one character of the signature segment.
        let mut chars: Vec<char> = token.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == 'A' { 'B' } else { 'A' };
        let tampered: String = chars.into_iter().collect();

        assert_eq!(verify(&tampered, SECRET), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_wrong_secret_is_rejected() {
        let token = make_token(&hs256_header(), &serde_json::json!({"sub": "u1"}), SECRET);
        assert_eq!(
            verify(&token, b"a-different-secret"),
            Err(TokenError::InvalidSignature)
        );
    }

    #[test]
    fn test_signature_checked_before_claims() {
        // Payload is valid JSON but has no subject; with a bad signature the
        // verifier must report the signature problem, proving claims are
        // never inspected first.
        let token = make_token(&hs256_header(), &serde_json::json!({}), b"other-secret");
        assert_eq!(verify(&token, SECRET), Err(TokenError::InvalidSignature));
    }

    #[test]
    fn test_missing_or_empty_subject() {
        let token = make_token(&hs256_header(), &serde_json::json!({"role": "admin"}), SECRET);
        assert_eq!(verify(&token, SECRET), Err(TokenError::MissingSubject));

        let token = make_token(&hs256_header(), &serde_json::json!({"sub": ""}), SECRET);
        assert_eq!(verify(&token, SECRET), Err(TokenError::MissingSubject));
    }

    #[test]
    fn test_non_object_payload_is_rejected() {
        let header = encode(&hs256_header());
        let payload = URL_SAFE_NO_PAD.encode(b"\"just a string\"");
        let signing_input = format!("{header}.{payload}");
        let signature = sign(&signing_input, SECRET);
        let token = format!("{signing_input}.{signature}");

        assert_eq!(verify(&token, SECRET), Err(TokenError::MissingSubject));
    }

    #[test]
    fn test_expired_token_is_rejected() {
        let past = chrono::Utc::now().timestamp() - 60;
        let token = make_token(
            &hs256_header(),
            &serde_json::json!({"sub": "u1", "exp": past}),
            SECRET,
        );
        assert_eq!(verify(&token, SECRET), Err(TokenError::Expired));
    }

    #[test]
    fn test_future_expiry_is_accepted() {
        let future = chrono::Utc::now().timestamp() + 3600;
        let token = make_token(
            &hs256_header(),
            &serde_json::json!({"sub": "u1", "exp": future}),
            SECRET,
        );
        assert!(verify(&token, SECRET).is_ok());
    }

    #[test]
    fn test_garbage_base64_segments() {
        // Header segment is not valid base64url.
        assert_eq!(
            verify("!!!.payload.signature", SECRET),
            Err(TokenError::Malformed)
        );
    }
}
