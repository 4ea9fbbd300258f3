use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{self, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwtClaims {
    /// User id.
    pub sub: String,
    pub email: String,
    /// Session id; every token is backed by one server-side session row.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token: {0}")]
    Decode(String),
    #[error("encoding failed: {0}")]
    Encode(String),
}

/// Reads the claims without checking the signature. Clients use this to find
/// out when their token expires; the server never trusts it.
pub fn decode_unverified(token: &str) -> Result<JwtClaims, JwtError> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() < 2 {
        return Err(JwtError::Decode("invalid JWT format".into()));
    }
    let payload_b64 = parts[1];
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_b64)
        .map_err(|e| JwtError::Decode(format!("invalid base64 payload: {e}")))?;
    serde_json::from_slice::<JwtClaims>(&payload_bytes)
        .map_err(|e| JwtError::Decode(format!("invalid json payload: {e}")))
}

pub fn decode_and_verify(token: &str, secret: &[u8]) -> Result<JwtClaims, JwtError> {
    let key = DecodingKey::from_secret(secret);
    let validation = Validation::new(Algorithm::HS256);
    jsonwebtoken::decode::<JwtClaims>(token, &key, &validation)
        .map(|data| data.claims)
        .map_err(|e| JwtError::Decode(e.to_string()))
}

pub fn encode(claims: &JwtClaims, secret: &[u8]) -> Result<String, JwtError> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret),
    )
    .map_err(|e| JwtError::Encode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(exp: i64) -> JwtClaims {
        JwtClaims {
            sub: "user-1".into(),
            email: "mom@example.com".into(),
            jti: "session-1".into(),
            iat: 0,
            exp,
        }
    }

    fn far_future() -> i64 {
        // 2100-01-01
        4_102_444_800
    }

    #[test]
    fn verified_decode_returns_the_signed_claims() {
        let token = encode(&claims(far_future()), b"secret").unwrap();
        let decoded = decode_and_verify(&token, b"secret").unwrap();
        assert_eq!(decoded, claims(far_future()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = encode(&claims(far_future()), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"other").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = encode(&claims(1_000), b"secret").unwrap();
        assert!(decode_and_verify(&token, b"secret").is_err());
        // Unverified decoding still reads it.
        assert_eq!(decode_unverified(&token).unwrap().exp, 1_000);
    }

    #[test]
    fn garbage_is_not_a_token() {
        assert!(decode_unverified("not-a-jwt").is_err());
        assert!(decode_unverified("a.!!!.c").is_err());
    }
}
