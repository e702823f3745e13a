//! Password hashing, signed session tokens and the auth cookie.
//!
//! Tokens have the form `v1.<payload>.<signature>`, where the payload is base64url JSON and the
//! signature is an HMAC-SHA256 of the payload part, keyed with the server secret.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{debug, warn};

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const AUTH_COOKIE: &str = "auth_token";
pub const TOKEN_TTL_SECS: i64 = 60 * 60 * 24 * 7;
const TOKEN_VERSION: &str = "v1";
const MAX_TOKEN_LEN: usize = 2048;

/// Claims carried by a session token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenPayload {
    pub user_id: i32,
    pub username: String,
    pub iat: i64,
    pub exp: i64,
}

pub fn hash_password(password: &str) -> Result<String, AppError> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill_bytes(&mut salt_bytes);
    let salt =
        SaltString::encode_b64(&salt_bytes).map_err(|e| AppError::Hashing(e.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| AppError::Hashing(e.to_string()))
}

/// Checks a password against a stored hash. A malformed hash never matches.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            warn!("Stored password hash is malformed: {e}");
            false
        }
    }
}

pub fn issue_token(user_id: i32, username: &str, secret: &[u8]) -> Result<String, AppError> {
    issue_token_at(user_id, username, secret, Utc::now())
}

pub fn issue_token_at(
    user_id: i32,
    username: &str,
    secret: &[u8],
    issued_at: DateTime<Utc>,
) -> Result<String, AppError> {
    let iat = issued_at.timestamp();
    let payload = TokenPayload {
        user_id,
        username: username.to_string(),
        iat,
        exp: iat + TOKEN_TTL_SECS,
    };

    let payload_bytes =
        serde_json::to_vec(&payload).map_err(|e| AppError::Signing(e.to_string()))?;
    let payload_part = URL_SAFE_NO_PAD.encode(payload_bytes);
    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|e| AppError::Signing(e.to_string()))?;
    mac.update(payload_part.as_bytes());
    let sig_part = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    Ok(format!("{TOKEN_VERSION}.{payload_part}.{sig_part}"))
}

/// Returns the token's claims, or `None` if it is malformed, forged or expired.
pub fn verify_token(token: &str, secret: &[u8]) -> Option<TokenPayload> {
    verify_token_at(token, secret, Utc::now())
}

pub fn verify_token_at(token: &str, secret: &[u8], now: DateTime<Utc>) -> Option<TokenPayload> {
    match decode_token(token, secret) {
        Ok(payload) if payload.exp > now.timestamp() => Some(payload),
        Ok(payload) => {
            debug!(user_id = payload.user_id, "rejected expired token");
            None
        }
        Err(reason) => {
            debug!("rejected token: {reason}");
            None
        }
    }
}

fn decode_token(token: &str, secret: &[u8]) -> Result<TokenPayload, &'static str> {
    if token.len() > MAX_TOKEN_LEN {
        return Err("token exceeds max length");
    }
    let parts: Vec<&str> = token.split('.').collect();
    let (payload_part, sig_part) = match parts.as_slice() {
        [version, payload, sig] if *version == TOKEN_VERSION => (*payload, *sig),
        [_, _, _] => return Err("unsupported token version"),
        _ => return Err("invalid token format"),
    };

    let mut mac = HmacSha256::new_from_slice(secret).map_err(|_| "invalid secret")?;
    mac.update(payload_part.as_bytes());
    let signature = URL_SAFE_NO_PAD
        .decode(sig_part)
        .map_err(|_| "invalid signature encoding")?;
    mac.verify_slice(&signature)
        .map_err(|_| "signature mismatch")?;

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload_part)
        .map_err(|_| "invalid payload encoding")?;
    serde_json::from_slice(&payload_bytes).map_err(|_| "invalid payload")
}

/// Pulls the session token from the auth cookie, falling back to an `Authorization: Bearer`
/// header.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    let cookie_prefix = format!("{AUTH_COOKIE}=");
    let from_cookie = headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .map(str::trim)
        .find_map(|cookie| cookie.strip_prefix(cookie_prefix.as_str()))
        .filter(|value| !value.is_empty())
        .map(str::to_string);
    if from_cookie.is_some() {
        return from_cookie;
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// The authenticated caller, if the request carries a valid session token.
pub fn current_user(headers: &HeaderMap, secret: &[u8]) -> Option<TokenPayload> {
    token_from_headers(headers).and_then(|token| verify_token(&token, secret))
}

pub fn auth_cookie(token: &str, secure: bool) -> String {
    format!(
        "{AUTH_COOKIE}={token}; Max-Age={TOKEN_TTL_SECS}; Path=/; HttpOnly; SameSite=Strict{}",
        if secure { "; Secure" } else { "" }
    )
}

pub fn clear_auth_cookie(secure: bool) -> String {
    format!(
        "{AUTH_COOKIE}=; Max-Age=0; Path=/; HttpOnly; SameSite=Strict{}",
        if secure { "; Secure" } else { "" }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use chrono::Duration;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn test_password_roundtrip() {
        let hash = hash_password("correct horse").expect("hash");
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("correct horse ", &hash));
        assert!(!verify_password("", &hash));
    }

    #[test]
    fn test_hashes_are_salted() {
        let a = hash_password("same").expect("hash");
        let b = hash_password("same").expect("hash");
        assert_ne!(a, b);
    }

    #[test]
    fn test_malformed_hash_never_matches() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn test_token_roundtrip() {
        let token = issue_token(7, "mika", SECRET).expect("token");
        let payload = verify_token(&token, SECRET).expect("valid token");
        assert_eq!(payload.user_id, 7);
        assert_eq!(payload.username, "mika");
        assert_eq!(payload.exp - payload.iat, TOKEN_TTL_SECS);
    }

    #[test]
    fn test_token_rejects_wrong_secret() {
        let token = issue_token(7, "mika", SECRET).expect("token");
        assert!(verify_token(&token, b"other-secret").is_none());
    }

    #[test]
    fn test_token_rejects_tampering() {
        let token = issue_token(7, "mika", SECRET).expect("token");
        let parts: Vec<&str> = token.split('.').collect();

        // Swap in a payload for a different user, keeping the old signature.
        let forged_payload = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&TokenPayload {
                user_id: 1,
                username: "admin".to_string(),
                iat: 0,
                exp: i64::MAX,
            })
            .expect("json"),
        );
        let forged = format!("{}.{}.{}", parts[0], forged_payload, parts[2]);
        assert!(verify_token(&forged, SECRET).is_none());

        let mut bad_sig = token.clone();
        bad_sig.push('A');
        assert!(verify_token(&bad_sig, SECRET).is_none());
    }

    #[test]
    fn test_token_expiry() {
        let issued = Utc::now() - Duration::days(8);
        let token = issue_token_at(7, "mika", SECRET, issued).expect("token");
        assert!(verify_token(&token, SECRET).is_none());

        let issued = Utc::now() - Duration::days(6);
        let token = issue_token_at(7, "mika", SECRET, issued).expect("token");
        assert!(verify_token(&token, SECRET).is_some());
    }

    #[test]
    fn test_token_rejects_garbage() {
        for token in ["", "abc", "v1.abc", "v2.a.b", "v1.!!!.???", "a.b.c.d"] {
            assert!(verify_token(token, SECRET).is_none(), "{token}");
        }
    }

    #[test]
    fn test_token_from_cookie_then_bearer() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer from-header"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-header"));

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; auth_token=from-cookie"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("from-cookie"));
    }

    #[test]
    fn test_current_user() {
        let token = issue_token(3, "rin", SECRET).expect("token");
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&format!("auth_token={token}")).expect("header"),
        );
        let user = current_user(&headers, SECRET).expect("authenticated");
        assert_eq!(user.user_id, 3);
        assert!(current_user(&headers, b"wrong").is_none());
    }

    #[test]
    fn test_cookie_attributes() {
        let cookie = auth_cookie("tok", false);
        assert!(cookie.starts_with("auth_token=tok;"));
        assert!(cookie.contains("Max-Age=604800"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("SameSite=Strict"));
        assert!(cookie.contains("Path=/"));
        assert!(!cookie.contains("Secure"));
        assert!(auth_cookie("tok", true).ends_with("; Secure"));

        let cleared = clear_auth_cookie(false);
        assert!(cleared.starts_with("auth_token=;"));
        assert!(cleared.contains("Max-Age=0"));
    }
}
