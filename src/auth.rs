use axum::http::HeaderMap;
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::Utc;
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::ApiError;

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    hash(password, DEFAULT_COST).map_err(|e| ApiError::Internal(e.to_string()))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    verify(password, hash).unwrap_or(false)
}

pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}

pub fn create_auth_token(conn: &Connection, user_id: &Uuid) -> Result<String, ApiError> {
    let token = generate_token();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO auth_tokens (token, user_id, created_at) VALUES (?, ?, ?)",
        params![token, user_id.to_string(), now.to_rfc3339()],
    )?;

    Ok(token)
}

pub fn verify_auth_token(conn: &Connection, token: &str) -> Result<Uuid, ApiError> {
    let user_id: Option<String> = conn
        .query_row(
            "SELECT user_id FROM auth_tokens WHERE token = ?",
            [token],
            |row| row.get(0),
        )
        .optional()?;

    match user_id {
        Some(raw) => Uuid::parse_str(&raw)
            .map_err(|_| ApiError::Internal("corrupt token record".to_string())),
        None => Err(ApiError::Unauthorized("invalid token".to_string())),
    }
}

/// Resolves the acting user from the Authorization header. Services receive
/// the returned id as an opaque actor identity.
pub fn authenticate(conn: &Connection, headers: &HeaderMap) -> Result<Uuid, ApiError> {
    let header = headers
        .get("Authorization")
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("missing token".to_string()))?;

    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    if token.is_empty() {
        return Err(ApiError::Unauthorized("missing token".to_string()));
    }

    verify_auth_token(conn, token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{signup, test_conn};

    #[test]
    fn password_round_trip() {
        let hashed = hash_password("hunter22hunter22").unwrap();
        assert!(verify_password("hunter22hunter22", &hashed));
        assert!(!verify_password("wrong password", &hashed));
    }

    // tokens reference users, so the fixture needs a real account
    #[test]
    fn token_round_trip() {
        let conn = test_conn();
        let user = signup(&conn, "ana", "ana@mail.com");
        let token = create_auth_token(&conn, &user.id).unwrap();
        assert_eq!(verify_auth_token(&conn, &token).unwrap(), user.id);
    }

    #[test]
    fn unknown_token_is_unauthorized() {
        let conn = test_conn();
        let err = verify_auth_token(&conn, "nope").unwrap_err();
        assert_eq!(err, ApiError::Unauthorized("invalid token".to_string()));
    }
}
