use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::{hash_password, verify_password};
use crate::config::{MIN_PASSWORD_LENGTH, PAGE_SIZE};
use crate::error::ApiError;
use crate::models::{Counters, User};
use crate::pagination::{clamp_page, offset, Page};
use crate::validate::{clean_field, is_valid_email, parse_id};

#[derive(Debug, Default, Deserialize)]
pub struct SignupInput {
    pub username: Option<String>,
    pub nick: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub bio: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginInput {
    pub email: Option<String>,
    pub password: Option<String>,
}

/// The only user fields a profile update may touch. Role, image and token
/// claims are not representable here, so a replayed token payload merged
/// into the body cannot escalate anything.
#[derive(Debug, Default, Deserialize)]
pub struct UpdateProfileInput {
    pub username: Option<String>,
    pub nick: Option<String>,
    pub bio: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

struct BasicInfo {
    username: String,
    nick: String,
    email: String,
    password: String,
    bio: String,
}

fn validate_basic_info(input: &SignupInput) -> Result<BasicInfo, ApiError> {
    let username = clean_field(&input.username)
        .ok_or_else(|| ApiError::BadRequest("the username is required".to_string()))?;
    let nick = clean_field(&input.nick)
        .ok_or_else(|| ApiError::BadRequest("the nick is required".to_string()))?;
    let email = clean_field(&input.email)
        .ok_or_else(|| ApiError::BadRequest("the email is required".to_string()))?;
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("the email is not valid".to_string()));
    }
    let password = clean_field(&input.password)
        .ok_or_else(|| ApiError::BadRequest("the password is required".to_string()))?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(ApiError::BadRequest(format!(
            "the password must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }

    Ok(BasicInfo {
        username,
        nick,
        email,
        password,
        bio: clean_field(&input.bio).unwrap_or_default(),
    })
}

/// Email is checked before username so collision messages are
/// deterministic when both fields clash at once.
pub fn ensure_unique(
    conn: &Connection,
    email: Option<&str>,
    username: Option<&str>,
    exclude: Option<&Uuid>,
) -> Result<(), ApiError> {
    let excluded = exclude.map(Uuid::to_string).unwrap_or_default();

    if let Some(email) = email {
        let email = email.to_lowercase();
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE email = ? AND id <> ?",
                params![email, excluded],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(ApiError::Conflict(format!(
                "the email {} is already registered",
                email
            )));
        }
    }

    if let Some(username) = username {
        let username = username.to_lowercase();
        let taken: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM users WHERE username = ? AND id <> ?",
                params![username, excluded],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(ApiError::Conflict(format!(
                "the username {} is already registered",
                username
            )));
        }
    }

    Ok(())
}

pub fn create_user(conn: &Connection, input: SignupInput) -> Result<User, ApiError> {
    let info = validate_basic_info(&input)?;
    let username = info.username.to_lowercase();
    let email = info.email.to_lowercase();

    ensure_unique(conn, Some(&email), Some(&username), None)?;

    let password_hash = hash_password(&info.password)?;
    let id = Uuid::new_v4();
    let now = Utc::now();

    // a racing duplicate insert trips the UNIQUE constraint -> Conflict
    let inserted = conn.execute(
        "INSERT INTO users (id, username, nick, bio, email, password_hash, role, image, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, 'user', 'default.png', ?, ?)",
        params![
            id.to_string(),
            username,
            info.nick,
            info.bio,
            email,
            password_hash,
            now.to_rfc3339(),
            now.to_rfc3339()
        ],
    )?;
    if inserted == 0 {
        return Err(ApiError::Internal("failed to register the user".to_string()));
    }

    Ok(User {
        id,
        username,
        nick: info.nick,
        bio: info.bio,
        email,
        password_hash,
        role: "user".to_string(),
        image: "default.png".to_string(),
        created_at: now,
        updated_at: now,
    })
}

pub fn verify_credentials(conn: &Connection, input: &LoginInput) -> Result<User, ApiError> {
    let email = clean_field(&input.email)
        .ok_or_else(|| ApiError::BadRequest("you have not entered the email".to_string()))?;
    if !is_valid_email(&email) {
        return Err(ApiError::BadRequest("the email is not valid".to_string()));
    }
    let password = clean_field(&input.password)
        .ok_or_else(|| ApiError::BadRequest("you have not entered the password".to_string()))?;

    let user = find_user_by_email(conn, &email.to_lowercase())?
        .ok_or_else(|| ApiError::NotFound("the user does not exist".to_string()))?;

    if !verify_password(&password, &user.password_hash) {
        return Err(ApiError::Unauthorized("the password is incorrect".to_string()));
    }

    Ok(user)
}

pub fn find_user(conn: &Connection, id: &Uuid) -> Result<Option<User>, ApiError> {
    let query = format!("SELECT {} FROM users WHERE id = ?", User::COLUMNS);
    conn.query_row(&query, [id.to_string()], User::from_row)
        .optional()
        .map_err(ApiError::from)
}

pub fn find_user_by_email(conn: &Connection, email: &str) -> Result<Option<User>, ApiError> {
    let query = format!("SELECT {} FROM users WHERE email = ?", User::COLUMNS);
    conn.query_row(&query, [email], User::from_row)
        .optional()
        .map_err(ApiError::from)
}

pub fn get_user_by_id(conn: &Connection, user_id: &str) -> Result<User, ApiError> {
    let id = parse_id(user_id, "user")?;
    find_user(conn, &id)?.ok_or_else(|| ApiError::NotFound("user not found".to_string()))
}

pub fn user_exists(conn: &Connection, id: &Uuid) -> Result<bool, ApiError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE id = ?",
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Users in signup order, page size fixed.
pub fn list_users(conn: &Connection, page: u32) -> Result<Page<User>, ApiError> {
    let page = clamp_page(page);
    let total: u64 = conn.query_row("SELECT COUNT(*) FROM users", [], |row| row.get(0))?;

    let query = format!(
        "SELECT {} FROM users ORDER BY rowid ASC LIMIT ? OFFSET ?",
        User::COLUMNS
    );
    let mut stmt = conn.prepare(&query)?;
    let users = stmt
        .query_map(params![PAGE_SIZE, offset(page)], User::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(users, page, total))
}

pub fn update_profile(
    conn: &Connection,
    user_id: &Uuid,
    patch: UpdateProfileInput,
) -> Result<User, ApiError> {
    let username = clean_field(&patch.username).map(|u| u.to_lowercase());
    let nick = clean_field(&patch.nick);
    let bio = clean_field(&patch.bio);
    let email = clean_field(&patch.email).map(|e| e.to_lowercase());
    let password = clean_field(&patch.password);

    if let Some(email) = &email {
        if !is_valid_email(email) {
            return Err(ApiError::BadRequest("the email is not valid".to_string()));
        }
    }

    ensure_unique(conn, email.as_deref(), username.as_deref(), Some(user_id))?;

    let mut assignments: Vec<&str> = Vec::new();
    let mut values: Vec<String> = Vec::new();
    if let Some(username) = username {
        assignments.push("username = ?");
        values.push(username);
    }
    if let Some(nick) = nick {
        assignments.push("nick = ?");
        values.push(nick);
    }
    if let Some(bio) = bio {
        assignments.push("bio = ?");
        values.push(bio);
    }
    if let Some(email) = email {
        assignments.push("email = ?");
        values.push(email);
    }
    if let Some(password) = password {
        assignments.push("password_hash = ?");
        values.push(hash_password(&password)?);
    }
    assignments.push("updated_at = ?");
    values.push(Utc::now().to_rfc3339());
    values.push(user_id.to_string());

    let query = format!("UPDATE users SET {} WHERE id = ?", assignments.join(", "));
    let updated = conn.execute(&query, params_from_iter(values.iter()))?;
    if updated == 0 {
        return Err(ApiError::NotFound("user not found to update".to_string()));
    }

    find_user(conn, user_id)?
        .ok_or_else(|| ApiError::Internal("updated user vanished".to_string()))
}

/// Sets the avatar filename and hands back the previous one so the caller
/// can clean it up (the default placeholder is exempt from cleanup).
pub fn update_avatar(conn: &Connection, user_id: &Uuid, filename: &str) -> Result<String, ApiError> {
    let previous: Option<String> = conn
        .query_row(
            "SELECT image FROM users WHERE id = ?",
            [user_id.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let previous =
        previous.ok_or_else(|| ApiError::NotFound("user not found to update".to_string()))?;

    conn.execute(
        "UPDATE users SET image = ?, updated_at = ? WHERE id = ?",
        params![filename, Utc::now().to_rfc3339(), user_id.to_string()],
    )?;

    Ok(previous)
}

// A failed sub-count degrades to zero instead of failing the whole call.
fn count_or_zero(conn: &Connection, query: &str, id: &Uuid) -> u64 {
    conn.query_row(query, [id.to_string()], |row| row.get(0))
        .unwrap_or(0)
}

pub fn get_counters(conn: &Connection, user_id: &str) -> Result<Counters, ApiError> {
    let id = parse_id(user_id, "user")?;

    let posts = count_or_zero(conn, "SELECT COUNT(*) FROM posts WHERE user_id = ?", &id);
    let followers = count_or_zero(conn, "SELECT COUNT(*) FROM follows WHERE followed_id = ?", &id);
    let following = count_or_zero(conn, "SELECT COUNT(*) FROM follows WHERE follower_id = ?", &id);

    Ok(Counters {
        user_id: id,
        posts,
        followers,
        following,
    })
}
