use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use crate::error::ApiError;

/// Outcome of an ownership check. Keeping "does it exist" and "do you own
/// it" separate lets callers map them to 404 and 403 without conflation.
#[derive(Debug, PartialEq, Eq)]
pub enum Ownership {
    Missing,
    NotOwner,
    Owned,
}

/// Checks whether the document identified by `document_id` in `table`
/// belongs to `actor`. `owner_field` names the column holding the owner id.
/// Table and column names come from call sites, never from request input.
pub fn check_ownership(
    conn: &Connection,
    table: &str,
    document_id: &Uuid,
    actor: &Uuid,
    owner_field: &str,
) -> Result<Ownership, ApiError> {
    let query = format!("SELECT {} FROM {} WHERE id = ?", owner_field, table);
    let owner: Option<String> = conn
        .query_row(&query, [document_id.to_string()], |row| row.get(0))
        .optional()?;

    Ok(match owner {
        None => Ownership::Missing,
        Some(owner) if owner == actor.to_string() => Ownership::Owned,
        Some(_) => Ownership::NotOwner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::tests::{signup, test_conn};
    use chrono::Utc;
    use rusqlite::params;

    fn conn_with_post() -> (Connection, Uuid, Uuid) {
        let conn = test_conn();
        let owner = signup(&conn, "ana", "ana@mail.com").id;
        let post = Uuid::new_v4();
        conn.execute(
            "INSERT INTO posts (id, user_id, text, created_at) VALUES (?, ?, ?, ?)",
            params![post.to_string(), owner.to_string(), "hi", Utc::now().to_rfc3339()],
        )
        .unwrap();
        (conn, post, owner)
    }

    #[test]
    fn distinguishes_all_three_states() {
        let (conn, post, owner) = conn_with_post();
        let stranger = Uuid::new_v4();

        assert_eq!(
            check_ownership(&conn, "posts", &post, &owner, "user_id").unwrap(),
            Ownership::Owned
        );
        assert_eq!(
            check_ownership(&conn, "posts", &post, &stranger, "user_id").unwrap(),
            Ownership::NotOwner
        );
        assert_eq!(
            check_ownership(&conn, "posts", &Uuid::new_v4(), &owner, "user_id").unwrap(),
            Ownership::Missing
        );
    }
}
