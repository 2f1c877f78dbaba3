use chrono::Utc;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::config::PAGE_SIZE;
use crate::error::ApiError;
use crate::models::{Follow, FollowEntry, FollowInfo};
use crate::pagination::{clamp_page, offset, Page};
use crate::users::user_exists;
use crate::validate::parse_id;

/// A page of follow edges plus the acting user's complete follow sets, so
/// the client can render relationship affordances without a second call.
#[derive(Debug)]
pub struct FollowListing {
    pub page: Page<FollowEntry>,
    pub actor_following: Vec<Uuid>,
    pub actor_followers: Vec<Uuid>,
}

pub fn follow(conn: &Connection, actor: &Uuid, followed_id: &str) -> Result<Follow, ApiError> {
    let target = parse_id(followed_id, "user")?;
    if target == *actor {
        return Err(ApiError::BadRequest("you cannot follow yourself".to_string()));
    }
    if !user_exists(conn, &target)? {
        return Err(ApiError::NotFound("user not found".to_string()));
    }
    if edge_exists(conn, actor, &target)? {
        return Err(ApiError::Conflict("you already follow this user".to_string()));
    }

    let id = Uuid::new_v4();
    let now = Utc::now();
    // the UNIQUE (follower, followed) constraint settles concurrent
    // duplicate attempts as Conflict
    let inserted = conn.execute(
        "INSERT INTO follows (id, follower_id, followed_id, created_at) VALUES (?, ?, ?, ?)",
        params![id.to_string(), actor.to_string(), target.to_string(), now.to_rfc3339()],
    )?;
    if inserted == 0 {
        return Err(ApiError::Internal("failed to register the follow".to_string()));
    }

    Ok(Follow {
        id,
        follower_id: *actor,
        followed_id: target,
        created_at: now,
    })
}

pub fn unfollow(conn: &Connection, actor: &Uuid, followed_id: &str) -> Result<(), ApiError> {
    let target = parse_id(followed_id, "user")?;
    if !edge_exists(conn, actor, &target)? {
        return Err(ApiError::NotFound("you do not follow this user".to_string()));
    }

    let deleted = conn.execute(
        "DELETE FROM follows WHERE follower_id = ? AND followed_id = ?",
        params![actor.to_string(), target.to_string()],
    )?;
    if deleted == 0 {
        return Err(ApiError::Internal("failed to delete the follow".to_string()));
    }

    Ok(())
}

pub fn edge_exists(conn: &Connection, follower: &Uuid, followed: &Uuid) -> Result<bool, ApiError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM follows WHERE follower_id = ? AND followed_id = ?",
        params![follower.to_string(), followed.to_string()],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn id_set(conn: &Connection, query: &str, user: &Uuid) -> Result<Vec<Uuid>, ApiError> {
    let mut stmt = conn.prepare(query)?;
    let rows = stmt.query_map([user.to_string()], |row| row.get::<_, String>(0))?;

    let mut ids = Vec::new();
    for raw in rows {
        let raw = raw?;
        let id = Uuid::parse_str(&raw)
            .map_err(|_| ApiError::Internal("corrupt follow record".to_string()))?;
        ids.push(id);
    }
    Ok(ids)
}

/// Everyone `user` follows, in edge-creation order, unpaginated.
pub fn following_ids(conn: &Connection, user: &Uuid) -> Result<Vec<Uuid>, ApiError> {
    id_set(
        conn,
        "SELECT followed_id FROM follows WHERE follower_id = ? ORDER BY rowid ASC",
        user,
    )
}

/// Everyone following `user`, in edge-creation order, unpaginated.
pub fn follower_ids(conn: &Connection, user: &Uuid) -> Result<Vec<Uuid>, ApiError> {
    id_set(
        conn,
        "SELECT follower_id FROM follows WHERE followed_id = ? ORDER BY rowid ASC",
        user,
    )
}

fn list_edges(
    conn: &Connection,
    actor: &Uuid,
    subject: &Uuid,
    page: u32,
    filter_column: &str,
    counterpart_column: &str,
) -> Result<FollowListing, ApiError> {
    let page = clamp_page(page);
    let total: u64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM follows WHERE {} = ?", filter_column),
        [subject.to_string()],
        |row| row.get(0),
    )?;

    // edges sorted by creation order for stable pagination
    let query = format!(
        "SELECT f.id, f.created_at, u.id, u.username, u.nick, u.image
         FROM follows f JOIN users u ON u.id = f.{}
         WHERE f.{} = ? ORDER BY f.rowid ASC LIMIT ? OFFSET ?",
        counterpart_column, filter_column
    );
    let mut stmt = conn.prepare(&query)?;
    let entries = stmt
        .query_map(
            params![subject.to_string(), PAGE_SIZE, offset(page)],
            FollowEntry::from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(FollowListing {
        page: Page::new(entries, page, total),
        actor_following: following_ids(conn, actor)?,
        actor_followers: follower_ids(conn, actor)?,
    })
}

/// Who `target` (or the actor, when absent) follows.
pub fn list_following(
    conn: &Connection,
    target: Option<&str>,
    actor: &Uuid,
    page: u32,
) -> Result<FollowListing, ApiError> {
    let subject = match target {
        Some(raw) => parse_id(raw, "user")?,
        None => *actor,
    };
    list_edges(conn, actor, &subject, page, "follower_id", "followed_id")
}

/// Who follows `target` (or the actor, when absent).
pub fn list_followers(
    conn: &Connection,
    target: Option<&str>,
    actor: &Uuid,
    page: u32,
) -> Result<FollowListing, ApiError> {
    let subject = match target {
        Some(raw) => parse_id(raw, "user")?,
        None => *actor,
    };
    list_edges(conn, actor, &subject, page, "followed_id", "follower_id")
}

/// Relationship between a profile and the actor, both directions resolved
/// with independent existence checks.
pub fn follow_info(conn: &Connection, profile_id: &str, actor: &Uuid) -> Result<FollowInfo, ApiError> {
    let profile = parse_id(profile_id, "user")?;
    Ok(FollowInfo {
        following: edge_exists(conn, actor, &profile)?,
        follower: edge_exists(conn, &profile, actor)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::User;
    use crate::users::tests::{signup, test_conn};

    fn pair(conn: &Connection) -> (User, User) {
        (
            signup(conn, "ana", "ana@mail.com"),
            signup(conn, "bob", "bob@mail.com"),
        )
    }

    fn edge_count(conn: &Connection, follower: &Uuid, followed: &Uuid) -> i64 {
        conn.query_row(
            "SELECT COUNT(*) FROM follows WHERE follower_id = ? AND followed_id = ?",
            params![follower.to_string(), followed.to_string()],
            |row| row.get(0),
        )
        .unwrap()
    }

    #[test]
    fn follow_creates_a_single_edge() {
        let conn = test_conn();
        let (ana, bob) = pair(&conn);

        let edge = follow(&conn, &ana.id, &bob.id.to_string()).unwrap();
        assert_eq!(edge.follower_id, ana.id);
        assert_eq!(edge.followed_id, bob.id);
        assert_eq!(edge_count(&conn, &ana.id, &bob.id), 1);
    }

    #[test]
    fn duplicate_follow_conflicts_and_keeps_one_edge() {
        let conn = test_conn();
        let (ana, bob) = pair(&conn);

        follow(&conn, &ana.id, &bob.id.to_string()).unwrap();
        let err = follow(&conn, &ana.id, &bob.id.to_string()).unwrap_err();
        assert_eq!(err, ApiError::Conflict("you already follow this user".to_string()));
        assert_eq!(edge_count(&conn, &ana.id, &bob.id), 1);
    }

    #[test]
    fn follow_rejects_self_and_unknown_targets() {
        let conn = test_conn();
        let (ana, _) = pair(&conn);

        assert_eq!(
            follow(&conn, &ana.id, &ana.id.to_string()).unwrap_err(),
            ApiError::BadRequest("you cannot follow yourself".to_string())
        );
        assert_eq!(
            follow(&conn, &ana.id, &Uuid::new_v4().to_string()).unwrap_err(),
            ApiError::NotFound("user not found".to_string())
        );
        assert!(matches!(
            follow(&conn, &ana.id, "garbage").unwrap_err(),
            ApiError::BadRequest(_)
        ));
    }

    #[test]
    fn unfollow_without_edge_is_not_found_and_changes_nothing() {
        let conn = test_conn();
        let (ana, bob) = pair(&conn);

        let err = unfollow(&conn, &ana.id, &bob.id.to_string()).unwrap_err();
        assert_eq!(err, ApiError::NotFound("you do not follow this user".to_string()));
        assert_eq!(edge_count(&conn, &ana.id, &bob.id), 0);
    }

    #[test]
    fn follow_unfollow_round_trip_excludes_target() {
        let conn = test_conn();
        let (ana, bob) = pair(&conn);

        follow(&conn, &ana.id, &bob.id.to_string()).unwrap();
        unfollow(&conn, &ana.id, &bob.id.to_string()).unwrap();

        let listing = list_following(&conn, None, &ana.id, 1).unwrap();
        assert!(listing.page.items.is_empty());
        assert_eq!(listing.page.total_count, 0);
        assert!(!listing.actor_following.contains(&bob.id));
    }

    #[test]
    fn mutual_follow_reported_by_follow_info() {
        let conn = test_conn();
        let (ana, bob) = pair(&conn);

        follow(&conn, &ana.id, &bob.id.to_string()).unwrap();
        follow(&conn, &bob.id, &ana.id.to_string()).unwrap();

        let info = follow_info(&conn, &bob.id.to_string(), &ana.id).unwrap();
        assert_eq!(info, FollowInfo { following: true, follower: true });
    }

    #[test]
    fn one_way_follow_info() {
        let conn = test_conn();
        let (ana, bob) = pair(&conn);

        follow(&conn, &ana.id, &bob.id.to_string()).unwrap();

        let info = follow_info(&conn, &bob.id.to_string(), &ana.id).unwrap();
        assert_eq!(info, FollowInfo { following: true, follower: false });

        let reverse = follow_info(&conn, &ana.id.to_string(), &bob.id).unwrap();
        assert_eq!(reverse, FollowInfo { following: false, follower: true });
    }

    #[test]
    fn following_listing_pages_in_edge_order_with_public_fields() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let mut targets = Vec::new();
        for i in 0..6 {
            let u = signup(&conn, &format!("user{}", i), &format!("user{}@mail.com", i));
            follow(&conn, &ana.id, &u.id.to_string()).unwrap();
            targets.push(u);
        }

        let first = list_following(&conn, None, &ana.id, 1).unwrap();
        assert_eq!(first.page.total_count, 6);
        assert_eq!(first.page.total_pages, 2);
        assert_eq!(first.page.items.len(), 5);
        assert_eq!(first.page.items[0].user.username, "user0");
        assert_eq!(first.page.items[0].user.nick, "user0 nick");
        assert_eq!(first.page.items[0].user.image, "default.png");
        assert_eq!(first.actor_following.len(), 6);
        assert!(first.actor_followers.is_empty());

        let second = list_following(&conn, None, &ana.id, 2).unwrap();
        assert_eq!(second.page.items.len(), 1);
        assert_eq!(second.page.items[0].user.username, "user5");
    }

    #[test]
    fn followers_listing_resolves_the_other_endpoint() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let bob = signup(&conn, "bob", "bob@mail.com");
        follow(&conn, &bob.id, &ana.id.to_string()).unwrap();

        let listing = list_followers(&conn, Some(&ana.id.to_string()), &ana.id, 1).unwrap();
        assert_eq!(listing.page.items.len(), 1);
        assert_eq!(listing.page.items[0].user.username, "bob");
        assert_eq!(listing.actor_followers, vec![bob.id]);
    }
}
