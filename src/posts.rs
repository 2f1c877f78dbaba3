use chrono::Utc;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::PAGE_SIZE;
use crate::error::ApiError;
use crate::follows::following_ids;
use crate::media::delete_media;
use crate::models::{Post, PostWithAuthor};
use crate::ownership::{check_ownership, Ownership};
use crate::pagination::{clamp_page, offset, Page};
use crate::validate::{clean_field, parse_id};

#[derive(Debug, Default, Deserialize)]
pub struct CreatePostInput {
    pub text: Option<String>,
}

pub fn create_post(conn: &Connection, author: &Uuid, input: CreatePostInput) -> Result<Post, ApiError> {
    let text = clean_field(&input.text)
        .ok_or_else(|| ApiError::BadRequest("cannot create an empty post".to_string()))?;

    let id = Uuid::new_v4();
    let now = Utc::now();
    let inserted = conn.execute(
        "INSERT INTO posts (id, user_id, text, created_at) VALUES (?, ?, ?, ?)",
        params![id.to_string(), author.to_string(), text, now.to_rfc3339()],
    )?;
    if inserted == 0 {
        return Err(ApiError::Internal("failed to create the post".to_string()));
    }

    Ok(Post {
        id,
        user_id: *author,
        text,
        file: None,
        created_at: now,
    })
}

pub fn get_post(conn: &Connection, post_id: &str) -> Result<PostWithAuthor, ApiError> {
    let id = parse_id(post_id, "post")?;
    let query = format!(
        "SELECT {} FROM posts p JOIN users u ON u.id = p.user_id WHERE p.id = ?",
        PostWithAuthor::COLUMNS
    );
    conn.query_row(&query, [id.to_string()], PostWithAuthor::from_row)
        .optional()?
        .ok_or_else(|| ApiError::NotFound("post not found".to_string()))
}

fn find_post(conn: &Connection, id: &Uuid) -> Result<Option<Post>, ApiError> {
    let query = format!("SELECT {} FROM posts WHERE id = ?", Post::COLUMNS);
    conn.query_row(&query, [id.to_string()], Post::from_row)
        .optional()
        .map_err(ApiError::from)
}

/// Missing and not-yours are different failures: 404 for the former, 403
/// for the latter.
pub fn delete_post(conn: &Connection, post_id: &str, actor: &Uuid) -> Result<Post, ApiError> {
    let id = parse_id(post_id, "post")?;

    match check_ownership(conn, "posts", &id, actor, "user_id")? {
        Ownership::Missing => return Err(ApiError::NotFound("post not found".to_string())),
        Ownership::NotOwner => {
            return Err(ApiError::Forbidden(
                "you do not have permission to delete this post".to_string(),
            ))
        }
        Ownership::Owned => {}
    }

    let post = find_post(conn, &id)?
        .ok_or_else(|| ApiError::NotFound("post not found".to_string()))?;
    let deleted = conn.execute("DELETE FROM posts WHERE id = ?", [id.to_string()])?;
    if deleted == 0 {
        return Err(ApiError::Internal("failed to delete the post".to_string()));
    }

    Ok(post)
}

pub fn list_user_posts(
    conn: &Connection,
    user_id: &str,
    page: u32,
) -> Result<Page<PostWithAuthor>, ApiError> {
    let id = parse_id(user_id, "user")?;
    let page = clamp_page(page);

    let total: u64 = conn.query_row(
        "SELECT COUNT(*) FROM posts WHERE user_id = ?",
        [id.to_string()],
        |row| row.get(0),
    )?;

    // newest first; rowid breaks timestamp ties deterministically
    let query = format!(
        "SELECT {} FROM posts p JOIN users u ON u.id = p.user_id
         WHERE p.user_id = ? ORDER BY p.created_at DESC, p.rowid DESC LIMIT {} OFFSET {}",
        PostWithAuthor::COLUMNS,
        PAGE_SIZE,
        offset(page)
    );
    let mut stmt = conn.prepare(&query)?;
    let posts = stmt
        .query_map([id.to_string()], PostWithAuthor::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(posts, page, total))
}

/// Attaches an already-stored upload to a post. Every failure path removes
/// the stored file so nothing is left orphaned; the update is scoped to the
/// acting user, so a non-owner matches nothing and gets a 404.
pub fn attach_image(
    conn: &Connection,
    actor: &Uuid,
    post_id: &str,
    images_dir: &Path,
    filename: &str,
) -> Result<Post, ApiError> {
    let id = match parse_id(post_id, "post") {
        Ok(id) => id,
        Err(e) => {
            delete_media(images_dir, filename);
            return Err(e);
        }
    };

    let previous: Option<Option<String>> = conn
        .query_row(
            "SELECT file FROM posts WHERE id = ? AND user_id = ?",
            params![id.to_string(), actor.to_string()],
            |row| row.get(0),
        )
        .optional()?;
    let previous = match previous {
        Some(file) => file,
        None => {
            delete_media(images_dir, filename);
            return Err(ApiError::NotFound("post not found".to_string()));
        }
    };

    conn.execute(
        "UPDATE posts SET file = ? WHERE id = ? AND user_id = ?",
        params![filename, id.to_string(), actor.to_string()],
    )?;

    if let Some(previous) = previous {
        delete_media(images_dir, &previous);
    }

    find_post(conn, &id)?
        .ok_or_else(|| ApiError::Internal("updated post vanished".to_string()))
}

pub fn resolve_image_path(
    conn: &Connection,
    post_id: &str,
    images_dir: &Path,
) -> Result<PathBuf, ApiError> {
    let id = parse_id(post_id, "post")?;
    let file: Option<Option<String>> = conn
        .query_row(
            "SELECT file FROM posts WHERE id = ?",
            [id.to_string()],
            |row| row.get(0),
        )
        .optional()?;

    match file {
        None => Err(ApiError::NotFound("post not found".to_string())),
        Some(None) => Err(ApiError::NotFound("the post has no image".to_string())),
        Some(Some(filename)) => Ok(images_dir.join(filename)),
    }
}

/// Reverse-chronological posts from everyone the actor follows. Following
/// nobody yields an empty page, not an error.
pub fn get_feed(conn: &Connection, actor: &Uuid, page: u32) -> Result<Page<PostWithAuthor>, ApiError> {
    let page = clamp_page(page);
    let following = following_ids(conn, actor)?;
    if following.is_empty() {
        return Ok(Page::new(Vec::new(), page, 0));
    }

    let placeholders = vec!["?"; following.len()].join(", ");
    let ids: Vec<String> = following.iter().map(Uuid::to_string).collect();

    let total: u64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM posts WHERE user_id IN ({})",
            placeholders
        ),
        params_from_iter(ids.iter()),
        |row| row.get(0),
    )?;

    let query = format!(
        "SELECT {} FROM posts p JOIN users u ON u.id = p.user_id
         WHERE p.user_id IN ({}) ORDER BY p.created_at DESC, p.rowid DESC LIMIT {} OFFSET {}",
        PostWithAuthor::COLUMNS,
        placeholders,
        PAGE_SIZE,
        offset(page)
    );
    let mut stmt = conn.prepare(&query)?;
    let posts = stmt
        .query_map(params_from_iter(ids.iter()), PostWithAuthor::from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Page::new(posts, page, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::follows::follow;
    use crate::models::User;
    use crate::users::tests::{signup, test_conn};

    fn post(conn: &Connection, author: &User, text: &str) -> Post {
        create_post(
            conn,
            &author.id,
            CreatePostInput {
                text: Some(text.to_string()),
            },
        )
        .unwrap()
    }

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ripple-posts-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn empty_text_is_rejected_and_valid_post_round_trips() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");

        let err = create_post(
            &conn,
            &ana.id,
            CreatePostInput {
                text: Some("   ".to_string()),
            },
        )
        .unwrap_err();
        assert_eq!(err, ApiError::BadRequest("cannot create an empty post".to_string()));

        let created = post(&conn, &ana, "hello");
        let fetched = get_post(&conn, &created.id.to_string()).unwrap();
        assert_eq!(fetched.text, "hello");
        assert_eq!(fetched.user.username, "ana");
        assert_eq!(fetched.user.nick, "ana nick");
        assert_eq!(fetched.user.image, "default.png");
    }

    #[test]
    fn get_post_validates_and_misses() {
        let conn = test_conn();
        assert!(matches!(
            get_post(&conn, "junk").unwrap_err(),
            ApiError::BadRequest(_)
        ));
        assert_eq!(
            get_post(&conn, &Uuid::new_v4().to_string()).unwrap_err(),
            ApiError::NotFound("post not found".to_string())
        );
    }

    #[test]
    fn only_the_owner_may_delete() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let bob = signup(&conn, "bob", "bob@mail.com");
        let created = post(&conn, &ana, "mine");

        let err = delete_post(&conn, &created.id.to_string(), &bob.id).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
        // still retrievable after the forbidden attempt
        assert!(get_post(&conn, &created.id.to_string()).is_ok());

        let deleted = delete_post(&conn, &created.id.to_string(), &ana.id).unwrap();
        assert_eq!(deleted.id, created.id);
        assert_eq!(
            get_post(&conn, &created.id.to_string()).unwrap_err(),
            ApiError::NotFound("post not found".to_string())
        );
    }

    #[test]
    fn delete_of_missing_post_is_not_found() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");
        assert_eq!(
            delete_post(&conn, &Uuid::new_v4().to_string(), &ana.id).unwrap_err(),
            ApiError::NotFound("post not found".to_string())
        );
    }

    #[test]
    fn user_posts_page_newest_first_and_idempotent() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");
        for i in 0..6 {
            post(&conn, &ana, &format!("post{}", i));
        }

        let first = list_user_posts(&conn, &ana.id.to_string(), 1).unwrap();
        assert_eq!(first.total_count, 6);
        assert_eq!(first.items.len(), 5);
        assert_eq!(first.items[0].text, "post5");
        assert_eq!(first.items[4].text, "post1");

        let again = list_user_posts(&conn, &ana.id.to_string(), 1).unwrap();
        let ids: Vec<Uuid> = first.items.iter().map(|p| p.id).collect();
        let ids_again: Vec<Uuid> = again.items.iter().map(|p| p.id).collect();
        assert_eq!(ids, ids_again);

        let second = list_user_posts(&conn, &ana.id.to_string(), 2).unwrap();
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].text, "post0");
    }

    #[test]
    fn feed_follows_the_follow_graph() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let bob = signup(&conn, "bob", "bob@mail.com");
        let carol = signup(&conn, "carol", "carol@mail.com");

        follow(&conn, &ana.id, &bob.id.to_string()).unwrap();
        follow(&conn, &ana.id, &carol.id.to_string()).unwrap();

        post(&conn, &bob, "from bob");
        post(&conn, &carol, "from carol");
        post(&conn, &ana, "from ana herself");

        let feed = get_feed(&conn, &ana.id, 1).unwrap();
        assert_eq!(feed.total_count, 2);
        assert_eq!(feed.items[0].text, "from carol");
        assert_eq!(feed.items[1].text, "from bob");
        // own posts are not part of the feed
        assert!(feed.items.iter().all(|p| p.user.id != ana.id));
    }

    #[test]
    fn feed_without_follows_is_an_empty_page() {
        let conn = test_conn();
        let ana = signup(&conn, "ana", "ana@mail.com");

        let feed = get_feed(&conn, &ana.id, 1).unwrap();
        assert!(feed.items.is_empty());
        assert_eq!(feed.total_count, 0);
        assert_eq!(feed.total_pages, 0);
    }

    #[test]
    fn attach_image_swaps_files_and_cleans_up() {
        let conn = test_conn();
        let dir = temp_dir();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let created = post(&conn, &ana, "with image");

        std::fs::write(dir.join("first.png"), b"1").unwrap();
        let updated = attach_image(&conn, &ana.id, &created.id.to_string(), &dir, "first.png").unwrap();
        assert_eq!(updated.file.as_deref(), Some("first.png"));

        std::fs::write(dir.join("second.png"), b"2").unwrap();
        let updated = attach_image(&conn, &ana.id, &created.id.to_string(), &dir, "second.png").unwrap();
        assert_eq!(updated.file.as_deref(), Some("second.png"));
        // the superseded file is gone, the new one stays
        assert!(!dir.join("first.png").exists());
        assert!(dir.join("second.png").exists());
    }

    #[test]
    fn attach_image_by_non_owner_is_not_found_and_deletes_the_upload() {
        let conn = test_conn();
        let dir = temp_dir();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let bob = signup(&conn, "bob", "bob@mail.com");
        let created = post(&conn, &ana, "mine");

        std::fs::write(dir.join("sneaky.png"), b"x").unwrap();
        let err =
            attach_image(&conn, &bob.id, &created.id.to_string(), &dir, "sneaky.png").unwrap_err();
        assert_eq!(err, ApiError::NotFound("post not found".to_string()));
        assert!(!dir.join("sneaky.png").exists());

        // the post is untouched
        let fetched = get_post(&conn, &created.id.to_string()).unwrap();
        assert_eq!(fetched.file, None);
    }

    #[test]
    fn attach_image_with_malformed_id_deletes_the_upload() {
        let conn = test_conn();
        let dir = temp_dir();
        let ana = signup(&conn, "ana", "ana@mail.com");

        std::fs::write(dir.join("orphan.png"), b"x").unwrap();
        let err = attach_image(&conn, &ana.id, "not-an-id", &dir, "orphan.png").unwrap_err();
        assert!(matches!(err, ApiError::BadRequest(_)));
        assert!(!dir.join("orphan.png").exists());
    }

    #[test]
    fn image_path_resolution() {
        let conn = test_conn();
        let dir = temp_dir();
        let ana = signup(&conn, "ana", "ana@mail.com");
        let created = post(&conn, &ana, "pic");

        assert_eq!(
            resolve_image_path(&conn, &created.id.to_string(), &dir).unwrap_err(),
            ApiError::NotFound("the post has no image".to_string())
        );

        std::fs::write(dir.join("img.png"), b"x").unwrap();
        attach_image(&conn, &ana.id, &created.id.to_string(), &dir, "img.png").unwrap();
        assert_eq!(
            resolve_image_path(&conn, &created.id.to_string(), &dir).unwrap(),
            dir.join("img.png")
        );
    }
}
