use axum::{
    body::Body,
    extract::{Multipart, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio_util::io::ReaderStream;

use crate::auth::{authenticate, create_auth_token};
use crate::config::{AVATARS_DIR, POST_IMAGES_DIR};
use crate::db::DbConnection;
use crate::error::ApiError;
use crate::media::{delete_media_async, resolve_avatar_path, store_upload};
use crate::pagination::Page;
use crate::users::{LoginInput, SignupInput, UpdateProfileInput};
use crate::{follows, posts, users};

fn page_param(params: &HashMap<String, String>) -> u32 {
    params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1)
}

fn ok(body: Value) -> Response {
    (StatusCode::OK, Json(body)).into_response()
}

fn page_envelope<T: Serialize>(page: &Page<T>, items_key: &str) -> Result<Value, ApiError> {
    let mut body = json!({
        "status": "OK",
        "statusCode": 200,
        "page": page.page,
        "pageSize": page.page_size,
        "totalCount": page.total_count,
        "totalPages": page.total_pages,
    });
    body[items_key] =
        serde_json::to_value(&page.items).map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(body)
}

/// Streams a stored media file back, content type guessed from the path.
async fn stream_file(path: PathBuf) -> Result<Response, ApiError> {
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|_| ApiError::NotFound("image not found".to_string()))?;
    let stream = ReaderStream::new(file);
    let mime_type = mime_guess::from_path(&path).first_or_octet_stream();

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, mime_type.as_ref())
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(e.to_string()))
}

/// Pulls the first file field out of a multipart body.
async fn read_upload(multipart: &mut Multipart) -> Result<(String, Vec<u8>), ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(e.to_string()))?;
        return Ok((filename, data.to_vec()));
    }
    Err(ApiError::BadRequest("no image uploaded".to_string()))
}

// === user endpoints ===

pub async fn signup(
    State(conn): State<DbConnection>,
    Json(input): Json<SignupInput>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let user = users::create_user(&conn, input)?;
    let token = create_auth_token(&conn, &user.id)?;
    tracing::info!("user {} registered", user.username);

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "status": "Created",
            "statusCode": 201,
            "message": format!("User {} successfully registered", user.username),
            "token": token,
        })),
    )
        .into_response())
}

pub async fn login(
    State(conn): State<DbConnection>,
    Json(input): Json<LoginInput>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let user = users::verify_credentials(&conn, &input)?;
    let token = create_auth_token(&conn, &user.id)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "Login successful",
        "token": token,
        "user": { "userId": user.id },
    })))
}

pub async fn user_profile(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let user = users::get_user_by_id(&conn, &user_id)?;
    let info = follows::follow_info(&conn, &user_id, &actor)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "logged": actor,
        "user": user,
        "following": info.following,
        "follower": info.follower,
    })))
}

pub async fn list_users(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    params: Option<Path<HashMap<String, String>>>,
) -> Result<Response, ApiError> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let page = users::list_users(&conn, page_param(&params))?;

    let mut body = page_envelope(&page, "users")?;
    body["actorFollowing"] = json!(follows::following_ids(&conn, &actor)?);
    body["actorFollowers"] = json!(follows::follower_ids(&conn, &actor)?);
    Ok(ok(body))
}

pub async fn update_user(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Json(patch): Json<UpdateProfileInput>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let updated = users::update_profile(&conn, &actor, patch)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "User updated successfully",
        "updatedUser": updated,
    })))
}

pub async fn update_user_image(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let actor = {
        let conn = conn.lock().await;
        authenticate(&conn, &headers)?
    };

    let (original_name, data) = read_upload(&mut multipart).await?;
    let filename = store_upload(std::path::Path::new(AVATARS_DIR), &original_name, &data).await?;

    let conn = conn.lock().await;
    let previous = users::update_avatar(&conn, &actor, &filename)?;
    delete_media_async(std::path::Path::new(AVATARS_DIR), &previous).await;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "File uploaded successfully",
        "file": filename,
    })))
}

pub async fn user_avatar(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let path = {
        let conn = conn.lock().await;
        let actor = authenticate(&conn, &headers)?;
        resolve_avatar_path(&conn, &actor.to_string())?
    };
    stream_file(path).await
}

pub async fn user_counters(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    authenticate(&conn, &headers)?;
    let counters = users::get_counters(&conn, &user_id)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "userId": counters.user_id,
        "posts": counters.posts,
        "followers": counters.followers,
        "following": counters.following,
    })))
}

// === follow endpoints ===

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowRequest {
    pub followed_id: Option<String>,
}

pub async fn follow_user(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Json(body): Json<FollowRequest>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let edge = follows::follow(&conn, &actor, body.followed_id.as_deref().unwrap_or_default())?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "User followed",
        "follow": edge,
    })))
}

pub async fn unfollow_user(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(followed_id): Path<String>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    follows::unfollow(&conn, &actor, &followed_id)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "User unfollowed",
    })))
}

fn follow_listing_response(
    listing: follows::FollowListing,
    items_key: &str,
) -> Result<Response, ApiError> {
    let mut body = page_envelope(&listing.page, items_key)?;
    body["actorFollowing"] = json!(listing.actor_following);
    body["actorFollowers"] = json!(listing.actor_followers);
    Ok(ok(body))
}

pub async fn following_list(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    params: Option<Path<HashMap<String, String>>>,
) -> Result<Response, ApiError> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let listing = follows::list_following(
        &conn,
        params.get("id").map(String::as_str),
        &actor,
        page_param(&params),
    )?;
    follow_listing_response(listing, "following")
}

pub async fn followers_list(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    params: Option<Path<HashMap<String, String>>>,
) -> Result<Response, ApiError> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let listing = follows::list_followers(
        &conn,
        params.get("id").map(String::as_str),
        &actor,
        page_param(&params),
    )?;
    follow_listing_response(listing, "followers")
}

// === post endpoints ===

pub async fn save_post(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Json(input): Json<posts::CreatePostInput>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let post = posts::create_post(&conn, &actor, input)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "Post created",
        "post": post,
    })))
}

pub async fn post_detail(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    authenticate(&conn, &headers)?;
    let post = posts::get_post(&conn, &post_id)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "post": post,
    })))
}

pub async fn delete_post(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let deleted = posts::delete_post(&conn, &post_id, &actor)?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "Post deleted",
        "post": deleted,
    })))
}

pub async fn user_posts(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(params): Path<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let conn = conn.lock().await;
    authenticate(&conn, &headers)?;
    let user_id = params
        .get("id")
        .ok_or_else(|| ApiError::BadRequest("the user id is not valid".to_string()))?;
    let page = posts::list_user_posts(&conn, user_id, page_param(&params))?;
    Ok(ok(page_envelope(&page, "posts")?))
}

pub async fn upload_post_image(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let actor = {
        let conn = conn.lock().await;
        authenticate(&conn, &headers)?
    };

    let (original_name, data) = read_upload(&mut multipart).await?;
    let filename =
        store_upload(std::path::Path::new(POST_IMAGES_DIR), &original_name, &data).await?;

    let conn = conn.lock().await;
    let post = posts::attach_image(
        &conn,
        &actor,
        &post_id,
        std::path::Path::new(POST_IMAGES_DIR),
        &filename,
    )?;

    Ok(ok(json!({
        "status": "OK",
        "statusCode": 200,
        "message": "File uploaded successfully",
        "post": post,
    })))
}

pub async fn post_image(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    Path(post_id): Path<String>,
) -> Result<Response, ApiError> {
    let path = {
        let conn = conn.lock().await;
        authenticate(&conn, &headers)?;
        posts::resolve_image_path(&conn, &post_id, std::path::Path::new(POST_IMAGES_DIR))?
    };
    stream_file(path).await
}

pub async fn feed(
    State(conn): State<DbConnection>,
    headers: HeaderMap,
    params: Option<Path<HashMap<String, String>>>,
) -> Result<Response, ApiError> {
    let params = params.map(|Path(p)| p).unwrap_or_default();
    let conn = conn.lock().await;
    let actor = authenticate(&conn, &headers)?;
    let page = posts::get_feed(&conn, &actor, page_param(&params))?;
    Ok(ok(page_envelope(&page, "posts")?))
}
