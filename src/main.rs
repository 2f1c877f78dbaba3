mod auth;
mod config;
mod db;
mod error;
mod follows;
mod handlers;
mod media;
mod models;
mod ownership;
mod pagination;
mod posts;
mod users;
mod validate;

use axum::{
    routing::{delete, get, post, put},
    Router,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let db_path = std::env::var("DATABASE_PATH").unwrap_or_else(|_| "ripple.db".to_string());
    let conn = db::establish_connection(&db_path).expect("Failed to establish database connection");

    tokio::fs::create_dir_all(config::AVATARS_DIR)
        .await
        .expect("Failed to create avatars directory");
    tokio::fs::create_dir_all(config::POST_IMAGES_DIR)
        .await
        .expect("Failed to create post images directory");

    let app = Router::new()
        .route("/user/signup", post(handlers::signup))
        .route("/user/login", post(handlers::login))
        .route("/user/profile/:id", get(handlers::user_profile))
        .route("/user/list", get(handlers::list_users))
        .route("/user/list/:page", get(handlers::list_users))
        .route("/user/update", put(handlers::update_user))
        .route("/user/updateImage", post(handlers::update_user_image))
        .route("/user/avatar", get(handlers::user_avatar))
        .route("/user/counters/:id", get(handlers::user_counters))
        .route("/follow/followUser", post(handlers::follow_user))
        .route("/follow/unfollowUser/:id", delete(handlers::unfollow_user))
        .route("/follow/following", get(handlers::following_list))
        .route("/follow/following/:id", get(handlers::following_list))
        .route("/follow/following/:id/:page", get(handlers::following_list))
        .route("/follow/followers", get(handlers::followers_list))
        .route("/follow/followers/:id", get(handlers::followers_list))
        .route("/follow/followers/:id/:page", get(handlers::followers_list))
        .route("/post/save", post(handlers::save_post))
        .route("/post/detail/:id", get(handlers::post_detail))
        .route("/post/delete/:id", delete(handlers::delete_post))
        .route("/post/userPosts/:id", get(handlers::user_posts))
        .route("/post/userPosts/:id/:page", get(handlers::user_posts))
        .route("/post/uploadImage/:id", post(handlers::upload_post_image))
        .route("/post/postImage/:id", get(handlers::post_image))
        .route("/post/feed", get(handlers::feed))
        .route("/post/feed/:page", get(handlers::feed))
        .with_state(conn);

    let port = std::env::var("PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{}", port);
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
    tracing::info!("Server running on http://{}", addr);
    axum::serve(listener, app).await.unwrap();
}
