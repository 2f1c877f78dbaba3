pub const PAGE_SIZE: u32 = 5;

pub const MIN_PASSWORD_LENGTH: usize = 8;

pub const AVATARS_DIR: &str = "uploads/avatars";
pub const POST_IMAGES_DIR: &str = "uploads/posts";
pub const DEFAULT_AVATAR: &str = "default.png";

pub const ALLOWED_IMAGE_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];
