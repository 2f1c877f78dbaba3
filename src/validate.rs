use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

use crate::error::ApiError;

/// Trim a raw optional field, collapsing blank/empty values to None. The
/// request-body equivalent of dropping "", null and undefined entries.
pub fn clean_field(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn email_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("regex should compile"))
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}

/// Ids arrive as opaque path/body strings; anything that is not a uuid is a
/// client error, not a lookup miss.
pub fn parse_id(raw: &str, subject: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| ApiError::BadRequest(format!("the {} id is not valid", subject)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_field_drops_blank_values() {
        assert_eq!(clean_field(&Some("  hi  ".to_string())), Some("hi".to_string()));
        assert_eq!(clean_field(&Some("   ".to_string())), None);
        assert_eq!(clean_field(&None), None);
    }

    #[test]
    fn email_shapes() {
        assert!(is_valid_email("ema@correo.com"));
        assert!(is_valid_email("a.b+c@x.co"));
        assert!(!is_valid_email("no-at-sign"));
        assert!(!is_valid_email("two@@signs.com "));
        assert!(!is_valid_email("spaces in@mail.com"));
    }

    #[test]
    fn malformed_id_is_bad_request() {
        let err = parse_id("not-a-uuid", "user").unwrap_err();
        assert_eq!(err, ApiError::BadRequest("the user id is not valid".to_string()));
        assert!(parse_id(&Uuid::new_v4().to_string(), "user").is_ok());
    }
}
