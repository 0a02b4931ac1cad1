use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::AppError;

pub fn require_non_empty(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} cannot be empty")));
    }
    Ok(())
}

pub fn require_valid_id(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::Validation(format!("{field} must be a valid ID")));
    }
    Ok(())
}

/// Length is counted in characters, not bytes.
pub fn require_max_len(field: &str, value: &str, max: usize) -> Result<(), AppError> {
    let len = value.chars().count();
    if len > max {
        return Err(AppError::Validation(format!(
            "{field} is {len} characters, limit is {max}"
        )));
    }
    Ok(())
}

pub fn require_rating(field: &str, value: u8) -> Result<(), AppError> {
    if !(1..=5).contains(&value) {
        return Err(AppError::Validation(format!("{field} must be between 1 and 5")));
    }
    Ok(())
}

/// Absolute http(s) URL, e.g. a repository or live demo link.
pub fn require_http_url(field: &str, value: &str) -> Result<(), AppError> {
    let parsed = url::Url::parse(value.trim())
        .map_err(|_| AppError::Validation(format!("{field} is not a valid URL")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host().is_some() => Ok(()),
        _ => Err(AppError::Validation(format!("{field} must be an http(s) URL"))),
    }
}

fn mime_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][\w.+-]*/[A-Za-z0-9][\w.+-]*$").expect("static regex"))
}

pub fn require_mime_type(field: &str, value: &str) -> Result<(), AppError> {
    if !mime_pattern().is_match(value) {
        return Err(AppError::Validation(format!("{field} is not a MIME type: {value}")));
    }
    Ok(())
}

/// Reactions are a single short token: one emoji (possibly a multi-codepoint
/// sequence) or a `:shortcode:`.
pub fn require_emoji(value: &str) -> Result<(), AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() || trimmed.chars().count() > 16 || trimmed.contains(char::is_whitespace) {
        return Err(AppError::Validation("emoji must be a single reaction token".into()));
    }
    Ok(())
}

/// Strip markup from user-authored text and return plain characters.
///
/// Ammonia serializes text nodes with `&`, `<`, `>` and U+00A0 escaped, so
/// those escapes are undone before storage. Escaping belongs to whoever
/// renders the text. Length limits apply to the raw input, not to this output.
pub fn sanitize_text(value: &str) -> String {
    let cleaned = ammonia::Builder::default()
        .tags(HashSet::new())
        .clean(value)
        .to_string();
    unescape_text(&cleaned)
}

// `&amp;` goes last so an escaped entity like `&amp;lt;` decodes once.
fn unescape_text(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", "\u{a0}")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert!(require_non_empty("title", "  ").is_err());
        assert!(require_non_empty("title", "x").is_ok());
    }

    #[test]
    fn test_max_len_counts_chars() {
        assert!(require_max_len("content", "ééé", 3).is_ok());
        assert!(require_max_len("content", "éééé", 3).is_err());
    }

    #[test]
    fn test_http_url() {
        assert!(require_http_url("repo", "https://git.example.com/a/b").is_ok());
        assert!(require_http_url("repo", "ftp://example.com").is_err());
        assert!(require_http_url("repo", "not a url").is_err());
    }

    #[test]
    fn test_mime_type() {
        assert!(require_mime_type("type", "image/png").is_ok());
        assert!(require_mime_type("type", "application/vnd.ms-excel").is_ok());
        assert!(require_mime_type("type", "png").is_err());
    }

    #[test]
    fn test_emoji() {
        assert!(require_emoji("👍").is_ok());
        assert!(require_emoji(":tada:").is_ok());
        assert!(require_emoji("two words").is_err());
        assert!(require_emoji("").is_err());
    }

    #[test]
    fn test_sanitize_strips_tags() {
        assert_eq!(sanitize_text("<script>x</script>hello <b>there</b>"), "hello there");
        assert_eq!(sanitize_text("plain"), "plain");
    }

    #[test]
    fn test_sanitize_keeps_plain_symbols() {
        assert_eq!(sanitize_text("if a < b && c > d"), "if a < b && c > d");
        assert_eq!(sanitize_text("Q&A <i>today</i>"), "Q&A today");
        assert_eq!(sanitize_text("say \"hi\" & 'bye'"), "say \"hi\" & 'bye'");
        assert_eq!(sanitize_text(&"&".repeat(1000)), "&".repeat(1000));
    }

    #[test]
    fn test_unescape_decodes_once() {
        assert_eq!(unescape_text("&amp;lt;"), "&lt;");
        assert_eq!(unescape_text("a &lt; b &amp;&amp; c"), "a < b && c");
    }
}
