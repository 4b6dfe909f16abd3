//! Field limits and sanitization for scraped content.
//!
//! Text fields are hard gates: a field that is still too long, badly
//! encoded or garbled after sanitization fails the whole record. List and
//! map fields are filtered instead, dropping bad entries without error.

use std::collections::BTreeMap;

use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::models::ContentRecord;

pub const MAX_CONTENT_BYTES: usize = 2 * 1024 * 1024;
pub const MAX_AUTHOR_BYTES: usize = 255;
pub const MAX_CATEGORY_BYTES: usize = 255;
pub const MAX_META_TEXT_BYTES: usize = 1024;
pub const MAX_TAG_BYTES: usize = 100;
pub const MAX_META_KEY_BYTES: usize = 100;
pub const MAX_META_VALUE_BYTES: usize = 1000;
/// Runs of this many identical characters mark a field as garbled.
pub const REPEAT_THRESHOLD: usize = 100;

static DANGEROUS_BLOCKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ["script", "style", "iframe", "object", "embed", "form", "button"]
        .iter()
        .map(|tag| {
            Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>"))
                .expect("static pattern")
        })
        .collect()
});

/// Void or unclosed leftovers of the tags above.
static DANGEROUS_TAGS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)</?(?:script|style|iframe|object|embed|form|input|button)\b[^>]*>")
        .expect("static pattern")
});

static EVENT_HANDLERS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s*\bon\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]+)"#).expect("static pattern")
});

static DANGEROUS_SCHEMES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:javascript|vbscript|data)\s*:").expect("static pattern"));

static META_KEY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("static pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("content validation failed for {field}: {reason}")]
pub struct ContentValidationError {
    pub field: &'static str,
    pub reason: Violation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Violation {
    #[error("invalid encoding")]
    InvalidEncoding,

    #[error("{len} bytes exceeds maximum of {max}")]
    TooLong { len: usize, max: usize },

    #[error("contains a long run of identical characters")]
    RepeatedCharacters,
}

/// Sanitizes every field of `record` in place and enforces the limits.
///
/// On error the record is left partially sanitized and must be discarded.
pub fn validate_and_sanitize(record: &mut ContentRecord) -> Result<(), ContentValidationError> {
    let result = validate_fields(record);
    if let Err(e) = &result {
        counter!("content_validation_errors_total", "field" => e.field).increment(1);
    }
    result
}

fn validate_fields(record: &mut ContentRecord) -> Result<(), ContentValidationError> {
    record.full_text = sanitize_text(&record.full_text);
    validate_text(&record.full_text, "full_text", MAX_CONTENT_BYTES)?;

    record.author = sanitize_text(&record.author);
    validate_text(&record.author, "author", MAX_AUTHOR_BYTES)?;

    record.category = sanitize_text(&record.category);
    validate_text(&record.category, "category", MAX_CATEGORY_BYTES)?;

    record.content_html = sanitize_html(&record.content_html);
    validate_text(&record.content_html, "content_html", MAX_CONTENT_BYTES)?;

    record.meta_keywords = sanitize_text(&record.meta_keywords);
    validate_text(&record.meta_keywords, "meta_keywords", MAX_META_TEXT_BYTES)?;

    record.meta_description = sanitize_text(&record.meta_description);
    validate_text(&record.meta_description, "meta_description", MAX_META_TEXT_BYTES)?;

    record.images.retain(|u| is_valid_image_url(u));

    let tags = std::mem::take(&mut record.tags);
    for tag in tags {
        let tag = sanitize_text(&tag);
        if tag.len() <= MAX_TAG_BYTES {
            record.push_tag(&tag);
        }
    }

    record.meta_data = std::mem::take(&mut record.meta_data)
        .into_iter()
        .filter(|(key, value)| is_valid_meta_key(key) && is_valid_meta_value(value))
        .map(|(key, value)| {
            let value = sanitize_text(&value);
            (key, value)
        })
        .collect::<BTreeMap<_, _>>();

    Ok(())
}

/// Escapes markup, drops NUL and control characters other than tab, newline
/// and carriage return, then trims.
///
/// Escaping is not idempotent (`&` becomes `&amp;`, then `&amp;amp;`). It runs
/// once per scraped record; records served from the content cache are
/// already sanitized and are not passed through here again.
pub fn sanitize_text(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }
    let escaped = html_escape::encode_quoted_attribute(text);
    strip_control(&escaped).trim().to_string()
}

/// The non-escaping half of [`sanitize_text`]. Idempotent.
pub fn strip_control(text: &str) -> String {
    text.chars()
        .filter(|&c| !(c < ' ' && c != '\t' && c != '\n' && c != '\r'))
        .collect()
}

/// Removes known dangerous constructs from an HTML fragment. Not a full
/// sanitizer: the output is not safe to render untrusted.
pub fn sanitize_html(html: &str) -> String {
    if html.is_empty() {
        return String::new();
    }
    let mut out = html.replace('\0', "");
    for pattern in DANGEROUS_BLOCKS.iter() {
        out = pattern.replace_all(&out, "").into_owned();
    }
    out = DANGEROUS_TAGS.replace_all(&out, "").into_owned();
    out = EVENT_HANDLERS.replace_all(&out, "").into_owned();
    DANGEROUS_SCHEMES.replace_all(&out, "").into_owned()
}

fn validate_text(text: &str, field: &'static str, max: usize) -> Result<(), ContentValidationError> {
    if text.is_empty() {
        return Ok(());
    }
    let fail = |reason| Err(ContentValidationError { field, reason });

    // Bodies are decoded lossily, so bad input shows up as U+FFFD.
    if text.contains(char::REPLACEMENT_CHARACTER) {
        return fail(Violation::InvalidEncoding);
    }
    if text.len() > max {
        return fail(Violation::TooLong { len: text.len(), max });
    }
    if has_repeated_run(text, REPEAT_THRESHOLD) {
        return fail(Violation::RepeatedCharacters);
    }
    Ok(())
}

fn has_repeated_run(text: &str, threshold: usize) -> bool {
    let mut chars = text.chars();
    let Some(mut current) = chars.next() else {
        return false;
    };
    let mut run = 1;
    for c in chars {
        if c == current {
            run += 1;
            if run >= threshold {
                return true;
            }
        } else {
            current = c;
            run = 1;
        }
    }
    false
}

/// Absolute http(s) URL with a host. The path is not checked for an image
/// extension; many image endpoints are dynamic.
pub fn is_valid_image_url(candidate: &str) -> bool {
    let Ok(url) = Url::parse(candidate) else {
        return false;
    };
    matches!(url.scheme(), "http" | "https") && url.host_str().is_some_and(|h| !h.is_empty())
}

fn is_valid_meta_key(key: &str) -> bool {
    !key.is_empty() && key.len() <= MAX_META_KEY_BYTES && META_KEY.is_match(key)
}

fn is_valid_meta_value(value: &str) -> bool {
    value.len() <= MAX_META_VALUE_BYTES
        && !value.contains(['<', '>', '&', '"', '\'', '\0'])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_is_escaped_and_stripped() {
        assert_eq!(sanitize_text("  a\0b\x07c\td\n "), "abc\td");
        let escaped = sanitize_text("<b>\"x\" & 'y'</b>");
        assert!(escaped.starts_with("&lt;b&gt;&quot;x&quot; &amp; "));
        assert!(!escaped.contains(['<', '>', '"', '\'']));
    }

    #[test]
    fn null_bytes_are_removed_and_stripping_twice_changes_nothing() {
        let inputs = ["\0", "a\0\0b", "\0\x01\x1f\t\n\r text \0", "clean"];
        for input in inputs {
            let once = strip_control(input);
            assert!(!once.contains('\0'));
            assert_eq!(strip_control(&once), once);

            let sanitized = sanitize_text(input);
            assert!(!sanitized.contains('\0'));
            assert!(!sanitize_text(&sanitized).contains('\0'));
        }
    }

    #[test]
    fn field_limits_are_inclusive() {
        // Alternating characters keep the repeat guard quiet.
        let mut record = ContentRecord {
            author: "ab".repeat(MAX_AUTHOR_BYTES / 2) + "c",
            meta_description: "ab".repeat(MAX_META_TEXT_BYTES / 2),
            ..Default::default()
        };
        assert_eq!(record.author.len(), MAX_AUTHOR_BYTES);
        assert_eq!(record.meta_description.len(), MAX_META_TEXT_BYTES);
        assert!(validate_and_sanitize(&mut record).is_ok());

        let mut record = ContentRecord {
            author: "ab".repeat(MAX_AUTHOR_BYTES / 2 + 1),
            ..Default::default()
        };
        let err = validate_and_sanitize(&mut record).unwrap_err();
        assert_eq!(err.field, "author");

        let mut record = ContentRecord {
            category: "ab".repeat(MAX_CATEGORY_BYTES / 2) + "cd",
            ..Default::default()
        };
        let err = validate_and_sanitize(&mut record).unwrap_err();
        assert_eq!(err.field, "category");
        assert_eq!(err.reason, Violation::TooLong { len: 256, max: 255 });
    }

    #[test]
    fn escaping_counts_toward_the_limit() {
        // 200 bytes of input become 800 bytes once escaped.
        let mut record = ContentRecord {
            author: "<>".repeat(100),
            ..Default::default()
        };
        let err = validate_and_sanitize(&mut record).unwrap_err();
        assert_eq!(err.field, "author");
    }

    #[test]
    fn repeated_runs_are_rejected() {
        let mut record = ContentRecord {
            full_text: format!("intro {} outro", "=".repeat(REPEAT_THRESHOLD)),
            ..Default::default()
        };
        let err = validate_and_sanitize(&mut record).unwrap_err();
        assert_eq!(err.field, "full_text");
        assert_eq!(err.reason, Violation::RepeatedCharacters);

        let mut record = ContentRecord {
            full_text: format!("intro {} outro", "=".repeat(REPEAT_THRESHOLD - 1)),
            ..Default::default()
        };
        assert!(validate_and_sanitize(&mut record).is_ok());
    }

    #[test]
    fn replacement_characters_fail_encoding_check() {
        let mut record = ContentRecord {
            meta_keywords: "news, \u{FFFD}\u{FFFD}".into(),
            ..Default::default()
        };
        let err = validate_and_sanitize(&mut record).unwrap_err();
        assert_eq!(err.field, "meta_keywords");
        assert_eq!(err.reason, Violation::InvalidEncoding);
    }

    #[test]
    fn html_loses_dangerous_constructs() {
        let html = concat!(
            "<p onclick=\"steal()\" class=\"lead\">Hi</p>",
            "<SCRIPT type=\"text/javascript\">alert(1)</SCRIPT>",
            "<style>\nbody{}\n</style>",
            "<iframe src=\"x\"></iframe>",
            "<form action=\"/\"><input name=\"q\"><button>Go</button></form>",
            "<a href=\"javascript:alert(1)\" onmouseover='x()'>link</a>",
            "<img src=\"data:image/png;base64,AAAA\" onerror=boom>",
            "<embed src=\"a.swf\"></embed><object data=\"b\"></object>",
            "<script>unterminated",
        );
        let clean = sanitize_html(html);
        let lower = clean.to_lowercase();
        for needle in [
            "<script", "<style", "<iframe", "<form", "<input", "<button", "<embed", "<object",
            "onclick", "onmouseover", "onerror", "javascript:", "data:", "alert(1)</",
        ] {
            assert!(!lower.contains(needle), "{needle} survived in {clean}");
        }
        assert!(clean.contains("<p class=\"lead\">Hi</p>"));
        assert!(clean.contains(">link</a>"));
    }

    #[test]
    fn image_list_keeps_absolute_http_urls() {
        let mut record = ContentRecord {
            images: vec![
                "https://x.com/a.png".into(),
                "ftp://x.com/b.jpg".into(),
                "https://x.com/c.jpg".into(),
                "/relative.png".into(),
                "https://cdn.x.com/resize?id=42".into(),
            ],
            ..Default::default()
        };
        validate_and_sanitize(&mut record).unwrap();
        assert_eq!(
            record.images,
            vec!["https://x.com/a.png", "https://x.com/c.jpg", "https://cdn.x.com/resize?id=42"]
        );
    }

    #[test]
    fn bad_tags_and_metadata_are_dropped_silently() {
        let mut record = ContentRecord {
            tags: vec!["  ".into(), "x".repeat(101), "Economy".into(), "economy".into()],
            ..Default::default()
        };
        record.meta_data.insert("og_title".into(), "A title".into());
        record.meta_data.insert("og:title".into(), "bad key".into());
        record.meta_data.insert("twitter_card".into(), "<b>".into());
        record.meta_data.insert("long".into(), "v".repeat(1001));
        record.meta_data.insert("k".repeat(101), "v".into());

        validate_and_sanitize(&mut record).unwrap();
        assert_eq!(record.tags, vec!["Economy"]);
        assert_eq!(record.meta_data.len(), 1);
        assert_eq!(record.meta_data["og_title"], "A title");
    }
}
