//! Tag name grammar.
//!
//! A tag is either one or two lowercase alphanumerics, or 2 to 32 lowercase
//! alphanumerics and hyphens that begin and end with an alphanumeric. This
//! keeps tags usable as path segments and DNS-style labels.

/// Longest accepted tag name.
pub const MAX_TAG_LEN: usize = 32;

fn is_tag_alnum(b: &u8) -> bool {
    b.is_ascii_lowercase() || b.is_ascii_digit()
}

/// Returns `true` if `tag` matches the tag grammar in full.
pub fn is_valid_tag(tag: &str) -> bool {
    let bytes = tag.as_bytes();
    match bytes.len() {
        0 => false,
        1 | 2 => bytes.iter().all(is_tag_alnum),
        n if n <= MAX_TAG_LEN => {
            is_tag_alnum(&bytes[0])
                && is_tag_alnum(&bytes[n - 1])
                && bytes.iter().all(|b| is_tag_alnum(b) || *b == b'-')
        }
        _ => false,
    }
}
