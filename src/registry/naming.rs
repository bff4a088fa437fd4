//! Derived tenant identifiers: slug, store locator and join code.

use chrono::{DateTime, Utc};
use rand::{thread_rng, Rng};

/// No 0/O or 1/I, so codes survive being read aloud or copied by hand.
pub const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

const LOCATOR_SUFFIX_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const LOCATOR_SLUG_MAX: usize = 32;

/// Lowercase, collapse every non-alphanumeric run to `_`, trim separators.
///
/// "Sunrise Clinic" becomes "sunrise_clinic"; a name with no ASCII
/// alphanumerics yields an empty slug, which callers reject.
pub fn slugify(display_name: &str) -> String {
    let mut slug = String::with_capacity(display_name.len());
    let mut pending_separator = false;

    for c in display_name.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_separator && !slug.is_empty() {
                slug.push('_');
            }
            pending_separator = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_separator = true;
        }
    }

    slug
}

/// Store locator for a new tenant. Combines the slug with the creation time
/// and a random suffix so two clinics with the same name never share a store.
/// The result is always a valid database identifier.
pub fn store_locator(slug: &str, created_at: DateTime<Utc>) -> String {
    let mut prefix: String = slug.chars().take(LOCATOR_SLUG_MAX).collect();
    while prefix.ends_with('_') {
        prefix.pop();
    }

    format!(
        "tenant_{}_{}_{}",
        prefix,
        created_at.timestamp_millis(),
        random_string(LOCATOR_SUFFIX_ALPHABET, 4)
    )
}

pub fn generate_join_code(length: usize) -> String {
    random_string(JOIN_CODE_ALPHABET, length)
}

/// Join codes are matched case-insensitively; stored form is uppercase.
pub fn normalize_join_code(code: &str) -> String {
    code.trim().to_ascii_uppercase()
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn random_string(alphabet: &[u8], length: usize) -> String {
    let mut rng = thread_rng();
    (0..length)
        .map(|_| alphabet[rng.gen_range(0..alphabet.len())] as char)
        .collect()
}
