//! Object key generation for uploads.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Prefix shared by every uploaded document's object key
pub const DOCUMENT_KEY_PREFIX: &str = "documents";

const FALLBACK_NAME: &str = "uploaded_file";

/// Replace everything outside `[A-Za-z0-9._-]` with `_`, collapse runs of
/// underscores and trim them (and leading dots) from the ends.
pub fn sanitize_filename(filename: &str) -> String {
    let mut sanitized = String::with_capacity(filename.len());
    for c in filename.chars() {
        let c = if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
            c
        } else {
            '_'
        };
        if c == '_' && sanitized.ends_with('_') {
            continue;
        }
        sanitized.push(c);
    }

    sanitized
        .trim_start_matches(['_', '.'])
        .trim_end_matches('_')
        .to_string()
}

/// Unique object key: `documents/{base}_{YYYYmmdd_HHMMSS}_{uuid8}{.ext}`
pub fn unique_object_key(filename: &str, now: DateTime<Utc>, id: Uuid) -> String {
    let sanitized = sanitize_filename(filename);
    let sanitized = if sanitized.is_empty() {
        FALLBACK_NAME
    } else {
        sanitized.as_str()
    };

    let (base, extension) = match sanitized.rsplit_once('.') {
        Some((base, ext)) => (base, format!(".{ext}")),
        None => (sanitized, String::new()),
    };

    let id = id.simple().to_string();
    format!(
        "{DOCUMENT_KEY_PREFIX}/{base}_{}_{}{extension}",
        now.format("%Y%m%d_%H%M%S"),
        &id[..8]
    )
}
