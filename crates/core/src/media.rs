//! Media type signatures and declared-metadata validation.
//!
//! Content validation is a pure prefix check: the first bytes of a file are
//! hex-encoded and compared against a fixed table of known signatures at
//! fixed offsets. A declared type is accepted when any signature for it — or
//! for any type in the same top-level category — matches.

use serde::{Deserialize, Serialize};

/// One signature table entry: (media type, byte offset, signature hex).
type SignatureEntry = (&'static str, usize, &'static str);

/// Known content signatures (offsets in bytes, signatures in lowercase hex).
pub const SIGNATURE_TABLE: &[SignatureEntry] = &[
    ("image/jpeg", 0, "ffd8ff"),
    ("image/png", 0, "89504e47"),
    ("image/gif", 0, "474946383761"),
    ("image/gif", 0, "474946383961"),
    ("image/webp", 8, "57454250"),
    ("video/mp4", 4, "6674797069736f6d"),
    ("video/mp4", 4, "66747970"),
    ("video/quicktime", 4, "6674797071742020"),
    ("video/quicktime", 4, "6d6f6f76"),
    ("video/x-msvideo", 0, "52494646"),
    ("video/x-msvideo", 8, "415649204c495354"),
    ("video/mpeg", 0, "000001ba"),
    ("video/mpeg", 0, "000001b3"),
];

/// Media types accepted by default, with their allowed filename extensions.
pub const EXTENSION_TABLE: &[(&str, &[&str])] = &[
    ("image/jpeg", &["jpg", "jpeg", "jpe"]),
    ("image/png", &["png"]),
    ("image/gif", &["gif"]),
    ("image/webp", &["webp"]),
    ("video/mp4", &["mp4", "m4v"]),
    ("video/quicktime", &["mov", "qt"]),
    ("video/x-msvideo", &["avi"]),
    ("video/mpeg", &["mpg", "mpeg", "m1v", "m2v"]),
];

/// Default allow-list: every media type the extension table knows.
pub fn default_allowed_types() -> Vec<String> {
    EXTENSION_TABLE.iter().map(|(t, _)| t.to_string()).collect()
}

/// Allowed extensions for a media type, if the type is known.
pub fn allowed_extensions(media_type: &str) -> Option<&'static [&'static str]> {
    EXTENSION_TABLE
        .iter()
        .find(|(t, _)| *t == media_type)
        .map(|(_, exts)| *exts)
}

/// Lower-cased extension of a filename (characters after the last `.`).
pub fn extension_of(filename: &str) -> Option<String> {
    let (_, ext) = filename.rsplit_once('.')?;
    if ext.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// Outcome of checking a file's leading bytes against a declared media type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignatureCheck {
    /// A signature for the declared type (or its category) matched.
    Ok,
    /// A signature matched, but for a type in a different category.
    Mismatch { detected: String },
    /// No known signature matched at all.
    Undetected,
}

fn top_level_category(media_type: &str) -> &str {
    media_type.split('/').next().unwrap_or(media_type)
}

fn entry_matches(prefix_hex: &str, offset: usize, signature: &str) -> bool {
    let shift = offset * 2;
    prefix_hex.len() >= shift && prefix_hex[shift..].starts_with(signature)
}

/// Check a file's signature prefix against a declared media type.
///
/// `prefix` is the file's leading bytes (up to [`crate::SIGNATURE_PREFIX_LEN`]).
/// Acceptance is category-wide: a `video/quicktime` file declared as
/// `video/mp4` passes, because container sniffing at this depth cannot
/// reliably tell them apart and both land in the `video` category.
pub fn check_signature(prefix: &[u8], declared: &str) -> SignatureCheck {
    let prefix_hex: String = prefix.iter().map(|b| format!("{b:02x}")).collect();
    let declared_category = top_level_category(declared);

    let mut detected: Option<&str> = None;
    for (media_type, offset, signature) in SIGNATURE_TABLE {
        if !entry_matches(&prefix_hex, *offset, signature) {
            continue;
        }
        if *media_type == declared || top_level_category(media_type) == declared_category {
            return SignatureCheck::Ok;
        }
        detected.get_or_insert(media_type);
    }

    match detected {
        Some(media_type) => SignatureCheck::Mismatch {
            detected: media_type.to_string(),
        },
        None => SignatureCheck::Undetected,
    }
}

/// Validate declared upload metadata.
///
/// Returns the full list of human-readable problems, empty when the
/// metadata is acceptable.
pub fn validate_metadata(
    filename: &str,
    media_type: &str,
    size: u64,
    max_file_size: u64,
    allowed_types: &[String],
) -> Vec<String> {
    let mut errors = Vec::new();

    if size == 0 {
        errors.push("file size must be greater than zero".to_string());
    } else if size > max_file_size {
        errors.push(format!(
            "file size {size} exceeds maximum {max_file_size}"
        ));
    }

    if !allowed_types.iter().any(|t| t == media_type) {
        errors.push(format!("media type '{media_type}' is not allowed"));
        return errors;
    }

    match (extension_of(filename), allowed_extensions(media_type)) {
        (Some(ext), Some(allowed)) => {
            if !allowed.contains(&ext.as_str()) {
                errors.push(format!(
                    "extension '.{ext}' does not match media type '{media_type}'"
                ));
            }
        }
        (None, Some(_)) => {
            errors.push(format!("filename '{filename}' has no extension"));
        }
        // Type is allowed by configuration but unknown to the extension
        // table; nothing to cross-check.
        (_, None) => {}
    }

    errors
}
