//! Durable storage for media attachments

mod file;

use sha2::{Digest, Sha256};

pub use file::FileMediaStore;

/// File extension for a media content type
///
/// Falls back to the extension of the URL path, then to `bin`. Provider
/// URLs for encrypted payloads end in `.enc`, which is never used.
#[must_use]
pub fn extension_for(content_type: Option<&str>, source_url: &str) -> String {
    let mime = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    let known = match mime.as_deref() {
        Some("image/jpeg" | "image/jpg") => Some("jpg"),
        Some("image/png") => Some("png"),
        Some("image/webp") => Some("webp"),
        Some("image/gif") => Some("gif"),
        Some("audio/ogg" | "audio/opus") => Some("ogg"),
        Some("audio/mpeg" | "audio/mp3") => Some("mp3"),
        Some("audio/mp4" | "audio/aac") => Some("m4a"),
        Some("video/mp4") => Some("mp4"),
        Some("video/3gpp") => Some("3gp"),
        Some("application/pdf") => Some("pdf"),
        _ => None,
    };
    if let Some(ext) = known {
        return ext.to_string();
    }

    let path = source_url.split(['?', '#']).next().unwrap_or_default();
    let from_url = path
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| {
            ext != "enc"
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        });

    from_url.unwrap_or_else(|| "bin".to_string())
}

/// Reduce an identifier to characters safe in a file name
///
/// Identifiers that change under sanitization get a short digest of the raw
/// value appended, so `A.B` and `A/B` never share a file.
#[must_use]
pub fn sanitize_component(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if !cleaned.is_empty() && cleaned == raw {
        return cleaned;
    }

    let digest = hex::encode(Sha256::digest(raw.as_bytes()));
    format!("{cleaned}-{}", &digest[..8])
}
