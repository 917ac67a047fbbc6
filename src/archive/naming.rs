//! Archive entry naming
//!
//! Entries are laid out as `images/{date}_{title}_{shortid}.{ext}` with
//! thumbnails under `thumbnails/` carrying a `_thumb` suffix.

use crate::types::ImageRecord;
use std::collections::HashSet;

/// Longest title fragment kept in an entry name
const MAX_TITLE_LEN: usize = 60;

/// Characters of the upstream id kept in an entry name
const SHORT_ID_LEN: usize = 8;

/// Reduce free text to an ASCII name fragment
///
/// Runs of anything other than ASCII letters, digits, `_` or `-` become a
/// single `-`. Leading and trailing dashes are dropped. Returns `"untitled"`
/// when nothing usable remains.
pub fn sanitize_component(input: &str, max_len: usize) -> String {
    let mut out = String::with_capacity(input.len().min(max_len));
    let mut pending_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        } else {
            pending_dash = true;
        }
        if out.len() >= max_len {
            break;
        }
    }
    out.truncate(max_len);
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Last characters of the upstream id, ASCII alphanumerics only
pub fn short_id(id: &str) -> String {
    let cleaned: Vec<char> = id.chars().filter(char::is_ascii_alphanumeric).collect();
    let start = cleaned.len().saturating_sub(SHORT_ID_LEN);
    let short: String = cleaned[start..].iter().collect();
    if short.is_empty() {
        "noid".to_string()
    } else {
        short.to_ascii_lowercase()
    }
}

/// File extension from the last path segment of a URL
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.next_back()?;
    let (_, ext) = segment.rsplit_once('.')?;
    if ext.is_empty() || ext.len() > 5 || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// File extension implied by an image Content-Type
pub fn extension_from_content_type(content_type: &str) -> Option<&'static str> {
    let mime = content_type.split(';').next()?.trim().to_ascii_lowercase();
    match mime.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        "image/avif" => Some("avif"),
        "image/bmp" => Some("bmp"),
        "image/svg+xml" => Some("svg"),
        _ => None,
    }
}

/// Extension for an asset: URL path, then Content-Type, then `jpg`
pub fn resolve_extension(url: &str, content_type: Option<&str>) -> String {
    extension_from_url(url)
        .or_else(|| {
            content_type
                .and_then(extension_from_content_type)
                .map(str::to_string)
        })
        .unwrap_or_else(|| "jpg".to_string())
}

/// `{YYYY-MM-DD}_{title}_{shortid}` for a record
pub fn entry_stem(record: &ImageRecord) -> String {
    format!(
        "{}_{}_{}",
        record.created_at.format("%Y-%m-%d"),
        sanitize_component(&record.title, MAX_TITLE_LEN),
        short_id(&record.id)
    )
}

/// Hands out unique entry names within one archive
#[derive(Debug, Default)]
pub struct EntryNames {
    used: HashSet<String>,
}

impl EntryNames {
    /// Empty name set
    pub fn new() -> Self {
        Self::default()
    }

    /// Name of a primary image entry
    pub fn image(&mut self, record: &ImageRecord, ext: &str) -> String {
        self.unique("images/", &entry_stem(record), "", ext)
    }

    /// Name of a thumbnail entry
    pub fn thumbnail(&mut self, record: &ImageRecord, ext: &str) -> String {
        self.unique("thumbnails/", &entry_stem(record), "_thumb", ext)
    }

    fn unique(&mut self, dir: &str, stem: &str, suffix: &str, ext: &str) -> String {
        let mut name = format!("{}{}{}.{}", dir, stem, suffix, ext);
        let mut n = 2;
        while self.used.contains(&name) {
            name = format!("{}{}-{}{}.{}", dir, stem, n, suffix, ext);
            n += 1;
        }
        self.used.insert(name.clone());
        name
    }
}
