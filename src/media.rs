//! Media helpers for the file proxy
//!
//! Content type resolution, path normalisation and HTTP byte ranges.

/// URL prefix under which the remote store is proxied
pub const PROXY_PREFIX: &str = "/api/hidrive/files";

/// Broad classification driving timeouts, cache headers and fallbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Other,
}

impl MediaKind {
    pub fn from_path(path: &str) -> Self {
        Self::from_content_type(content_type_for(path))
    }

    pub fn from_content_type(content_type: &str) -> Self {
        if content_type.starts_with("image/") {
            MediaKind::Image
        } else if content_type.starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Other
        }
    }
}

/// Get content type from file extension
pub fn content_type_for(path: &str) -> &'static str {
    let file_name = path.rsplit('/').next().unwrap_or(path);
    let ext = match file_name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => return "application/octet-stream",
    };
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "svg" => "image/svg+xml",
        "avif" => "image/avif",
        "ico" => "image/x-icon",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "aac" => "audio/aac",
        "wav" => "audio/wav",
        "ogg" | "oga" => "audio/ogg",
        "opus" => "audio/opus",
        "flac" => "audio/flac",
        "pdf" => "application/pdf",
        "json" => "application/json",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// File extension for an uploaded MIME type
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    Some(match content_type {
        "image/png" => "png",
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/svg+xml" => "svg",
        "image/avif" => "avif",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/mp4" | "audio/x-m4a" => "m4a",
        "audio/aac" => "aac",
        "audio/wav" | "audio/x-wav" => "wav",
        "audio/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/flac" => "flac",
        _ => return None,
    })
}

/// Normalise a relative store path.
///
/// Empty and `.` segments are dropped. Returns `None` for a `..` segment,
/// a backslash or NUL byte, or a path with nothing left.
pub fn normalize_path(path: &str) -> Option<String> {
    if path.contains('\\') || path.contains('\0') {
        return None;
    }
    let mut segments = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => return None,
            s => segments.push(s),
        }
    }
    if segments.is_empty() {
        None
    } else {
        Some(segments.join("/"))
    }
}

pub fn is_safe_path(path: &str) -> bool {
    normalize_path(path).is_some()
}

/// Public proxy URL for a store path, each segment percent-encoded
pub fn proxy_url(path: &str) -> String {
    let encoded: Vec<String> = path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| urlencoding::encode(s).into_owned())
        .collect();
    format!("{}/{}", PROXY_PREFIX, encoded.join("/"))
}

/// A single range from a `Range: bytes=...` header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteRange {
    /// `start-` or `start-end`
    From { start: u64, end: Option<u64> },
    /// `-n`: the last n bytes
    Suffix(u64),
}

/// Parse a `Range` header. Multi-range requests keep the first range.
/// Syntactically invalid headers yield `None` and the caller serves the
/// whole resource.
pub fn parse_range(header: &str) -> Option<ByteRange> {
    let spec = header.trim().strip_prefix("bytes=")?;
    let first = spec.split(',').next()?.trim();
    let (start, end) = first.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return end.parse().ok().map(ByteRange::Suffix);
    }
    let start: u64 = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        let end: u64 = end.parse().ok()?;
        if end < start {
            return None;
        }
        Some(end)
    };
    Some(ByteRange::From { start, end })
}

/// Inclusive byte bounds of a partial response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedRange {
    pub start: u64,
    pub end: u64,
}

impl ResolvedRange {
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn content_range(&self, size: u64) -> String {
        format!("bytes {}-{}/{}", self.start, self.end, size)
    }
}

/// Requested range cannot be served for a resource of this size
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("range not satisfiable for {size} bytes")]
pub struct Unsatisfiable {
    pub size: u64,
}

impl Unsatisfiable {
    pub fn content_range(&self) -> String {
        format!("bytes */{}", self.size)
    }
}

/// Clamp a range to the resource size and to at most `chunk` bytes
pub fn resolve_range(
    range: ByteRange,
    size: u64,
    chunk: u64,
) -> Result<ResolvedRange, Unsatisfiable> {
    let chunk = chunk.max(1);
    if size == 0 {
        return Err(Unsatisfiable { size });
    }
    let (start, requested_end) = match range {
        ByteRange::From { start, end } => (start, end.unwrap_or(u64::MAX)),
        ByteRange::Suffix(0) => return Err(Unsatisfiable { size }),
        ByteRange::Suffix(n) => (size.saturating_sub(n), u64::MAX),
    };
    if start >= size {
        return Err(Unsatisfiable { size });
    }
    let end = requested_end
        .min(start.saturating_add(chunk - 1))
        .min(size - 1);
    Ok(ResolvedRange { start, end })
}
