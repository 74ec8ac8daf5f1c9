use axum::http::HeaderMap;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use thiserror::Error;

/// The single media type accepted for deposit packages
pub const ACCEPTED_MEDIA_TYPE: &str = "application/zip";

/// Packaging identifier URI for BagIt packages
pub const BAGIT_PACKAGING_URI: &str = "http://purl.org/net/sword-types/bagit";

/// Header carrying the declared packaging identifier
pub const PACKAGING_HEADER: &str = "X-Packaging";

/// Known packaging formats. Dispatch on this enum, never on raw URI strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Packaging {
    Bagit,
}

impl Packaging {
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            BAGIT_PACKAGING_URI => Some(Self::Bagit),
            _ => None,
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Bagit => BAGIT_PACKAGING_URI,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Content-Disposition missing or does not carry a usable filename")]
    ContentDispositionInvalid,

    #[error("Content-MD5 header is required")]
    ChecksumMissing,

    #[error("Content-Length header is required")]
    ContentLengthMissing,

    #[error("Content-Length header is not a valid length")]
    ContentLengthInvalid,

    #[error("declared length {declared} exceeds the maximum of {max} bytes")]
    ContentTooLarge { declared: u64, max: u64 },

    #[error("unsupported media type '{0}', only application/zip is accepted")]
    UnsupportedMediaType(String),

    #[error("unknown packaging identifier '{0}'")]
    PackagingInvalid(String),
}

/// Validated description of an upload, produced before any body byte is read.
#[derive(Debug, Clone)]
pub struct UploadIntent {
    pub content_type: String,
    pub declared_length: u64,
    /// Lowercase hex digest from the Content-MD5 header
    pub expected_md5: String,
    pub packaging: Packaging,
    /// Sanitized relative path beneath the transfer directory
    pub filename: String,
}

/// Inspects the deposit request headers and either produces an
/// [`UploadIntent`] or fails with the first violated check. The check order
/// is fixed: disposition, checksum, length, size cap, media type, packaging.
pub fn validate_upload(headers: &HeaderMap, max_size: u64) -> Result<UploadIntent, ValidationError> {
    // 1. Content-Disposition with a safe relative filename
    let filename = headers
        .get(CONTENT_DISPOSITION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_disposition)
        .ok_or(ValidationError::ContentDispositionInvalid)?;

    // 2. Checksum must be declared up front
    let expected_md5 = headers
        .get("Content-MD5")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .ok_or(ValidationError::ChecksumMissing)?;

    // 3. Declared length
    let length_header = headers
        .get(CONTENT_LENGTH)
        .ok_or(ValidationError::ContentLengthMissing)?;
    let declared_length: u64 = length_header
        .to_str()
        .ok()
        .map(str::trim)
        // Digits only; `parse` alone would also take a leading '+'
        .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
        .and_then(|v| v.parse().ok())
        .ok_or(ValidationError::ContentLengthInvalid)?;

    // 4. Size cap, enforced before the body is touched
    if declared_length > max_size {
        return Err(ValidationError::ContentTooLarge {
            declared: declared_length,
            max: max_size,
        });
    }

    // 5. Media type
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let essence = content_type
        .parse::<mime::Mime>()
        .map(|m| m.essence_str().to_ascii_lowercase())
        .unwrap_or_default();
    if essence != ACCEPTED_MEDIA_TYPE {
        return Err(ValidationError::UnsupportedMediaType(content_type));
    }

    // 6. Packaging identifier
    let packaging_value = headers
        .get(PACKAGING_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string();
    let packaging = Packaging::from_uri(&packaging_value)
        .ok_or(ValidationError::PackagingInvalid(packaging_value))?;

    Ok(UploadIntent {
        content_type: essence,
        declared_length,
        expected_md5,
        packaging,
        filename,
    })
}

/// Extracts the filename from an `attachment; filename=...` disposition.
/// Returns None unless the result is a safe relative path.
fn parse_content_disposition(value: &str) -> Option<String> {
    let mut parts = value.split(';');
    let disposition = parts.next()?.trim();
    if !disposition.eq_ignore_ascii_case("attachment") {
        return None;
    }

    // Parameter names are case-insensitive
    let filename = parts.find_map(|p| {
        let (key, value) = p.trim().split_once('=')?;
        key.trim().eq_ignore_ascii_case("filename").then_some(value)
    })?;
    let filename = filename.trim().trim_matches('"');

    if is_safe_relative_path(filename) {
        Some(filename.to_string())
    } else {
        None
    }
}

/// A path is safe when it is non-empty, relative, uses forward slashes only
/// and contains no parent-directory or empty segments.
pub fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() || path.starts_with('/') {
        return false;
    }
    if path.contains('\\') || path.contains('\0') {
        return false;
    }
    path.split('/').all(|seg| !seg.is_empty() && seg != ".." && seg != ".")
}
