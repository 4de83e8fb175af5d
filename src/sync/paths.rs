//! Deterministic mapping from a track to its local path
//!
//! Layout is `<artist>/<album>/<title>.<ext>`. Tracks without an album go
//! straight into the artist directory, tracks without an artist land at the
//! destination root. Every segment is sanitized so server-supplied names can
//! never escape the destination or produce an unwritable filename.

use std::path::PathBuf;

use crate::config::SyncConfig;
use crate::format::{FALLBACK_EXTENSION, extension_for_content_type, extension_for_format};
use crate::types::{DestinationPath, TrackDescriptor};

/// Replacement for characters that cannot appear in a path segment
const REPLACEMENT: char = '-';

/// Segment used when a name sanitizes to nothing
const PLACEHOLDER: &str = "_";

/// Map a track to the path it is written to under the destination root
pub fn map(track: &TrackDescriptor, config: &SyncConfig) -> DestinationPath {
    let extension = sanitize_segment(&resolve_extension(track, config));

    let mut relative = PathBuf::new();
    if let Some(artist) = track.artist.as_deref() {
        relative.push(sanitize_segment(artist));
        if let Some(album) = track.album.as_deref() {
            relative.push(sanitize_segment(album));
        }
    }
    relative.push(format!("{}.{extension}", sanitize_segment(&track.title)));

    DestinationPath {
        relative,
        extension,
    }
}

/// Pick the extension a track is saved with.
///
/// Precedence: explicit override, requested transcode target, the server's
/// default transcode suffix (only when no format was requested), the native
/// suffix, the native content type, and finally [`FALLBACK_EXTENSION`].
pub fn resolve_extension(track: &TrackDescriptor, config: &SyncConfig) -> String {
    if let Some(ext) = config.extension_override() {
        return ext.to_string();
    }
    if let Some(target) = config.transcode.target_format() {
        return extension_for_format(target);
    }
    if config.transcode.format.is_none() {
        if let Some(suffix) = non_empty(track.transcoded_suffix.as_deref()) {
            return extension_for_format(suffix);
        }
    }
    if let Some(suffix) = non_empty(track.suffix.as_deref()) {
        return extension_for_format(suffix);
    }
    track
        .content_type
        .as_deref()
        .and_then(extension_for_content_type)
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

/// Make a server-supplied name safe to use as a single path segment
pub fn sanitize_segment(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => REPLACEMENT,
            c if c.is_control() => REPLACEMENT,
            c => c,
        })
        .collect();

    // Trailing dots and spaces are stripped by some filesystems, which would
    // make the existence check miss files written by an earlier run
    let trimmed = replaced.trim().trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "." || trimmed == ".." {
        return PLACEHOLDER.to_string();
    }

    // Windows refuses device names as a file stem whatever the extension
    let stem_len = trimmed.find('.').unwrap_or(trimmed.len());
    let (stem, rest) = trimmed.split_at(stem_len);
    if is_reserved_device_name(stem.trim_end()) {
        format!("{stem}{PLACEHOLDER}{rest}")
    } else {
        trimmed.to_string()
    }
}

fn is_reserved_device_name(stem: &str) -> bool {
    const DEVICES: [&str; 4] = ["CON", "PRN", "AUX", "NUL"];
    let upper = stem.to_ascii_uppercase();
    if DEVICES.contains(&upper.as_str()) {
        return true;
    }
    match upper.as_bytes() {
        [b'C', b'O', b'M', digit] | [b'L', b'P', b'T', digit] => digit.is_ascii_digit(),
        _ => false,
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
