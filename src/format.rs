//! Audio format and content-type to file extension tables
//!
//! Both mappings are pure: the same input always yields the same extension,
//! which keeps destination paths deterministic.

/// Extension used when nothing else is known about a track
pub const FALLBACK_EXTENSION: &str = "bin";

/// Map a declared format or suffix (as used by Subsonic's `format` parameter
/// and `suffix` fields) to the extension written on disk.
///
/// Unknown formats are used as-is, lowercased.
pub fn extension_for_format(format: &str) -> String {
    let format = format.trim().trim_start_matches('.').to_ascii_lowercase();
    let mapped = match format.as_str() {
        "mp3" | "mpeg" => "mp3",
        "flac" => "flac",
        "aac" | "alac" | "m4a" | "mp4" => "m4a",
        "ogg" | "vorbis" | "oga" => "ogg",
        "opus" => "opus",
        "wav" | "wave" => "wav",
        "aif" | "aiff" => "aiff",
        "wma" => "wma",
        _ => return format,
    };
    mapped.to_string()
}

/// Map an HTTP content type to an extension, or `None` when it is not a known audio type.
///
/// Parameters such as `; charset=` are ignored.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    let ext = match essence.as_str() {
        "audio/mpeg" | "audio/mp3" | "audio/mpeg3" | "audio/x-mpeg" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" | "audio/x-aac"
        | "audio/aacp" => "m4a",
        "audio/ogg" | "audio/vorbis" | "application/ogg" => "ogg",
        "audio/opus" => "opus",
        "audio/wav" | "audio/x-wav" | "audio/wave" | "audio/vnd.wave" => "wav",
        "audio/aiff" | "audio/x-aiff" => "aiff",
        "audio/x-ms-wma" => "wma",
        other if other.starts_with("audio/") && other.contains("aac") => "m4a",
        _ => return None,
    };
    Some(ext)
}

/// Whether a content type denotes a Subsonic error envelope rather than audio
pub fn is_error_envelope(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim();
    essence.ends_with("json") || essence.ends_with("xml")
}
