//! Subsonic JSON payloads
//!
//! Servers differ in which fields they fill in and in whether identifiers are
//! strings or numbers, so every field here is optional and identifiers accept
//! both. Validation into strict types happens in the enumerator.

use serde::{Deserialize, Deserializer};

/// Top-level wrapper every Subsonic JSON response is enclosed in
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(rename = "subsonic-response")]
    pub(crate) response: ResponseBody<T>,
}

/// Status, optional error and method-specific payload
#[derive(Debug, Deserialize)]
pub(crate) struct ResponseBody<T> {
    pub(crate) status: String,
    #[serde(default)]
    pub(crate) error: Option<ApiErrorBody>,
    #[serde(flatten)]
    pub(crate) payload: T,
}

/// Error object of a failed response
#[derive(Debug, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub(crate) code: i64,
    #[serde(default)]
    pub(crate) message: Option<String>,
}

/// Payload of `ping` (nothing beyond the status)
#[derive(Debug, Default, Deserialize)]
pub(crate) struct Empty {}

/// Payload of `getIndexes`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct IndexesPayload {
    #[serde(default)]
    pub(crate) indexes: Option<Indexes>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Indexes {
    #[serde(default)]
    pub(crate) index: Vec<Index>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Index {
    #[serde(default)]
    pub(crate) artist: Vec<ArtistEntry>,
}

/// An artist directory listed by `getIndexes`
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ArtistEntry {
    /// Directory identifier
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    /// Artist name
    #[serde(default)]
    pub name: Option<String>,
}

/// Payload of `getMusicDirectory`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct DirectoryPayload {
    #[serde(default)]
    pub(crate) directory: Option<Directory>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct Directory {
    #[serde(default)]
    pub(crate) child: Vec<DirectoryEntry>,
}

/// A child of a music directory: either a subdirectory (album, disc) or a track
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryEntry {
    /// Entry identifier
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<String>,
    /// Whether the entry is a directory
    #[serde(default)]
    pub is_dir: bool,
    /// Title (album name for directories, track title for files)
    #[serde(default)]
    pub title: Option<String>,
    /// Album name
    #[serde(default)]
    pub album: Option<String>,
    /// Artist name
    #[serde(default)]
    pub artist: Option<String>,
    /// Native file suffix
    #[serde(default)]
    pub suffix: Option<String>,
    /// Native content type
    #[serde(default)]
    pub content_type: Option<String>,
    /// Suffix of the server's default transcode
    #[serde(default)]
    pub transcoded_suffix: Option<String>,
    /// Native file size in bytes
    #[serde(default)]
    pub size: Option<u64>,
    /// Whether the entry is a video (skipped by the enumerator)
    #[serde(default)]
    pub is_video: bool,
}

impl DirectoryEntry {
    /// A track entry with the given id and title
    pub fn track(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// A directory entry with the given id and title
    pub fn dir(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            title: Some(title.into()),
            is_dir: true,
            ..Self::default()
        }
    }
}

/// Accept identifiers encoded as JSON strings or numbers
fn lenient_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
