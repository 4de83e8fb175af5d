//! Subsonic API collaborator
//!
//! - [`LibraryApi`] - the narrow interface the sync engine consumes
//! - [`client`] - reqwest-backed implementation talking to an OpenSubsonic server
//! - [`models`] - loosely typed JSON payloads

mod client;
mod models;

pub use client::SubsonicClient;
pub use models::{ArtistEntry, DirectoryEntry};

use bytes::Bytes;
use futures::stream::BoxStream;

use crate::config::TranscodeOptions;
use crate::error::Result;
use crate::types::TrackId;

/// Body of a stream response, chunk by chunk
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// An opened audio stream
pub struct AudioStream {
    /// Content type the server declared for the body
    pub content_type: Option<String>,
    /// Length the server declared for the body
    pub content_length: Option<u64>,
    /// The body
    pub body: ByteStream,
}

impl std::fmt::Debug for AudioStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Remote music library, already authenticated.
#[async_trait::async_trait]
pub trait LibraryApi: Send + Sync {
    /// Verify connectivity and credentials
    async fn ping(&self) -> Result<()>;

    /// Every artist directory in the library
    async fn list_artists(&self) -> Result<Vec<ArtistEntry>>;

    /// Children of an artist directory (normally albums)
    async fn list_albums(&self, artist_id: &str) -> Result<Vec<DirectoryEntry>>;

    /// Children of an album directory (normally tracks, sometimes disc subdirectories)
    async fn list_tracks(&self, album_id: &str) -> Result<Vec<DirectoryEntry>>;

    /// Open the (possibly transcoded) byte stream of a track
    async fn open_stream(
        &self,
        track_id: &TrackId,
        transcode: &TranscodeOptions,
    ) -> Result<AudioStream>;
}
