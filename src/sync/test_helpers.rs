//! Shared test helpers: an in-memory [`LibraryApi`] with fault injection and
//! instrumentation for concurrency assertions.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream;

use crate::config::TranscodeOptions;
use crate::error::{Error, Result};
use crate::subsonic::{ArtistEntry, AudioStream, DirectoryEntry, LibraryApi};
use crate::types::TrackId;

/// Failure injected into a track's stream
#[derive(Clone, Copy, Debug)]
pub(crate) enum StreamFault {
    /// Every open fails with a refused connection
    Refused,
    /// The first `n` opens fail with a refused connection
    RefusedTimes(usize),
    /// The body errors after its first chunk
    ResetAfterFirstChunk,
    /// The first `n` bodies error after their first chunk
    ResetTimes(usize),
    /// The body ends before the declared content length
    Truncated,
    /// The body never finishes
    Stall,
    /// Opening the stream panics
    Panic,
}

/// Keeps the active-stream counter raised while a body is alive
struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl ActiveGuard {
    fn enter(active: Arc<AtomicUsize>, max_active: &AtomicUsize) -> Self {
        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
        max_active.fetch_max(now, Ordering::SeqCst);
        Self { active }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// In-memory library
#[derive(Default)]
pub(crate) struct FakeLibrary {
    artists: Vec<ArtistEntry>,
    directories: HashMap<String, Vec<DirectoryEntry>>,
    payloads: HashMap<String, Vec<u8>>,
    faults: HashMap<String, StreamFault>,
    failing_listing: Option<String>,
    content_type: Option<String>,
    stream_delay: Duration,
    stream_calls: AtomicUsize,
    calls_per_track: Mutex<HashMap<String, usize>>,
    active: Arc<AtomicUsize>,
    max_active: AtomicUsize,
}

impl FakeLibrary {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add an album; tracks are `(id, title)` pairs with an mp3 payload derived from the id
    pub(crate) fn with_album(mut self, artist: &str, album: &str, tracks: &[(&str, &str)]) -> Self {
        let artist_id = format!("artist:{artist}");
        let album_id = format!("album:{artist}:{album}");

        if !self.artists.iter().any(|a| a.id.as_deref() == Some(&artist_id)) {
            self.artists.push(ArtistEntry {
                id: Some(artist_id.clone()),
                name: Some(artist.to_string()),
            });
        }
        self.directories
            .entry(artist_id)
            .or_default()
            .push(DirectoryEntry::dir(&album_id, album));

        let children = self.directories.entry(album_id).or_default();
        for (id, title) in tracks {
            let mut entry = DirectoryEntry::track(*id, *title);
            entry.artist = Some(artist.to_string());
            entry.album = Some(album.to_string());
            entry.suffix = Some("mp3".into());
            children.push(entry);
            self.payloads
                .insert(id.to_string(), format!("audio:{id}").into_bytes());
        }
        self
    }

    /// Add raw children to a directory
    pub(crate) fn with_directory(mut self, id: &str, children: Vec<DirectoryEntry>) -> Self {
        self.directories.entry(id.to_string()).or_default().extend(children);
        self
    }

    /// Add an artist entry as-is
    pub(crate) fn with_artist(mut self, artist: ArtistEntry) -> Self {
        self.artists.push(artist);
        self
    }

    pub(crate) fn with_payload(mut self, id: &str, payload: &[u8]) -> Self {
        self.payloads.insert(id.to_string(), payload.to_vec());
        self
    }

    pub(crate) fn with_fault(mut self, id: &str, fault: StreamFault) -> Self {
        self.payloads
            .entry(id.to_string())
            .or_insert_with(|| format!("audio:{id}").into_bytes());
        self.faults.insert(id.to_string(), fault);
        self
    }

    /// Make listing the given directory (or "artists" for the index) fail
    pub(crate) fn with_failing_listing(mut self, id: &str) -> Self {
        self.failing_listing = Some(id.to_string());
        self
    }

    pub(crate) fn with_content_type(mut self, content_type: &str) -> Self {
        self.content_type = Some(content_type.to_string());
        self
    }

    /// Delay before every body chunk
    pub(crate) fn with_stream_delay(mut self, delay: Duration) -> Self {
        self.stream_delay = delay;
        self
    }

    pub(crate) fn stream_calls(&self) -> usize {
        self.stream_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn calls_for(&self, id: &str) -> usize {
        self.calls_per_track
            .lock()
            .unwrap()
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub(crate) fn max_concurrent_streams(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn listing(&self, id: &str) -> Result<Vec<DirectoryEntry>> {
        if self.failing_listing.as_deref() == Some(id) {
            return Err(Error::HttpStatus {
                status: 500,
                url: format!("fake://getMusicDirectory?id={id}"),
            });
        }
        Ok(self.directories.get(id).cloned().unwrap_or_default())
    }
}

fn refused() -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::ConnectionRefused,
        "connection refused",
    ))
}

#[async_trait::async_trait]
impl LibraryApi for FakeLibrary {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_artists(&self) -> Result<Vec<ArtistEntry>> {
        if self.failing_listing.as_deref() == Some("artists") {
            return Err(refused());
        }
        Ok(self.artists.clone())
    }

    async fn list_albums(&self, artist_id: &str) -> Result<Vec<DirectoryEntry>> {
        self.listing(artist_id)
    }

    async fn list_tracks(&self, album_id: &str) -> Result<Vec<DirectoryEntry>> {
        self.listing(album_id)
    }

    async fn open_stream(
        &self,
        track_id: &TrackId,
        _transcode: &TranscodeOptions,
    ) -> Result<AudioStream> {
        let id = track_id.as_str();
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        let attempt = {
            let mut calls = self.calls_per_track.lock().unwrap();
            let count = calls.entry(id.to_string()).or_default();
            *count += 1;
            *count
        };

        let fault = self.faults.get(id).copied();
        match fault {
            Some(StreamFault::Refused) => return Err(refused()),
            Some(StreamFault::RefusedTimes(n)) if attempt <= n => return Err(refused()),
            Some(StreamFault::Panic) => panic!("injected panic opening track {id}"),
            _ => {}
        }

        let payload = self.payloads.get(id).cloned().ok_or_else(|| Error::Api {
            code: 70,
            message: format!("track {id} not found"),
        })?;
        let guard = ActiveGuard::enter(Arc::clone(&self.active), &self.max_active);

        let split = payload.len().div_ceil(2).max(1).min(payload.len());
        let first = Bytes::copy_from_slice(&payload[..split]);
        let rest = Bytes::copy_from_slice(&payload[split..]);
        let mut content_length = Some(payload.len() as u64);

        let reset = match fault {
            Some(StreamFault::ResetAfterFirstChunk) => true,
            Some(StreamFault::ResetTimes(n)) => attempt <= n,
            _ => false,
        };
        let chunks: Vec<Result<Bytes>> = match fault {
            _ if reset => vec![
                Ok(first),
                Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ))),
            ],
            Some(StreamFault::Truncated) => {
                content_length = Some(payload.len() as u64 + 16);
                vec![Ok(first), Ok(rest)]
            }
            _ => vec![Ok(first), Ok(rest)],
        };

        let delay = self.stream_delay;
        let body = stream::iter(chunks).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            chunk
        });
        let body = if matches!(fault, Some(StreamFault::Stall)) {
            body.take(1).chain(stream::pending()).boxed()
        } else {
            body.boxed()
        };
        let body = body
            .map(move |chunk| {
                let _alive = &guard;
                chunk
            })
            .boxed();

        Ok(AudioStream {
            content_type: self.content_type.clone(),
            content_length,
            body,
        })
    }
}

/// Every file under `root`, relative and sorted
pub(crate) fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.path().strip_prefix(root).ok().map(Path::to_path_buf))
        .collect();
    files.sort();
    files
}
