//! Library enumeration
//!
//! Walks the artist index, each artist's directory and each album directory
//! (recursing into nested directories such as per-disc folders) and yields
//! one [`TrackDescriptor`] per track. Listing calls are issued lazily as the
//! stream is polled. Any listing failure or malformed entry ends the stream
//! with an error; a partial listing is never returned as success.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::{self, BoxStream};

use crate::error::{Error, Result};
use crate::subsonic::{DirectoryEntry, LibraryApi};
use crate::types::TrackDescriptor;

/// Stream every track of the library, depth first in server order
pub fn tracks(api: Arc<dyn LibraryApi>) -> BoxStream<'static, Result<TrackDescriptor>> {
    stream::try_unfold(Walk::new(api), |mut walk| async move {
        let next = walk.next_track().await?;
        Ok(next.map(|track| (track, walk)))
    })
    .boxed()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Level {
    Artist,
    Album,
}

/// A directory still to be listed, with the names inherited from its parents
#[derive(Debug)]
struct PendingDir {
    id: String,
    level: Level,
    artist: Option<String>,
    album: Option<String>,
}

struct Walk {
    api: Arc<dyn LibraryApi>,
    started: bool,
    dirs: VecDeque<PendingDir>,
    ready: VecDeque<TrackDescriptor>,
}

impl Walk {
    fn new(api: Arc<dyn LibraryApi>) -> Self {
        Self {
            api,
            started: false,
            dirs: VecDeque::new(),
            ready: VecDeque::new(),
        }
    }

    async fn next_track(&mut self) -> Result<Option<TrackDescriptor>> {
        loop {
            if let Some(track) = self.ready.pop_front() {
                return Ok(Some(track));
            }

            if !self.started {
                self.started = true;
                self.load_artists().await?;
                continue;
            }

            let Some(dir) = self.dirs.pop_front() else {
                return Ok(None);
            };
            self.expand(dir).await?;
        }
    }

    async fn load_artists(&mut self) -> Result<()> {
        let artists = self.api.list_artists().await?;
        tracing::debug!(artists = artists.len(), "listed artist index");

        for artist in artists {
            let id = artist.id.ok_or_else(|| {
                Error::InvalidResponse(format!(
                    "artist {} has no id",
                    artist.name.as_deref().unwrap_or("<unnamed>")
                ))
            })?;
            self.dirs.push_back(PendingDir {
                id,
                level: Level::Artist,
                artist: artist.name.filter(|n| !n.trim().is_empty()),
                album: None,
            });
        }
        Ok(())
    }

    async fn expand(&mut self, dir: PendingDir) -> Result<()> {
        let children = match dir.level {
            Level::Artist => self.api.list_albums(&dir.id).await?,
            Level::Album => self.api.list_tracks(&dir.id).await?,
        };

        let mut subdirs = Vec::new();
        for child in children {
            if child.is_video {
                continue;
            }
            if child.is_dir {
                subdirs.push(subdirectory(&dir, child)?);
            } else {
                self.ready.push_back(descriptor(&dir, child)?);
            }
        }

        // Depth first: nested directories are listed before the parent's siblings
        for subdir in subdirs.into_iter().rev() {
            self.dirs.push_front(subdir);
        }
        Ok(())
    }
}

fn subdirectory(parent: &PendingDir, entry: DirectoryEntry) -> Result<PendingDir> {
    let id = entry.id.ok_or_else(|| {
        Error::InvalidResponse(format!("directory in {} has no id", parent.id))
    })?;
    let album = match parent.level {
        Level::Artist => entry.title.or(entry.album),
        // Disc folders and the like stay part of the enclosing album
        Level::Album => parent.album.clone(),
    };
    Ok(PendingDir {
        id,
        level: Level::Album,
        artist: parent.artist.clone(),
        album,
    })
}

fn descriptor(parent: &PendingDir, entry: DirectoryEntry) -> Result<TrackDescriptor> {
    let id = entry
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::InvalidResponse(format!("track in {} has no id", parent.id)))?;
    let title = entry
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| Error::InvalidResponse(format!("track {id} has no title")))?;

    let non_blank = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
    let mut track = TrackDescriptor::new(id, title);
    track.artist = non_blank(entry.artist).or_else(|| parent.artist.clone());
    track.album = non_blank(entry.album).or_else(|| parent.album.clone());
    track.suffix = entry.suffix;
    track.content_type = entry.content_type;
    track.transcoded_suffix = entry.transcoded_suffix;
    track.size = entry.size;
    Ok(track)
}
