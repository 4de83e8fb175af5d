//! Core types for downsonic

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::TranscodeOptions;
use crate::error::{FailureKind, Severity};

/// Server-assigned identifier of a track
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub String);

impl TrackId {
    /// Create a new TrackId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Immutable description of one remote track, validated at the enumeration boundary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    /// Server-assigned identifier
    pub id: TrackId,
    /// Track title
    pub title: String,
    /// Artist name (tracks without an artist land at the destination root)
    pub artist: Option<String>,
    /// Album name
    pub album: Option<String>,
    /// Native file suffix reported by the server (e.g. "flac")
    pub suffix: Option<String>,
    /// Native content type reported by the server (e.g. "audio/flac")
    pub content_type: Option<String>,
    /// Suffix the server reports it will transcode to by default
    pub transcoded_suffix: Option<String>,
    /// Size hint in bytes for the native file
    pub size: Option<u64>,
}

impl TrackDescriptor {
    /// Create a descriptor with only the required fields set
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: TrackId::new(id),
            title: title.into(),
            artist: None,
            album: None,
            suffix: None,
            content_type: None,
            transcoded_suffix: None,
            size: None,
        }
    }

    /// Set the artist and album
    #[must_use]
    pub fn with_position(mut self, artist: impl Into<String>, album: impl Into<String>) -> Self {
        self.artist = Some(artist.into());
        self.album = Some(album.into());
        self
    }

    /// Set the native suffix
    #[must_use]
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffix = Some(suffix.into());
        self
    }
}

/// Local location a track is written to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DestinationPath {
    /// Path relative to the destination root (directories + filename + extension)
    pub relative: PathBuf,
    /// Extension the file is written with, without the leading dot
    pub extension: String,
}

impl DestinationPath {
    /// Absolute location under `root`
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.relative)
    }
}

impl std::fmt::Display for DestinationPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}

/// One unit of work for a transfer worker
#[derive(Clone, Debug)]
pub struct TransferRequest {
    /// Track being transferred
    pub track: TrackDescriptor,
    /// Where the track is written
    pub destination: DestinationPath,
    /// Transcoding parameters sent with the stream request
    pub transcode: TranscodeOptions,
}

/// Why a track was not transferred
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// A file already exists at the destination path
    AlreadyPresent,
    /// Another track of this run maps to the same destination path
    DuplicateDestination,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::AlreadyPresent => f.write_str("already present"),
            SkipReason::DuplicateDestination => {
                f.write_str("another track maps to the same destination")
            }
        }
    }
}

/// Result of handling one transfer request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TransferOutcome {
    /// The track was written to its destination path
    Downloaded {
        /// Number of bytes written
        bytes: u64,
    },
    /// The track was not requested
    Skipped {
        /// Why it was skipped
        reason: SkipReason,
    },
    /// The transfer failed; nothing was left at the destination path
    Failed {
        /// Failure classification
        kind: FailureKind,
        /// Human-readable message
        message: String,
    },
    /// The run was cancelled before this track completed
    Cancelled,
}

impl TransferOutcome {
    /// Whether this outcome counts as a failure for the exit code
    pub fn is_failure(&self) -> bool {
        matches!(self, TransferOutcome::Failed { .. })
    }
}

/// A failed track, as kept in the run summary
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackFailure {
    /// Track identifier
    pub id: TrackId,
    /// Track title
    pub title: String,
    /// Failure classification
    pub kind: FailureKind,
    /// Human-readable message
    pub message: String,
}

/// A leveled log event recorded by the progress aggregator
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEvent {
    /// Event severity
    pub severity: Severity,
    /// Event message
    pub message: String,
}

/// Counts exposed to a display layer while a run is in progress
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// Tracks enumerated so far
    pub total: u64,
    /// Tracks waiting for a worker
    pub queued: u64,
    /// Tracks currently being transferred
    pub active: u64,
    /// Tracks written
    pub downloaded: u64,
    /// Tracks skipped
    pub skipped: u64,
    /// Tracks failed
    pub failed: u64,
    /// Tracks cancelled
    pub cancelled: u64,
    /// Bytes written across all completed tracks
    pub bytes: u64,
}

impl ProgressSnapshot {
    /// Tracks that have reached an outcome
    pub fn resolved(&self) -> u64 {
        self.downloaded + self.skipped + self.failed + self.cancelled
    }
}

/// Aggregate result of one run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Tracks enumerated
    pub total: u64,
    /// Tracks written
    pub downloaded: u64,
    /// Tracks skipped
    pub skipped: u64,
    /// Tracks failed
    pub failed: u64,
    /// Tracks cancelled
    pub cancelled: u64,
    /// Bytes written
    pub bytes: u64,
    /// Every failed track
    pub failures: Vec<TrackFailure>,
    /// Every log event recorded during the run, at all severities
    pub events: Vec<LogEvent>,
    /// Whether the run was interrupted
    pub interrupted: bool,
}

impl RunSummary {
    /// Whether any track ended in `Failed`
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Log events at or above the given severity
    pub fn events_at_least(&self, severity: Severity) -> impl Iterator<Item = &LogEvent> {
        self.events.iter().filter(move |e| e.severity <= severity)
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} downloaded, {} skipped, {} failed",
            self.downloaded, self.skipped, self.failed
        )?;
        if self.cancelled > 0 {
            write!(f, ", {} cancelled", self.cancelled)?;
        }
        Ok(())
    }
}
