//! Transfer worker: streams one track into its destination path.
//!
//! Bytes go to a hidden `.part` file next to the destination and are renamed
//! into place only after the whole body was written and synced, so a file at
//! a destination path is always complete. Failed or cancelled attempts remove
//! their partial file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::TryStreamExt;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::error::{Error, Result, Severity};
use crate::format::{extension_for_content_type, extension_for_format};
use crate::retry::with_retry_notify;
use crate::subsonic::LibraryApi;
use crate::types::{TransferOutcome, TransferRequest};

use super::progress::Progress;

/// Suffix of in-progress files
const PART_SUFFIX: &str = "part";

/// Length of the random component of in-progress file names
const PART_RANDOM_LEN: usize = 8;

/// Write buffer size
const WRITE_BUFFER_SIZE: usize = 256 * 1024;

/// Executes transfer requests against a [`LibraryApi`]
pub struct TransferWorker {
    api: Arc<dyn LibraryApi>,
    root: PathBuf,
    retry: RetryConfig,
    progress: Arc<Progress>,
    extension_override: bool,
}

impl TransferWorker {
    /// Create a worker writing under `root`
    pub fn new(
        api: Arc<dyn LibraryApi>,
        root: impl Into<PathBuf>,
        retry: RetryConfig,
        progress: Arc<Progress>,
    ) -> Self {
        Self {
            api,
            root: root.into(),
            retry,
            progress,
            extension_override: false,
        }
    }

    /// Mark destination extensions as user-chosen, which turns off the
    /// served-format check when no transcode target was requested
    #[must_use]
    pub fn with_extension_override(mut self, enabled: bool) -> Self {
        self.extension_override = enabled;
        self
    }

    /// Download one track, retrying transient failures.
    ///
    /// Never returns an error: every failure is folded into the outcome.
    pub async fn transfer(
        &self,
        request: &TransferRequest,
        cancel: &CancellationToken,
    ) -> TransferOutcome {
        if cancel.is_cancelled() {
            return TransferOutcome::Cancelled;
        }

        let target = request.destination.under(&self.root);
        let target = target.as_path();

        let attempts = with_retry_notify(
            &self.retry,
            move || self.attempt(request, target),
            |error, retry, delay| {
                self.progress.log(
                    Severity::Warning,
                    format!(
                        "{}: {error}, retry {retry} of {} in {} ms",
                        request.track.title,
                        self.retry.max_attempts,
                        delay.as_millis()
                    ),
                );
            },
        );

        // Dropping the in-flight attempt on cancellation removes its part file
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = attempts => result,
        };

        match result {
            Ok(bytes) => TransferOutcome::Downloaded { bytes },
            Err(Error::Cancelled) => TransferOutcome::Cancelled,
            Err(e) => TransferOutcome::Failed {
                kind: e.failure_kind(),
                message: e.to_string(),
            },
        }
    }

    async fn attempt(&self, request: &TransferRequest, target: &Path) -> Result<u64> {
        let parent = target.parent().ok_or_else(|| {
            Error::Other(format!("{} has no parent directory", target.display()))
        })?;
        tokio::fs::create_dir_all(parent).await?;

        let stream = self
            .api
            .open_stream(&request.track.id, &request.transcode)
            .await?;

        let mut part = PartFile::beside(target)?;
        let file = tokio::fs::File::create(&part.path).await?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_SIZE, file);

        let mut body = stream.body;
        let mut written: u64 = 0;
        while let Some(chunk) = body.try_next().await? {
            writer.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        if let Some(expected) = stream.content_length {
            if written != expected {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("stream ended after {written} of {expected} bytes"),
                )));
            }
        }

        writer.flush().await?;
        writer.get_ref().sync_all().await?;
        drop(writer);

        tokio::fs::rename(&part.path, target).await?;
        part.persisted();

        // Only the attempt that produced the file reports on its format
        self.check_served_format(request, stream.content_type.as_deref());
        self.progress.log(
            Severity::Debug,
            format!("{} written to {}", request.track.title, target.display()),
        );
        Ok(written)
    }

    /// Warn when the server serves something other than what the file is named as
    fn check_served_format(&self, request: &TransferRequest, content_type: Option<&str>) {
        let Some(served) = content_type.and_then(extension_for_content_type) else {
            return;
        };

        let expected = match request.transcode.target_format() {
            Some(target) => extension_for_format(target),
            None if self.extension_override => return,
            None => request.destination.extension.clone(),
        };

        if served != expected {
            self.progress.log(
                Severity::Warning,
                format!(
                    "{}: server sent {served} data, saving as .{}",
                    request.track.title, request.destination.extension
                ),
            );
        }
    }
}

/// In-progress file next to its destination, removed on drop unless persisted
struct PartFile {
    path: PathBuf,
    keep: bool,
}

impl PartFile {
    fn beside(target: &Path) -> Result<Self> {
        let name = target
            .file_name()
            .ok_or_else(|| Error::Other(format!("{} has no file name", target.display())))?
            .to_string_lossy();
        let random: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(PART_RANDOM_LEN)
            .map(char::from)
            .collect();
        Ok(Self {
            path: target.with_file_name(format!(".{name}.{random}.{PART_SUFFIX}")),
            keep: false,
        })
    }

    fn persisted(&mut self) {
        self.keep = true;
    }
}

impl Drop for PartFile {
    // Drop cannot await; a single unlink is cheap enough to run inline
    fn drop(&mut self) {
        if !self.keep {
            if let Err(e) = std::fs::remove_file(&self.path) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %self.path.display(), error = %e, "failed to remove partial file");
                }
            }
        }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TranscodeOptions;
    use crate::error::FailureKind;
    use crate::sync::test_helpers::{FakeLibrary, StreamFault, files_under};
    use crate::types::{DestinationPath, TrackDescriptor};
    use std::time::Duration;
    use tempfile::TempDir;

    fn request(id: &str, relative: &str) -> TransferRequest {
        TransferRequest {
            track: TrackDescriptor::new(id, format!("Track {id}")).with_suffix("mp3"),
            destination: DestinationPath {
                relative: PathBuf::from(relative),
                extension: "mp3".into(),
            },
            transcode: TranscodeOptions::default(),
        }
    }

    fn worker(library: Arc<FakeLibrary>, root: &Path) -> (TransferWorker, Arc<Progress>) {
        let progress = Arc::new(Progress::new());
        let worker = TransferWorker::new(
            library,
            root,
            RetryConfig::disabled(),
            Arc::clone(&progress),
        );
        (worker, progress)
    }

    #[tokio::test]
    async fn writes_stream_to_destination() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_payload("1", b"hello world"));
        let (worker, _) = worker(library, root.path());

        let outcome = worker
            .transfer(&request("1", "A/B/Track 1.mp3"), &CancellationToken::new())
            .await;

        assert_eq!(outcome, TransferOutcome::Downloaded { bytes: 11 });
        let written = std::fs::read(root.path().join("A/B/Track 1.mp3")).unwrap();
        assert_eq!(written, b"hello world");
        assert_eq!(files_under(root.path()), vec![PathBuf::from("A/B/Track 1.mp3")]);
    }

    #[tokio::test]
    async fn open_failure_leaves_nothing_behind() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_fault("1", StreamFault::Refused));
        let (worker, _) = worker(library, root.path());

        let outcome = worker
            .transfer(&request("1", "Track 1.mp3"), &CancellationToken::new())
            .await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed {
                kind: FailureKind::Network,
                ..
            }
        ));
        assert!(files_under(root.path()).is_empty());
    }

    #[tokio::test]
    async fn mid_stream_failure_removes_partial_file() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_fault("1", StreamFault::ResetAfterFirstChunk));
        let (worker, _) = worker(library, root.path());

        let outcome = worker
            .transfer(&request("1", "A/Track 1.mp3"), &CancellationToken::new())
            .await;

        assert!(outcome.is_failure());
        assert!(!root.path().join("A/Track 1.mp3").exists());
        assert!(files_under(root.path()).is_empty(), "no part file may remain");
    }

    #[tokio::test]
    async fn short_body_is_a_failure() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_fault("1", StreamFault::Truncated));
        let (worker, _) = worker(library, root.path());

        let outcome = worker
            .transfer(&request("1", "Track 1.mp3"), &CancellationToken::new())
            .await;

        assert!(outcome.is_failure());
        assert!(files_under(root.path()).is_empty());
    }

    #[tokio::test]
    async fn transient_failure_is_retried() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_fault("1", StreamFault::RefusedTimes(1)));
        let progress = Arc::new(Progress::new());
        let retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let worker = TransferWorker::new(library.clone(), root.path(), retry, progress);

        let outcome = worker
            .transfer(&request("1", "Track 1.mp3"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, TransferOutcome::Downloaded { .. }));
        assert_eq!(library.stream_calls(), 2);
    }

    #[tokio::test]
    async fn retried_transfer_records_one_retry_and_one_format_warning() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(
            FakeLibrary::new()
                .with_fault("1", StreamFault::ResetTimes(1))
                .with_content_type("audio/ogg"),
        );
        let progress = Arc::new(Progress::new());
        let retry = RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            backoff_multiplier: 2.0,
            jitter: false,
        };
        let worker =
            TransferWorker::new(library.clone(), root.path(), retry, Arc::clone(&progress));

        let outcome = worker
            .transfer(&request("1", "Track 1.mp3"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, TransferOutcome::Downloaded { .. }));
        assert_eq!(library.stream_calls(), 2);

        let summary = progress.summary(false);
        let warnings: Vec<_> = summary
            .events
            .iter()
            .filter(|e| e.severity == Severity::Warning)
            .map(|e| e.message.as_str())
            .collect();
        assert_eq!(warnings.len(), 2, "got {warnings:?}");
        assert_eq!(warnings.iter().filter(|m| m.contains("retry 1 of 2")).count(), 1);
        assert_eq!(warnings.iter().filter(|m| m.contains("server sent ogg")).count(), 1);
        assert!(
            summary
                .events
                .iter()
                .any(|e| e.severity == Severity::Debug && e.message.contains("written to"))
        );
    }

    #[tokio::test]
    async fn cancellation_stops_transfer_and_cleans_up() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_fault("1", StreamFault::Stall));
        let (worker, _) = worker(library, root.path());
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let outcome = worker.transfer(&request("1", "Track 1.mp3"), &cancel).await;

        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert!(files_under(root.path()).is_empty());
    }

    #[tokio::test]
    async fn already_cancelled_token_opens_nothing() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(FakeLibrary::new().with_payload("1", b"x"));
        let (worker, _) = worker(library.clone(), root.path());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = worker.transfer(&request("1", "Track 1.mp3"), &cancel).await;

        assert_eq!(outcome, TransferOutcome::Cancelled);
        assert_eq!(library.stream_calls(), 0);
    }

    #[tokio::test]
    async fn mismatched_served_format_is_warned_about() {
        let root = TempDir::new().unwrap();
        let library = Arc::new(
            FakeLibrary::new()
                .with_payload("1", b"OggS")
                .with_content_type("audio/ogg"),
        );
        let (worker, progress) = worker(library, root.path());

        let outcome = worker
            .transfer(&request("1", "Track 1.mp3"), &CancellationToken::new())
            .await;

        assert!(matches!(outcome, TransferOutcome::Downloaded { .. }));
        let summary = progress.summary(false);
        assert!(
            summary
                .events_at_least(Severity::Warning)
                .any(|e| e.message.contains("server sent ogg"))
        );
    }

    #[tokio::test]
    async fn existing_file_is_replaced_atomically() {
        let root = TempDir::new().unwrap();
        std::fs::write(root.path().join("Track 1.mp3"), b"old").unwrap();
        let library = Arc::new(FakeLibrary::new().with_payload("1", b"new bytes"));
        let (worker, _) = worker(library, root.path());

        worker
            .transfer(&request("1", "Track 1.mp3"), &CancellationToken::new())
            .await;

        assert_eq!(std::fs::read(root.path().join("Track 1.mp3")).unwrap(), b"new bytes");
    }
}
