//! # downsonic
//!
//! Mirror an OpenSubsonic music library onto a local directory tree.
//!
//! The library is enumerated artist by artist and album by album, every track
//! is mapped to `<artist>/<album>/<title>.<ext>` under the destination, tracks
//! already present are skipped, and the rest are streamed by a bounded pool of
//! concurrent workers. Files appear at their final path only once complete.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use downsonic::{Credentials, ServerAddress, SubsonicClient, SyncConfig, Synchronizer};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> downsonic::Result<()> {
//!     let address = ServerAddress::parse("https://music.example.com")?;
//!     let client = SubsonicClient::new(&address, Credentials::new("alice", "secret"))?;
//!
//!     let mut config = SyncConfig::new("/srv/music");
//!     config.concurrency = 8;
//!
//!     let synchronizer = Synchronizer::new(Arc::new(client), config)?;
//!     let cancel = CancellationToken::new();
//!     downsonic::cancel_on_signal(cancel.clone());
//!
//!     let summary = synchronizer.run(cancel).await?;
//!     println!("{summary}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Credential resolution (arguments, netrc, prompt)
pub mod credentials;
/// Error types
pub mod error;
/// Audio format to file extension mapping
pub mod format;
/// Retry logic with exponential backoff
pub mod retry;
/// Subsonic API client
pub mod subsonic;
/// Synchronization engine
pub mod sync;
/// Core types
pub mod types;

pub use config::{RetryConfig, ServerAddress, SyncConfig, TranscodeOptions};
pub use credentials::{CredentialRequest, Credentials};
pub use error::{Error, FailureKind, Result, Severity};
pub use subsonic::{AudioStream, LibraryApi, SubsonicClient};
pub use sync::{Progress, Synchronizer};
pub use types::{
    DestinationPath, ProgressSnapshot, RunSummary, TrackDescriptor, TrackId, TransferOutcome,
    TransferRequest,
};

use tokio_util::sync::CancellationToken;

/// Cancel `cancel` when the process receives SIGINT or SIGTERM (Ctrl+C elsewhere).
///
/// The spawned listener exits on its own once the token is cancelled by
/// anything else.
pub fn cancel_on_signal(cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            _ = wait_for_signal() => {
                tracing::warn!("interrupted, stopping transfers");
                cancel.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration can fail in restricted environments (containers, tests)
    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => tracing::debug!("received SIGTERM"),
                _ = sigint.recv() => tracing::debug!("received SIGINT"),
            }
        }
        (Err(e), _) | (_, Err(e)) => {
            tracing::warn!(error = %e, "could not register signal handlers, using ctrl_c fallback");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}
