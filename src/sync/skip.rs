//! Skip policy
//!
//! A track is skipped when a file already exists at its exact destination
//! path. Size, checksum and modification time are not compared, so a file
//! that was replaced or edited locally is left alone until `force` is set.

use std::path::Path;

use crate::types::{DestinationPath, TrackDescriptor};

/// Whether `track` has to be downloaded into `root`
pub async fn should_download(
    track: &TrackDescriptor,
    root: &Path,
    destination: &DestinationPath,
    force: bool,
) -> bool {
    if force {
        return true;
    }

    let path = destination.under(root);
    match tokio::fs::try_exists(&path).await {
        Ok(exists) => !exists,
        Err(e) => {
            // Let the transfer surface the real error
            tracing::debug!(
                track = %track.id,
                path = %path.display(),
                error = %e,
                "could not check destination, downloading"
            );
            true
        }
    }
}
