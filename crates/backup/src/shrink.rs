//! Optional image size reduction
//!
//! Delegates to an external shrink tool on the completed artifact. This is
//! the only stage permitted to fail without aborting the run: the image is
//! already verified, and a failed shrink leaves it in its valid pre-shrink
//! state.

use crate::error::BackupError;
use crate::system::System;
use std::path::Path;
use std::time::Instant;
use tracing::info;

/// Shrink the finished image in place.
pub fn reduce(sys: &System, image: &Path) -> Result<(), BackupError> {
    info!(image = %image.display(), "running shrink tool");
    let started = Instant::now();

    sys.shrinker.shrink(image)?;

    info!(
        secs = started.elapsed().as_secs(),
        "image shrink finished"
    );
    Ok(())
}
