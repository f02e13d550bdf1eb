//! Hot block-device backup pipeline
//!
//! Takes a full raw copy of a running system's SD card (or any block device)
//! to a mounted destination, verifies the produced image, prunes images older
//! than the retention window under a safety floor, and optionally shrinks the
//! image via an external tool.
//!
//! The pipeline is strictly sequential:
//!
//! ```text
//! preflight -> snapshot -> integrity -> retention -> shrink -> summary
//! ```
//!
//! Every stage except the shrink step is fatal on failure. Stages take an
//! immutable [`Config`] and talk to the host through the narrow capability
//! traits in [`system`], so all of them can be tested against mocks.

pub mod artifact;
pub mod config;
pub mod error;
pub mod integrity;
pub mod lock;
pub mod pipeline;
pub mod preflight;
pub mod retention;
pub mod shrink;
pub mod snapshot;
pub mod system;

pub use artifact::Artifact;
pub use config::Config;
pub use error::BackupError;
pub use lock::RunLock;
pub use pipeline::{run, RunSummary};
pub use preflight::PreflightReport;
pub use system::System;
