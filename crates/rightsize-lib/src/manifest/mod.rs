//! Manifest write-back
//!
//! Locating the release manifest for a recommendation, patching its memory
//! values in place and rendering a reviewable diff. Writing is a separate,
//! explicit step so nothing touches disk without confirmation.

pub mod diff;
pub mod locator;
pub mod updater;

pub use diff::generate_diff;
pub use locator::{ApplyPlan, ManifestLocator};
pub use updater::{patch_manifest, ManifestUpdater};
