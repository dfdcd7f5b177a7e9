//! Global progress bar management
//!
//! Provides a process-global `MultiProgress` instance so download progress
//! bars and log lines do not interleave, without threading the instance
//! through function parameters.

use indicatif::MultiProgress;
use once_cell::sync::Lazy;
use std::sync::Arc;

static MULTI: Lazy<Arc<MultiProgress>> = Lazy::new(|| Arc::new(MultiProgress::new()));

/// Get a cheap clone of the global `MultiProgress` instance.
pub fn global_mp() -> Arc<MultiProgress> {
    MULTI.clone()
}

pub fn add_progress_bar(pb: indicatif::ProgressBar) {
    global_mp().add(pb);
}

pub fn remove_progress_bar(pb: &indicatif::ProgressBar) {
    global_mp().remove(pb);
}
