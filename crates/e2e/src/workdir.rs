//! Scoped change of the process working directory

use std::env;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::E2eResult;

/// Restores the previous working directory when dropped.
///
/// The working directory is process-wide: callers running tests in parallel
/// must serialise every test that holds a guard.
#[derive(Debug)]
pub struct WorkdirGuard {
    original: PathBuf,
}

impl WorkdirGuard {
    pub fn enter(dir: impl AsRef<Path>) -> E2eResult<Self> {
        let original = env::current_dir()?;
        env::set_current_dir(dir.as_ref())?;
        debug!("Changed working directory to {}", dir.as_ref().display());
        Ok(Self { original })
    }

    pub fn original(&self) -> &Path {
        &self.original
    }
}

impl Drop for WorkdirGuard {
    fn drop(&mut self) {
        debug!(
            "Restoring original working directory to {}",
            self.original.display()
        );
        if let Err(e) = env::set_current_dir(&self.original) {
            warn!(
                "Failed to restore working directory {}: {}",
                self.original.display(),
                e
            );
        }
    }
}
