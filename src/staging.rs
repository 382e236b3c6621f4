use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{IoResultExt, Result};
use crate::fs::remove_path;

/// name prefix of per-run staging directories
pub const STAGING_PREFIX: &str = "staging-";

/// working tree exclusively owned by one conversion run
///
/// nothing is removed on drop: a failed run leaves its staging directory
/// behind for inspection, and `cleanup --all` reclaims it.
#[derive(Debug)]
pub struct Staging {
    path: PathBuf,
}

impl Staging {
    /// create `<root>/staging-<uuid>`, creating `root` if needed
    pub fn create(root: &Path) -> Result<Self> {
        fs::create_dir_all(root).with_path(root)?;

        let path = root.join(format!("{}{}", STAGING_PREFIX, uuid::Uuid::new_v4()));
        fs::create_dir(&path).with_path(&path)?;

        debug!(path = %path.display(), "created staging directory");
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(self) -> Result<()> {
        remove_path(&self.path)?;
        debug!(path = %self.path.display(), "removed staging directory");
        Ok(())
    }
}
