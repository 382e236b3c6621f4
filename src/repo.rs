use std::fs::File;
use std::path::{Path, PathBuf};

use nix::fcntl::{Flock, FlockArg};
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, IoResultExt, Result};

/// a content-addressed object store on disk
pub struct Repo {
    path: PathBuf,
    config: Config,
}

impl Repo {
    /// initialize a new repository at the given path
    pub fn init(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if config_path.exists() {
            return Err(Error::RepoExists(path.to_path_buf()));
        }

        for sub in ["objects/blobs", "objects/trees", "objects/commits", "refs/heads", "tmp"] {
            std::fs::create_dir_all(path.join(sub)).with_path(path)?;
        }

        let config = Config::default();
        config.save(&config_path)?;
        debug!(path = %path.display(), "initialized repository");

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// open an existing repository
    pub fn open(path: &Path) -> Result<Self> {
        let config_path = path.join("config.toml");
        if !config_path.exists() {
            return Err(Error::NoRepo(path.to_path_buf()));
        }

        let config = Config::load(&config_path)?;

        Ok(Self {
            path: path.to_path_buf(),
            config,
        })
    }

    /// open the repository, creating it first if it does not exist
    pub fn open_or_init(path: &Path) -> Result<Self> {
        match Self::open(path) {
            Err(Error::NoRepo(_)) => Self::init(path),
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    pub fn save_config(&self) -> Result<()> {
        self.config.save(&self.config_path())
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join("config.toml")
    }

    pub fn objects_path(&self) -> PathBuf {
        self.path.join("objects")
    }

    pub fn blobs_path(&self) -> PathBuf {
        self.objects_path().join("blobs")
    }

    pub fn trees_path(&self) -> PathBuf {
        self.objects_path().join("trees")
    }

    pub fn commits_path(&self) -> PathBuf {
        self.objects_path().join("commits")
    }

    pub fn refs_path(&self) -> PathBuf {
        self.path.join("refs/heads")
    }

    /// scratch space for atomic writes, same filesystem as the objects
    pub fn tmp_path(&self) -> PathBuf {
        self.path.join("tmp")
    }

    /// parent directory of per-run staging directories
    pub fn staging_root(&self) -> PathBuf {
        match &self.config.convert.staging_dir {
            Some(dir) => dir.clone(),
            None => self.path.join("staging"),
        }
    }

    pub fn summary_path(&self) -> PathBuf {
        self.path.join("summary.json")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.path.join(".lock")
    }

    /// `file://` URI handed to external consumers
    pub fn uri(&self) -> Result<String> {
        let abs = std::fs::canonicalize(&self.path).with_path(&self.path)?;
        Ok(format!("file://{}", abs.display()))
    }

    /// acquire the exclusive lock without waiting
    ///
    /// fails with LockContention while any transaction is open.
    pub fn lock(&self) -> Result<RepoLock> {
        let file = self.open_lock_file()?;
        let flock = Flock::lock(file, FlockArg::LockExclusiveNonblock)
            .map_err(|_| Error::LockContention)?;
        Ok(RepoLock { flock })
    }

    /// acquire a shared lock, waiting for any exclusive holder
    pub fn lock_shared(&self) -> Result<RepoLock> {
        let file = self.open_lock_file()?;
        let flock =
            Flock::lock(file, FlockArg::LockShared).map_err(|_| Error::LockContention)?;
        Ok(RepoLock { flock })
    }

    fn open_lock_file(&self) -> Result<File> {
        let lock_path = self.lock_path();
        File::options()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_path(&lock_path)
    }
}

/// guard that holds a repository lock until dropped
pub struct RepoLock {
    #[allow(dead_code)]
    flock: Flock<File>,
}
