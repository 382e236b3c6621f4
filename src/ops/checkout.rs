use std::collections::HashSet;
use std::fs::{self, Permissions};
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{
    apply_metadata, copy_file, create_hardlink, create_symlink, read_xattrs, remove_path,
    CheckoutHardlinkTracker,
};
use crate::hash::Hash;
use crate::object::{blob_exists, blob_path, read_blob, read_commit, read_tree, verify_blob};
use crate::refs::try_resolve_ref;
use crate::repo::Repo;
use crate::types::{EntryKind, Tree};

/// OCI whiteout prefix: `.wh.<name>` deletes `<name>` from lower layers
pub const WHITEOUT_PREFIX: &str = ".wh.";
/// OCI opaque marker: hides everything lower layers put in the directory
pub const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// how pre-existing content in the target is treated
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CheckoutMode {
    /// target must be empty or absent
    #[default]
    Fresh,
    /// overlay onto the target, incoming entries win
    Union,
}

/// checkout options
#[derive(Clone, Debug)]
pub struct CheckoutOptions {
    pub mode: CheckoutMode,
    /// hardlink regular files from the blob store instead of copying
    pub hardlink: bool,
    /// recompute blob checksums before materializing
    pub verify: bool,
    /// interpret OCI whiteout entries instead of materializing them
    pub whiteouts: bool,
}

impl Default for CheckoutOptions {
    fn default() -> Self {
        Self {
            mode: CheckoutMode::Fresh,
            hardlink: true,
            verify: false,
            whiteouts: false,
        }
    }
}

impl CheckoutOptions {
    /// copy mode union checkout as used for image layers
    pub fn layer() -> Self {
        Self {
            mode: CheckoutMode::Union,
            hardlink: false,
            verify: true,
            whiteouts: true,
        }
    }
}

/// what a checkout did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CheckoutStats {
    pub files: u64,
    pub symlinks: u64,
    pub directories: u64,
    /// regular files recreated as hardlinks of an earlier copy
    pub hardlinks: u64,
    /// entries removed by whiteouts
    pub whited_out: u64,
}

/// materialize the tree of `rev` (a ref name or commit checksum) at `target`
pub fn checkout(
    repo: &Repo,
    rev: &str,
    target: &Path,
    opts: CheckoutOptions,
) -> Result<CheckoutStats> {
    let commit_hash = match try_resolve_ref(repo, rev) {
        Ok(Some(hash)) => hash,
        Ok(None) | Err(Error::InvalidRef(_)) => {
            return Err(Error::RevisionNotFound(rev.to_string()))
        }
        Err(e) => return Err(e),
    };
    let commit = read_commit(repo, &commit_hash).map_err(|e| match e {
        Error::ObjectNotFound(_) => Error::RevisionNotFound(rev.to_string()),
        other => other,
    })?;
    let tree = read_tree(repo, &commit.tree)?;

    if opts.mode == CheckoutMode::Fresh && target.exists() {
        let is_empty = target.read_dir().with_path(target)?.next().is_none();
        if !is_empty {
            return Err(Error::TargetNotEmpty(target.to_path_buf()));
        }
    }
    fs::create_dir_all(target).with_path(target)?;

    let mut run = Checkout {
        repo,
        opts: &opts,
        links: CheckoutHardlinkTracker::new(),
        verified: HashSet::new(),
        stats: CheckoutStats::default(),
    };
    run.checkout_tree(&tree, target)?;

    debug!(
        rev,
        commit = %commit_hash,
        target = %target.display(),
        files = run.stats.files,
        whited_out = run.stats.whited_out,
        "checked out"
    );
    Ok(run.stats)
}

struct Checkout<'a> {
    repo: &'a Repo,
    opts: &'a CheckoutOptions,
    links: CheckoutHardlinkTracker,
    /// blobs already verified in this run
    verified: HashSet<Hash>,
    stats: CheckoutStats,
}

impl Checkout<'_> {
    fn checkout_tree(&mut self, tree: &Tree, dir: &Path) -> Result<()> {
        if self.opts.whiteouts && tree.get(OPAQUE_WHITEOUT).is_some() {
            for child in fs::read_dir(dir).with_path(dir)? {
                let child = child.with_path(dir)?;
                remove_path(&child.path())?;
                self.stats.whited_out += 1;
            }
        }

        for entry in tree.entries() {
            let dest = dir.join(&entry.name);

            if self.opts.whiteouts {
                if entry.name == OPAQUE_WHITEOUT {
                    continue;
                }
                if let Some(hidden) = entry.name.strip_prefix(WHITEOUT_PREFIX) {
                    if !hidden.is_empty() {
                        let victim = dir.join(hidden);
                        if victim.symlink_metadata().is_ok() {
                            remove_path(&victim)?;
                            self.stats.whited_out += 1;
                        }
                    }
                    continue;
                }
            }

            match &entry.kind {
                EntryKind::Regular { hash, .. } => {
                    self.checkout_file(hash, &dest)?;
                    self.stats.files += 1;
                }

                EntryKind::Symlink { hash } => {
                    self.checkout_symlink(hash, &dest)?;
                    self.stats.symlinks += 1;
                }

                EntryKind::Directory {
                    hash,
                    uid,
                    gid,
                    mode,
                    xattrs,
                } => {
                    let subtree = read_tree(self.repo, hash)?;
                    prepare_directory(&dest)?;
                    self.checkout_tree(&subtree, &dest)?;

                    // after contents, mode may drop write permission
                    apply_metadata(&dest, *uid, *gid, *mode, xattrs)?;
                    self.stats.directories += 1;
                }
            }
        }

        Ok(())
    }

    fn checkout_file(&mut self, hash: &Hash, dest: &Path) -> Result<()> {
        if !blob_exists(self.repo, hash) {
            return Err(Error::ObjectNotFound(*hash));
        }
        self.verify(hash, false)?;

        let staged = staging_name(dest);
        let blob = blob_path(self.repo, hash);

        if self.opts.hardlink {
            create_hardlink(&staged, &blob)?;
        } else if let Some(first) = self.links.get(hash) {
            create_hardlink(&staged, first)?;
            self.stats.hardlinks += 1;
        } else {
            let meta = fs::metadata(&blob).with_path(&blob)?;
            let xattrs = read_xattrs(&blob)?;
            copy_file(&blob, &staged, meta.uid(), meta.gid(), meta.mode(), &xattrs)?;
        }

        replace_with(&staged, dest)?;
        if !self.opts.hardlink {
            self.links.record(*hash, dest.to_path_buf());
        }
        Ok(())
    }

    fn checkout_symlink(&mut self, hash: &Hash, dest: &Path) -> Result<()> {
        self.verify(hash, true)?;

        let target_bytes = read_blob(self.repo, hash)?;
        let target = String::from_utf8_lossy(&target_bytes);

        let blob = blob_path(self.repo, hash);
        let meta = fs::metadata(&blob).with_path(&blob)?;
        let xattrs = read_xattrs(&blob)?;

        let staged = staging_name(dest);
        create_symlink(&staged, &target, meta.uid(), meta.gid(), &xattrs)?;
        replace_with(&staged, dest)
    }

    fn verify(&mut self, hash: &Hash, symlink: bool) -> Result<()> {
        if self.opts.verify && self.verified.insert(*hash) {
            verify_blob(self.repo, hash, symlink)?;
        }
        Ok(())
    }
}

/// make `dest` a writable directory, replacing any non-directory there
///
/// a symlink is replaced even if it points at a directory.
fn prepare_directory(dest: &Path) -> Result<()> {
    match dest.symlink_metadata() {
        Ok(meta) if meta.is_dir() => {
            let mode = meta.mode() & 0o7777;
            if mode & 0o700 != 0o700 {
                fs::set_permissions(dest, Permissions::from_mode(mode | 0o700)).with_path(dest)?;
            }
            Ok(())
        }
        Ok(_) => {
            fs::remove_file(dest).with_path(dest)?;
            fs::create_dir(dest).with_path(dest)
        }
        Err(_) => fs::create_dir(dest).with_path(dest),
    }
}

/// sibling name used to build an entry before it replaces `dest`
fn staging_name(dest: &Path) -> PathBuf {
    let tmp = format!(".tmp-{}", uuid::Uuid::new_v4().simple());
    match dest.parent() {
        Some(parent) => parent.join(tmp),
        None => PathBuf::from(tmp),
    }
}

/// atomically put `staged` at `dest`; an existing directory is removed first
fn replace_with(staged: &Path, dest: &Path) -> Result<()> {
    if let Ok(meta) = dest.symlink_metadata() {
        if meta.is_dir() {
            remove_path(dest)?;
        } else {
            // rename between two links of one inode is a no-op that keeps both
            let staged_meta = staged.symlink_metadata().with_path(staged)?;
            if staged_meta.dev() == meta.dev() && staged_meta.ino() == meta.ino() {
                return fs::remove_file(staged).with_path(staged);
            }
        }
    }
    fs::rename(staged, dest).with_path(dest)
}
