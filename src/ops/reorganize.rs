//! restructure an assembled image root into the prefix layout
//!
//! everything here mutates the staging tree in place. `merge` is destructive
//! on the source side: every child is either moved into the target or
//! deleted as a duplicate, and an interrupted merge leaves both trees in an
//! unspecified state.

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::errno::Errno;
use tracing::{debug, info};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{identity, remove_path, walk_pre_order};

/// directory the payload lives under after `promote_to_files`
pub const FILES_DIR: &str = "files";

/// paths removed from the image root before reorganizing
pub const DENIED_PATHS: &[&str] = &[
    "dev",
    "home",
    "media",
    "mnt",
    "proc",
    "root",
    "run",
    "sys",
    "tmp",
    "var/cache",
    "var/mail",
    "var/tmp",
    "var/run",
    "content",
    "manifest.json",
];

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// entries renamed into the target
    pub moved: u64,
    /// source entries dropped because the target already holds the same file
    pub deduplicated: u64,
    /// target symlinks removed because they pointed at the incoming entry
    pub symlinks_replaced: u64,
}

impl MergeStats {
    fn add(&mut self, other: &MergeStats) {
        self.moved += other.moved;
        self.deduplicated += other.deduplicated;
        self.symlinks_replaced += other.symlinks_replaced;
    }
}

/// move the contents of `source` into `target`
///
/// `source` itself is deleted afterwards unless `keep_source_root` is set.
pub fn merge(source: &Path, target: &Path, keep_source_root: bool) -> Result<MergeStats> {
    let boundary = match fs::canonicalize(target) {
        Ok(p) => p,
        Err(_) => {
            let parent = target.parent().unwrap_or(target);
            fs::canonicalize(parent).with_path(parent)?
        }
    };

    let drained = fs::canonicalize(source).with_path(source)?;

    let mut merger = Merger {
        boundary,
        drained,
        stats: MergeStats::default(),
    };
    merger.merge(source, target, keep_source_root)?;
    Ok(merger.stats)
}

struct Merger {
    /// symlinks resolving outside this directory are never merged through
    boundary: PathBuf,
    /// the tree being emptied; symlinks into it would lose what moves through them
    drained: PathBuf,
    stats: MergeStats,
}

impl Merger {
    fn merge(&mut self, source: &Path, target: &Path, keep_source_root: bool) -> Result<()> {
        let source_mode = fs::symlink_metadata(source).with_path(source)?.permissions().mode();

        let mut children: Vec<PathBuf> = fs::read_dir(source)
            .with_path(source)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .with_path(source)?;
        children.sort();

        for child in children {
            if child == target {
                continue;
            }
            let Some(name) = child.file_name() else {
                continue;
            };
            let dest = target.join(name);

            let child_meta = fs::symlink_metadata(&child).with_path(&child)?;
            let dest_meta = fs::symlink_metadata(&dest).ok();
            let child_id = identity(&child);

            if let Some(meta) = &dest_meta {
                if meta.file_type().is_symlink() && child_id.is_some() && child_id == identity(&dest) {
                    fs::remove_file(&dest).with_path(&dest)?;
                    self.stats.symlinks_replaced += 1;
                }
            }
            // re-read, the symlink may be gone
            let dest_meta = fs::symlink_metadata(&dest).ok();

            if child_meta.is_dir() {
                if let Some(meta) = &dest_meta {
                    if !meta.is_dir() && !self.resolves_to_inner_dir(&dest) {
                        fs::remove_file(&dest).with_path(&dest)?;
                    }
                }
                self.merge(&child, &dest, false)?;
                continue;
            }

            if dest_meta.is_some() && child_id.is_some() && child_id == identity(&dest) {
                fs::remove_file(&child).with_path(&child)?;
                self.stats.deduplicated += 1;
                continue;
            }

            ensure_directory(target, source_mode)?;
            if matches!(&dest_meta, Some(meta) if meta.is_dir()) {
                remove_path(&dest)?;
            }
            fs::rename(&child, &dest).with_path(&dest)?;
            self.stats.moved += 1;
        }

        if !keep_source_root {
            remove_path(source)?;
        }
        Ok(())
    }

    /// whether `path` is a symlink to a directory inside the merge boundary
    /// that is not itself being drained
    fn resolves_to_inner_dir(&self, path: &Path) -> bool {
        let Ok(resolved) = fs::canonicalize(path) else {
            return false;
        };
        if !resolved.is_dir() || !resolved.starts_with(&self.boundary) {
            return false;
        }
        // a target nested in the source is skipped, so it is not drained
        let target_in_source =
            self.boundary != self.drained && self.boundary.starts_with(&self.drained);
        !resolved.starts_with(&self.drained) || target_in_source
    }
}

/// create `dir` if missing, with the owner bits of the directory it replaces
fn ensure_directory(dir: &Path, mode: u32) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    fs::create_dir_all(dir).with_path(dir)?;
    fs::set_permissions(dir, Permissions::from_mode((mode & 0o7777) | 0o700)).with_path(dir)
}

/// fold `usr/local` and `usr` into the root, then move everything under `files/`
pub fn fold_usr(root: &Path) -> Result<MergeStats> {
    let mut stats = MergeStats::default();

    for sub in ["usr/local", "usr"] {
        let source = root.join(sub);
        if fs::symlink_metadata(&source).is_ok_and(|m| m.is_dir()) {
            let merged = merge(&source, root, true)?;
            debug!(source = sub, moved = merged.moved, deduplicated = merged.deduplicated, "folded");
            stats.add(&merged);
        }
    }

    stats.add(&promote_to_files(root)?);

    info!(
        moved = stats.moved,
        deduplicated = stats.deduplicated,
        symlinks_replaced = stats.symlinks_replaced,
        "reorganized tree"
    );
    Ok(stats)
}

/// move every entry of `root` into `root/files`, keeping `root` itself
pub fn promote_to_files(root: &Path) -> Result<MergeStats> {
    let hidden = root.join(format!(".files-{}", uuid::Uuid::new_v4().simple()));
    fs::create_dir(&hidden).with_path(&hidden)?;

    let stats = merge(root, &hidden, true)?;

    let files = root.join(FILES_DIR);
    fs::rename(&hidden, &files).with_path(&files)?;
    Ok(stats)
}

/// remove OS-management paths and conversion leftovers from `root`
///
/// returns how many paths were removed; missing paths are skipped.
pub fn remove_denied_paths(root: &Path) -> Result<usize> {
    let mut removed = 0;

    for rel in DENIED_PATHS {
        let path = root.join(rel);
        let meta = match fs::symlink_metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(Error::Io { path, source: e }),
        };

        if meta.is_dir() {
            match fs::remove_dir(&path) {
                Ok(()) => {}
                Err(e) if e.raw_os_error() == Some(Errno::ENOTEMPTY as i32) => {
                    fs::remove_dir_all(&path).with_path(&path)?;
                }
                Err(e) => return Err(Error::Io { path, source: e }),
            }
        } else {
            fs::remove_file(&path).with_path(&path)?;
        }

        debug!(path = *rel, "removed denied path");
        removed += 1;
    }

    Ok(removed)
}

/// grant the owner read/write on files and read/write/search on directories
///
/// symlinks are left alone.
pub fn normalize_permissions(root: &Path) -> Result<()> {
    walk_pre_order(root, &mut |path, meta| {
        let wanted = if meta.is_dir() {
            0o700
        } else if meta.is_file() {
            0o600
        } else {
            return Ok(());
        };

        let mode = meta.permissions().mode() & 0o7777;
        if mode & wanted != wanted {
            fs::set_permissions(path, Permissions::from_mode(mode | wanted)).with_path(path)?;
        }
        Ok(())
    })
}
