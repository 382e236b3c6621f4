use std::fs::{self, File, Permissions};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::Path;

use nix::unistd::{chown, Gid, Uid};
use tracing::warn;

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

/// create a symlink, replacing whatever non-directory is at `path`
pub fn create_symlink(
    path: &Path,
    target: &str,
    uid: u32,
    gid: u32,
    xattrs: &[Xattr],
) -> Result<()> {
    if path.symlink_metadata().is_ok() {
        fs::remove_file(path).with_path(path)?;
    }

    symlink(target, path).with_path(path)?;

    // mode of a symlink is always 0777, only ownership applies
    if !is_current_user(uid, gid) {
        std::os::unix::fs::lchown(path, Some(uid), Some(gid)).with_path(path)?;
    }

    for xattr in xattrs {
        // most filesystems refuse user.* xattrs on symlinks
        if let Err(e) = xattr::set(path, &xattr.name, &xattr.value) {
            warn!(path = %path.display(), name = %xattr.name, error = %e, "cannot set xattr on symlink");
        }
    }

    Ok(())
}

/// copy a file's content to `dest`, then apply the given metadata
pub fn copy_file(
    src: &Path,
    dest: &Path,
    uid: u32,
    gid: u32,
    mode: u32,
    xattrs: &[Xattr],
) -> Result<u64> {
    let copied = fs::copy(src, dest).with_path(dest)?;
    // fs::copy carries the source permissions over, the store copy may be read-only
    fs::set_permissions(dest, Permissions::from_mode(0o600)).with_path(dest)?;
    apply_metadata(dest, uid, gid, mode, xattrs)?;
    Ok(copied)
}

/// create a hardlink
pub fn create_hardlink(link_path: &Path, target_path: &Path) -> Result<()> {
    if link_path.symlink_metadata().is_ok() {
        fs::remove_file(link_path).with_path(link_path)?;
    }

    fs::hard_link(target_path, link_path).with_path(link_path)
}

/// apply metadata (ownership, mode, xattrs) to an existing path
pub fn apply_metadata(path: &Path, uid: u32, gid: u32, mode: u32, xattrs: &[Xattr]) -> Result<()> {
    // xattrs first, while we still have write permission
    for xattr in xattrs {
        xattr::set(path, &xattr.name, &xattr.value).map_err(|e| Error::Xattr {
            path: path.to_path_buf(),
            message: format!("failed to set {}: {}", xattr.name, e),
        })?;
    }

    // skip chown when it would be a no-op, unprivileged runs cannot chown at all
    if !is_current_user(uid, gid) {
        chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            source: std::io::Error::from(e),
        })?;
    }

    // mode last, it might remove write permission
    fs::set_permissions(path, Permissions::from_mode(mode & 0o7777)).with_path(path)?;

    Ok(())
}

/// remove whatever is at `path`; directories are removed recursively
///
/// a missing path is not an error.
pub fn remove_path(path: &Path) -> Result<()> {
    let meta = match path.symlink_metadata() {
        Ok(meta) => meta,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(Error::Io {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };

    if meta.is_dir() {
        fs::remove_dir_all(path).with_path(path)
    } else {
        fs::remove_file(path).with_path(path)
    }
}

fn is_current_user(uid: u32, gid: u32) -> bool {
    uid == nix::unistd::getuid().as_raw() && gid == nix::unistd::getgid().as_raw()
}

/// sync a directory to disk
pub fn fsync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path).with_path(path)?;
    dir.sync_all().with_path(path)?;
    Ok(())
}
