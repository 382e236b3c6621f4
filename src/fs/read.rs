use std::fs::{self, Metadata};
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use nix::libc;
use tracing::warn;

use crate::error::{Error, IoResultExt, Result};
use crate::types::Xattr;

/// file type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Regular,
    Directory,
    Symlink,
    /// device nodes, fifos and sockets; never stored
    Special,
}

impl FileType {
    pub fn from_metadata(meta: &Metadata) -> Self {
        let ft = meta.file_type();
        if ft.is_file() {
            FileType::Regular
        } else if ft.is_dir() {
            FileType::Directory
        } else if ft.is_symlink() {
            FileType::Symlink
        } else {
            FileType::Special
        }
    }
}

/// metadata for a filesystem entry
#[derive(Debug, Clone)]
pub struct FileMetadata {
    pub file_type: FileType,
    pub uid: u32,
    pub gid: u32,
    /// full st_mode including the file type bits
    pub mode: u32,
    pub size: u64,
    pub ino: u64,
    pub dev: u64,
    pub nlink: u64,
}

impl FileMetadata {
    /// read metadata from path (does not follow symlinks)
    pub fn from_path(path: &Path) -> Result<Self> {
        let meta = fs::symlink_metadata(path).with_path(path)?;
        Ok(Self::from_std_metadata(&meta))
    }

    pub fn from_std_metadata(meta: &Metadata) -> Self {
        Self {
            file_type: FileType::from_metadata(meta),
            uid: meta.uid(),
            gid: meta.gid(),
            mode: meta.mode(),
            size: meta.len(),
            ino: meta.ino(),
            dev: meta.dev(),
            nlink: meta.nlink(),
        }
    }

    /// check if this could be a hardlink (nlink > 1 for regular files)
    pub fn could_be_hardlink(&self) -> bool {
        self.file_type == FileType::Regular && self.nlink > 1
    }

    /// human readable kind for log messages
    pub fn special_kind(meta: &Metadata) -> &'static str {
        let ft = meta.file_type();
        if ft.is_block_device() {
            "block device"
        } else if ft.is_char_device() {
            "char device"
        } else if ft.is_fifo() {
            "fifo"
        } else if ft.is_socket() {
            "socket"
        } else {
            "special file"
        }
    }
}

/// (dev, ino) of whatever `path` finally points at
///
/// symlinks are followed; a missing or dangling path has no identity.
pub fn identity(path: &Path) -> Option<(u64, u64)> {
    fs::metadata(path).ok().map(|m| (m.dev(), m.ino()))
}

/// walk `root` depth first, calling `visit` on each entry before its children
///
/// the directory is listed only after `visit` returns, so the callback can
/// make an unreadable directory readable. symlinks are visited, not followed.
pub fn walk_pre_order<F>(root: &Path, visit: &mut F) -> Result<()>
where
    F: FnMut(&Path, &Metadata) -> Result<()>,
{
    let meta = fs::symlink_metadata(root).with_path(root)?;
    visit(root, &meta)?;

    if meta.is_dir() {
        let mut children: Vec<_> = fs::read_dir(root)
            .with_path(root)?
            .map(|e| e.map(|e| e.path()))
            .collect::<std::io::Result<_>>()
            .with_path(root)?;
        children.sort();

        for child in children {
            walk_pre_order(&child, visit)?;
        }
    }

    Ok(())
}

/// read all extended attributes from a path (not following symlinks)
pub fn read_xattrs(path: &Path) -> Result<Vec<Xattr>> {
    let mut xattrs = Vec::new();

    let names: Vec<String> = match xattr::list(path) {
        Ok(iter) => iter.map(|n| n.to_string_lossy().into_owned()).collect(),
        Err(e) => {
            // no xattr support or no xattrs
            if e.raw_os_error() == Some(libc::ENOTSUP)
                || e.raw_os_error() == Some(libc::ENODATA)
                || e.raw_os_error() == Some(libc::EOPNOTSUPP)
            {
                return Ok(vec![]);
            }
            return Err(Error::Xattr {
                path: path.to_path_buf(),
                message: format!("failed to list: {}", e),
            });
        }
    };

    for name in names {
        match xattr::get(path, &name) {
            Ok(Some(value)) => xattrs.push(Xattr::new(name, value)),
            // removed between list and get
            Ok(None) => {}
            Err(e) => {
                if e.raw_os_error() != Some(libc::ENODATA) {
                    warn!(path = %path.display(), %name, error = %e, "failed to read xattr");
                }
            }
        }
    }

    xattrs.sort_by(|a, b| a.name.cmp(&b.name));

    Ok(xattrs)
}

/// read symlink target
pub fn read_symlink_target(path: &Path) -> Result<String> {
    let target = fs::read_link(path).with_path(path)?;
    Ok(target.to_string_lossy().into_owned())
}
