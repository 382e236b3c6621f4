use std::fs::{self, File};
use std::path::Path;

use tracing::{info, warn};

use crate::error::{IoResultExt, Result};
use crate::fs::{read_symlink_target, read_xattrs, FileMetadata, FileType, HardlinkTracker};
use crate::hash::{Hash, SYMLINK_MODE};
use crate::object::{write_blob, write_blob_streaming, write_commit, write_tree};
use crate::refs::try_resolve_ref;
use crate::repo::Repo;
use crate::summary;
use crate::transaction::Transaction;
use crate::types::{BlobMeta, Commit, EntryKind, Tree, TreeEntry};

/// commit a directory tree to a ref
///
/// the current value of the ref becomes the parent. fails with RefConflict
/// if the ref moves between the read and the publish.
pub fn commit(repo: &Repo, source: &Path, ref_name: &str, subject: &str) -> Result<Hash> {
    commit_with_metadata(repo, source, ref_name, subject, &[])
}

/// commit a directory tree to a ref with custom metadata
pub fn commit_with_metadata(
    repo: &Repo,
    source: &Path,
    ref_name: &str,
    subject: &str,
    metadata: &[(&str, &str)],
) -> Result<Hash> {
    let mut tx = Transaction::begin(repo)?;

    let parent = try_resolve_ref(repo, ref_name)?;

    let mut hardlink_tracker = HardlinkTracker::new();
    let tree_hash = commit_tree(tx.repo(), source, &mut hardlink_tracker)?;

    let mut commit = Commit::new(tree_hash, parent, subject);
    for (key, value) in metadata {
        commit = commit.with_metadata(*key, *value);
    }
    let commit_hash = write_commit(tx.repo(), &commit)?;

    tx.update_ref(ref_name, commit_hash, parent)?;
    tx.commit()?;

    summary::regenerate(repo)?;

    info!(
        ref_name,
        commit = %commit_hash,
        parent = ?parent,
        inodes = hardlink_tracker.len(),
        "committed"
    );
    Ok(commit_hash)
}

/// store a directory bottom-up and return its tree hash
pub fn commit_tree(repo: &Repo, dir: &Path, hardlink_tracker: &mut HardlinkTracker) -> Result<Hash> {
    let mut entries = Vec::new();

    let mut dir_entries: Vec<_> = fs::read_dir(dir)
        .with_path(dir)?
        .collect::<std::io::Result<Vec<_>>>()
        .with_path(dir)?;
    dir_entries.sort_by_key(|e| e.file_name());

    for entry in dir_entries {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_string();
        let meta = FileMetadata::from_path(&path)?;

        let kind = match meta.file_type {
            FileType::Regular => {
                if let Some((hash, size)) = hardlink_tracker.get(meta.dev, meta.ino) {
                    EntryKind::regular(hash, size)
                } else {
                    let blob_meta =
                        BlobMeta::new(meta.uid, meta.gid, meta.mode).with_xattrs(read_xattrs(&path)?);
                    let mut file = File::open(&path).with_path(&path)?;
                    let (hash, size) = write_blob_streaming(repo, &mut file, &blob_meta)?;

                    if meta.could_be_hardlink() {
                        hardlink_tracker.record(meta.dev, meta.ino, hash, size);
                    }
                    EntryKind::regular(hash, size)
                }
            }

            FileType::Symlink => {
                // the link itself, never its target
                let target = read_symlink_target(&path)?;
                let blob_meta =
                    BlobMeta::new(meta.uid, meta.gid, SYMLINK_MODE).with_xattrs(read_xattrs(&path)?);
                let hash = write_blob(repo, target.as_bytes(), &blob_meta)?;
                EntryKind::symlink(hash)
            }

            FileType::Directory => {
                let xattrs = read_xattrs(&path)?;
                let subtree_hash = commit_tree(repo, &path, hardlink_tracker)?;
                EntryKind::directory_with_xattrs(subtree_hash, meta.uid, meta.gid, meta.mode, xattrs)
            }

            FileType::Special => {
                let std_meta = fs::symlink_metadata(&path).with_path(&path)?;
                warn!(
                    path = %path.display(),
                    kind = FileMetadata::special_kind(&std_meta),
                    "skipping special file"
                );
                continue;
            }
        };

        entries.push(TreeEntry::new(name, kind));
    }

    let tree = Tree::new(entries)?;
    write_tree(repo, &tree)
}
