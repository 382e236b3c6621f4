use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use crate::error::{Error, IoResultExt, Result};
use crate::fs::{apply_metadata, fsync_dir, read_xattrs};
use crate::hash::{compute_blob_hash, BlobHasher, Hash, SYMLINK_MODE};
use crate::repo::Repo;
use crate::types::BlobMeta;

const COPY_BUF: usize = 64 * 1024;

/// write a blob to the object store
///
/// the stored file carries the blob's permissions, owner and xattrs so that
/// checkouts can hardlink it directly. writing an existing blob is a no-op.
pub fn write_blob(repo: &Repo, content: &[u8], meta: &BlobMeta) -> Result<Hash> {
    let hash = compute_blob_hash(meta, content);

    let path = blob_path(repo, &hash);
    if path.exists() {
        return Ok(hash);
    }

    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(content).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    install_blob(&tmp_path, &path, meta)?;
    Ok(hash)
}

/// write a blob from a reader without holding it in memory
///
/// returns the hash and the number of content bytes.
pub fn write_blob_streaming<R: Read>(
    repo: &Repo,
    reader: &mut R,
    meta: &BlobMeta,
) -> Result<(Hash, u64)> {
    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());

    let mut hasher = BlobHasher::new(meta);
    let mut size = 0u64;
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        let mut buf = vec![0u8; COPY_BUF];
        loop {
            let n = reader.read(&mut buf).with_path(&tmp_path)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
            tmp_file.write_all(&buf[..n]).with_path(&tmp_path)?;
            size += n as u64;
        }
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    let hash = hasher.finalize();
    let path = blob_path(repo, &hash);

    if path.exists() {
        fs::remove_file(&tmp_path).with_path(&tmp_path)?;
        return Ok((hash, size));
    }

    install_blob(&tmp_path, &path, meta)?;
    Ok((hash, size))
}

/// set metadata on a finished temp file and rename it into place
fn install_blob(tmp_path: &Path, blob_path: &Path, meta: &BlobMeta) -> Result<()> {
    let blob_dir = blob_path
        .parent()
        .ok_or_else(|| Error::InvalidTree(format!("bad blob path {}", blob_path.display())))?;
    fs::create_dir_all(blob_dir).with_path(blob_dir)?;

    // symlink blobs are stored as plain files readable by their owner
    let mode = if meta.mode == SYMLINK_MODE {
        0o644
    } else {
        meta.permissions()
    };
    apply_metadata(tmp_path, meta.uid, meta.gid, mode, &meta.xattrs)?;

    fs::rename(tmp_path, blob_path).with_path(blob_path)?;
    fsync_dir(blob_dir)
}

/// get the filesystem path to a blob
pub fn blob_path(repo: &Repo, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    repo.blobs_path().join(dir).join(file)
}

/// check if a blob exists in the object store
pub fn blob_exists(repo: &Repo, hash: &Hash) -> bool {
    blob_path(repo, hash).exists()
}

/// read blob content
pub fn read_blob(repo: &Repo, hash: &Hash) -> Result<Vec<u8>> {
    let path = blob_path(repo, hash);
    fs::read(&path).map_err(|e| not_found_or_io(e, hash, path))
}

/// recompute a stored blob's checksum and compare it with its name
///
/// the metadata half of the checksum comes from the stored file itself;
/// symlink blobs are hashed with the fixed symlink mode.
pub fn verify_blob(repo: &Repo, hash: &Hash, symlink: bool) -> Result<()> {
    let path = blob_path(repo, hash);
    let md = fs::metadata(&path).map_err(|e| not_found_or_io(e, hash, path.clone()))?;

    let mode = if symlink { SYMLINK_MODE } else { md.mode() };
    let meta = BlobMeta::new(md.uid(), md.gid(), mode).with_xattrs(read_xattrs(&path)?);

    let mut hasher = BlobHasher::new(&meta);
    let mut file = File::open(&path).with_path(&path)?;
    let mut buf = vec![0u8; COPY_BUF];
    loop {
        let n = file.read(&mut buf).with_path(&path)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }

    let actual = hasher.finalize();
    if actual != *hash {
        return Err(Error::ChecksumMismatch {
            expected: *hash,
            actual,
        });
    }
    Ok(())
}

fn not_found_or_io(e: std::io::Error, hash: &Hash, path: PathBuf) -> Error {
    if e.kind() == std::io::ErrorKind::NotFound {
        Error::ObjectNotFound(*hash)
    } else {
        Error::Io { path, source: e }
    }
}
