pub mod blob;
pub mod commit;
pub mod tree;

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::fsync_dir;
use crate::hash::Hash;
use crate::repo::Repo;

pub use blob::{
    blob_exists, blob_path, read_blob, verify_blob, write_blob, write_blob_streaming,
};
pub use commit::{commit_exists, commit_path, read_commit, write_commit};
pub use tree::{read_tree, tree_exists, tree_path, write_tree};

const ZSTD_LEVEL: i32 = 3;

/// cbor -> zstd, addressed by the hash of the compressed bytes
fn encode<T: Serialize>(value: &T) -> Result<(Hash, Vec<u8>)> {
    let mut cbor_bytes = Vec::new();
    ciborium::into_writer(value, &mut cbor_bytes)?;

    let compressed = zstd::encode_all(&cbor_bytes[..], ZSTD_LEVEL).map_err(|e| Error::Io {
        path: PathBuf::from("<zstd>"),
        source: e,
    })?;

    Ok((Hash::digest(&compressed), compressed))
}

/// write encoded bytes under `path` unless an object with that name exists
fn store(repo: &Repo, path: &Path, bytes: &[u8]) -> Result<()> {
    if path.exists() {
        return Ok(());
    }

    let dir = path
        .parent()
        .ok_or_else(|| Error::InvalidTree(format!("bad object path {}", path.display())))?;
    fs::create_dir_all(dir).with_path(dir)?;

    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        tmp_file.write_all(bytes).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    fs::rename(&tmp_path, path).with_path(path)?;
    fsync_dir(dir)
}

/// read, check the hash, decompress and decode
fn load<T: DeserializeOwned>(path: &Path, hash: &Hash) -> Result<T> {
    let compressed = fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::ObjectNotFound(*hash)
        } else {
            Error::Io {
                path: path.to_path_buf(),
                source: e,
            }
        }
    })?;

    let actual = Hash::digest(&compressed);
    if actual != *hash {
        return Err(Error::ChecksumMismatch {
            expected: *hash,
            actual,
        });
    }

    let cbor_bytes = zstd::decode_all(&compressed[..]).with_path(path)?;
    Ok(ciborium::from_reader(&cbor_bytes[..])?)
}
