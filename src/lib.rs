//! oci2runtime - container images to runtime packages
//!
//! converts the root filesystem of a container image into a prefix-rooted
//! runtime tree (payload under `files/`, a `metadata` key file at the root)
//! and commits it into a content-addressed store.
//!
//! # Core concepts
//!
//! - **Blob**: file content plus owner, mode and xattrs
//! - **Tree**: a serialized directory listing (CBOR + zstd)
//! - **Commit**: a tree snapshot with at most one parent (CBOR + zstd)
//! - **Ref**: a named pointer to a commit (`layer/<hex>`, `runtime/<id>/<arch>/<branch>`)
//!
//! # Hash format
//!
//! blob hash = SHA256(uid | gid | mode | xattr_count | xattrs... | content)
//!
//! where xattrs are sorted by name and each is: name_len | name | value_len | value.
//! trees and commits are addressed by the hash of their compressed encoding.
//!
//! # Example usage
//!
//! ```no_run
//! use oci2runtime::{ops, Repo};
//! use std::path::Path;
//!
//! let repo = Repo::open_or_init(Path::new("/srv/repo")).unwrap();
//!
//! // commit a directory
//! let hash = ops::commit(&repo, Path::new("/source"), "my/ref", "initial import").unwrap();
//!
//! // overlay it onto an existing directory
//! let opts = ops::CheckoutOptions {
//!     mode: ops::CheckoutMode::Union,
//!     ..Default::default()
//! };
//! ops::checkout(&repo, &hash.to_hex(), Path::new("/destination"), opts).unwrap();
//! ```

mod config;
mod error;
mod hash;
mod object;
mod refs;
mod repo;

pub mod convert;
pub mod external;
pub mod fs;
pub mod manifest;
pub mod ops;
pub mod runtime;
pub mod staging;
pub mod summary;
pub mod transaction;
pub mod types;

pub use config::{Config, ConvertConfig, ToolsConfig};
pub use error::{Error, IoResultExt, Result};
pub use hash::{compute_blob_hash, Hash};
pub use object::{
    blob_exists, commit_exists, read_blob, read_commit, read_tree, tree_exists, verify_blob,
    write_blob, write_commit, write_tree,
};
pub use refs::{
    delete_ref, list_refs, list_refs_matching, publish_refs, read_ref, ref_exists, resolve_ref,
    try_resolve_ref, update_ref, write_ref, RefUpdate,
};
pub use repo::{Repo, RepoLock};
pub use summary::Summary;
pub use transaction::Transaction;
pub use types::{BlobMeta, Commit, EntryKind, Tree, TreeEntry, Xattr};
