use std::path::PathBuf;

use crate::error::Result;
use crate::hash::Hash;
use crate::repo::Repo;
use crate::types::Tree;

/// write a tree to the object store
///
/// trees are serialized as CBOR, then zstd compressed.
/// the hash is computed over the compressed bytes.
pub fn write_tree(repo: &Repo, tree: &Tree) -> Result<Hash> {
    let (hash, bytes) = super::encode(tree)?;
    super::store(repo, &tree_path(repo, &hash), &bytes)?;
    Ok(hash)
}

/// read a tree, verifying its checksum
pub fn read_tree(repo: &Repo, hash: &Hash) -> Result<Tree> {
    let tree: Tree = super::load(&tree_path(repo, hash), hash)?;
    // re-validate: names come from disk
    Tree::new(tree.into_entries())
}

/// get the filesystem path to a tree object
pub fn tree_path(repo: &Repo, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    repo.trees_path().join(dir).join(file)
}

pub fn tree_exists(repo: &Repo, hash: &Hash) -> bool {
    tree_path(repo, hash).exists()
}
