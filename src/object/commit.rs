use std::path::PathBuf;

use crate::error::Result;
use crate::hash::Hash;
use crate::repo::Repo;
use crate::types::Commit;

/// write a commit to the object store
pub fn write_commit(repo: &Repo, commit: &Commit) -> Result<Hash> {
    let (hash, bytes) = super::encode(commit)?;
    super::store(repo, &commit_path(repo, &hash), &bytes)?;
    Ok(hash)
}

/// read a commit, verifying its checksum
pub fn read_commit(repo: &Repo, hash: &Hash) -> Result<Commit> {
    super::load(&commit_path(repo, hash), hash)
}

pub fn commit_path(repo: &Repo, hash: &Hash) -> PathBuf {
    let (dir, file) = hash.to_path_components();
    repo.commits_path().join(dir).join(file)
}

pub fn commit_exists(repo: &Repo, hash: &Hash) -> bool {
    commit_path(repo, hash).exists()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        let repo = Repo::init(&repo_path).unwrap();
        (dir, repo)
    }

    #[test]
    fn test_write_and_read_commit() {
        let (_dir, repo) = test_repo();

        let commit = Commit::with_timestamp(Hash::ZERO, None, "initial", 1700000000)
            .with_metadata("oci.image", "alpine:3.19");

        let hash = write_commit(&repo, &commit).unwrap();
        assert!(commit_exists(&repo, &hash));
        assert_eq!(read_commit(&repo, &hash).unwrap(), commit);
    }

    #[test]
    fn test_commit_chain() {
        let (_dir, repo) = test_repo();

        let first = write_commit(
            &repo,
            &Commit::with_timestamp(Hash::ZERO, None, "first", 1),
        )
        .unwrap();
        let second = write_commit(
            &repo,
            &Commit::with_timestamp(Hash::ZERO, Some(first), "second", 2),
        )
        .unwrap();

        let loaded = read_commit(&repo, &second).unwrap();
        assert_eq!(loaded.parent, Some(first));
        assert!(read_commit(&repo, &first).unwrap().is_root());
    }

    #[test]
    fn test_identical_commits_share_hash() {
        let (_dir, repo) = test_repo();

        let c = Commit::with_timestamp(Hash::ZERO, None, "same", 42);
        assert_eq!(write_commit(&repo, &c).unwrap(), write_commit(&repo, &c).unwrap());
    }

    #[test]
    fn test_read_nonexistent_commit() {
        let (_dir, repo) = test_repo();

        assert!(matches!(
            read_commit(&repo, &Hash::ZERO),
            Err(Error::ObjectNotFound(_))
        ));
    }
}
