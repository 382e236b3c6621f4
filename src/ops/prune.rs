use std::collections::HashSet;
use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{Error, IoResultExt, Result};
use crate::fs::remove_path;
use crate::hash::Hash;
use crate::manifest::load_manifest;
use crate::object::{read_commit, read_tree};
use crate::refs::{clear_stale_locks, delete_ref, list_refs, list_refs_matching, read_ref};
use crate::repo::Repo;
use crate::staging::STAGING_PREFIX;
use crate::summary;
use crate::types::EntryKind;

/// prune statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PruneStats {
    pub blobs_removed: usize,
    pub trees_removed: usize,
    pub commits_removed: usize,
    pub bytes_freed: u64,
}

impl PruneStats {
    pub fn objects_removed(&self) -> usize {
        self.blobs_removed + self.trees_removed + self.commits_removed
    }
}

/// what `cleanup` removes before pruning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum CleanupMode {
    /// only unreachable objects
    Prune,
    /// layer and config refs no image manifest names
    Unused,
    /// every image, layer and config ref
    Oci,
    /// oci refs plus stale staging directories and tmp scratch
    All,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub refs_deleted: Vec<String>,
    pub scratch_removed: usize,
    /// `<ref>.lock` files of writers that died mid-update
    pub stale_locks_removed: usize,
    pub prune: PruneStats,
}

/// remove objects unreachable from any ref
///
/// fails with LockContention while a transaction is open.
pub fn prune(repo: &Repo, dry_run: bool) -> Result<PruneStats> {
    let _lock = repo.lock()?;
    prune_locked(repo, dry_run)
}

/// run a cleanup mode under a single exclusive lock, then regenerate the summary
pub fn cleanup(repo: &Repo, mode: CleanupMode) -> Result<CleanupReport> {
    let _lock = repo.lock()?;
    let mut report = CleanupReport {
        // nobody can be publishing under the exclusive lock
        stale_locks_removed: clear_stale_locks(repo)?,
        ..Default::default()
    };

    match mode {
        CleanupMode::Prune => {}
        CleanupMode::Unused => report.refs_deleted = delete_unused_refs(repo)?,
        CleanupMode::Oci => report.refs_deleted = delete_oci_refs(repo)?,
        CleanupMode::All => {
            report.refs_deleted = delete_oci_refs(repo)?;
            report.scratch_removed = clean_scratch(repo)?;
        }
    }

    report.prune = prune_locked(repo, false)?;
    summary::regenerate(repo)?;

    info!(
        mode = ?mode,
        refs_deleted = report.refs_deleted.len(),
        scratch_removed = report.scratch_removed,
        stale_locks_removed = report.stale_locks_removed,
        objects_removed = report.prune.objects_removed(),
        bytes_freed = report.prune.bytes_freed,
        "cleanup finished"
    );
    Ok(report)
}

/// delete layer and config refs not named by any manifest under image/*
///
/// the caller must hold the exclusive lock.
fn delete_unused_refs(repo: &Repo) -> Result<Vec<String>> {
    let mut keep = HashSet::new();
    for image_ref in list_refs_matching(repo, "image/*")? {
        let manifest = load_manifest(repo, &image_ref)?;
        keep.extend(manifest.referenced_refs());
    }

    let mut deleted = Vec::new();
    for pattern in ["layer/*", "config/*"] {
        for name in list_refs_matching(repo, pattern)? {
            if !keep.contains(&name) {
                delete_ref(repo, &name)?;
                debug!(ref_name = %name, "deleted unused ref");
                deleted.push(name);
            }
        }
    }
    Ok(deleted)
}

fn delete_oci_refs(repo: &Repo) -> Result<Vec<String>> {
    let mut deleted = Vec::new();
    for pattern in ["image/*", "layer/*", "config/*"] {
        for name in list_refs_matching(repo, pattern)? {
            delete_ref(repo, &name)?;
            deleted.push(name);
        }
    }
    Ok(deleted)
}

/// remove leftover staging directories and tmp files of interrupted runs
fn clean_scratch(repo: &Repo) -> Result<usize> {
    let mut removed = 0;

    let staging_root = repo.staging_root();
    if staging_root.is_dir() {
        for entry in fs::read_dir(&staging_root).with_path(&staging_root)? {
            let entry = entry.with_path(&staging_root)?;
            if entry.file_name().to_string_lossy().starts_with(STAGING_PREFIX) {
                remove_path(&entry.path())?;
                debug!(path = %entry.path().display(), "removed stale staging directory");
                removed += 1;
            }
        }
    }

    let tmp = repo.tmp_path();
    for entry in fs::read_dir(&tmp).with_path(&tmp)? {
        let entry = entry.with_path(&tmp)?;
        remove_path(&entry.path())?;
        removed += 1;
    }

    Ok(removed)
}

fn prune_locked(repo: &Repo, dry_run: bool) -> Result<PruneStats> {
    let mut marks = Marks::default();

    for ref_name in list_refs(repo)? {
        let commit_hash = match read_ref(repo, &ref_name) {
            Ok(h) => h,
            Err(Error::RefNotFound(_)) => continue,
            Err(e) => return Err(e),
        };
        marks.mark_commit(repo, commit_hash)?;
    }

    let mut stats = PruneStats::default();
    sweep_objects(
        &repo.blobs_path(),
        &marks.blobs,
        dry_run,
        &mut stats.blobs_removed,
        &mut stats.bytes_freed,
    )?;
    sweep_objects(
        &repo.trees_path(),
        &marks.trees,
        dry_run,
        &mut stats.trees_removed,
        &mut stats.bytes_freed,
    )?;
    sweep_objects(
        &repo.commits_path(),
        &marks.commits,
        dry_run,
        &mut stats.commits_removed,
        &mut stats.bytes_freed,
    )?;

    debug!(?stats, dry_run, "pruned store");
    Ok(stats)
}

#[derive(Default)]
struct Marks {
    blobs: HashSet<Hash>,
    trees: HashSet<Hash>,
    commits: HashSet<Hash>,
}

impl Marks {
    /// mark a commit and its whole parent chain
    fn mark_commit(&mut self, repo: &Repo, hash: Hash) -> Result<()> {
        let mut next = Some(hash);
        while let Some(hash) = next {
            if !self.commits.insert(hash) {
                break;
            }
            let commit = match read_commit(repo, &hash) {
                Ok(c) => c,
                // a missing ancestor ends the chain, what exists stays
                Err(Error::ObjectNotFound(_)) => {
                    warn!(commit = %hash, "history references missing commit");
                    break;
                }
                Err(e) => return Err(e),
            };
            self.mark_tree(repo, commit.tree)?;
            next = commit.parent;
        }
        Ok(())
    }

    fn mark_tree(&mut self, repo: &Repo, hash: Hash) -> Result<()> {
        if !self.trees.insert(hash) {
            return Ok(());
        }

        let tree = read_tree(repo, &hash)?;
        for entry in tree.entries() {
            match &entry.kind {
                EntryKind::Regular { hash, .. } | EntryKind::Symlink { hash } => {
                    self.blobs.insert(*hash);
                }
                EntryKind::Directory { hash, .. } => self.mark_tree(repo, *hash)?,
            }
        }
        Ok(())
    }
}

fn walk_error(dir: &Path, e: walkdir::Error) -> Error {
    Error::Io {
        path: e.path().unwrap_or(dir).to_path_buf(),
        source: e
            .into_io_error()
            .unwrap_or_else(|| std::io::Error::other("walkdir error")),
    }
}

/// remove objects under `objects/<kind>/XX/` that are not in the reachable set
fn sweep_objects(
    dir: &Path,
    reachable: &HashSet<Hash>,
    dry_run: bool,
    removed_count: &mut usize,
    bytes_freed: &mut u64,
) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    for entry in WalkDir::new(dir).min_depth(2).max_depth(2) {
        let entry = entry.map_err(|e| walk_error(dir, e))?;
        if !entry.file_type().is_file() {
            continue;
        }

        // objects/<kind>/XX/YYYY...
        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        let parent_name = path
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or("");

        let Ok(hash) = Hash::from_hex(&format!("{}{}", parent_name, file_name)) else {
            continue;
        };
        if reachable.contains(&hash) {
            continue;
        }

        let meta = entry.metadata().map_err(|e| walk_error(dir, e))?;
        *bytes_freed += meta.len();
        *removed_count += 1;
        if !dry_run {
            fs::remove_file(path).with_path(path)?;
        }
    }

    if !dry_run {
        for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
            let entry = entry.map_err(|e| walk_error(dir, e))?;
            if entry.file_type().is_dir() {
                // only succeeds when empty
                let _ = fs::remove_dir(entry.path());
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{blob_exists, write_blob, write_commit, write_tree};
    use crate::ops::commit::commit;
    use crate::refs::{ref_exists, write_ref};
    use crate::types::{BlobMeta, Commit, Tree, TreeEntry};
    use tempfile::tempdir;

    fn test_repo() -> (tempfile::TempDir, Repo) {
        let dir = tempdir().unwrap();
        let repo_path = dir.path().join("repo");
        let repo = Repo::init(&repo_path).unwrap();
        (dir, repo)
    }

    fn count_objects(dir: &Path) -> usize {
        WalkDir::new(dir)
            .min_depth(2)
            .max_depth(2)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .count()
    }

    /// commit a tree holding one file with `content` under `name`
    fn commit_file(repo: &Repo, name: &str, file: &str, content: &str) -> Hash {
        let blob = write_blob(repo, content.as_bytes(), &BlobMeta::new(0, 0, 0o644)).unwrap();
        let tree = Tree::new(vec![TreeEntry::new(file, EntryKind::regular(blob, content.len() as u64))]).unwrap();
        let tree_hash = write_tree(repo, &tree).unwrap();
        let commit = write_commit(repo, &Commit::new(tree_hash, None, "test")).unwrap();
        write_ref(repo, name, &commit).unwrap();
        commit
    }

    #[test]
    fn test_prune_keeps_reachable() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "content").unwrap();
        commit(&repo, &source, "test", "import").unwrap();

        let stats = prune(&repo, false).unwrap();
        assert_eq!(stats, PruneStats::default());
    }

    #[test]
    fn test_prune_keeps_parent_history() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("v"), "old").unwrap();
        let first = commit(&repo, &source, "r", "one").unwrap();
        fs::write(source.join("v"), "new").unwrap();
        commit(&repo, &source, "r", "two").unwrap();

        let stats = prune(&repo, false).unwrap();
        assert_eq!(stats.objects_removed(), 0);
        assert!(read_commit(&repo, &first).is_ok());
        assert_eq!(count_objects(&repo.blobs_path()), 2);
    }

    #[test]
    fn test_prune_dry_run() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "content").unwrap();
        commit(&repo, &source, "test", "import").unwrap();
        delete_ref(&repo, "test").unwrap();

        let stats = prune(&repo, true).unwrap();
        assert_eq!(stats.blobs_removed, 1);
        assert_eq!(stats.trees_removed, 1);
        assert_eq!(stats.commits_removed, 1);
        assert!(stats.bytes_freed > 0);

        assert_eq!(count_objects(&repo.blobs_path()), 1);
    }

    #[test]
    fn test_prune_removes_unreachable() {
        let (dir, repo) = test_repo();

        let source = dir.path().join("source");
        fs::create_dir(&source).unwrap();
        fs::write(source.join("file.txt"), "content").unwrap();
        commit(&repo, &source, "test", "import").unwrap();
        delete_ref(&repo, "test").unwrap();

        let stats = prune(&repo, false).unwrap();
        assert_eq!(stats.objects_removed(), 3);
        assert_eq!(count_objects(&repo.blobs_path()), 0);
        assert_eq!(count_objects(&repo.trees_path()), 0);
        assert_eq!(count_objects(&repo.commits_path()), 0);

        // fan-out directories went with them
        assert_eq!(fs::read_dir(repo.blobs_path()).unwrap().count(), 0);
    }

    #[test]
    fn test_prune_blocked_by_transaction() {
        let (_dir, repo) = test_repo();

        let tx = crate::transaction::Transaction::begin(&repo).unwrap();
        assert!(matches!(prune(&repo, false), Err(Error::LockContention)));
        assert!(matches!(
            cleanup(&repo, CleanupMode::All),
            Err(Error::LockContention)
        ));
        tx.abort();

        assert!(prune(&repo, false).is_ok());
    }

    fn write_image(repo: &Repo, image: &str, layers: &[&str], config: &str) {
        let layers: Vec<String> = layers
            .iter()
            .map(|l| format!(r#"{{"digest":"sha256:{}"}}"#, l))
            .collect();
        let json = format!(
            r#"{{"config":{{"digest":"sha256:{}"}},"layers":[{}]}}"#,
            config,
            layers.join(",")
        );
        commit_file(repo, &crate::manifest::image_ref(image), "manifest.json", &json);
    }

    #[test]
    fn test_cleanup_unused() {
        let (_dir, repo) = test_repo();

        let used = "a".repeat(64);
        let unused = "b".repeat(64);
        let config = "c".repeat(64);

        commit_file(&repo, &format!("layer/{used}"), "f", "used layer");
        let orphan = commit_file(&repo, &format!("layer/{unused}"), "f", "orphan layer");
        commit_file(&repo, &format!("config/{config}"), "content", "{}");
        write_image(&repo, "alpine:3.19", &[&used], &config);

        let report = cleanup(&repo, CleanupMode::Unused).unwrap();

        assert_eq!(report.refs_deleted, vec![format!("layer/{unused}")]);
        assert!(ref_exists(&repo, &format!("layer/{used}")));
        assert!(ref_exists(&repo, &format!("config/{config}")));
        assert!(ref_exists(&repo, "image/alpine_3.19"));
        assert!(read_commit(&repo, &orphan).is_err());
        assert_eq!(report.prune.commits_removed, 1);

        let summary = summary::Summary::load(&repo).unwrap();
        assert!(!summary.refs.contains_key(&format!("layer/{unused}")));
    }

    #[test]
    fn test_cleanup_oci_keeps_runtimes() {
        let (_dir, repo) = test_repo();

        let layer = "a".repeat(64);
        let config = "c".repeat(64);
        commit_file(&repo, &format!("layer/{layer}"), "f", "layer");
        commit_file(&repo, &format!("config/{config}"), "content", "{}");
        write_image(&repo, "busybox", &[&layer], &config);
        commit_file(&repo, "runtime/io.container.busybox/x86_64/stable", "f", "payload");

        let report = cleanup(&repo, CleanupMode::Oci).unwrap();

        assert_eq!(report.refs_deleted.len(), 3);
        assert_eq!(list_refs(&repo).unwrap(), vec!["runtime/io.container.busybox/x86_64/stable"]);

        let payload = crate::hash::compute_blob_hash(&BlobMeta::new(0, 0, 0o644), b"payload");
        assert!(blob_exists(&repo, &payload));
        assert_eq!(count_objects(&repo.commits_path()), 1);
    }

    #[test]
    fn test_cleanup_all_removes_scratch() {
        let (_dir, repo) = test_repo();

        let stale = repo.staging_root().join(format!("{}stale", STAGING_PREFIX));
        fs::create_dir_all(stale.join("files/usr")).unwrap();
        let unrelated = repo.staging_root().join("keep-me");
        fs::create_dir_all(&unrelated).unwrap();
        fs::write(repo.tmp_path().join("leftover"), "x").unwrap();

        let report = cleanup(&repo, CleanupMode::All).unwrap();

        assert_eq!(report.scratch_removed, 2);
        assert!(!stale.exists());
        assert!(unrelated.exists());
        assert_eq!(fs::read_dir(repo.tmp_path()).unwrap().count(), 0);
    }

    #[test]
    fn test_cleanup_clears_stale_ref_locks() {
        let (_dir, repo) = test_repo();

        let old = commit_file(&repo, "runtime/x", "f", "old");
        // left behind by a writer killed between lock and publish
        fs::write(repo.refs_path().join("runtime/x.lock"), "").unwrap();
        fs::create_dir_all(repo.refs_path().join("layer")).unwrap();
        fs::write(repo.refs_path().join("layer/y.lock"), "").unwrap();

        let new = commit_file(&repo, "scratch", "f", "new");
        assert!(matches!(
            crate::refs::update_ref(&repo, "runtime/x", &new, Some(&old)),
            Err(Error::RefConflict { .. })
        ));

        let report = cleanup(&repo, CleanupMode::Prune).unwrap();
        assert_eq!(report.stale_locks_removed, 2);
        assert!(!repo.refs_path().join("runtime/x.lock").exists());

        crate::refs::update_ref(&repo, "runtime/x", &new, Some(&old)).unwrap();
        assert_eq!(read_ref(&repo, "runtime/x").unwrap(), new);
    }

    #[test]
    fn test_cleanup_prune_only() {
        let (_dir, repo) = test_repo();

        let layer = "a".repeat(64);
        commit_file(&repo, &format!("layer/{layer}"), "f", "x");
        let dangling = write_blob(&repo, b"nobody", &BlobMeta::new(0, 0, 0o644)).unwrap();

        let report = cleanup(&repo, CleanupMode::Prune).unwrap();

        assert!(report.refs_deleted.is_empty());
        assert_eq!(report.prune.blobs_removed, 1);
        assert!(!blob_exists(&repo, &dangling));
        assert!(ref_exists(&repo, &format!("layer/{layer}")));
    }
}
