use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::repo::Repo;

const LOCK_SUFFIX: &str = ".lock";

/// write a ref unconditionally (create or update)
///
/// ref_name can contain slashes for hierarchical refs like "runtime/org.example.App/x86_64/stable"
pub fn write_ref(repo: &Repo, ref_name: &str, hash: &Hash) -> Result<()> {
    let ref_path = ref_path(repo, ref_name)?;
    ensure_parent(&ref_path)?;
    replace_ref_file(repo, &ref_path, hash)
}

/// compare-and-set a ref
///
/// `expected` is the value the caller last observed; None means the ref
/// must not exist yet. a concurrent writer holding `<name>.lock`, or a
/// current value other than `expected`, fails with RefConflict.
pub fn update_ref(repo: &Repo, ref_name: &str, new: &Hash, expected: Option<&Hash>) -> Result<()> {
    publish_refs(
        repo,
        &[RefUpdate {
            name: ref_name.to_string(),
            new: *new,
            expected: expected.copied(),
        }],
    )
}

/// one compare-and-set ref change
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RefUpdate {
    pub name: String,
    pub new: Hash,
    pub expected: Option<Hash>,
}

/// apply several compare-and-set updates, all or nothing
///
/// every lock is taken and every expectation checked before the first ref is
/// written.
pub fn publish_refs(repo: &Repo, updates: &[RefUpdate]) -> Result<()> {
    let mut ordered: Vec<&RefUpdate> = updates.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));
    ordered.dedup_by(|a, b| a.name == b.name);
    if ordered.len() != updates.len() {
        return Err(Error::InvalidRef("ref updated twice in one publish".to_string()));
    }

    let mut guards = Vec::with_capacity(ordered.len());
    for update in &ordered {
        let path = ref_path(repo, &update.name)?;
        ensure_parent(&path)?;

        let guard = RefLock::acquire(&path).map_err(|e| match e {
            Error::Io { ref source, .. }
                if source.kind() == std::io::ErrorKind::AlreadyExists =>
            {
                Error::RefConflict {
                    name: update.name.clone(),
                    expected: update.expected,
                    actual: try_read_ref(repo, &update.name).ok().flatten(),
                }
            }
            other => other,
        })?;
        guards.push(guard);

        let actual = try_read_ref(repo, &update.name)?;
        if actual != update.expected {
            return Err(Error::RefConflict {
                name: update.name.clone(),
                expected: update.expected,
                actual,
            });
        }
    }

    for update in &ordered {
        replace_ref_file(repo, &ref_path(repo, &update.name)?, &update.new)?;
        debug!(ref_name = %update.name, commit = %update.new, "updated ref");
    }

    drop(guards);
    Ok(())
}

/// read a ref
pub fn read_ref(repo: &Repo, ref_name: &str) -> Result<Hash> {
    try_read_ref(repo, ref_name)?.ok_or_else(|| Error::RefNotFound(ref_name.to_string()))
}

fn try_read_ref(repo: &Repo, ref_name: &str) -> Result<Option<Hash>> {
    let ref_path = ref_path(repo, ref_name)?;

    match fs::read_to_string(&ref_path) {
        Ok(content) => Ok(Some(Hash::from_hex(content.trim())?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(Error::Io {
            path: ref_path,
            source: e,
        }),
    }
}

/// delete a ref; objects it pointed at are left for prune
pub fn delete_ref(repo: &Repo, ref_name: &str) -> Result<()> {
    let ref_path = ref_path(repo, ref_name)?;

    fs::remove_file(&ref_path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::RefNotFound(ref_name.to_string())
        } else {
            Error::Io {
                path: ref_path,
                source: e,
            }
        }
    })
}

/// resolve a ref or hash string to a hash
///
/// a 64 hex character string is taken as a checksum, anything else is looked
/// up as a ref name.
pub fn resolve_ref(repo: &Repo, ref_or_hash: &str) -> Result<Hash> {
    if Hash::looks_like_hex(ref_or_hash) {
        return Hash::from_hex(ref_or_hash);
    }

    read_ref(repo, ref_or_hash)
}

/// like resolve_ref, but a missing ref is Ok(None)
pub fn try_resolve_ref(repo: &Repo, ref_or_hash: &str) -> Result<Option<Hash>> {
    if Hash::looks_like_hex(ref_or_hash) {
        return Hash::from_hex(ref_or_hash).map(Some);
    }

    try_read_ref(repo, ref_or_hash)
}

/// list all refs
pub fn list_refs(repo: &Repo) -> Result<Vec<String>> {
    let refs_dir = repo.refs_path();
    let mut refs = Vec::new();

    if refs_dir.exists() {
        collect_refs(&refs_dir, &refs_dir, &mut refs)?;
    }

    refs.sort();
    Ok(refs)
}

/// list refs matching a glob pattern
pub fn list_refs_matching(repo: &Repo, pattern: &str) -> Result<Vec<String>> {
    let all_refs = list_refs(repo)?;
    let glob = glob::Pattern::new(pattern).map_err(|e| Error::InvalidRef(e.to_string()))?;

    Ok(all_refs.into_iter().filter(|r| glob.matches(r)).collect())
}

/// check if a ref exists; an invalid name never does
pub fn ref_exists(repo: &Repo, ref_name: &str) -> bool {
    ref_path(repo, ref_name).is_ok_and(|p| p.is_file())
}

/// remove `<ref>.lock` files left behind by a writer that died mid-update
///
/// only safe while no writer can be publishing, i.e. under the exclusive
/// repository lock.
pub(crate) fn clear_stale_locks(repo: &Repo) -> Result<usize> {
    let refs_dir = repo.refs_path();
    let mut removed = 0;

    for entry in walkdir::WalkDir::new(&refs_dir).min_depth(1) {
        let entry = entry.map_err(|e| Error::Io {
            path: e.path().unwrap_or(&refs_dir).to_path_buf(),
            source: e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("walkdir error")),
        })?;
        let is_lock = entry.file_type().is_file()
            && entry.file_name().to_string_lossy().ends_with(LOCK_SUFFIX);
        if is_lock {
            fs::remove_file(entry.path()).with_path(entry.path())?;
            debug!(path = %entry.path().display(), "removed stale ref lock");
            removed += 1;
        }
    }
    Ok(removed)
}

/// path of a ref under refs/heads; the name is validated so it cannot escape
fn ref_path(repo: &Repo, ref_name: &str) -> Result<PathBuf> {
    validate_ref_name(ref_name)?;
    Ok(repo.refs_path().join(ref_name))
}

fn ensure_parent(ref_path: &Path) -> Result<()> {
    if let Some(parent) = ref_path.parent() {
        fs::create_dir_all(parent).with_path(parent)?;
    }
    Ok(())
}

/// temp -> fsync -> rename -> fsync parent
fn replace_ref_file(repo: &Repo, ref_path: &Path, hash: &Hash) -> Result<()> {
    let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
    {
        let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
        writeln!(tmp_file, "{}", hash.to_hex()).with_path(&tmp_path)?;
        tmp_file.sync_all().with_path(&tmp_path)?;
    }

    fs::rename(&tmp_path, ref_path).with_path(ref_path)?;

    if let Some(parent) = ref_path.parent() {
        let dir = File::open(parent).with_path(parent)?;
        dir.sync_all().with_path(parent)?;
    }

    Ok(())
}

/// `<ref>.lock`, created exclusively and removed on drop
struct RefLock {
    path: PathBuf,
}

impl RefLock {
    fn acquire(ref_path: &Path) -> Result<Self> {
        let mut path = ref_path.as_os_str().to_owned();
        path.push(LOCK_SUFFIX);
        let path = PathBuf::from(path);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_path(&path)?;

        Ok(Self { path })
    }
}

impl Drop for RefLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn collect_refs(base: &Path, dir: &Path, refs: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir).with_path(dir)? {
        let entry = entry.with_path(dir)?;
        let path = entry.path();

        if path.is_dir() {
            collect_refs(base, &path, refs)?;
        } else if path.is_file() {
            if let Ok(rel) = path.strip_prefix(base) {
                let ref_name = rel.to_string_lossy().to_string();
                // in-flight compare-and-set lock, not a ref
                if ref_name.ends_with(LOCK_SUFFIX) {
                    continue;
                }
                refs.push(ref_name);
            }
        }
    }
    Ok(())
}

pub(crate) fn validate_ref_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidRef("empty ref name".to_string()));
    }

    if name.starts_with('/') || name.ends_with('/') {
        return Err(Error::InvalidRef(format!(
            "ref name cannot start or end with '/': {}",
            name
        )));
    }

    if name.contains("//") {
        return Err(Error::InvalidRef(format!(
            "ref name cannot contain '//': {}",
            name
        )));
    }

    if name.contains('\0') {
        return Err(Error::InvalidRef(format!(
            "ref name cannot contain null byte: {}",
            name
        )));
    }

    if name.ends_with(LOCK_SUFFIX) {
        return Err(Error::InvalidRef(format!(
            "ref name cannot end with '{}': {}",
            LOCK_SUFFIX, name
        )));
    }

    for component in name.split('/') {
        if component == "." || component == ".." {
            return Err(Error::InvalidRef(format!(
                "ref name cannot contain '.' or '..': {}",
                name
            )));
        }
    }

    Ok(())
}
