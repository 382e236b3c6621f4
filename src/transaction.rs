use tracing::debug;

use crate::error::Result;
use crate::hash::Hash;
use crate::refs::{self, validate_ref_name, RefUpdate};
use crate::repo::{Repo, RepoLock};

/// a unit of writes against the store
///
/// objects are written straight through; ref changes are queued and only
/// become visible on `commit`. the shared repository lock is held for the
/// whole lifetime so prune cannot sweep objects that are not yet referenced.
pub struct Transaction<'a> {
    repo: &'a Repo,
    _lock: RepoLock,
    pending: Vec<RefUpdate>,
}

impl<'a> Transaction<'a> {
    /// start a transaction, waiting for any running prune to finish
    pub fn begin(repo: &'a Repo) -> Result<Self> {
        let lock = repo.lock_shared()?;
        debug!(repo = %repo.path().display(), "transaction started");
        Ok(Self {
            repo,
            _lock: lock,
            pending: Vec::new(),
        })
    }

    pub fn repo(&self) -> &Repo {
        self.repo
    }

    /// queue a compare-and-set of `name` from `expected` to `new`
    pub fn update_ref(&mut self, name: &str, new: Hash, expected: Option<Hash>) -> Result<()> {
        validate_ref_name(name)?;
        self.pending.retain(|u| u.name != name);
        self.pending.push(RefUpdate {
            name: name.to_string(),
            new,
            expected,
        });
        Ok(())
    }

    pub fn pending(&self) -> &[RefUpdate] {
        &self.pending
    }

    /// publish every queued ref update; on a conflict none is published
    pub fn commit(self) -> Result<()> {
        refs::publish_refs(self.repo, &self.pending)?;
        debug!(refs = self.pending.len(), "transaction committed");
        Ok(())
    }

    /// drop queued ref updates; written objects stay until the next prune
    pub fn abort(self) {
        debug!(refs = self.pending.len(), "transaction aborted");
    }
}
