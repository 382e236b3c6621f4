use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::object::read_commit;
use crate::refs::resolve_ref;
use crate::repo::Repo;
use crate::types::Commit;

/// commit with its hash
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub hash: Hash,
    pub commit: Commit,
}

/// parent chain of a ref or commit, newest first
pub fn history(repo: &Repo, rev: &str, max_count: Option<usize>) -> Result<Vec<LogEntry>> {
    let mut next = Some(resolve_ref(repo, rev)?);
    let mut entries = Vec::new();
    let mut visited = HashSet::new();

    while let Some(hash) = next {
        if max_count.is_some_and(|max| entries.len() >= max) {
            break;
        }
        if !visited.insert(hash) {
            return Err(Error::InvalidTree(format!("commit cycle at {}", hash)));
        }

        let commit = read_commit(repo, &hash)?;
        next = commit.parent;
        entries.push(LogEntry { hash, commit });
    }

    Ok(entries)
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "commit {}", self.hash)?;
        writeln!(f, "Date:   {}", self.commit.timestamp)?;
        writeln!(f)?;
        for line in self.commit.subject.lines() {
            writeln!(f, "    {}", line)?;
        }
        Ok(())
    }
}
