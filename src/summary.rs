use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::object::read_commit;
use crate::refs::{list_refs, read_ref};
use crate::repo::Repo;

/// store-wide index of refs, read by installers instead of walking refs/
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    pub refs: BTreeMap<String, RefSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefSummary {
    pub commit: Hash,
    pub timestamp: i64,
    pub subject: String,
}

impl Summary {
    /// build a summary from the refs currently in the store
    pub fn collect(repo: &Repo) -> Result<Self> {
        let mut refs = BTreeMap::new();

        for name in list_refs(repo)? {
            let commit_hash = match read_ref(repo, &name) {
                Ok(h) => h,
                // deleted while listing
                Err(Error::RefNotFound(_)) => continue,
                Err(e) => return Err(e),
            };
            match read_commit(repo, &commit_hash) {
                Ok(commit) => {
                    refs.insert(
                        name,
                        RefSummary {
                            commit: commit_hash,
                            timestamp: commit.timestamp,
                            subject: commit.subject,
                        },
                    );
                }
                Err(Error::ObjectNotFound(_)) => {
                    warn!(ref_name = %name, commit = %commit_hash, "ref points at missing commit");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(Self { refs })
    }

    /// read summary.json; a store without one has an empty summary
    pub fn load(repo: &Repo) -> Result<Self> {
        let path = repo.summary_path();
        match fs::read(&path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Io { path, source: e }),
        }
    }

    /// write summary.json atomically
    pub fn save(&self, repo: &Repo) -> Result<()> {
        let path = repo.summary_path();
        let tmp_path = repo.tmp_path().join(uuid::Uuid::new_v4().to_string());
        {
            let mut tmp_file = File::create(&tmp_path).with_path(&tmp_path)?;
            serde_json::to_writer_pretty(&mut tmp_file, self)?;
            tmp_file.write_all(b"\n").with_path(&tmp_path)?;
            tmp_file.sync_all().with_path(&tmp_path)?;
        }
        fs::rename(&tmp_path, &path).with_path(&path)
    }
}

/// rebuild summary.json from the current refs
pub fn regenerate(repo: &Repo) -> Result<Summary> {
    let summary = Summary::collect(repo)?;
    summary.save(repo)?;
    debug!(refs = summary.refs.len(), "regenerated summary");
    Ok(summary)
}
