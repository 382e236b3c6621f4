//! the conversion pipeline: fetch, assemble, reorganize, describe, commit, install

use std::path::Path;

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::external::{ImageFetcher, RuntimeInstaller};
use crate::hash::Hash;
use crate::manifest::{image_ref, load_manifest, ImageConfig, Manifest, CONFIG_FILE};
use crate::ops::assemble::{assemble, AssembleStats};
use crate::ops::commit::commit_with_metadata;
use crate::ops::reorganize::{fold_usr, normalize_permissions, remove_denied_paths, MergeStats};
use crate::repo::Repo;
use crate::runtime::{write_metadata, write_metainfo, write_shim, ImageName, RuntimeSpec};
use crate::staging::Staging;

/// what to convert and how to name the result
#[derive(Clone, Debug, Default)]
pub struct ConvertOptions {
    pub image: String,
    /// runtime id; derived from the image name when unset
    pub runtime_id: Option<String>,
    /// runtime branch; derived from the image tag when unset
    pub branch: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ConvertOutcome {
    pub runtime: RuntimeSpec,
    pub commit: Hash,
    pub assemble: AssembleStats,
    pub merge: MergeStats,
}

/// convert `opts.image` into a committed runtime and optionally install it
///
/// the repository is share-locked for the whole run so cleanup cannot
/// remove objects or staging directories it is still using. on failure
/// after staging was created the staging directory is left in place.
pub fn convert(
    repo: &Repo,
    opts: &ConvertOptions,
    fetcher: &dyn ImageFetcher,
    installer: Option<&dyn RuntimeInstaller>,
) -> Result<ConvertOutcome> {
    let name = ImageName::parse(&opts.image)?;
    let _lock = repo.lock_shared()?;

    fetcher.fetch(repo, &opts.image)?;
    let manifest = load_manifest(repo, &image_ref(&opts.image))?;

    let staging = Staging::create(&repo.staging_root())?;
    let outcome = match build(repo, opts, &name, &manifest, staging.path()) {
        Ok(outcome) => outcome,
        Err(e) => {
            warn!(staging = %staging.path().display(), error = %e, "conversion failed, keeping staging directory");
            return Err(e);
        }
    };
    staging.remove()?;

    info!(
        image = %opts.image,
        runtime = %outcome.runtime.ref_name(),
        commit = %outcome.commit,
        "converted image"
    );

    if let Some(installer) = installer {
        installer.install(&repo.uri()?, &outcome.runtime.ref_name())?;
    }

    Ok(outcome)
}

fn build(
    repo: &Repo,
    opts: &ConvertOptions,
    name: &ImageName,
    manifest: &Manifest,
    staging: &Path,
) -> Result<ConvertOutcome> {
    let assembled = assemble(repo, manifest, staging)?;

    // read before the deny-list removes it
    let image_config = ImageConfig::load(&staging.join(CONFIG_FILE))?;
    let arch = if image_config.architecture.is_empty() {
        host_arch()
    } else {
        image_config.architecture.as_str()
    };
    let runtime = RuntimeSpec::derive(
        name,
        arch,
        opts.runtime_id.as_deref(),
        opts.branch.as_deref(),
        &repo.config().convert,
    );

    remove_denied_paths(staging)?;
    normalize_permissions(staging)?;
    let merged = fold_usr(staging)?;

    write_metadata(staging, &runtime, &image_config.env())?;
    write_metainfo(
        staging,
        &runtime.id,
        name.short_name(),
        &format!("Runtime converted from {}", opts.image),
    )?;
    write_shim(staging, &repo.config().convert.shim_name, &image_config.command())?;

    let commit = commit_with_retries(repo, staging, &runtime, opts, manifest)?;

    Ok(ConvertOutcome {
        runtime,
        commit,
        assemble: assembled,
        merge: merged,
    })
}

/// commit the staging tree, re-reading the ref after each lost race
fn commit_with_retries(
    repo: &Repo,
    staging: &Path,
    runtime: &RuntimeSpec,
    opts: &ConvertOptions,
    manifest: &Manifest,
) -> Result<Hash> {
    let ref_name = runtime.ref_name();
    let subject = format!("Export {}", opts.image);
    let metadata = [
        ("oci.image", opts.image.as_str()),
        ("oci.config", manifest.config.digest.as_str()),
    ];
    let retries = repo.config().convert.commit_retries;

    retry_on_conflict(retries, |_| {
        commit_with_metadata(repo, staging, &ref_name, &subject, &metadata)
    })
}

/// run `attempt` again after each RefConflict, at most `retries` more times
///
/// every attempt re-reads the ref, so a retry commits on top of whatever
/// the other writer published.
fn retry_on_conflict<T>(retries: u32, mut attempt: impl FnMut(u32) -> Result<T>) -> Result<T> {
    let mut n = 0;
    loop {
        match attempt(n) {
            Err(Error::RefConflict { name, .. }) if n < retries => {
                n += 1;
                warn!(ref_name = %name, attempt = n, "ref moved during commit, retrying");
            }
            other => return other,
        }
    }
}

fn host_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86" => "i386",
        other => other,
    }
}
