use std::path::Path;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::manifest::{config_ref, layer_ref, Manifest};
use crate::ops::checkout::{checkout, CheckoutOptions, CheckoutStats};
use crate::refs::ref_exists;
use crate::repo::Repo;

/// totals over all layers of one assembly
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssembleStats {
    pub layers: usize,
    pub files: u64,
    pub whited_out: u64,
}

impl AssembleStats {
    fn add(&mut self, stats: &CheckoutStats) {
        self.files += stats.files;
        self.whited_out += stats.whited_out;
    }
}

/// overlay every layer of `manifest`, bottom first, then the image config onto `staging`
///
/// every ref is checked before anything is written, so a missing layer
/// leaves the staging directory untouched.
pub fn assemble(repo: &Repo, manifest: &Manifest, staging: &Path) -> Result<AssembleStats> {
    for layer in &manifest.layers {
        if !ref_exists(repo, &layer_ref(layer.hex())) {
            return Err(Error::MissingLayer(layer.digest.clone()));
        }
    }
    let config = config_ref(manifest.config.hex());
    if !ref_exists(repo, &config) {
        return Err(Error::MissingConfig(manifest.config.digest.clone()));
    }

    let mut stats = AssembleStats::default();
    for (index, layer) in manifest.layers.iter().enumerate() {
        let layer_stats = checkout(repo, &layer_ref(layer.hex()), staging, CheckoutOptions::layer())?;
        debug!(index, digest = %layer.digest, files = layer_stats.files, "applied layer");
        stats.add(&layer_stats);
        stats.layers += 1;
    }

    // lands `content` at the staging root
    checkout(repo, &config, staging, CheckoutOptions::layer())?;

    info!(
        layers = stats.layers,
        files = stats.files,
        whited_out = stats.whited_out,
        staging = %staging.display(),
        "assembled image"
    );
    Ok(stats)
}
