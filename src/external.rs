//! programs the converter hands off to: the image fetcher and the runtime installer

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ToolsConfig;
use crate::error::{Error, IoResultExt, Result};
use crate::fs::remove_path;
use crate::manifest::{config_ref, image_ref, layer_ref, Descriptor, Manifest, CONFIG_FILE, MANIFEST_FILE};
use crate::ops::commit::commit;
use crate::refs::ref_exists;
use crate::repo::Repo;

/// brings an image into the store
///
/// on success the store holds `image/<escaped image>` with a
/// `manifest.json`, a `layer/<hex>` ref per layer and `config/<hex>` with a
/// `content` file.
pub trait ImageFetcher {
    fn fetch(&self, repo: &Repo, image: &str) -> Result<()>;
}

/// materializes a committed runtime from the store
pub trait RuntimeInstaller {
    fn install(&self, repo_uri: &str, package: &str) -> Result<()>;
}

/// run a command to completion, mapping a non-zero exit to ToolFailed
fn run(cmd: &mut Command, program: &str) -> Result<()> {
    debug!(command = ?cmd, "running");
    let status = cmd.status().with_path(program)?;
    if !status.success() {
        return Err(Error::ToolFailed {
            program: program.to_string(),
            code: status.code(),
        });
    }
    Ok(())
}

/// fetches with `skopeo copy` into an OCI layout, then imports the layout
pub struct SkopeoFetcher {
    pub program: String,
    pub transport: String,
    pub tar: String,
}

impl SkopeoFetcher {
    pub fn from_config(tools: &ToolsConfig) -> Self {
        Self {
            program: tools.fetcher.clone(),
            transport: tools.transport.clone(),
            tar: tools.tar.clone(),
        }
    }

    /// image reference in skopeo's transport syntax
    fn source(&self, image: &str) -> String {
        if image.contains("://") || image.starts_with("oci:") || image.starts_with("docker-archive:") {
            image.to_string()
        } else {
            format!("{}{}", self.transport, image)
        }
    }
}

impl ImageFetcher for SkopeoFetcher {
    fn fetch(&self, repo: &Repo, image: &str) -> Result<()> {
        let scratch = repo.tmp_path().join(format!("fetch-{}", uuid::Uuid::new_v4().simple()));
        fs::create_dir(&scratch).with_path(&scratch)?;

        let result = (|| {
            let layout = scratch.join("layout");
            info!(image, program = %self.program, "fetching image");
            run(
                Command::new(&self.program)
                    .arg("copy")
                    .arg(self.source(image))
                    .arg(format!("oci:{}:latest", layout.display())),
                &self.program,
            )?;
            import_oci_layout(repo, &layout, image, &self.tar, &scratch)
        })();

        let cleanup = remove_path(&scratch);
        result?;
        cleanup
    }
}

#[derive(Deserialize)]
struct OciIndex {
    manifests: Vec<Descriptor>,
}

fn layout_blob(layout: &Path, descriptor: &Descriptor) -> PathBuf {
    layout.join("blobs/sha256").join(descriptor.hex())
}

/// commit the manifest, config and layers of an OCI image layout
///
/// layers whose ref already exists are not unpacked again. `scratch` holds
/// the per-piece trees while they are committed.
pub fn import_oci_layout(repo: &Repo, layout: &Path, image: &str, tar: &str, scratch: &Path) -> Result<Manifest> {
    let index_path = layout.join("index.json");
    let index: OciIndex = serde_json::from_slice(&fs::read(&index_path).with_path(&index_path)?)
        .map_err(|e| Error::InvalidManifest(format!("{}: {}", index_path.display(), e)))?;
    let entry = index
        .manifests
        .first()
        .ok_or_else(|| Error::InvalidManifest(format!("{} lists no manifests", index_path.display())))?;

    let manifest_path = layout_blob(layout, entry);
    let manifest_bytes = fs::read(&manifest_path).with_path(&manifest_path)?;
    let manifest = Manifest::from_json(&manifest_bytes)?;

    for layer in &manifest.layers {
        let name = layer_ref(layer.hex());
        if ref_exists(repo, &name) {
            debug!(digest = %layer.digest, "layer already in store");
            continue;
        }

        let dir = scratch.join(layer.hex());
        fs::create_dir(&dir).with_path(&dir)?;
        let blob = layout_blob(layout, layer);
        run(
            Command::new(tar).arg("-xf").arg(&blob).arg("-C").arg(&dir),
            tar,
        )?;
        commit(repo, &dir, &name, &format!("Import layer {}", layer.digest))?;
        remove_path(&dir)?;
        info!(digest = %layer.digest, "imported layer");
    }

    let name = config_ref(manifest.config.hex());
    if !ref_exists(repo, &name) {
        let dir = scratch.join("config");
        fs::create_dir(&dir).with_path(&dir)?;
        let blob = layout_blob(layout, &manifest.config);
        let dest = dir.join(CONFIG_FILE);
        fs::copy(&blob, &dest).with_path(&blob)?;
        commit(repo, &dir, &name, &format!("Import config {}", manifest.config.digest))?;
        remove_path(&dir)?;
    }

    let dir = scratch.join("image");
    fs::create_dir(&dir).with_path(&dir)?;
    let dest = dir.join(MANIFEST_FILE);
    fs::write(&dest, &manifest_bytes).with_path(&dest)?;
    commit(repo, &dir, &image_ref(image), &format!("Import {}", image))?;
    remove_path(&dir)?;

    Ok(manifest)
}

/// runs a configured argv followed by the repository URI and the package name
pub struct CommandInstaller {
    pub argv: Vec<String>,
}

impl RuntimeInstaller for CommandInstaller {
    fn install(&self, repo_uri: &str, package: &str) -> Result<()> {
        let Some((program, args)) = self.argv.split_first() else {
            return Err(Error::Io {
                path: PathBuf::from("installer"),
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "empty installer command"),
            });
        };

        info!(program = %program, package, "installing runtime");
        run(Command::new(program).args(args).arg(repo_uri).arg(package), program)
    }
}
