//! OCI image manifest and image config documents, and the ref names they map to.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, IoResultExt, Result};
use crate::hash::Hash;
use crate::object::{read_blob, read_commit, read_tree};
use crate::refs::resolve_ref;
use crate::repo::Repo;
use crate::types::EntryKind;

const DIGEST_PREFIX: &str = "sha256:";

/// file in an image ref's tree holding the manifest
pub const MANIFEST_FILE: &str = "manifest.json";
/// file in a config ref's tree holding the image config
pub const CONFIG_FILE: &str = "content";

/// ref holding the manifest of `image`
///
/// tags and digests become part of the last component: `alpine:3.19` ->
/// `image/alpine_3.19`.
pub fn image_ref(image: &str) -> String {
    let escaped: String = image
        .chars()
        .map(|c| if c == ':' || c == '@' { '_' } else { c })
        .collect();
    format!("image/{}", escaped)
}

pub fn layer_ref(hex: &str) -> String {
    format!("layer/{}", hex)
}

pub fn config_ref(hex: &str) -> String {
    format!("config/{}", hex)
}

/// content descriptor as found in a manifest
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub digest: String,
    #[serde(default)]
    pub size: u64,
}

impl Descriptor {
    /// hex part of the digest; only valid after `Manifest::from_json`
    pub fn hex(&self) -> &str {
        self.digest.strip_prefix(DIGEST_PREFIX).unwrap_or(&self.digest)
    }

    fn validate(&self) -> Result<()> {
        let hex = self.digest.strip_prefix(DIGEST_PREFIX).ok_or_else(|| {
            Error::InvalidManifest(format!("digest without {} prefix: {}", DIGEST_PREFIX, self.digest))
        })?;
        if !Hash::looks_like_hex(hex) {
            return Err(Error::InvalidManifest(format!("malformed digest: {}", self.digest)));
        }
        Ok(())
    }
}

/// image manifest: config plus layers, bottom layer first
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(rename = "schemaVersion", default, skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<u32>,
    #[serde(rename = "mediaType", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    pub layers: Vec<Descriptor>,
}

impl Manifest {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let manifest: Manifest = serde_json::from_slice(bytes)
            .map_err(|e| Error::InvalidManifest(e.to_string()))?;

        manifest.config.validate()?;
        for layer in &manifest.layers {
            layer.validate()?;
        }
        Ok(manifest)
    }

    /// layer and config hexes this manifest keeps alive
    pub fn referenced_refs(&self) -> Vec<String> {
        let mut refs: Vec<String> = self.layers.iter().map(|l| layer_ref(l.hex())).collect();
        refs.push(config_ref(self.config.hex()));
        refs
    }
}

/// read the manifest stored under `image_ref` without checking it out
pub fn load_manifest(repo: &Repo, image_ref: &str) -> Result<Manifest> {
    let commit_hash = resolve_ref(repo, image_ref)?;
    let commit = read_commit(repo, &commit_hash)?;
    let tree = read_tree(repo, &commit.tree)?;

    let entry = tree.get(MANIFEST_FILE).ok_or_else(|| {
        Error::InvalidManifest(format!("{} has no {}", image_ref, MANIFEST_FILE))
    })?;
    let hash = match &entry.kind {
        EntryKind::Regular { hash, .. } => hash,
        other => {
            return Err(Error::InvalidManifest(format!(
                "{} in {} is a {}",
                MANIFEST_FILE,
                image_ref,
                other.type_name()
            )))
        }
    };

    Manifest::from_json(&read_blob(repo, hash)?)
}

/// the subset of an OCI image config the converter uses
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default)]
    pub architecture: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default)]
    pub config: ContainerConfig,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ContainerConfig {
    #[serde(default, deserialize_with = "null_as_default")]
    pub env: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub entrypoint: Vec<String>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub cmd: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, deserialize_with = "null_as_default", skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

fn null_as_default<'de, D, T>(deserializer: D) -> std::result::Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

impl ImageConfig {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::InvalidManifest(e.to_string()))
    }

    /// parse the config file an assembled staging tree carries
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).with_path(path)?;
        Self::from_json(&bytes)
    }

    /// `NAME=VALUE` entries split at the first `=`; entries without one get an empty value
    pub fn env(&self) -> Vec<(String, String)> {
        self.config
            .env
            .iter()
            .map(|e| match e.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (e.clone(), String::new()),
            })
            .collect()
    }

    /// argv the image runs: entrypoint followed by cmd
    pub fn command(&self) -> Vec<String> {
        self.config
            .entrypoint
            .iter()
            .chain(self.config.cmd.iter())
            .cloned()
            .collect()
    }
}
