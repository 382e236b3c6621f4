use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{IoResultExt, Result};

/// repository configuration stored in config.toml
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub convert: ConvertConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).with_path(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).with_path(path)?;
        Ok(())
    }
}

/// defaults for conversion runs
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertConfig {
    /// reverse-DNS prefix for runtime ids derived from image names
    pub id_prefix: String,
    /// branch used when the image reference carries no tag
    pub default_branch: String,
    /// how many times the commit step re-reads the ref after a conflict
    pub commit_retries: u32,
    /// file name of the entrypoint shim under files/bin
    pub shim_name: String,
    /// where staging directories are created (defaults to <repo>/staging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            id_prefix: "io.container".to_string(),
            default_branch: "stable".to_string(),
            commit_retries: 3,
            shim_name: "oci-entrypoint".to_string(),
            staging_dir: None,
        }
    }
}

/// external programs the pipeline hands off to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    /// skopeo binary used to export images
    pub fetcher: String,
    /// transport prefix prepended to bare image names
    pub transport: String,
    /// tar binary used to unpack layer blobs
    pub tar: String,
    /// installer argv; the repo URI and package name are appended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub installer: Option<Vec<String>>,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            fetcher: "skopeo".to_string(),
            transport: "docker://".to_string(),
            tar: "tar".to_string(),
            installer: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_toml_roundtrip() {
        let mut config = Config::default();
        config.convert.id_prefix = "org.example".to_string();
        config.convert.staging_dir = Some(PathBuf::from("/var/tmp/staging"));
        config.tools.installer = Some(vec!["flatpak".to_string(), "install".to_string()]);

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.convert.commit_retries, 3);
        assert!(config.tools.installer.is_none());
    }

    #[test]
    fn test_config_partial_section() {
        let toml_str = r#"
[convert]
default_branch = "master"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.convert.default_branch, "master");
        assert_eq!(config.convert.id_prefix, "io.container");
        assert_eq!(config.tools.fetcher, "skopeo");
    }
}
