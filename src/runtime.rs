//! naming and metadata files of the produced runtime package

use std::fs::{self, Permissions};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::ConvertConfig;
use crate::error::{Error, IoResultExt, Result};
use crate::ops::reorganize::FILES_DIR;

/// image reference split into repository, tag and digest
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageName {
    pub repository: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageName {
    /// parse `[registry/]path[:tag][@digest]`
    pub fn parse(image: &str) -> Result<Self> {
        if image.is_empty() || image.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(Error::InvalidImage(image.to_string()));
        }

        let (rest, digest) = match image.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (image, None),
        };

        // a colon after the last slash is a tag, before it a registry port
        let last_slash = rest.rfind('/').map_or(0, |i| i + 1);
        let (repository, tag) = match rest[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        if repository.is_empty()
            || repository.ends_with('/')
            || tag.as_deref() == Some("")
            || digest.as_deref() == Some("")
        {
            return Err(Error::InvalidImage(image.to_string()));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// last path component of the repository
    pub fn short_name(&self) -> &str {
        self.repository.rsplit('/').next().unwrap_or(&self.repository)
    }
}

/// id, architecture and branch of one runtime package
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RuntimeSpec {
    pub id: String,
    pub arch: String,
    pub branch: String,
}

impl RuntimeSpec {
    /// derive the package coordinates from an image, honoring explicit overrides
    pub fn derive(
        image: &ImageName,
        image_arch: &str,
        id: Option<&str>,
        branch: Option<&str>,
        config: &ConvertConfig,
    ) -> Self {
        let id = match id {
            Some(id) => id.to_string(),
            None => format!("{}.{}", config.id_prefix, id_component(image.short_name())),
        };

        let branch = match branch {
            Some(branch) => branch.to_string(),
            None => match image.tag.as_deref() {
                None | Some("latest") => config.default_branch.clone(),
                Some(tag) => branch_component(tag),
            },
        };

        Self {
            id,
            arch: map_arch(image_arch).to_string(),
            branch,
        }
    }

    /// `<id>/<arch>/<branch>`
    pub fn triple(&self) -> String {
        format!("{}/{}/{}", self.id, self.arch, self.branch)
    }

    /// ref the runtime is committed under and the installer is asked for
    pub fn ref_name(&self) -> String {
        format!("runtime/{}", self.triple())
    }
}

/// container architecture names to package architecture names
pub fn map_arch(arch: &str) -> &str {
    match arch {
        "amd64" => "x86_64",
        "arm64" => "aarch64",
        "386" => "i386",
        other => other,
    }
}

/// id components allow `[A-Za-z0-9_-]` and may not start with a digit
fn id_component(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if out.is_empty() || out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}

fn branch_component(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

/// key-file escaping of a value
fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}

fn valid_key(key: &str) -> bool {
    !key.is_empty() && key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// write `<root>/metadata`
pub fn write_metadata(root: &Path, spec: &RuntimeSpec, env: &[(String, String)]) -> Result<PathBuf> {
    let mut content = String::new();
    content.push_str("[Runtime]\n");
    content.push_str(&format!("name={}\n", spec.id));
    content.push_str(&format!("runtime={}\n", spec.triple()));
    content.push_str(&format!("sdk={}\n", spec.triple()));

    if !env.is_empty() {
        content.push_str("\n[Environment]\n");
        for (key, value) in env {
            if !valid_key(key) {
                warn!(key = %key, "skipping environment variable with invalid name");
                continue;
            }
            content.push_str(&format!("{}={}\n", key, escape_value(value)));
        }
    }

    let path = root.join("metadata");
    fs::write(&path, content).with_path(&path)?;
    debug!(path = %path.display(), "wrote runtime metadata");
    Ok(path)
}

fn escape_xml(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// write `<root>/files/share/metainfo/<id>.metainfo.xml`
pub fn write_metainfo(root: &Path, id: &str, name: &str, summary: &str) -> Result<PathBuf> {
    let dir = root.join(FILES_DIR).join("share/metainfo");
    fs::create_dir_all(&dir).with_path(&dir)?;

    let content = format!(
        concat!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n",
            "<component type=\"runtime\">\n",
            "  <id>{}</id>\n",
            "  <metadata_license>CC0-1.0</metadata_license>\n",
            "  <name>{}</name>\n",
            "  <summary>{}</summary>\n",
            "</component>\n"
        ),
        escape_xml(id),
        escape_xml(name),
        escape_xml(summary)
    );

    let path = dir.join(format!("{}.metainfo.xml", id));
    fs::write(&path, content).with_path(&path)?;
    Ok(path)
}

/// single-quote `arg` for a POSIX shell
pub fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// write an executable `<root>/files/bin/<name>` running `command` plus its own arguments
///
/// an empty command writes nothing.
pub fn write_shim(root: &Path, name: &str, command: &[String]) -> Result<Option<PathBuf>> {
    if command.is_empty() {
        warn!("image has no entrypoint or cmd, not writing a shim");
        return Ok(None);
    }

    let dir = root.join(FILES_DIR).join("bin");
    fs::create_dir_all(&dir).with_path(&dir)?;

    let quoted: Vec<String> = command.iter().map(|a| shell_quote(a)).collect();
    let content = format!("#!/bin/sh\nexec {} \"$@\"\n", quoted.join(" "));

    let path = dir.join(name);
    fs::write(&path, content).with_path(&path)?;
    fs::set_permissions(&path, Permissions::from_mode(0o755)).with_path(&path)?;
    Ok(Some(path))
}
