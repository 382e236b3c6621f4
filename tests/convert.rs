use std::cell::RefCell;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use oci2runtime::convert::{convert, ConvertOptions};
use oci2runtime::external::{ImageFetcher, RuntimeInstaller};
use oci2runtime::manifest::{config_ref, image_ref, layer_ref, CONFIG_FILE, MANIFEST_FILE};
use oci2runtime::ops::{checkout, cleanup, commit, history, CheckoutOptions, CleanupMode};
use oci2runtime::{list_refs, read_commit, Error, Hash, Repo, Summary};
use tempfile::{tempdir, TempDir};

/// imports prepared directories the way the real fetcher imports an OCI layout
struct FakeFetcher {
    scratch: PathBuf,
    layers: Vec<PathBuf>,
    /// layers listed in the manifest but never imported
    missing_layers: usize,
    config: String,
}

impl FakeFetcher {
    fn new(scratch: &Path, config: &str) -> Self {
        Self {
            scratch: scratch.to_path_buf(),
            layers: Vec::new(),
            missing_layers: 0,
            config: config.to_string(),
        }
    }

    /// add a layer built by `build`
    fn layer(mut self, build: impl FnOnce(&Path)) -> Self {
        let dir = self.scratch.join(format!("layer{}", self.layers.len()));
        fs::create_dir_all(&dir).unwrap();
        build(&dir);
        self.layers.push(dir);
        self
    }

    fn dir(&self, name: &str) -> PathBuf {
        let dir = self.scratch.join(name);
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }
}

impl ImageFetcher for FakeFetcher {
    fn fetch(&self, repo: &Repo, image: &str) -> oci2runtime::Result<()> {
        let mut digests = Vec::new();
        for layer in &self.layers {
            let hex = Hash::digest(layer.to_string_lossy().as_bytes()).to_hex();
            commit(repo, layer, &layer_ref(&hex), "layer")?;
            digests.push(format!(r#"{{"digest":"sha256:{}"}}"#, hex));
        }
        for i in 0..self.missing_layers {
            let hex = Hash::digest(format!("missing{i}").as_bytes()).to_hex();
            digests.push(format!(r#"{{"digest":"sha256:{}"}}"#, hex));
        }

        let config_hex = Hash::digest(self.config.as_bytes()).to_hex();
        let config_dir = self.dir("config");
        fs::write(config_dir.join(CONFIG_FILE), &self.config).unwrap();
        commit(repo, &config_dir, &config_ref(&config_hex), "config")?;

        let manifest = format!(
            r#"{{"schemaVersion":2,"config":{{"digest":"sha256:{}"}},"layers":[{}]}}"#,
            config_hex,
            digests.join(",")
        );
        let image_dir = self.dir("image");
        fs::write(image_dir.join(MANIFEST_FILE), manifest).unwrap();
        commit(repo, &image_dir, &image_ref(image), "image")?;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingInstaller {
    calls: RefCell<Vec<(String, String)>>,
}

impl RuntimeInstaller for RecordingInstaller {
    fn install(&self, repo_uri: &str, package: &str) -> oci2runtime::Result<()> {
        self.calls
            .borrow_mut()
            .push((repo_uri.to_string(), package.to_string()));
        Ok(())
    }
}

fn write(path: &Path, content: &str) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn setup() -> (TempDir, Repo, PathBuf) {
    let dir = tempdir().unwrap();
    let repo = Repo::init(&dir.path().join("repo")).unwrap();
    let scratch = dir.path().join("scratch");
    fs::create_dir(&scratch).unwrap();
    (dir, repo, scratch)
}

fn two_layer_fetcher(scratch: &Path, config: &str) -> FakeFetcher {
    FakeFetcher::new(scratch, config)
        .layer(|d| {
            write(&d.join("usr/bin/hello"), "hello v1");
            write(&d.join("usr/local/lib/x"), "x");
            write(&d.join("tmp/build.log"), "junk");
        })
        .layer(|d| {
            write(&d.join("usr/bin/hello"), "hello v2");
        })
}

fn opts(image: &str) -> ConvertOptions {
    ConvertOptions {
        image: image.to_string(),
        ..Default::default()
    }
}

fn names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    names
}

#[test]
fn two_layer_image_becomes_prefixed_runtime() {
    let (dir, repo, scratch) = setup();
    let fetcher = two_layer_fetcher(&scratch, r#"{"architecture":"amd64","config":{"Env":["LANG=C.UTF-8"]}}"#);

    let outcome = convert(&repo, &opts("hello:1.0"), &fetcher, None).unwrap();

    assert_eq!(outcome.runtime.ref_name(), "runtime/io.container.hello/x86_64/1.0");
    assert_eq!(outcome.assemble.layers, 2);

    let out = dir.path().join("out");
    checkout(&repo, &outcome.runtime.ref_name(), &out, CheckoutOptions::default()).unwrap();

    assert_eq!(names(&out), vec!["files", "metadata"]);
    assert_eq!(names(&out.join("files")), vec!["bin", "lib", "share"]);
    assert_eq!(names(&out.join("files/bin")), vec!["hello"]);
    assert_eq!(names(&out.join("files/lib")), vec!["x"]);
    assert_eq!(fs::read_to_string(out.join("files/bin/hello")).unwrap(), "hello v2");
    assert!(!out.join("files/usr").exists());
    assert!(!out.join("files/tmp").exists());
    assert!(out
        .join("files/share/metainfo/io.container.hello.metainfo.xml")
        .is_file());

    let metadata = fs::read_to_string(out.join("metadata")).unwrap();
    assert!(metadata.contains("runtime=io.container.hello/x86_64/1.0"));
    assert!(metadata.contains("LANG=C.UTF-8"));

    let commit = read_commit(&repo, &outcome.commit).unwrap();
    assert_eq!(commit.metadata["oci.image"], "hello:1.0");
    assert_eq!(commit.subject, "Export hello:1.0");

    // staging directory consumed
    assert_eq!(fs::read_dir(repo.staging_root()).unwrap().count(), 0);

    let summary = Summary::load(&repo).unwrap();
    assert_eq!(summary.refs[&outcome.runtime.ref_name()].commit, outcome.commit);
}

#[test]
fn reconversion_chains_history() {
    let (_dir, repo, scratch) = setup();
    let fetcher = two_layer_fetcher(&scratch, r#"{"architecture":"arm64"}"#);

    let first = convert(&repo, &opts("hello"), &fetcher, None).unwrap();
    let second = convert(&repo, &opts("hello"), &fetcher, None).unwrap();

    assert_eq!(first.runtime, second.runtime);
    assert_eq!(second.runtime.ref_name(), "runtime/io.container.hello/aarch64/stable");

    let log = history(&repo, &second.runtime.ref_name(), None).unwrap();
    let hashes: Vec<Hash> = log.iter().map(|e| e.hash).collect();
    assert_eq!(hashes, vec![second.commit, first.commit]);
}

#[test]
fn overrides_and_installer() {
    let (_dir, repo, scratch) = setup();
    let fetcher = two_layer_fetcher(&scratch, r#"{"architecture":"amd64"}"#);
    let installer = RecordingInstaller::default();

    let options = ConvertOptions {
        image: "hello:1.0".to_string(),
        runtime_id: Some("org.example.Hello".to_string()),
        branch: Some("beta".to_string()),
    };
    convert(&repo, &options, &fetcher, Some(&installer)).unwrap();

    let calls = installer.calls.borrow();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, repo.uri().unwrap());
    assert_eq!(calls[0].1, "runtime/org.example.Hello/x86_64/beta");
}

#[test]
fn entrypoint_shim() {
    let (dir, repo, scratch) = setup();
    let fetcher = two_layer_fetcher(
        &scratch,
        r#"{"architecture":"amd64","config":{"Entrypoint":["/usr/bin/hello"],"Cmd":["--greet"]}}"#,
    );

    let outcome = convert(&repo, &opts("hello:1.0"), &fetcher, None).unwrap();

    let out = dir.path().join("out");
    checkout(&repo, &outcome.runtime.ref_name(), &out, CheckoutOptions::default()).unwrap();

    let shim = out.join("files/bin/oci-entrypoint");
    assert_eq!(
        fs::read_to_string(&shim).unwrap(),
        "#!/bin/sh\nexec '/usr/bin/hello' '--greet' \"$@\"\n"
    );
    assert_eq!(fs::metadata(&shim).unwrap().permissions().mode() & 0o777, 0o755);
}

#[test]
fn failed_run_keeps_staging() {
    let (_dir, repo, scratch) = setup();
    let mut fetcher = two_layer_fetcher(&scratch, r#"{"architecture":"amd64"}"#);
    fetcher.missing_layers = 1;

    let err = convert(&repo, &opts("hello:1.0"), &fetcher, None).unwrap_err();
    assert!(matches!(err, Error::MissingLayer(_)));

    assert_eq!(fs::read_dir(repo.staging_root()).unwrap().count(), 1);
    assert!(!list_refs(&repo).unwrap().iter().any(|r| r.starts_with("runtime/")));

    let report = cleanup(&repo, CleanupMode::All).unwrap();
    assert_eq!(report.scratch_removed, 1);
    assert_eq!(fs::read_dir(repo.staging_root()).unwrap().count(), 0);
}

#[test]
fn invalid_image_rejected_before_fetch() {
    let (_dir, repo, scratch) = setup();
    let fetcher = FakeFetcher::new(&scratch, "{}");

    assert!(matches!(
        convert(&repo, &opts("bad image"), &fetcher, None),
        Err(Error::InvalidImage(_))
    ));
    assert!(list_refs(&repo).unwrap().is_empty());
}

#[test]
fn cleanup_oci_keeps_runtime() {
    let (dir, repo, scratch) = setup();
    let fetcher = two_layer_fetcher(&scratch, r#"{"architecture":"amd64"}"#);
    let outcome = convert(&repo, &opts("hello:1.0"), &fetcher, None).unwrap();

    let report = cleanup(&repo, CleanupMode::Oci).unwrap();
    assert_eq!(report.refs_deleted.len(), 4);
    assert_eq!(list_refs(&repo).unwrap(), vec![outcome.runtime.ref_name()]);

    let out = dir.path().join("out");
    checkout(&repo, &outcome.runtime.ref_name(), &out, CheckoutOptions::layer()).unwrap();
    assert_eq!(fs::read_to_string(out.join("files/bin/hello")).unwrap(), "hello v2");
}
