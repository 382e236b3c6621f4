//! oci2runtime - convert a container image into a runtime package

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use oci2runtime::convert::{convert, ConvertOptions};
use oci2runtime::external::{CommandInstaller, RuntimeInstaller, SkopeoFetcher};
use oci2runtime::ops::{cleanup, CleanupMode};
use oci2runtime::{Error, Repo};

#[derive(Parser)]
#[command(name = "oci2runtime")]
#[command(about = "convert a container image into a runtime in a content-addressed store")]
#[command(version)]
struct Cli {
    /// image to convert, e.g. `alpine:3.19`
    image: Option<String>,

    /// runtime id (default: derived from the image name)
    #[arg(short = 'i', long)]
    runtime_id: Option<String>,

    /// runtime branch (default: the image tag)
    #[arg(short = 'b', long)]
    runtime_branch: Option<String>,

    /// remove refs and unreachable objects after converting
    #[arg(long, value_enum)]
    cleanup: Option<CleanupMode>,

    /// repository path, created on first use
    #[arg(long, env = "OCI2RUNTIME_REPO", default_value = "./repo")]
    repo: PathBuf,

    /// log at debug level
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            // --help and --version are not errors
            return if e.use_stderr() {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            };
        }
    };

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if cli.image.is_none() && cli.cleanup.is_none() {
        eprintln!("error: nothing to do, give an IMAGE or --cleanup");
        return ExitCode::FAILURE;
    }

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            exit_code(&e)
        }
    }
}

/// a failed external tool's status is passed through
fn exit_code(e: &Error) -> ExitCode {
    match e {
        Error::ToolFailed {
            code: Some(code), ..
        } => match u8::try_from(*code) {
            Ok(code) if code != 0 => ExitCode::from(code),
            _ => ExitCode::FAILURE,
        },
        _ => ExitCode::FAILURE,
    }
}

fn run(cli: Cli) -> oci2runtime::Result<()> {
    let repo = Repo::open_or_init(&cli.repo)?;

    if let Some(image) = cli.image {
        let fetcher = SkopeoFetcher::from_config(&repo.config().tools);
        let installer = repo
            .config()
            .tools
            .installer
            .clone()
            .map(|argv| CommandInstaller { argv });

        let opts = ConvertOptions {
            image,
            runtime_id: cli.runtime_id,
            branch: cli.runtime_branch,
        };
        let outcome = convert(
            &repo,
            &opts,
            &fetcher,
            installer.as_ref().map(|i| i as &dyn RuntimeInstaller),
        )?;
        println!("{} {}", outcome.runtime.ref_name(), outcome.commit);
    }

    if let Some(mode) = cli.cleanup {
        let report = cleanup(&repo, mode)?;
        println!(
            "deleted {} refs, removed {} objects ({} bytes)",
            report.refs_deleted.len(),
            report.prune.objects_removed(),
            report.prune.bytes_freed
        );
    }

    Ok(())
}
