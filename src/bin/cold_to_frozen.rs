use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;
use log::{error, info};

use cold_to_frozen::config::{self, ArchiveConfig, ACCESS_KEY_ENV, SAS_TOKEN_ENV};
use cold_to_frozen::{
    logging, ArchiveError, ArchiveOutcome, ArchiveRequest, GenericObjectStore, Pipeline,
};

#[derive(Parser, Debug)]
#[command(name = "cold-to-frozen")]
#[command(about = "Archive a cold index bucket locally and upload it to remote storage")]
struct Cli {
    /// Bucket directory to freeze (e.g. /opt/splunk/var/lib/splunk/main/colddb/db_1_1)
    bucket: PathBuf,

    /// Keep index files (gzipped) even for buckets with a compressed journal
    #[arg(long)]
    search_files_required: bool,

    /// Settings file (default: $SPLUNK_HOME/etc/cold_to_frozen.json)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() -> ExitCode {
    let home = match config::home_from_env() {
        Ok(home) => home,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };
    let cli = Cli::parse();

    let log_path = match logging::init(&home) {
        Ok(path) => path,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::from(e.exit_code());
        }
    };
    info!("Logging to {}", log_path.display());

    match run(&home, cli) {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => ExitCode::from(e.exit_code()),
    }
}

fn run(home: &Path, cli: Cli) -> Result<ArchiveOutcome, ArchiveError> {
    let settings = load_settings(home, cli.config.as_deref()).inspect_err(|e| error!("{e}"))?;
    let store = GenericObjectStore::from_config(&settings.remote).inspect_err(|e| error!("{e}"))?;

    let request = ArchiveRequest {
        bucket: cli.bucket,
        search_files_required: cli.search_files_required,
    };
    Pipeline::new(&settings, &store).run(&request)
}

fn load_settings(home: &Path, path: Option<&Path>) -> Result<ArchiveConfig, ArchiveError> {
    let path = path
        .map(PathBuf::from)
        .unwrap_or_else(|| config::default_config_path(home));
    info!("Loading settings from {}", path.display());

    let settings = ArchiveConfig::load(&path)?.with_credential_overrides(
        std::env::var(SAS_TOKEN_ENV).ok(),
        std::env::var(ACCESS_KEY_ENV).ok(),
    );
    settings.validate()?;
    Ok(settings)
}
