//! HTTP server binary for contract-forms.
//!
//! A thin shim over the library crate that maps CLI flags and environment
//! variables to a `PublisherConfig`, wires the Google (or in-memory) gateway,
//! and serves the contract API.

use anyhow::{Context, Result};
use clap::Parser;
use contract_forms::gateway::auth::ServiceAccountTokens;
use contract_forms::server::{self, AppState, DEFAULT_ALLOWED_ORIGINS};
use contract_forms::{
    AssetStore, FormPublisher, GoogleClient, GoogleDrive, GoogleForms, InMemoryGateway,
    Orchestrator, PublisherConfig,
};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Serve with the service account mounted at the default path
  contract-forms

  # Custom port and folders
  contract-forms --bind 127.0.0.1:9000 \
      --staging-location 1AbC... --forms-location 1XyZ...

  # Exercise the whole pipeline without Google access
  contract-forms --dry-run --verbose

ENDPOINTS:
  GET  /             liveness ("Hello, world!")
  POST /newcontract  render, publish, and return {"formId": ...}

ENVIRONMENT VARIABLES:
  CONTRACT_FORMS_BIND               Listen address
  CONTRACT_FORMS_CREDENTIALS        Service-account JSON key file
  CONTRACT_FORMS_STAGING_LOCATION   Drive folder for uploaded page images
  CONTRACT_FORMS_FORMS_LOCATION     Drive folder for finished forms
  CONTRACT_FORMS_ALLOWED_ORIGINS    Comma-separated CORS origins
  PDFIUM_LIB_PATH                   Path to an existing libpdfium
  RUST_LOG                          Overrides --verbose

A .env file in the working directory is loaded if present.
"#;

/// Publish service contracts as signable Google Forms.
#[derive(Parser, Debug)]
#[command(
    name = "contract-forms",
    version,
    about = "Publish service contracts as signable Google Forms",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to listen on.
    #[arg(long, env = "CONTRACT_FORMS_BIND", default_value = "0.0.0.0:8080")]
    bind: SocketAddr,

    /// Service-account credentials (JSON key file).
    #[arg(
        long,
        env = "CONTRACT_FORMS_CREDENTIALS",
        default_value = "/etc/secrets/credentials.json"
    )]
    credentials: PathBuf,

    /// Drive folder that receives uploaded page images.
    #[arg(long, env = "CONTRACT_FORMS_STAGING_LOCATION", default_value = contract_forms::config::DEFAULT_STAGING_LOCATION)]
    staging_location: String,

    /// Drive folder that finished forms are moved into.
    #[arg(long, env = "CONTRACT_FORMS_FORMS_LOCATION", default_value = contract_forms::config::DEFAULT_FORMS_LOCATION)]
    forms_location: String,

    /// Parent directory for per-run scratch workspaces.
    #[arg(long, env = "CONTRACT_FORMS_WORK_DIR")]
    work_dir: Option<PathBuf>,

    /// Attempts of the upload/create/insert loop.
    #[arg(long, env = "CONTRACT_FORMS_MAX_ATTEMPTS", default_value_t = 3,
          value_parser = clap::value_parser!(u32).range(1..=10))]
    max_attempts: u32,

    /// Fixed delay between attempts, in milliseconds.
    #[arg(long, env = "CONTRACT_FORMS_RETRY_DELAY_MS", default_value_t = 5_000)]
    retry_delay_ms: u64,

    /// Upload page images one at a time instead of concurrently.
    #[arg(long, env = "CONTRACT_FORMS_SEQUENTIAL_UPLOADS")]
    sequential_uploads: bool,

    /// JPEG quality of uploaded page images (1–100).
    #[arg(long, env = "CONTRACT_FORMS_JPEG_QUALITY", default_value_t = 10,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Timeout for each Google API call, in seconds.
    #[arg(long, env = "CONTRACT_FORMS_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,

    /// Path to an existing libpdfium; otherwise the system library is used.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,

    /// Allowed CORS origins.
    #[arg(long, env = "CONTRACT_FORMS_ALLOWED_ORIGINS", value_delimiter = ',')]
    allowed_origins: Vec<String>,

    /// Use the in-memory gateway instead of Google.
    #[arg(long, env = "CONTRACT_FORMS_DRY_RUN")]
    dry_run: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "CONTRACT_FORMS_VERBOSE")]
    verbose: bool,
}

impl Cli {
    fn publisher_config(&self) -> Result<PublisherConfig> {
        let mut builder = PublisherConfig::builder()
            .max_attempts(self.max_attempts)
            .retry_delay_ms(self.retry_delay_ms)
            .staging_location(self.staging_location.as_str())
            .forms_location(self.forms_location.as_str())
            .concurrent_uploads(!self.sequential_uploads)
            .jpeg_quality(self.jpeg_quality)
            .api_timeout_secs(self.api_timeout);
        if let Some(dir) = &self.work_dir {
            builder = builder.work_dir(dir);
        }
        if let Some(path) = &self.pdfium_lib {
            builder = builder.pdfium_library_path(path);
        }
        Ok(builder.build()?)
    }

    fn origins(&self) -> Vec<String> {
        if self.allowed_origins.is_empty() {
            DEFAULT_ALLOWED_ORIGINS.iter().map(|s| s.to_string()).collect()
        } else {
            self.allowed_origins.clone()
        }
    }
}

type Gateway = (Arc<dyn AssetStore>, Arc<dyn FormPublisher>);

fn google_gateway(cli: &Cli, config: &PublisherConfig) -> Result<Gateway> {
    let token_http = reqwest::Client::builder()
        .timeout(config.api_timeout())
        .build()
        .context("Failed to build HTTP client")?;
    let tokens = ServiceAccountTokens::from_file(&cli.credentials, token_http)
        .with_context(|| format!("Unable to load credentials from {}", cli.credentials.display()))?;
    info!(account = tokens.client_email(), "Loaded service account");

    let client = GoogleClient::new(Arc::new(tokens), config.api_timeout())
        .context("Failed to build HTTP client")?;
    Ok((
        Arc::new(GoogleDrive::new(client.clone())),
        Arc::new(GoogleForms::new(client)),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let filter = if cli.verbose { "contract_forms=debug,tower_http=debug,info" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = cli.publisher_config().context("Invalid configuration")?;
    let (assets, forms): Gateway = if cli.dry_run {
        warn!("Dry run: contracts are published to an in-memory gateway");
        let gateway = Arc::new(InMemoryGateway::new());
        let assets: Arc<dyn AssetStore> = gateway.clone();
        let forms: Arc<dyn FormPublisher> = gateway;
        (assets, forms)
    } else {
        google_gateway(&cli, &config)?
    };

    std::fs::create_dir_all(&config.work_dir)
        .with_context(|| format!("Cannot create work dir {}", config.work_dir.display()))?;
    info!(
        work_dir = %config.work_dir.display(),
        staging = %config.staging_location,
        forms = %config.forms_location,
        max_attempts = config.max_attempts,
        "Pipeline configured"
    );

    let orchestrator = Arc::new(Orchestrator::new(config, assets, forms));
    let app = server::router(AppState::new(orchestrator), &cli.origins())
        .context("Invalid CORS origin")?;

    let listener = tokio::net::TcpListener::bind(cli.bind)
        .await
        .with_context(|| format!("Cannot bind {}", cli.bind))?;
    info!("Listening on http://{}", cli.bind);
    axum::serve(listener, app).await?;
    Ok(())
}
