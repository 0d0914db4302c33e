use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use entitlements::config::Config;
use entitlements::db::{self, AppState};
use entitlements::license::{load_signing_key, parse_verifying_key};
use entitlements::slack::SlackClient;
use entitlements::validator::ValidatorConfig;

#[derive(Parser)]
#[command(name = "entitlements", about = "Subscription and license entitlements service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the HTTP API (default)
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        database_path: Option<String>,
    },
    /// Generate a license signing keypair
    GenerateKeys {
        /// File to write the hex-encoded signing key to
        #[arg(long)]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "entitlements=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Some(Command::GenerateKeys { out }) => generate_keys(&out),
        Some(Command::Serve {
            host,
            port,
            database_path,
        }) => {
            let mut config = Config::from_env();
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(path) = database_path {
                config.database_path = path;
            }
            serve(config).await
        }
        None => serve(Config::from_env()).await,
    }
}

fn generate_keys(out: &Path) -> anyhow::Result<()> {
    if out.exists() {
        bail!("refusing to overwrite {}", out.display());
    }
    let signing_key = SigningKey::generate(&mut OsRng);
    std::fs::write(out, hex::encode(signing_key.to_bytes()))
        .with_context(|| format!("writing {}", out.display()))?;

    println!("signing key written to {}", out.display());
    println!(
        "LICENSE_PUBLIC_KEY={}",
        hex::encode(signing_key.verifying_key().to_bytes())
    );
    Ok(())
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let signing_key = config
        .license_signing_key_file
        .as_deref()
        .map(|path| load_signing_key(Path::new(path)))
        .transpose()
        .context("loading license signing key")?;

    let public_key = match (&config.license_public_key, &signing_key) {
        (Some(hex_key), _) => parse_verifying_key(hex_key).context("parsing LICENSE_PUBLIC_KEY")?,
        (None, Some(signing_key)) => signing_key.verifying_key(),
        (None, None) => bail!("LICENSE_PUBLIC_KEY or LICENSE_SIGNING_KEY_FILE must be set"),
    };
    if signing_key.is_none() {
        tracing::warn!("LICENSE_SIGNING_KEY_FILE not set, license creation is disabled");
    }

    let pool = db::create_pool(&config.database_path).context("opening database")?;
    {
        let conn = pool.get()?;
        db::init_db(&conn).context("initializing schema")?;
    }

    let mut validator_config = ValidatorConfig::new(public_key);
    validator_config.bypass_all_license_checks = config.bypass_all_license_checks;
    if config.bypass_all_license_checks {
        tracing::warn!("BYPASS_ALL_LICENSE_CHECKS is enabled, every license check will pass");
    }

    let notifier = Arc::new(SlackClient::new(config.slack_webhook_url.clone()));
    let mut state = AppState::new(pool, validator_config, notifier, signing_key);
    state.required_license_tags = config.required_license_tags.clone();
    state.env_name = config.env_name.clone();

    let app = entitlements::app(state);

    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    tracing::info!(%addr, env = %config.env_name, "entitlements service listening");
    axum::serve(listener, app).await?;
    Ok(())
}
