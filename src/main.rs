use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ua_daemon::config::{BusKind, Config, ConfigError, StatusSourceKind, DEFAULT_CONFIG_PATH};
use ua_daemon::{daemon, panic_handler};

#[derive(Parser)]
#[command(name = "ubuntu-advantage-desktop-daemon")]
#[command(author, version, about = "Ubuntu Advantage desktop daemon", long_about = None)]
struct Cli {
    /// Replace an already running daemon
    #[arg(short, long)]
    replace: bool,

    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Status file to read instead of the configured one
    #[arg(long)]
    status_path: Option<PathBuf>,

    /// Where to read status from
    #[arg(long, value_enum)]
    status_source: Option<StatusSourceKind>,

    /// Use the session bus instead of the system bus
    #[arg(long)]
    session: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    /// Apply command-line overrides on top of the file configuration.
    fn apply(&self, config: &mut Config) {
        if let Some(path) = &self.status_path {
            config.status.path = path.clone();
        }
        if let Some(source) = self.status_source {
            config.status.source = source;
        }
        if self.session {
            config.bus.kind = BusKind::Session;
        }
    }
}

/// Load the config file, apply overrides, then validate the result.
///
/// Also reports whether a config file was found.
fn load_config(cli: &Cli) -> Result<(Config, bool), ConfigError> {
    let file = Config::load(&cli.config)?;
    let found = file.is_some();
    let mut config = file.unwrap_or_default();
    cli.apply(&mut config);
    config.validate()?;
    Ok((config, found))
}

fn init_logging(level: &str, json: bool, verbose: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) if verbose => EnvFilter::try_new("ua_daemon=debug,zbus=info")?,
        Err(_) => EnvFilter::try_new(format!("ua_daemon={level},zbus=warn"))?,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    panic_handler::install();

    let cli = Cli::parse();
    let (config, found) = load_config(&cli)?;

    init_logging(&config.logging.level, config.logging.json, cli.verbose)?;
    if found {
        info!(path = %cli.config.display(), "Loaded config");
    } else {
        debug!(path = %cli.config.display(), "No config file, using defaults");
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        source = ?config.status.source,
        bus = ?config.bus.kind,
        "Starting Ubuntu Advantage desktop daemon"
    );
    daemon::run(config, cli.replace).await?;

    Ok(())
}
