//! Notegate CLI - Inspect and unlock the local device record
//!
//! Every command runs offline: nothing here reaches the identity provider.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use notegate_core::timer::ceil_secs;
use notegate_core::{
    AuthMode, FixedConnectivity, GateConfig, GateFlow, GateListener, GateServices, GateStep,
    IdentityProvider, LocalCredentialStore, ModeResolver, ProfileFragment, ProviderError,
    RemoteGateInfo, Session, SetupOutcome, VerificationOutcome,
};

#[derive(Parser)]
#[command(name = "notegate")]
#[command(about = "Local PIN unlock and device record tools", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to $NOTEGATE_CONFIG or the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the resolved mode and lockout state
    Status,

    /// Verify a PIN against the device record
    Unlock {
        /// PIN to verify (read from stdin when omitted)
        #[arg(long)]
        pin: Option<String>,
    },

    /// Remove the device record
    Reset {
        /// Skip the confirmation prompt
        #[arg(long)]
        yes: bool,
    },

    /// Print the effective configuration
    Config,
}

/// Identity provider for a machine with no network
struct OfflineIdentity;

#[async_trait]
impl IdentityProvider for OfflineIdentity {
    async fn submit_setup_code(
        &self,
        _code: &str,
        _profile: &ProfileFragment,
        _email: &str,
    ) -> Result<SetupOutcome, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn submit_link_device_code(
        &self,
        _email: &str,
        _code: &str,
    ) -> Result<VerificationOutcome, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn send_verification_email(&self, _email: &str) -> Result<(), ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn is_device_trusted(&self) -> Result<bool, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn finalize_device_trust(&self) -> Result<Session, ProviderError> {
        Err(ProviderError::Unavailable)
    }

    async fn fetch_remote_gate_info(&self) -> Result<Option<RemoteGateInfo>, ProviderError> {
        Err(ProviderError::Unavailable)
    }
}

struct PrintUnlocked;

impl GateListener for PrintUnlocked {
    fn on_unlocked(&self, session: Session) {
        info!(
            expires_in_secs = session.time_until_expiry().as_secs(),
            "Session established"
        );
        match session.display_name() {
            Some(name) => println!("Unlocked. Welcome back, {}.", name),
            None => println!("Unlocked."),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "notegate=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => GateConfig::load_or_default(),
    };

    match cli.command {
        Commands::Status => status(&config).await,
        Commands::Unlock { pin } => unlock(&config, pin).await,
        Commands::Reset { yes } => reset(&config, yes),
        Commands::Config => show_config(&config, cli.config),
    }
}

fn open_store(config: &GateConfig) -> Result<Arc<LocalCredentialStore>> {
    let store = LocalCredentialStore::open(
        &config.store_path,
        config.lockout.clone(),
        config.session_config(),
    )
    .with_context(|| format!("Failed to open device record at {:?}", config.store_path))?;
    Ok(Arc::new(store))
}

fn resolver(store: &Arc<LocalCredentialStore>) -> ModeResolver {
    ModeResolver::new(
        store.clone(),
        Arc::new(FixedConnectivity(false)),
        Arc::new(OfflineIdentity),
    )
}

async fn status(config: &GateConfig) -> Result<()> {
    let store = open_store(config)?;
    let resolution = resolver(&store).resolve().await;

    println!("Device record: {:?}", store.path());
    println!("Mode:          {:?}", resolution.mode);

    if resolution.mode == AuthMode::Unlock {
        if let Some(name) = resolution
            .profile
            .map(|p| p.display_name())
            .filter(|n| !n.is_empty())
        {
            println!("Account:       {}", name);
        }
        println!("Trusted:       {}", store.is_trusted());
        println!("Failed PINs:   {}", store.failed_attempts());
        match store.lockout_remaining() {
            Some(remaining) => println!(
                "Locked for:    {}s",
                ceil_secs(u64::try_from(remaining.as_millis()).unwrap_or(u64::MAX))
            ),
            None => println!("Locked:        no"),
        }
    }

    Ok(())
}

async fn unlock(config: &GateConfig, pin: Option<String>) -> Result<()> {
    let store = open_store(config)?;
    let resolution = resolver(&store).resolve().await;

    if resolution.mode != AuthMode::Unlock {
        bail!("This device has not been set up");
    }

    let pin = match pin {
        Some(pin) => pin,
        None => prompt("PIN: ")?,
    };

    let services = GateServices {
        pin_verifier: store.clone(),
        devices: store.clone(),
        identity: Arc::new(OfflineIdentity),
        hub: None,
        focus: None,
    };
    let mut flow = GateFlow::new(resolution, config.clone(), services, Arc::new(PrintUnlocked));

    let Some(input) = flow.input_mut() else {
        bail!("Code entry is disabled");
    };
    input.on_paste(&pin);

    // Only a paste that filled the field exactly is submitted as typed
    let result = if flow.input().code().as_deref() == Some(pin.as_str()) {
        flow.submit_next().await
    } else {
        Some(flow.submit(&pin).await)
    };

    match result {
        Some(Ok(GateStep::Unlocked)) => {
            info!("Local unlock succeeded");
            Ok(())
        }
        Some(Ok(GateStep::AwaitingVerification)) => {
            flow.teardown();
            bail!("PIN accepted, but this device must be confirmed by email while online")
        }
        Some(Ok(_)) | Some(Err(_)) | None => {
            let message = flow
                .error_text()
                .unwrap_or_else(|| "Unlock failed".to_string());
            flow.teardown();
            bail!(message)
        }
    }
}

fn reset(config: &GateConfig, yes: bool) -> Result<()> {
    let store = open_store(config)?;

    if !yes {
        let answer =
            prompt("Remove the device record? This device will need to be set up again [y/N]: ")?;
        if !answer.eq_ignore_ascii_case("y") {
            println!("Aborted.");
            return Ok(());
        }
    }

    store.factory_reset()?;
    println!("Device record removed.");
    Ok(())
}

fn show_config(config: &GateConfig, path: Option<PathBuf>) -> Result<()> {
    let path = path.or_else(GateConfig::config_file_path);
    if let Some(path) = path {
        println!("# {}", path.display());
    }
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}
