use anyhow::{bail, Context, Result};
use azvmss::azure::auth::{validate_subscription_id, AzureCredentials};
use azvmss::azure::client::{format_azure_error, AzureClient};
use azvmss::azure::http::ApiError;
use azvmss::compute::validate::validate_config;
use azvmss::compute::{LinuxVirtualMachineScaleSetConfig, ScaleSetHandler, ScaleSetState};
use azvmss::config::Config;
use azvmss::state::StateFile;
use azvmss::VERSION;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Manage Linux virtual machine scale sets on Azure
#[derive(Parser, Debug)]
#[command(name = "azvmss", version = VERSION, about, long_about = None)]
struct Args {
    /// Azure subscription to use
    #[arg(short, long, global = true)]
    subscription: Option<String>,

    /// Log level for debugging
    #[arg(long, value_enum, default_value = "off", global = true)]
    log_level: LogLevel,

    /// Run in read-only mode (block all write operations)
    #[arg(long, global = true)]
    readonly: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check a configuration file without calling Azure
    Validate {
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Create a scale set and write its state
    Create {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        state: PathBuf,
    },
    /// Refresh the state from Azure
    Read {
        #[arg(long)]
        state: PathBuf,
        /// Read this resource ID instead of the one in the state file
        #[arg(long)]
        id: Option<String>,
    },
    /// Apply a changed configuration to an existing scale set
    Update {
        #[arg(short, long)]
        config: PathBuf,
        #[arg(long)]
        state: PathBuf,
    },
    /// Delete the scale set recorded in the state file
    Delete {
        #[arg(long)]
        state: PathBuf,
    },
    /// Start managing an existing scale set
    Import {
        #[arg(long)]
        id: String,
        #[arg(long)]
        state: PathBuf,
    },
}

impl Command {
    fn is_write(&self) -> bool {
        matches!(
            self,
            Command::Create { .. } | Command::Update { .. } | Command::Delete { .. }
        )
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    fn to_tracing_level(self) -> Option<Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(Level::ERROR),
            LogLevel::Warn => Some(Level::WARN),
            LogLevel::Info => Some(Level::INFO),
            LogLevel::Debug => Some(Level::DEBUG),
            LogLevel::Trace => Some(Level::TRACE),
        }
    }
}

fn setup_logging(level: LogLevel) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let tracing_level = level.to_tracing_level()?;

    let log_path = get_log_path();

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let file = match std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
    {
        Ok(file) => file,
        Err(e) => {
            eprintln!("Failed to open log file {}: {}", log_path.display(), e);
            return None;
        }
    };

    let (non_blocking, guard) = tracing_appender::non_blocking(file);

    // RUST_LOG wins over --log-level when set
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(tracing_level.as_str().to_lowercase()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .init();

    tracing::info!("azvmss {} started with log level: {:?}", VERSION, level);
    tracing::info!("Log file: {:?}", log_path);

    Some(guard)
}

fn get_log_path() -> PathBuf {
    if let Some(config_dir) = dirs::config_dir() {
        return config_dir.join("azvmss").join("azvmss.log");
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".azvmss").join("azvmss.log");
    }
    PathBuf::from("azvmss.log")
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let _log_guard = setup_logging(args.log_level);

    if let Err(err) = run(args).await {
        tracing::error!("{:#}", err);
        eprintln!("Error: {:#}", err);
        if err.chain().any(|e| e.downcast_ref::<ApiError>().is_some()) {
            eprintln!("{}", format_azure_error(&err));
        }
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    if args.readonly && args.command.is_write() {
        bail!("Refusing to modify Azure resources in read-only mode");
    }

    let config = Config::load();

    if let Command::Validate { config: path } = &args.command {
        let resource = LinuxVirtualMachineScaleSetConfig::from_file(path)?;
        validate_config(&resource)?;
        println!("{} is valid", path.display());
        return Ok(());
    }

    let handler = build_handler(&config, args.subscription.as_deref())?;

    match args.command {
        Command::Validate { .. } => Ok(()),
        Command::Create { config: path, state } => {
            if handler.client().subscription_id.is_empty() {
                bail!(
                    "No Azure subscription configured. Set AZURE_SUBSCRIPTION_ID or use --subscription flag"
                );
            }
            StateFile::ensure_vacant(&state)?;
            let resource = LinuxVirtualMachineScaleSetConfig::from_file(&path)?;
            let created = handler.create(&resource).await?;
            write_state(created, &state)
        }
        Command::Read { state, id } => {
            let prior = StateFile::load(&state)?;
            let id = match (id, &prior) {
                (Some(id), _) => id,
                (None, Some(prior)) => prior.id.clone(),
                (None, None) => bail!("No state at {} and no --id given", state.display()),
            };
            match handler.read(&id, prior.as_ref().map(|p| &p.attributes)).await? {
                Some(current) => write_state(current, &state),
                None => {
                    StateFile::remove(&state)?;
                    println!("{} no longer exists, state removed", id);
                    Ok(())
                }
            }
        }
        Command::Update { config: path, state } => {
            let prior = StateFile::require(&state)?;
            let desired = LinuxVirtualMachineScaleSetConfig::from_file(&path)?;
            let updated = handler.update(&prior.id, &prior.attributes, &desired).await?;
            write_state(updated, &state)
        }
        Command::Delete { state } => {
            let prior = StateFile::require(&state)?;
            handler.delete(&prior.id).await?;
            StateFile::remove(&state)?;
            println!("Deleted {}", prior.id);
            Ok(())
        }
        Command::Import { id, state } => {
            StateFile::ensure_vacant(&state)?;
            let imported = handler.import(&id).await?;
            write_state(imported, &state)
        }
    }
}

fn build_handler(config: &Config, subscription: Option<&str>) -> Result<ScaleSetHandler> {
    let subscription = subscription
        .map(str::to_string)
        .unwrap_or_else(|| config.effective_subscription());
    if !subscription.is_empty() && !validate_subscription_id(&subscription) {
        tracing::warn!("Subscription {:?} is not a GUID", subscription);
    }
    tracing::info!("Using subscription: {}", subscription);

    let endpoint = config.effective_endpoint();
    let credentials = AzureCredentials::from_env(&config.effective_authority_host(), &endpoint)?;
    let client = AzureClient::new(credentials, &subscription, &endpoint)
        .context("Failed to initialize Azure client")?;

    Ok(ScaleSetHandler::new(client, config.handler_options()))
}

fn write_state(state: ScaleSetState, path: &Path) -> Result<()> {
    let file = StateFile::from(state);
    file.save(path)?;

    let mut shown = file;
    shown.attributes = shown.attributes.redacted();
    print!("{}", serde_yaml::to_string(&shown)?);
    Ok(())
}
