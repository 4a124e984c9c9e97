//! wg-manager - WireGuard server interface manager
//!
//! Runs the manager in the foreground until SIGINT/SIGTERM, or prints sample
//! and client configuration and shell completion scripts.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::engine::{ArgValueCandidates, CompletionCandidate};
use clap_complete::env::{self as shells, CompleteEnv, EnvCompleter};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;

use wg_manager::app::{Application, Options};
use wg_manager::client::{self, ClientConfig};
use wg_manager::config::{Config, DEFAULT_CONFIG_PATH};
use wg_manager::device::KernelDevice;
use wg_manager::error::{Error, Result, StepContext};
use wg_manager::exec::SystemRunner;
use wg_manager::link::{NetlinkManager, DEFAULT_INTERFACE, DEFAULT_MTU};
use wg_manager::signal::wait_for_signal;

const BIN_NAME: &str = "wg-manager";

/// Environment variable that switches the binary into completion mode
const COMPLETE_VAR: &str = "COMPLETE";

/// WireGuard manager.
#[derive(Parser)]
#[command(name = "wg-manager")]
#[command(author, version, about, long_about = "Manager for WireGuard peers.")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// WireGuard interface name
    #[arg(short, long, default_value = DEFAULT_INTERFACE)]
    interface: String,

    /// MTU for a newly created interface
    #[arg(long, default_value_t = DEFAULT_MTU)]
    mtu: u32,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Print sample configuration
    Config,

    /// Client management
    Client {
        #[command(subcommand)]
        command: ClientCommands,
    },

    /// Print the shell completion script
    Completion {
        #[arg(value_enum)]
        shell: CompletionShell,
    },
}

#[derive(Subcommand)]
enum ClientCommands {
    /// Generate WireGuard client configuration
    Config {
        /// Peer name from the configuration file
        #[arg(add = ArgValueCandidates::new(complete_peer_names))]
        name: String,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum CompletionShell {
    Bash,
    Zsh,
    Fish,
    Elvish,
    Powershell,
}

impl CompletionShell {
    fn completer(self) -> &'static dyn EnvCompleter {
        match self {
            CompletionShell::Bash => &shells::Bash,
            CompletionShell::Zsh => &shells::Zsh,
            CompletionShell::Fish => &shells::Fish,
            CompletionShell::Elvish => &shells::Elvish,
            CompletionShell::Powershell => &shells::Powershell,
        }
    }
}

fn main() {
    // Answers completion requests from the shell and exits
    CompleteEnv::with_factory(Cli::command).var(COMPLETE_VAR).complete();

    let cli = Cli::parse();

    // Installed for this thread only; the runtime below is single-threaded.
    let _log_guard = tracing::subscriber::set_default(logging(&cli.log_level));

    let result = match &cli.command {
        None => run_manager(&cli),
        Some(Commands::Config) => run_sample_config(),
        Some(Commands::Client {
            command: ClientCommands::Config { name },
        }) => run_client_config(&cli.config, name),
        Some(Commands::Completion { shell }) => run_completion(*shell),
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

/// Build the log subscriber. Time is left out because journald adds it.
fn logging(level: &str) -> impl tracing::Subscriber + Send + Sync {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::registry().with(env_filter).with(
        tracing_subscriber::fmt::layer()
            .without_time()
            .with_writer(std::io::stderr),
    )
}

fn run_manager(cli: &Cli) -> Result<()> {
    if !nix::unistd::geteuid().is_root() {
        return Err(Error::NotRoot);
    }

    let options = Options {
        config_path: cli.config.clone(),
        interface: cli.interface.clone(),
        mtu: cli.mtu,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn(wait_for_signal(shutdown.clone()));

        let links = Arc::new(NetlinkManager::new().step("open rtnl context")?);
        let mut app = Application::new(options, links, Arc::new(KernelDevice), Arc::new(SystemRunner));
        app.run(shutdown).await
    })
}

fn run_sample_config() -> Result<()> {
    print!("{}", Config::sample().to_yaml()?);
    Ok(())
}

fn run_client_config(config_path: &Path, name: &str) -> Result<()> {
    let config = Config::read(config_path).step("failed to read configuration")?;
    let client = ClientConfig::for_peer(&config, name)?;
    print!("{}", client);
    Ok(())
}

fn run_completion(shell: CompletionShell) -> Result<()> {
    let exe = std::env::current_exe()?;
    let completer = exe.to_string_lossy();
    shell.completer().write_registration(
        COMPLETE_VAR,
        BIN_NAME,
        BIN_NAME,
        &completer,
        &mut std::io::stdout(),
    )?;
    Ok(())
}

/// Completion candidates for `client config <name>`
fn complete_peer_names() -> Vec<CompletionCandidate> {
    client::peer_names(Path::new(DEFAULT_CONFIG_PATH))
        .into_iter()
        .map(CompletionCandidate::new)
        .collect()
}
