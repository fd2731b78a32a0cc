use clap::{Parser, Subcommand};
use ofgate::config;
use ofgate::telemetry::{MetricsRegistry, init_logging};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Events buffered between the switch connections and the controller
const EVENT_QUEUE_DEPTH: usize = 1024;

#[derive(Parser)]
#[command(name = "ofgate")]
#[command(about = "OpenFlow controller for a learning switch and an ICMP NAT gateway")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Run the controller
    Run {
        /// Path to config.toml (built-in defaults if absent)
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Check config.toml for errors
    Validate {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
    /// Print the effective configuration with all defaults filled in
    Show {
        /// Path to config.toml
        #[arg(short, long, default_value = "config.toml")]
        config: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Config { action }) => {
            // RUST_LOG only; config commands print their own diagnostics
            init_logging(None);
            match action {
                ConfigAction::Validate {
                    config: config_path,
                } => cmd_config_validate(&config_path),
                ConfigAction::Show {
                    config: config_path,
                } => cmd_config_show(&config_path),
            }
        }
        Some(Commands::Run { config: config_path }) => cmd_run(&config_path),
        None => cmd_run(Path::new("config.toml")),
    };

    if let Err(e) = result {
        eprintln!("[ERROR] {}", e);
        std::process::exit(1);
    }
}

fn cmd_config_validate(config_path: &Path) -> Result<(), String> {
    let cfg = config::load(config_path).map_err(|e| format!("Failed to load config: {}", e))?;

    let result = config::validate(&cfg);
    result.print_diagnostics();

    if result.has_errors() {
        return Err("Validation failed".to_string());
    }

    println!("[OK] {} is valid", config_path.display());
    Ok(())
}

fn cmd_config_show(config_path: &Path) -> Result<(), String> {
    let cfg = config::load_or_default(config_path)
        .map_err(|e| format!("Failed to load config: {}", e))?;
    let text = config::render(&cfg).map_err(|e| format!("Failed to render config: {}", e))?;
    print!("{}", text);
    Ok(())
}

fn cmd_run(config_path: &Path) -> Result<(), String> {
    use ofgate::controller::{Controller, DispatchTable, GatewayState};
    use ofgate::southbound::{self, ConnectionContext};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio::runtime::Runtime;
    use tokio::sync::mpsc;
    use tracing::warn;

    let cfg = config::load_or_default(config_path)
        .map_err(|e| format!("Failed to load config: {}", e))?;
    init_logging(Some(&cfg.logging));

    let validation = config::validate(&cfg);
    for warning in &validation.warnings {
        warn!("{}", warning);
    }
    if validation.has_errors() {
        validation.print_diagnostics();
        return Err("Invalid configuration".to_string());
    }

    let settings = cfg.to_settings().map_err(|e| e.to_string())?;
    let fallback_port_macs = cfg.fallback_port_macs().map_err(|e| e.to_string())?;

    info!(
        host_switch = %settings.host_switch,
        gateway_switch = %settings.gateway_switch,
        inside = %settings.inside,
        outside = %settings.outside,
        public = %settings.public_addr,
        "ofgate starting"
    );

    let rt = Runtime::new().map_err(|e| format!("Failed to create runtime: {}", e))?;

    rt.block_on(async move {
        let metrics = Arc::new(MetricsRegistry::new());
        let table = DispatchTable::gateway(&settings);
        let controller = Controller::new(GatewayState::new(settings, metrics.clone()), table);

        let listener = TcpListener::bind(cfg.listen.as_str())
            .await
            .map_err(|e| format!("Failed to bind {}: {}", cfg.listen, e))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let ctx = ConnectionContext {
            fallback_port_macs: Arc::new(fallback_port_macs),
            metrics: metrics.clone(),
            echo_interval: Duration::from_secs(cfg.echo_interval_secs),
        };

        let stats_every = Duration::from_secs(cfg.stats_interval_secs);
        let controller_task = tokio::spawn(controller.run(events_rx, stats_every));

        tokio::select! {
            result = southbound::serve(listener, events_tx, ctx) => {
                result.map_err(|e| format!("Listener failed: {}", e))?;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
            }
        }

        controller_task.abort();
        info!("final stats: {}", metrics.snapshot());
        Ok(())
    })
}
