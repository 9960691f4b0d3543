use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uda_client::config::{Config, ConfigError};
use uda_client::utils::{format_bytes, format_duration};
use uda_client::{CloseMode, ConnectionManager};

#[derive(Parser)]
#[command(name = "uda-client")]
#[command(about = "Connection manager for UDA data-access clients")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to a UDA server and report the session
    Connect {
        /// Path to configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Primary server host, overrides configuration and environment
        #[arg(long)]
        host: Option<String>,
        /// Primary server port
        #[arg(long)]
        port: Option<u16>,
        /// Secondary server host
        #[arg(long)]
        host2: Option<String>,
        /// Secondary server port
        #[arg(long)]
        port2: Option<u16>,
        /// Send this text once connected and print the reply
        #[arg(long)]
        send: Option<String>,
    },
    /// Generate an example configuration file
    Config {
        /// Configuration profile (single or failover)
        #[arg(short, long, default_value = "single")]
        profile: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Connect {
            config,
            host,
            port,
            host2,
            port2,
            send,
        } => {
            let mut config = match config {
                Some(path) => {
                    let mut config = Config::load_from_file(&path)
                        .with_context(|| format!("Failed to load config from {:?}", path))?;
                    config.apply_env_overrides();
                    config
                }
                None => Config::from_env(),
            };
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            if let Some(host2) = host2 {
                config.server.host2 = host2;
            }
            if let Some(port2) = port2 {
                config.server.port2 = port2;
            }
            config.validate().context("Invalid configuration")?;

            init_logging(&config)?;
            run_connect(&config, send)?;
        }
        Commands::Config { profile, output } => {
            generate_config(&profile, output)?;
        }
        Commands::Validate { config } => {
            validate_config(config)?;
        }
        Commands::Version => {
            show_version();
        }
    }

    Ok(())
}

fn run_connect(config: &Config, send: Option<String>) -> anyhow::Result<()> {
    info!(
        "Starting uda-client v{}, server {}:{}",
        env!("CARGO_PKG_VERSION"),
        config.server.host,
        config.server.port
    );

    let mut manager = ConnectionManager::new(config);
    if let Err(e) = manager.connect() {
        for record in manager.errors() {
            eprintln!("  {}", record);
        }
        bail!("Failed to connect: {}", e);
    }

    let record = manager
        .active_record()
        .context("Connected without an active session")?;
    println!("✓ Connected to {}:{}", record.host, record.port);
    println!("  Handle: {}", record.handle);
    println!("  Attempts: {}", manager.last_attempts().len());
    println!(
        "  Socket buffers: {}",
        format_bytes(config.socket.window_size as u64)
    );
    println!(
        "  Session timeout: {}",
        format_duration(manager.session().user_timeout)
    );
    if manager.hosts().primary.hostname != config.server.host {
        warn!(
            "Primary server unreachable, using {}",
            manager.hosts().primary
        );
    }

    if let Some(message) = send {
        let sent = manager
            .write(message.as_bytes())
            .context("Failed to send message")?;
        println!("  Sent {} bytes", sent);

        let mut reply = vec![0u8; config.socket.window_size];
        let received = manager
            .stream()
            .read(&mut reply)
            .context("Failed to read reply")?;
        println!("  Reply: {}", String::from_utf8_lossy(&reply[..received]));
    }

    manager.close(CloseMode::CloseAll);
    info!(
        "Session closed after {}",
        format_duration(manager.session().age())
    );
    Ok(())
}

fn generate_config(profile: &str, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", profile, output);

    Config::create_example_config(&output, profile).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  uda-client connect --config {:?}", output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!(
                "  Primary server: {}:{}",
                config.server.host, config.server.port
            );
            if !config.server.host2.trim().is_empty() {
                println!(
                    "  Secondary server: {}:{}",
                    config.server.host2, config.server.port2
                );
            }
            println!(
                "  Retries: {} attempts, up to {} delay units of {}ms",
                config.retry.max_attempts, config.retry.max_delay, config.retry.delay_unit_ms
            );
            println!("  Host aliases: {} entries", config.hosts.len());
            for (i, entry) in config.hosts.iter().enumerate() {
                match entry.port {
                    Some(port) => println!(
                        "    {}: {} -> {}:{}",
                        i + 1,
                        entry.alias,
                        entry.host_name,
                        port
                    ),
                    None => println!("    {}: {} -> {}", i + 1, entry.alias, entry.host_name),
                }
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("uda-client v{}", env!("CARGO_PKG_VERSION"));
    println!("Connection manager for UDA data-access clients");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Features:");
    println!("  • Host alias substitution and SSL:// detection");
    println!("  • IPv4, IPv6 and localhost resolution");
    println!("  • Jittered connect retries with primary/secondary failover");
    println!("  • Multiple server sessions with switching");
    println!("  • Blocking I/O with readiness polling and SIGPIPE suppression");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    if let Err(e) = result {
        bail!("Failed to initialize logging: {}", e);
    }

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
