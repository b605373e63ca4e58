use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use usb_composite::composite::{
    demo::{self, DemoFunction},
    CompositeService, CompositeStatus, FileStack, FunctionInfo, LifecycleState, MemoryStack,
    UsbDeviceStack, PRESETS,
};
use usb_composite::config::{AppConfig, ConfigStore};
use usb_composite::events::EventBus;
use usb_composite::AppError;

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// usb-composite command line arguments
#[derive(Parser, Debug)]
#[command(name = "usb-composite")]
#[command(version, about = "USB composite-device descriptor compositor", long_about = None)]
struct CliArgs {
    /// Configuration file (default: /etc/usb-composite/config.toml)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the compiled-in enumeration tables
    Presets,
    /// Register demo functions and print the resulting function table
    List {
        #[command(flatten)]
        functions: FunctionArgs,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Print the composed descriptor set as hex
    Dump {
        #[command(flatten)]
        functions: FunctionArgs,
    },
    /// Present demo functions through a file-backed stack until Ctrl-C
    Run {
        #[command(flatten)]
        functions: FunctionArgs,
        /// Present immediately, ignoring the table rendezvous
        #[arg(long)]
        force: bool,
        /// Output directory (overrides stack.output_dir)
        #[arg(short = 'o', long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
    /// Withdraw a device published by `run`
    Stop {
        /// Output directory (overrides stack.output_dir)
        #[arg(short = 'o', long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct FunctionArgs {
    /// Enumeration table to select (1-based)
    #[arg(short = 't', long, value_name = "N")]
    table: Option<usize>,

    /// Demo functions to register, comma separated (default: the table's, or all)
    #[arg(short = 'f', long, value_name = "NAMES", value_delimiter = ',')]
    functions: Vec<String>,
}

#[derive(Serialize)]
struct Listing {
    status: CompositeStatus,
    functions: Vec<FunctionInfo>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    let config_path = args.config.unwrap_or_else(get_config_path);
    let config_store = ConfigStore::new(&config_path).await?;
    let config = config_store.get();
    tracing::debug!("Configuration loaded from {}", config_path.display());

    match args.command {
        Command::Presets => {
            for (i, preset) in PRESETS.iter().enumerate() {
                println!("{:>2}  {:<8} {}", i + 1, preset.name, preset.functions.join(", "));
            }
        }
        Command::List { functions, json } => {
            let (service, _) = build_service(&config, Box::new(MemoryStack::new()), &functions).await?;
            let listing = Listing {
                status: service.status().await,
                functions: service.functions().await,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&listing)?);
            } else {
                print_listing(&listing);
            }
        }
        Command::Dump { functions } => {
            let (service, _) = build_service(&config, Box::new(MemoryStack::new()), &functions).await?;
            if service.status().await.state != LifecycleState::Loaded {
                tracing::warn!("Rendezvous not met, composing anyway");
                service.force_start().await?;
            }
            let set = service.descriptor().await?;
            print_hex("device", set.device_desc());
            print_hex("configuration", set.config_desc());
            for f in set.function_descs() {
                print_hex(&format!("slot {} ({})", f.slot, f.name), &set.as_bytes()[f.range.clone()]);
            }
            print_hex("strings", set.string_descs());
            if let Some(qualifier) = set.qualifier_desc() {
                print_hex("qualifier", qualifier);
            }
        }
        Command::Run {
            functions,
            force,
            output,
        } => {
            let dir = output.unwrap_or_else(|| PathBuf::from(&config.stack.output_dir));
            tracing::info!("Publishing composite device into {}", dir.display());
            let (service, events) =
                build_service(&config, Box::new(FileStack::new(&dir)), &functions).await?;

            let mut rx = events.subscribe();
            tokio::spawn(async move {
                while let Ok(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(json) => tracing::info!("event: {}", json),
                        Err(e) => tracing::warn!("Failed to encode event: {}", e),
                    }
                }
            });

            if force {
                service.force_start().await?;
            }
            service.spawn_detection();

            tokio::signal::ctrl_c().await?;
            tracing::info!("Shutdown signal received");
            service.shutdown().await;
        }
        Command::Stop { output } => {
            let dir = output.unwrap_or_else(|| PathBuf::from(&config.stack.output_dir));
            FileStack::new(&dir).deinitialize()?;
            println!("{}: {}", dir.display(), FileStack::read_state(&dir)?);
        }
    }

    Ok(())
}

/// Build a service, select the table and register the requested demo functions
async fn build_service(
    config: &Arc<AppConfig>,
    stack: Box<dyn UsbDeviceStack>,
    args: &FunctionArgs,
) -> anyhow::Result<(Arc<CompositeService>, Arc<EventBus>)> {
    let events = Arc::new(EventBus::new());
    let service = CompositeService::new(Arc::clone(config), stack, Arc::clone(&events))?;

    if let Some(index) = args.table {
        service.select_table(index).await?;
    }

    let names: Vec<String> = if !args.functions.is_empty() {
        args.functions.clone()
    } else if let Some(preset) = args.table.and_then(|t| PRESETS.get(t.max(1) - 1)) {
        preset.functions.iter().map(|f| f.to_string()).collect()
    } else {
        demo::DEMO_MODULES.iter().map(|m| m.name.to_string()).collect()
    };

    for name in &names {
        let module = demo::lookup(name)
            .ok_or_else(|| AppError::NotFound(format!("demo function {}", name)))?;
        service
            .register(module.name, module.dev_class, Some(module.blob()), DemoFunction::new(module.name))
            .await?;
    }

    Ok((service, events))
}

fn print_listing(listing: &Listing) {
    let status = &listing.status;
    println!(
        "{}  {} / {}  (table {}, {})",
        if status.is_finished { "ok" } else { "not ready" },
        status.dev_num,
        status.max_dev_num,
        status.table_index,
        status.state
    );
    println!(
        "{:<4} {:<8} {:<6} {:<6} {:<6} {:<12} endpoints",
        "slot", "name", "class", "active", "loaded", "interfaces"
    );
    for f in &listing.functions {
        println!(
            "{:<4} {:<8} 0x{:02x}   {:<6} {:<6} {:<12} {}",
            f.slot,
            f.name,
            f.dev_class,
            f.active,
            f.loaded,
            format!("{:?}", f.interfaces),
            f.endpoints
                .iter()
                .map(|e| format!("0x{:02x}", e))
                .collect::<Vec<_>>()
                .join(" ")
        );
    }
}

fn print_hex(label: &str, bytes: &[u8]) {
    println!("# {} ({} bytes)", label, bytes.len());
    for chunk in bytes.chunks(16) {
        let line: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
        println!("  {}", line.join(" "));
    }
}

/// Initialize logging with tracing
fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "usb_composite=error",
        LogLevel::Warn => "usb_composite=warn",
        LogLevel::Info => "usb_composite=info",
        LogLevel::Verbose => "usb_composite=debug",
        LogLevel::Debug => "usb_composite=debug",
        LogLevel::Trace => "usb_composite=trace",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}

/// Get the configuration file path
fn get_config_path() -> PathBuf {
    if let Ok(path) = std::env::var("USB_COMPOSITE_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("/etc/usb-composite/config.toml")
}
