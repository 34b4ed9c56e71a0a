//! Command line front end for the hub controller.
//!
//! The operational Matter stack is not linked in here: commands that talk to devices fail
//! with "operational controller is unavailable" unless a real [Controller] is wired in.
//! Payload import, registry listing and editing work against the state directory alone.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use matc_hub::commission::UnavailableHandshake;
use matc_hub::controller::{Controller, NoopController};
use matc_hub::devman::DeviceManager;
use matc_hub::discover;
use matc_hub::metrics;
use matc_hub::poll::{self, OutputFormat};
use matc_hub::tlv;

#[derive(Parser, Debug)]
#[command(about = "Commission a Matter hub and control its bridged devices")]
struct Cli {
    /// Enable verbose logging
    #[clap(long)]
    #[arg(global = true, default_value_t = false)]
    verbose: bool,

    /// State directory (defaults to $XDG_STATE_HOME/matter-ctl)
    #[clap(long)]
    #[arg(global = true)]
    state_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import onboarding payload and commission the hub
    #[command(group(ArgGroup::new("payload").required(true).args(["qr", "code"])))]
    Setup {
        #[clap(long)]
        qr: Option<String>,

        #[clap(long)]
        code: Option<String>,

        #[clap(long)]
        node_id: u64,

        /// Discovery timeout in seconds
        #[clap(long)]
        timeout: Option<u64>,

        /// Only store the payload, do not commission
        #[clap(long)]
        #[arg(default_value_t = false)]
        import_only: bool,

        /// Skip discovery and commission device at ip:port
        #[clap(long)]
        address: Option<String>,
    },
    /// Read hub descriptor and refresh device registry
    Scan {
        /// Override configured hub node id
        #[clap(long)]
        hub_node_id: Option<u64>,
    },
    Devices {
        #[command(subcommand)]
        command: DeviceCommand,
    },
    Onoff {
        #[command(subcommand)]
        command: OnOffCommand,
    },
    Lock {
        #[command(subcommand)]
        command: LockCommand,
    },
    /// Read one attribute of a registered device
    Read {
        unique_id: String,
        #[clap(long)]
        cluster: u32,
        #[clap(long)]
        attribute: u32,
    },
    /// Collect metrics from all registered devices
    Poll {
        #[clap(long)]
        #[arg(default_value_t = false)]
        watch: bool,

        /// Seconds between polls in watch mode
        #[clap(long)]
        #[arg(default_value_t = 60)]
        interval: u64,

        /// Stop watching after this many seconds
        #[clap(long)]
        duration: Option<u64>,

        /// json or jsonl
        #[clap(long)]
        #[arg(default_value_t = String::from("json"))]
        format: String,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    List,
    Rename { unique_id: String, label: String },
    Remove { unique_id: String },
}

#[derive(Subcommand, Debug)]
enum OnOffCommand {
    On { unique_id: String },
    Off { unique_id: String },
    Toggle { unique_id: String },
    Status { unique_id: String },
}

#[derive(Subcommand, Debug)]
enum LockCommand {
    Lock {
        unique_id: String,
    },
    Unlock {
        unique_id: String,
        #[clap(long)]
        pin: Option<String>,
    },
}

fn setup_logging(verbose: bool) {
    let log_level = if verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Warn
    };

    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();
}

fn open_manager(state_dir: Option<PathBuf>) -> Result<DeviceManager> {
    let ctrl: Arc<dyn Controller> = Arc::new(NoopController);
    let handshake = Arc::new(UnavailableHandshake);
    match state_dir {
        Some(dir) => DeviceManager::open(dir, ctrl, handshake),
        None => DeviceManager::open_default(ctrl, handshake),
    }
}

async fn setup(
    dm: &mut DeviceManager,
    raw: &str,
    node_id: u64,
    timeout: Option<u64>,
    import_only: bool,
    address: Option<String>,
) -> Result<()> {
    let mut svc = dm.commission_service();
    if let Some(secs) = timeout {
        svc = svc.with_discovery_timeout(Duration::from_secs(secs));
    }
    if import_only {
        let state = svc.import_payload(node_id, raw)?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        return Ok(());
    }
    let (state, commissionee) = match address {
        Some(addr) => {
            let addr = discover::parse_on_network_address(&addr)?;
            svc.commission_on_network(node_id, raw, addr).await?
        }
        None => svc.commission(node_id, raw).await?,
    };
    println!("commissioned {}", commissionee);
    println!("{}", serde_json::to_string_pretty(&state)?);
    dm.set_hub_node_id(node_id)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut dm = open_manager(cli.state_dir)?;
    log::debug!("using state directory {}", dm.state_dir().display());

    match cli.command {
        Commands::Setup {
            qr,
            code,
            node_id,
            timeout,
            import_only,
            address,
        } => {
            let raw = qr.or(code).context("either --qr or --code is required")?;
            setup(&mut dm, &raw, node_id, timeout, import_only, address).await?;
        }
        Commands::Scan { hub_node_id } => {
            let hub = match hub_node_id {
                Some(h) => h,
                None => dm.hub_node_id()?,
            };
            let registry = dm.registry_service().scan(hub).await?;
            println!("{}", serde_json::to_string_pretty(&registry)?);
        }
        Commands::Devices { command } => {
            let svc = dm.registry_service();
            match command {
                DeviceCommand::List => {
                    for dev in svc.list()? {
                        println!(
                            "{:<24} node={} endpoint={} label={:?}{}",
                            dev.unique_id,
                            dev.node_id,
                            dev.endpoint,
                            dev.user_label,
                            if dev.missing { " missing" } else { "" }
                        );
                    }
                }
                DeviceCommand::Rename { unique_id, label } => {
                    let dev = svc.rename(&unique_id, &label)?;
                    println!("renamed {} to {:?}", dev.unique_id, dev.user_label);
                }
                DeviceCommand::Remove { unique_id } => {
                    let dev = svc.remove(&unique_id)?;
                    println!("removed {}", dev.unique_id);
                }
            }
        }
        Commands::Onoff { command } => {
            let svc = dm.onoff();
            match command {
                OnOffCommand::On { unique_id } => svc.on(&unique_id).await?,
                OnOffCommand::Off { unique_id } => svc.off(&unique_id).await?,
                OnOffCommand::Toggle { unique_id } => svc.toggle(&unique_id).await?,
                OnOffCommand::Status { unique_id } => {
                    let on = svc.state(&unique_id).await?;
                    println!("{}", if on { "on" } else { "off" });
                }
            }
        }
        Commands::Lock { command } => {
            let svc = dm.lock();
            match command {
                LockCommand::Lock { unique_id } => svc.lock(&unique_id).await?,
                LockCommand::Unlock { unique_id, pin } => svc.unlock(&unique_id, pin.as_deref()).await?,
            }
        }
        Commands::Read {
            unique_id,
            cluster,
            attribute,
        } => {
            let value = dm.attributes().read(&unique_id, cluster, attribute).await?;
            println!("{}", value.to_json());
            log::debug!("tlv: {}", hex::encode(tlv::encode(&value)?));
        }
        Commands::Poll {
            watch,
            interval,
            duration,
            format,
        } => {
            let format: OutputFormat = format.parse()?;
            let svc = dm.poll_service(metrics::default_readers());
            let mut out = std::io::stdout();
            if watch {
                let cancel = CancellationToken::new();
                if let Some(secs) = duration {
                    let c = cancel.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(Duration::from_secs(secs)).await;
                        c.cancel();
                    });
                }
                svc.watch(Duration::from_secs(interval), &mut out, format, cancel).await?;
            } else {
                let result = svc.poll_once().await?;
                poll::write_poll_result(&mut out, format, &result)?;
            }
        }
    }
    Ok(())
}
