use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use netdhcp::{
    CallContext, Config, Error, GlobalContext, HardwareAddr, LeaseState, MemoryProvider, Result,
    resolve_instance, resolve_network,
};

#[derive(Parser)]
#[command(name = "netdhcp")]
#[command(author, version, about = "Inspect layered DHCP configuration and leases", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    ShowConfig,
    /// Print the effective configuration of a hardware address.
    Resolve {
        /// Hardware address, e.g. aa:bb:cc:dd:ee:ff
        mac: String,
        #[arg(short, long, conflicts_with = "instance", required_unless_present = "instance")]
        network: Option<String>,
        #[arg(short, long)]
        instance: Option<String>,
    },
    ListLeases {
        #[arg(short, long)]
        network: Option<String>,
    },
    CleanupLeases,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = Config::load_or_create(&cli.config).await?;

    match cli.command.unwrap_or(Commands::ShowConfig) {
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Resolve {
            mac,
            network,
            instance,
        } => {
            let addr: HardwareAddr = mac.parse()?;
            let default_lease = Duration::from_secs(u64::from(config.default_lease_seconds));
            let provider = MemoryProvider::open(Arc::new(config)).await?;
            let gc = GlobalContext::new(Arc::new(provider));
            let ctx = CallContext::background();

            let resolution = match (instance, network) {
                (Some(instance), _) => resolve_instance(&ctx, &gc, &instance, &addr).await?,
                (None, Some(network)) => resolve_network(&ctx, &gc, &network, &addr).await?,
                (None, None) => {
                    return Err(Error::InvalidConfig(
                        "either --network or --instance is required".to_string(),
                    ));
                }
            };

            info!(
                "Resolved {} on network {:?} from {} layer(s)",
                addr,
                resolution.network,
                resolution.layers.len()
            );
            for scope in &resolution.layers {
                println!("# {}", scope);
            }
            println!("{}", serde_json::to_string_pretty(&resolution.attr)?);
            println!(
                "# lease expires at {}",
                resolution
                    .lease_expiration(Utc::now(), default_lease)
                    .format("%Y-%m-%d %H:%M:%S UTC")
            );
            Ok(())
        }
        Commands::ListLeases { network } => {
            let provider = MemoryProvider::open(Arc::new(config)).await?;
            let leases = provider.list_leases(network.as_deref());

            if leases.is_empty() {
                println!("No leases.");
            } else {
                println!(
                    "{:<16} {:<40} {:<24} {:<24} {:<10}",
                    "Network", "IP Address", "Hardware Address", "Expires At", "State"
                );
                println!("{}", "-".repeat(118));

                let now = Utc::now();
                for lease in leases {
                    let holder = lease
                        .addr
                        .as_ref()
                        .map_or_else(|| "(held)".to_string(), ToString::to_string);
                    let state = match lease.state(now) {
                        LeaseState::Active => format!("{}s", lease.remaining_seconds(now)),
                        LeaseState::Held => "held".to_string(),
                        LeaseState::Expired | LeaseState::Absent => "expired".to_string(),
                    };

                    println!(
                        "{:<16} {:<40} {:<24} {:<24} {:<10}",
                        lease.network,
                        lease.ip,
                        holder,
                        lease.expiration.format("%Y-%m-%d %H:%M:%S UTC"),
                        state
                    );
                }
            }

            Ok(())
        }
        Commands::CleanupLeases => {
            let provider = MemoryProvider::open(Arc::new(config)).await?;
            let count = provider.cleanup_expired_leases().await?;
            println!("Cleaned up {} expired lease(s).", count);
            Ok(())
        }
    }
}
