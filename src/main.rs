//! PoT node command line
//!
//! Inspection and bootstrap commands over the ledger service.

use clap::{Parser, Subcommand};
use pot_core::config::NodeConfig;
use pot_core::crypto::Address;
use pot_core::logging::init_tracing;
use pot_core::node::{genesis_hash, LedgerService};
use pot_core::storage::SledStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "pot-node", about = "Proof-of-Transaction ledger node")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, default_value = "pot.toml", env = "POT_CONFIG")]
    config: PathBuf,

    /// Data directory; overrides the configuration file
    #[arg(long, env = "POT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the configured genesis roots into an empty ledger
    Init,
    /// Show the committed height and genesis hash
    Status,
    /// Show the delegation record of an address
    Record {
        address: String,
        /// Height to read at; defaults to the committed height
        #[arg(long)]
        height: Option<u64>,
    },
    /// Show the harvest power of an address
    Power {
        address: String,
        #[arg(long)]
        height: Option<u64>,
    },
    /// Show the reward splits recorded at a height
    Rates {
        height: u64,
        /// Print the samples as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration
    Config,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let mut config = NodeConfig::load(&cli.config)?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    init_tracing(&config.log_filter);

    if let Command::Config = cli.command {
        print!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(SledStore::open(config.ledger_path())?);
    let service = LedgerService::open(store, &config)?;
    let committed = service.committed_height();

    match cli.command {
        Command::Init => {
            let roots = config.genesis.root_addresses()?;
            service.seed_genesis(&roots)?;
            info!(roots = roots.len(), data_dir = %config.data_dir.display(), "ledger initialized");
            println!(
                "Genesis {} seeded with {} roots",
                genesis_hash(config.genesis.timestamp, config.consensus.genesis_base_target),
                roots.len()
            );
        }
        Command::Status => {
            println!("Data dir:    {}", config.data_dir.display());
            println!(
                "Genesis:     {}",
                genesis_hash(config.genesis.timestamp, config.consensus.genesis_base_target)
            );
            match committed {
                Some(height) => println!("Height:      {height}"),
                None => println!("Height:      (not initialized)"),
            }
        }
        Command::Record { address, height } => {
            let address = Address::parse(&address)?;
            let height = height.or(committed).unwrap_or(0);
            let record = service.get_record(&address, height)?;
            println!("Address:     {address} @ {height}");
            println!("Miner:       {}", record.miner);
            println!("Father:      {}", record.father);
            println!("Index:       {}", record.index);
            println!("Harvest:     {}", record.total_harvest_power);
            if let Some(entry) = service.member_entry(&address) {
                println!("Weight:      {}", entry.weight);
                println!("Reward:      {}", entry.reward);
            }
        }
        Command::Power { address, height } => {
            let address = Address::parse(&address)?;
            let height = height.or(committed).unwrap_or(0);
            println!("{}", service.get_harvest_power_by_address(&address, height)?);
        }
        Command::Rates { height, json } => {
            let samples = service.reward_rates(height)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&samples)?);
                return Ok(());
            }
            for sample in samples {
                println!(
                    "{} reward={} root_share={} distributed={} power={} member_rate={:.4}",
                    sample.root,
                    sample.reward,
                    sample.root_share,
                    sample.distributed,
                    sample.harvest_power,
                    sample.member_rate()
                );
            }
        }
        Command::Config => {}
    }
    Ok(())
}
