//! Kubesmith CLI entry point.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kubesmith::config::Config;
use kubesmith::connector;
use kubesmith::executor::PipelineExecutor;
use kubesmith::inventory::Inventory;
use kubesmith::modules::ModuleRegistry;
use kubesmith::playbook::Playbook;
use kubesmith::vars::source::{FileSource, MemorySource, Source};
use kubesmith::vars::store::{self, VariableStore};
use kubesmith::Result;

#[derive(Parser)]
#[command(
    name = "kubesmith",
    version,
    about = "Cluster-lifecycle automation: run declarative playbooks against a fleet of hosts"
)]
struct Cli {
    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Path to the config YAML file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the inventory YAML file
    #[arg(short, long, global = true)]
    inventory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a playbook
    Run {
        /// Path to the playbook YAML file
        playbook: PathBuf,

        /// Keep host variable snapshots in memory instead of on disk
        #[arg(long)]
        memory: bool,
    },
    /// Show resolved inventory (groups and per-host variables)
    Inventory {
        /// Limit output to one host
        host: Option<String>,
    },
    /// Gather and print facts from one host
    Facts {
        /// Target host
        host: String,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_inputs(cli: &Cli) -> Result<(Config, Inventory)> {
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    let inventory = match &cli.inventory {
        Some(path) => Inventory::from_file(path)?,
        None => Inventory::default(),
    };
    Ok((config, inventory))
}

async fn run(cli: Cli) -> Result<()> {
    let (config, inventory) = load_inputs(&cli)?;

    match &cli.command {
        Commands::Run { playbook, memory } => {
            let playbook_name = playbook
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("playbook")
                .to_string();
            let parsed = Playbook::from_file(playbook)?;

            let source: Box<dyn Source> = if *memory {
                Box::new(MemorySource::new())
            } else {
                Box::new(FileSource::new(config.runtime_dir(&playbook_name))?)
            };
            let store = Arc::new(VariableStore::new(
                playbook_name,
                config,
                inventory,
                source,
            )?);
            let registry = Arc::new(ModuleRegistry::with_builtins());

            let mut executor = PipelineExecutor::new(store, registry);
            let result = executor.run(&parsed).await;
            println!("{}", executor.status.summary());
            for detail in &executor.status.failed_detail {
                eprintln!("failed task: {}", detail.task);
                for host in &detail.hosts {
                    if !host.stderr.is_empty() {
                        eprintln!("  [{}] {}", host.host, host.stderr);
                    }
                }
            }
            result
        }
        Commands::Inventory { host } => {
            let store = Arc::new(VariableStore::new(
                "inventory",
                config,
                inventory,
                Box::new(MemorySource::new()),
            )?);
            let hosts = match host {
                Some(h) => vec![h.clone()],
                None => store.get(store::hostnames(vec!["all".to_string()]))?,
            };
            for host in hosts {
                let vars = store.get(store::all_vars(&host))?;
                println!("{host}:");
                let rendered = serde_yaml::to_string(&vars)?;
                for line in rendered.lines() {
                    println!("  {line}");
                }
            }
            Ok(())
        }
        Commands::Facts { host } => {
            let store = Arc::new(VariableStore::new(
                "facts",
                config,
                inventory,
                Box::new(MemorySource::new()),
            )?);
            let vars = store.get(store::all_vars(host))?;
            let mut conn = connector::connect(host, &vars).await?;
            let info = conn.host_info().await;
            let _ = conn.close().await;
            println!("{}", serde_json::to_string_pretty(&info?)?);
            Ok(())
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("error: {e}");
        std::process::exit(e.exit_code());
    }
}
