//! BMM CLI - bare metal machine lifecycle tool.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bmm::config::DEFAULT_CONFIG_PATH;
use bmm::{
    BareMetalMachine, BmmConfig, BmmOrchestrator, Collaborators, DirImageStore, FileStateProbe,
    FlowControllerRpc, HttpFlowController, IpmiPowerController, Workload,
    WorkloadStore, YamlInventoryStore, YamlWorkloadStore,
};

/// BMM CLI - hand out physical servers as compute instances.
#[derive(Parser)]
#[command(name = "bmm")]
#[command(about = "Provision and reclaim bare metal machines")]
#[command(version)]
struct Cli {
    /// Configuration file (or set `BMM_CONFIG` env var).
    #[arg(long, env = "BMM_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging.
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List machines in the inventory.
    List {
        /// Only machines in this zone.
        #[arg(long)]
        zone: Option<String>,
    },

    /// Register a machine from a YAML description.
    Register {
        /// Path to the machine YAML.
        #[arg(long)]
        file: PathBuf,
    },

    /// Place a workload on a machine.
    Spawn {
        /// Workload ID.
        #[arg(long)]
        workload: String,
    },

    /// Wipe a workload's machine and release it.
    Destroy {
        #[arg(long)]
        workload: String,
    },

    /// Return a tenant machine to the pool without reinstalling.
    PoolAdd {
        #[arg(long)]
        workload: String,
    },

    /// Power on a workload's machine.
    Start {
        #[arg(long)]
        workload: String,
    },

    /// Soft power off a workload's machine.
    Stop {
        #[arg(long)]
        workload: String,
    },

    /// Show runtime information for one workload, or all running workloads.
    Info {
        #[arg(long)]
        workload: Option<String>,
    },

    /// Show capacity and usage across the inventory.
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = BmmConfig::load(&cli.config)
        .with_context(|| format!("Failed to load config from {}", cli.config.display()))?;

    let workloads = Arc::new(
        YamlWorkloadStore::open(&config.workloads_path)
            .await
            .context("Failed to open workload registry")?,
    );
    let orchestrator = build_orchestrator(config, workloads.clone()).await?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Commands::List { zone } => {
            let machines = match zone {
                Some(zone) => orchestrator.inventory().by_zone(&zone).await?,
                None => orchestrator.inventory().list().await?,
            };
            println!(
                "\n{:<12} {:<16} {:<12} {:<11} {:<16} {:<6} {:<20}",
                "ID", "NAME", "TYPE", "STATUS", "ZONE", "VLAN", "INSTANCE"
            );
            println!("{}", "-".repeat(97));
            for m in machines {
                println!(
                    "{:<12} {:<16} {:<12} {:<11} {:<16} {:<6} {:<20}",
                    m.id,
                    m.name,
                    m.instance_type,
                    m.status.to_string(),
                    m.availability_zone,
                    m.vlan_id.map(|v| v.to_string()).unwrap_or_default(),
                    m.instance_id.unwrap_or_default()
                );
            }
        }

        Commands::Register { file } => {
            let contents = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let mut machine: BareMetalMachine =
                serde_yaml::from_str(&contents).context("Failed to parse machine YAML")?;
            if machine.id.is_empty() {
                machine.id = uuid::Uuid::new_v4().to_string();
            }
            let id = machine.id.clone();
            orchestrator.inventory().register(machine).await?;
            println!("\n✅ Machine registered: {id}");
        }

        Commands::Spawn { workload } => {
            let w = load_workload(workloads.as_ref(), &workload).await?;
            let machine = orchestrator.spawn(&w, &cancel).await?;
            println!("\n✅ Workload spawned!");
            println!("  Workload: {}", w.id);
            println!("  Machine:  {} ({})", machine.name, machine.id);
            println!("  Status:   {}", machine.status);
            println!("  Zone:     {}", machine.availability_zone);
        }

        Commands::Destroy { workload } => {
            let w = load_workload(workloads.as_ref(), &workload).await?;
            let report = orchestrator.destroy(&w, &cancel).await?;
            match report.machine_id {
                Some(id) => println!("\n✅ Machine reclaimed: {id}"),
                None => println!("\nNo machine bound to {}", w.id),
            }
            if report.fabric.is_drifted() {
                println!("⚠️  Fabric cleanup failed: {:?}", report.fabric);
            }
        }

        Commands::PoolAdd { workload } => {
            let w = load_workload(workloads.as_ref(), &workload).await?;
            let returned = orchestrator.add_to_resource_pool(&w).await?;
            println!("\n✅ Machine {} returned to pool", returned.machine.id);
            if returned.fabric.is_drifted() {
                println!("⚠️  Fabric cleanup failed: {:?}", returned.fabric);
            }
        }

        Commands::Start { workload } => {
            let w = load_workload(workloads.as_ref(), &workload).await?;
            orchestrator.start(&w).await?;
            println!("\n✅ Started {}", w.id);
        }

        Commands::Stop { workload } => {
            let w = load_workload(workloads.as_ref(), &workload).await?;
            orchestrator.stop(&w).await?;
            println!("\n✅ Stopped {}", w.id);
        }

        Commands::Info { workload } => {
            let infos = match workload {
                Some(id) => {
                    let w = load_workload(workloads.as_ref(), &id).await?;
                    vec![orchestrator.get_info(&w).await?]
                }
                None => orchestrator.list_instances_detail().await?,
            };
            println!("{}", serde_json::to_string_pretty(&infos)?);
        }

        Commands::Stats => {
            let stats = orchestrator.get_host_stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
    }

    Ok(())
}

async fn build_orchestrator(
    config: BmmConfig,
    workloads: Arc<YamlWorkloadStore>,
) -> Result<BmmOrchestrator> {
    let inventory = YamlInventoryStore::open(&config.inventory_path)
        .await
        .context("Failed to open machine inventory")?;

    let flow_controller: Option<Arc<dyn FlowControllerRpc>> = match &config.ofc_service_url {
        Some(url) => {
            info!(url = %url, "Using flow controller");
            Some(Arc::new(HttpFlowController::new(url.clone())?))
        }
        None => {
            warn!("No flow controller configured; only the resource pool can be served");
            None
        }
    };

    let collaborators = Collaborators {
        inventory: Arc::new(inventory),
        workloads,
        images: Arc::new(DirImageStore::new(&config.image_dir)),
        power: Arc::new(IpmiPowerController::new(
            config.ipmi_user.clone(),
            config.ipmi_password.clone(),
            config.ipmi_port,
        )),
        probe: Arc::new(FileStateProbe::new(
            &config.cobbler_path,
            config.bmm_status_path.clone(),
        )),
        flow_controller,
    };

    let orchestrator = BmmOrchestrator::new(config, collaborators)?;
    orchestrator.init_host().await?;
    Ok(orchestrator)
}

async fn load_workload(workloads: &dyn WorkloadStore, id: &str) -> Result<Workload> {
    match workloads.get_workload(id).await? {
        Some(workload) if workload.is_live() => Ok(workload),
        Some(_) => bail!("Workload {id} is deleted"),
        None => bail!("Workload {id} not found"),
    }
}
