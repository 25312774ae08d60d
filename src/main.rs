use anyhow::Context;
use clap::{Parser, Subcommand};

use vm_ferry::domain::cloud::resource_trait::ResourceKind;
use vm_ferry::domain::cloud::transfer::TransferRegistry;
use vm_ferry::domain::ferry::Ferry;
use vm_ferry::domain::utils::id::NsKey;
use vm_ferry::{build_simulation, load_run, logger};

#[derive(Parser, Debug)]
#[command(name = "vm-ferry", version, about = "Migrates virtual machines and their resources between clouds")]
struct Cli {
    /// Ferry configuration (JSON)
    #[arg(long)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the configuration and compile every flow without running anything.
    Validate {
        #[arg(long)]
        scenario: Option<String>,
    },
    /// Run the migration against in-memory clouds seeded from an inventory file.
    Simulate {
        #[arg(long)]
        inventory: String,
        #[arg(long)]
        scenario: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Validate { scenario } => {
            let (config, scenario) = load_run(&cli.config, scenario.as_deref()).context("loading run definition")?;
            let ferry = Ferry::new(config, Vec::new(), Vec::new(), TransferRegistry::new())?;

            for (name, cursor) in ferry.build_flows(scenario.as_ref())? {
                println!("flow {} ({} nodes)", name, cursor.net().len());
                for line in cursor.net().describe() {
                    println!("  {}", line);
                }
            }
        }
        Command::Simulate { inventory, scenario } => {
            let (config, scenario) = load_run(&cli.config, scenario.as_deref()).context("loading run definition")?;
            let simulation = build_simulation(config, &inventory).context("building simulated clouds")?;

            let namespace = simulation.ferry.namespace()?;
            let scheduler = simulation.ferry.scheduler(namespace.clone(), scenario.as_ref())?;

            let cancel = scheduler.cancellation_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    log::warn!("Interrupted, cancelling the run.");
                    cancel.cancel();
                }
            });

            let report = scheduler.start().await;
            if let Some(failures) = namespace.get_opt(&NsKey::new("info_failures"))? {
                log::warn!("Skipped elements: {}", failures);
            }
            let report = report.context("migration failed")?;

            println!("{}", serde_json::to_string_pretty(&report)?);
            let created = simulation.dst.get(&ResourceKind::Compute).map(|adapter| adapter.len()).unwrap_or_default();
            println!("{} instance(s) on the destination, {} payload(s) transferred", created, simulation.transferred().len());
        }
    }

    Ok(())
}
