use crate::api::inventory_dto::InventoryDto;
use crate::domain::config::FerryConfig;
use crate::domain::scenario::Scenario;
use crate::domain::simulation::Simulation;
use crate::error::Result;
use crate::loader::parser::parse_json_file;

pub mod api;
pub mod domain;
pub mod error;
pub mod loader;
pub mod logger;

/// Loads and validates a ferry configuration and, when given, a scenario.
pub fn load_run(config_path: &str, scenario_path: Option<&str>) -> Result<(FerryConfig, Option<Scenario>)> {
    let config = FerryConfig::load(config_path)?;
    log::info!("Configuration '{}' loaded ({} -> {}).", config_path, config.src.host, config.dst.host);

    let scenario = match scenario_path {
        Some(path) => {
            let scenario = Scenario::load(path, &config.migrate)?;
            log::info!("Scenario '{}' loaded with {} flow(s).", path, scenario.flows().len());
            Some(scenario)
        }
        None => None,
    };
    Ok((config, scenario))
}

/// Builds a ferry on in-memory clouds seeded from an inventory file.
pub fn build_simulation(config: FerryConfig, inventory_path: &str) -> Result<Simulation> {
    let inventory: InventoryDto = parse_json_file(inventory_path)?;
    log::info!("Inventory '{}' parsed successfully.", inventory_path);
    Simulation::build(config, inventory)
}
