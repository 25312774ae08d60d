use serde_json::{Value, json};
use std::sync::Arc;

use vm_ferry::api::config_dto::FerryConfigDto;
use vm_ferry::api::inventory_dto::InventoryDto;
use vm_ferry::api::scenario_dto::ScenarioDto;
use vm_ferry::domain::cloud::memory_adapter::{MemoryAdapter, RecordingTransfer};
use vm_ferry::domain::cloud::resource_trait::{ResourceAdapter, ResourceKind};
use vm_ferry::domain::cloud::transfer::TransferRegistry;
use vm_ferry::domain::config::FerryConfig;
use vm_ferry::domain::ferry::{DEFAULT_FLOW, Ferry};
use vm_ferry::domain::scenario::Scenario;
use vm_ferry::domain::simulation::Simulation;
use vm_ferry::domain::utils::id::{FlowName, NsKey};
use vm_ferry::error::Error;
use vm_ferry::{build_simulation, load_run};

fn config_json(element_failure: &str) -> Value {
    json!({
        "src": {"host": "cs-host", "user": "admin", "password": "pw", "tenant": "admin", "authUrl": "http://cs-host:8080/client/api"},
        "dst": {"host": "os-host", "user": "admin", "password": "pw", "tenant": "admin", "authUrl": "http://os-host:5000/v2.0", "temp": "/var/ferry"},
        "migrate": {"elementFailure": element_failure, "pollIntervalMs": 1, "pollRetries": 5}
    })
}

fn config(element_failure: &str) -> FerryConfig {
    let dto: FerryConfigDto = serde_json::from_value(config_json(element_failure)).unwrap();
    FerryConfig::try_from(dto).unwrap()
}

fn inventory() -> InventoryDto {
    serde_json::from_value(json!({
        "src": {
            "compute": {
                "vm1": {"name": "web", "flavor": {"name": "m1.small", "vcpus": 1}, "disks": [{"id": "disk-1", "path": "/data/disk-1.qcow2"}]},
                "vm2": {"name": "db", "flavor": {"name": "m1.large", "vcpus": 4}}
            }
        },
        "dst": {
            "flavor": {"f-small": {"name": "m1.small", "vcpus": 1}}
        },
        "settleAfter": 2
    }))
    .unwrap()
}

#[tokio::test]
async fn test_default_flow_migrates_every_instance() {
    let simulation = Simulation::build(config("abort"), inventory()).unwrap();
    let namespace = simulation.ferry.namespace().unwrap();

    let report = simulation.ferry.scheduler(namespace.clone(), None).unwrap().start().await.unwrap();

    let flow = &report.flows[&FlowName::new(DEFAULT_FLOW)];
    assert_eq!(flow.loop_rounds, 2);
    assert!(flow.skipped.is_empty());

    let result = namespace.get(&NsKey::new("info")).unwrap();
    let vm1 = &result["instances"]["vm1"];
    assert_eq!(vm1["flavor_id"], json!("f-small"));
    assert_eq!(vm1["status"], json!("active"));
    assert_eq!(vm1["disks"][0]["transferred_to"], json!("os-host:/var/ferry/disk-1"));
    assert!(result["instances"]["vm2"]["dst_id"].is_string());

    assert_eq!(simulation.dst[&ResourceKind::Compute].len(), 2);
    // m1.large had to be created, m1.small was reused.
    assert_eq!(simulation.dst[&ResourceKind::Flavor].len(), 2);
    assert_eq!(simulation.transferred(), vec![("cs-host:/data/disk-1.qcow2".to_string(), "os-host:/var/ferry/disk-1".to_string())]);

    // The source collection is kept untouched as the backup.
    assert_eq!(namespace.get(&NsKey::new("info_backup")).unwrap()["instances"].as_object().unwrap().len(), 2);
}

fn ferry_rejecting(element_failure: &str, rejected_name: &str) -> (Ferry, Arc<MemoryAdapter>) {
    let inventory = inventory();
    let src_compute = Arc::new(MemoryAdapter::with_records(ResourceKind::Compute, inventory.src["compute"].clone()));
    let dst_compute = Arc::new(MemoryAdapter::new(ResourceKind::Compute).reject_create("name", json!(rejected_name)));
    let dst_flavor = Arc::new(MemoryAdapter::with_records(ResourceKind::Flavor, inventory.dst["flavor"].clone()));

    let src: Vec<Arc<dyn ResourceAdapter>> = vec![src_compute];
    let dst: Vec<Arc<dyn ResourceAdapter>> = vec![dst_compute.clone(), dst_flavor];
    let transfers = TransferRegistry::new().with_fallback(Arc::new(RecordingTransfer::new("ssh_file_to_file")));

    (Ferry::new(config(element_failure), src, dst, transfers).unwrap(), dst_compute)
}

#[tokio::test]
async fn test_abort_policy_stops_at_failing_instance() {
    let (ferry, dst_compute) = ferry_rejecting("abort", "web");

    let error = ferry.migrate(None).await.unwrap_err();

    assert!(matches!(&error, Error::FlowFailed { element: Some(element), step, .. } if element == "vm1" && step == "create_compute"));
    assert!(matches!(error.root_cause(), Error::RemoteOperationFailed { .. }));
    assert!(dst_compute.is_empty());
}

#[tokio::test]
async fn test_skip_policy_migrates_remaining_instances() {
    let (ferry, dst_compute) = ferry_rejecting("skip", "web");
    let namespace = ferry.namespace().unwrap();

    let report = ferry.scheduler(namespace.clone(), None).unwrap().start().await.unwrap();

    let skipped = &report.flows[&FlowName::new(DEFAULT_FLOW)].skipped;
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].element.as_deref(), Some("vm1"));
    assert_eq!(dst_compute.len(), 1);

    let result = namespace.get(&NsKey::new("info")).unwrap();
    assert!(result["instances"].get("vm1").is_none());
    assert!(result["instances"].get("vm2").is_some());
    assert_eq!(namespace.get(&NsKey::new("info_failures")).unwrap()[0]["id"], json!("vm1"));
}

#[tokio::test]
async fn test_scenario_flows_run_side_by_side() {
    let simulation = Simulation::build(config("abort"), inventory()).unwrap();
    let dto: ScenarioDto = serde_json::from_value(json!({
        "flows": {
            "instances": [
                {"step": "read_info", "cloud": "src", "kind": "compute"},
                {"step": "for_each", "resource": "instances", "body": [
                    {"step": "ensure_resource", "kind": "flavor", "pointer": "/flavor", "outputField": "flavor_id"}
                ]}
            ],
            "flavors": [
                {"step": "read_info", "cloud": "dst", "kind": "flavor", "output": "dst_flavors"},
                {"step": "copy_var", "src": "dst_flavors", "dst": "dst_flavors_before"}
            ]
        },
        "isolated": ["flavors"]
    }))
    .unwrap();
    let scenario = Scenario::try_from((dto, simulation.ferry.init().config.migrate.clone())).unwrap();

    let namespace = simulation.ferry.namespace().unwrap();
    let report = simulation.ferry.scheduler(namespace.clone(), Some(&scenario)).unwrap().start().await.unwrap();

    assert_eq!(report.flows.keys().map(FlowName::as_str).collect::<Vec<_>>(), vec!["flavors", "instances"]);
    assert!(!namespace.contains(&NsKey::new("dst_flavors")).unwrap());
    assert_eq!(namespace.get(&NsKey::new("info")).unwrap()["instances"]["vm1"]["flavor_id"], json!("f-small"));
}

#[test]
fn test_run_definition_loads_from_files() {
    let dir = std::env::temp_dir().join(format!("vm-ferry-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let config_path = dir.join("ferry.json");
    let inventory_path = dir.join("inventory.json");
    std::fs::write(&config_path, config_json("skip").to_string()).unwrap();
    std::fs::write(&inventory_path, serde_json::to_string(&inventory()).unwrap()).unwrap();

    let (config, scenario) = load_run(config_path.to_str().unwrap(), None).unwrap();
    assert!(scenario.is_none());
    assert_eq!(config.dst.temp, "/var/ferry");

    let simulation = build_simulation(config, inventory_path.to_str().unwrap()).unwrap();
    assert_eq!(simulation.src[&ResourceKind::Compute].len(), 2);
    assert!(simulation.dst[&ResourceKind::Image].is_empty());

    std::fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invalid_config_is_rejected() {
    let mut invalid = config_json("abort");
    invalid["src"]["host"] = json!("");
    let dto: FerryConfigDto = serde_json::from_value(invalid).unwrap();

    assert!(matches!(FerryConfig::try_from(dto), Err(Error::ConfigError(_))));
}
