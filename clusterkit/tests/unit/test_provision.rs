//! Provisioning tests: identity, prerequisites and concurrent node creation

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::Arc;

use clusterkit::cluster::Cluster;
use clusterkit::command::ScriptedRunner;
use clusterkit::errors::ClusterError;
use clusterkit::provider::MockProvider;

use crate::support::{config, remote_command, runner, Harness};

#[tokio::test]
async fn test_create_cluster() {
    let harness = Harness::succeeding(config(5));
    let cluster = Cluster::create(harness.ctx.clone()).await.unwrap();

    assert!(cluster.alive());
    assert_eq!(cluster.workers().len(), 5);
    let coordinator = cluster.coordinator().unwrap();
    assert_eq!(coordinator.name(), "demo-node-scheduler");
    assert_eq!(coordinator.private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 200));

    let nodes = cluster.nodes_by_suffix();
    let names: HashSet<&str> = nodes.values().map(|node| node.name()).collect();
    assert_eq!(names.len(), 6);
    let private: HashSet<Ipv4Addr> = nodes.values().map(|node| node.private_ip().unwrap()).collect();
    assert_eq!(private.len(), 6);
    for (index, worker) in cluster.workers().iter().enumerate() {
        assert_eq!(worker.name(), format!("demo-node-worker{index:03}"));
        assert_eq!(worker.private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 100 + index as u8));
        assert_eq!(worker.labels().get("role").map(String::as_str), Some("worker"));
    }

    let labels = coordinator.labels();
    assert_eq!(labels.get("cluster").map(String::as_str), Some("demo"));
    assert_eq!(labels.get("role").map(String::as_str), Some("coordinator"));
    assert_eq!(labels.get("dask_ipc").map(String::as_str), Some("9753"));
    assert_eq!(labels.get("dask_dash").map(String::as_str), Some("9756"));
    assert_eq!(labels.get("dask_nanny").map(String::as_str), Some("9759"));

    let network = cluster.network().unwrap();
    assert_eq!(network.name, "demo-network");
    assert_eq!(network.ip_range, "10.0.1.0/24");
    let firewall = cluster.firewall().unwrap();
    assert_eq!(firewall.name, "demo-firewall");
    assert_eq!(firewall.rules.len(), 5);
    assert_eq!(harness.provider.ssh_keys()[0].name, "demo-key");
    assert_eq!(harness.provider.rebooted().len(), 6);

    for file in harness.ctx.layout.all_files() {
        assert!(file.path().exists(), "{} missing", file.path().display());
    }
}

#[tokio::test]
async fn test_coordinator_starts_before_workers() {
    let harness = Harness::succeeding(config(3));
    Cluster::create(harness.ctx.clone()).await.unwrap();

    let starts: Vec<String> = harness
        .runner
        .executed_commands()
        .iter()
        .filter_map(|spec| remote_command(spec).map(str::to_string))
        .filter(|command| command.starts_with("bash -i"))
        .collect();
    assert_eq!(starts.len(), 4);
    assert!(starts[0].contains("bootstrap_scheduler.sh"));
    for start in &starts[1..] {
        assert_eq!(start, "bash -i bootstrap_worker.sh 10.0.1.200 9753 9756 9759");
    }
}

#[tokio::test]
async fn test_worker_failure_does_not_cancel_siblings() {
    let provider = Arc::new(MockProvider::new());
    let inspect = provider.clone();
    let script = runner(move |spec| {
        let failing_host = inspect
            .servers()
            .into_iter()
            .find(|server| server.name == "demo-node-worker002")
            .and_then(|server| server.public_ipv4().map(str::to_string));
        let hits_failing_host = failing_host
            .is_some_and(|ip| spec.stages()[0].iter().any(|arg| arg.ends_with(&format!("@{ip}"))));
        match remote_command(spec) {
            Some(command) if hits_failing_host && command.contains("bootstrap_03.sh") => {
                Ok(ScriptedRunner::exit_with(spec, 1))
            }
            _ => Ok(ScriptedRunner::succeed(spec)),
        }
    });
    let harness = Harness::shared(config(5), provider, script);

    let err = Cluster::create(harness.ctx.clone()).await.unwrap_err();
    assert!(matches!(err, ClusterError::Incomplete { .. }));
    assert!(matches!(err.cause(), ClusterError::CommandFailed(_)));

    assert_eq!(harness.remote_commands("bootstrap_scheduler.sh").len(), 1);
    assert_eq!(harness.remote_commands("bootstrap_worker.sh").len(), 4);
}

#[tokio::test]
async fn test_coordinator_failure_releases_workers() {
    let provider = MockProvider::new();
    provider.fail_server("demo-node-scheduler");
    let harness = Harness::new(config(2), provider, runner(|spec| Ok(ScriptedRunner::succeed(spec))));

    let err = Cluster::create(harness.ctx.clone()).await.unwrap_err();
    assert!(matches!(err.cause(), ClusterError::ProviderError { status: 422, .. }));
    assert!(harness.remote_commands("bootstrap_worker.sh").is_empty());
    // workers still bootstrapped before giving up
    assert_eq!(harness.remote_commands("bootstrap_03.sh").len(), 2);
}

#[tokio::test]
async fn test_existing_credentials_abort_before_any_resource() {
    let harness = Harness::succeeding(config(1));
    std::fs::write(harness.dir.path().join("demo.key"), "stale").unwrap();

    let err = Cluster::create(harness.ctx.clone()).await.unwrap_err();
    assert!(matches!(err, ClusterError::InvariantViolation(_)));
    assert!(harness.provider.servers().is_empty());
    assert!(harness.provider.networks().is_empty());
    assert!(harness.provider.firewalls().is_empty());
    assert!(harness.provider.ssh_keys().is_empty());
    assert!(harness.runner.executed_commands().is_empty());
}

#[tokio::test]
async fn test_invalid_config_rejected() {
    let mut config = config(1);
    config.ports.dash = config.ports.ipc;
    let harness = Harness::succeeding(config);

    assert!(Cluster::create(harness.ctx.clone()).await.is_err());
    assert!(harness.provider.networks().is_empty());
}
