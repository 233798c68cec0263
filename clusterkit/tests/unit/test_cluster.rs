//! Cluster lifecycle tests: attach, destroy and nuke

use clusterkit::cluster::ports::RuntimePorts;
use clusterkit::cluster::Cluster;
use clusterkit::errors::{ClusterError, ResourceKind};
use clusterkit::provider::CloudProvider;
use hcloud_models::{Firewall, Labels, Network, PublicNet, Server, ServerStatus};

use crate::support::{config, Harness};

fn labels(pairs: &[(&str, &str)]) -> Labels {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn server(id: u64, name: &str, labels: Labels) -> Server {
    Server {
        id,
        name: name.to_string(),
        status: ServerStatus::Running,
        public_net: PublicNet::default(),
        private_net: Vec::new(),
        labels,
        server_type: None,
        created: None,
    }
}

async fn created(workers: usize) -> (Harness, Cluster) {
    let harness = Harness::succeeding(config(workers));
    let cluster = Cluster::create(harness.ctx.clone()).await.unwrap();
    (harness, cluster)
}

#[tokio::test]
async fn test_attach_to_created_cluster() {
    let mut settings = config(3);
    settings.ports = RuntimePorts::new(10000, 10001, 10002).unwrap();
    let harness = Harness::succeeding(settings);
    Cluster::create(harness.ctx.clone()).await.unwrap();

    // ports come from the coordinator, not from the local settings
    let mut ctx = harness.ctx.clone();
    ctx.config.ports = RuntimePorts::default();
    let cluster = Cluster::attach(ctx).await.unwrap();

    assert!(cluster.alive());
    assert_eq!(cluster.ports(), RuntimePorts::new(10000, 10001, 10002).unwrap());
    let names: Vec<&str> = cluster.workers().iter().map(|node| node.name()).collect();
    assert_eq!(
        names,
        vec!["demo-node-worker000", "demo-node-worker001", "demo-node-worker002"]
    );
    assert_eq!(
        cluster.nodes_by_suffix().keys().cloned().collect::<Vec<_>>(),
        vec!["scheduler", "worker000", "worker001", "worker002"]
    );
    assert_eq!(
        cluster.to_string(),
        "<Cluster prefix=\"demo\" alive=true workers=3 ipc=10000 dash=10001 nanny=10002>"
    );
}

#[tokio::test]
async fn test_attach_without_cluster() {
    let harness = Harness::succeeding(config(1));
    match Cluster::attach(harness.ctx.clone()).await {
        Err(ClusterError::ResourceNotFound { kind, name }) => {
            assert_eq!(kind, ResourceKind::Server);
            assert_eq!(name, "demo-node-scheduler");
        }
        other => panic!("expected ResourceNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn test_attach_with_missing_components() {
    let (harness, cluster) = created(1).await;
    let network = cluster.network().unwrap().id;
    harness
        .provider
        .delete_resource(ResourceKind::Network, network)
        .await
        .unwrap();
    match Cluster::attach(harness.ctx.clone()).await {
        Err(ClusterError::ResourceNotFound { kind, .. }) => assert_eq!(kind, ResourceKind::Network),
        other => panic!("expected missing network, got {other:?}"),
    }

    let firewall = cluster.firewall().unwrap().id;
    harness
        .provider
        .delete_resource(ResourceKind::Firewall, firewall)
        .await
        .unwrap();
    match Cluster::attach(harness.ctx.clone()).await {
        Err(ClusterError::ResourceNotFound { kind, .. }) => assert_eq!(kind, ResourceKind::Firewall),
        other => panic!("expected missing firewall, got {other:?}"),
    }

    let worker = cluster.workers()[0].server().id;
    harness
        .provider
        .delete_resource(ResourceKind::Server, worker)
        .await
        .unwrap();
    let err = Cluster::attach(harness.ctx.clone()).await.unwrap_err();
    assert!(matches!(err, ClusterError::ResourceNotFound { kind: ResourceKind::Server, .. }));
}

#[tokio::test]
async fn test_attach_rejects_bad_port_labels() {
    let harness = Harness::succeeding(config(1));
    harness.provider.insert_server(server(
        1,
        "demo-node-scheduler",
        labels(&[("cluster", "demo"), ("dask_ipc", "http"), ("dask_dash", "9756"), ("dask_nanny", "9759")]),
    ));
    let err = Cluster::attach(harness.ctx.clone()).await.unwrap_err();
    assert!(matches!(err, ClusterError::InvariantViolation(_)));
}

#[tokio::test]
async fn test_destroy() {
    let (harness, mut cluster) = created(2).await;

    let report = cluster.destroy().await.unwrap();
    assert!(!cluster.alive());
    assert!(cluster.workers().is_empty());
    assert!(cluster.network().is_none());

    let deleted = harness.provider.deleted();
    assert_eq!(deleted.len(), 6);
    assert!(deleted[..3].iter().all(|(kind, _)| *kind == ResourceKind::Server));
    assert_eq!(deleted[3], (ResourceKind::Network, "demo-network".to_string()));
    assert_eq!(deleted[4], (ResourceKind::SshKey, "demo-key".to_string()));
    assert_eq!(deleted[5], (ResourceKind::Firewall, "demo-firewall".to_string()));
    assert_eq!(report.deleted, deleted);
    assert_eq!(report.removed_files.len(), 6);
    for file in harness.ctx.layout.all_files() {
        assert!(!file.path().exists());
    }

    let err = cluster.destroy().await.unwrap_err();
    assert!(matches!(err, ClusterError::InvariantViolation(_)));
    assert_eq!(harness.provider.deleted().len(), 6);
    assert!(cluster.client_descriptor().is_err());
}

#[tokio::test]
async fn test_nuke_only_touches_own_resources() {
    let (harness, _cluster) = created(1).await;
    let provider = &harness.provider;
    provider.insert_server(server(900, "other-node-scheduler", labels(&[("cluster", "other")])));
    provider.insert_server(server(901, "demo-stray", Labels::new()));
    provider.insert_server(server(902, "demo-labeled", labels(&[("cluster", "other")])));
    provider.insert_firewall(Firewall {
        id: 903,
        name: "legacy-firewall".to_string(),
        rules: Vec::new(),
        labels: labels(&[("cluster", "demo")]),
    });
    provider.insert_network(Network {
        id: 904,
        name: "demonet".to_string(),
        ip_range: "10.0.2.0/24".to_string(),
        subnets: Vec::new(),
        servers: Vec::new(),
        labels: Labels::new(),
    });

    let report = Cluster::nuke(&harness.ctx).await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.deleted.len(), 6);
    assert!(report.deleted.contains(&(ResourceKind::Server, "demo-stray".to_string())));
    assert_eq!(
        report.skipped,
        vec![(ResourceKind::Firewall, "legacy-firewall".to_string())]
    );

    let remaining: Vec<String> = provider.servers().into_iter().map(|server| server.name).collect();
    assert_eq!(remaining, vec!["other-node-scheduler", "demo-labeled"]);
    assert_eq!(provider.networks().len(), 1);
    assert_eq!(provider.firewalls().len(), 1);
    assert!(provider.ssh_keys().is_empty());

    // nothing left: a second nuke is a clean no-op
    let again = Cluster::nuke(&harness.ctx).await.unwrap();
    assert!(again.deleted.is_empty());
    assert!(again.removed_files.is_empty());
}

#[tokio::test]
async fn test_client_descriptor() {
    let (_harness, cluster) = created(1).await;
    let coordinator_ip = cluster.coordinator().unwrap().public_ip().unwrap();
    let descriptor = cluster.client_descriptor().unwrap();
    assert_eq!(descriptor.address, format!("tls://{coordinator_ip}:9753"));
    assert_eq!(descriptor.dashboard, format!("http://{coordinator_ip}:9756/status"));
    assert!(descriptor.ca_cert.ends_with("demo_ca.crt"));
    assert!(descriptor.client_cert.ends_with("demo_node.crt"));
    assert!(descriptor.client_key.ends_with("demo_node.key"));
    assert!(descriptor.to_string().contains("tls://"));
}
