//! Node creation and bootstrap tests

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use clusterkit::cluster::config::ClusterConfig;
use clusterkit::cluster::ports::RuntimePorts;
use clusterkit::command::ScriptedRunner;
use clusterkit::errors::ClusterError;
use clusterkit::node::{role, BootstrapState, Node, NodeRole};
use clusterkit::provider::MockProvider;
use clusterkit::provision::Provisioner;
use hcloud_models::{CreateServerRequest, Labels};

use crate::support::{config, is_boot_id_query, program, remote_command, runner, Harness, PREFIX};

fn request(role: NodeRole) -> CreateServerRequest {
    CreateServerRequest {
        name: role::node_name(PREFIX, role),
        server_type: "cx11".to_string(),
        image: "ubuntu-20.04".to_string(),
        datacenter: "fsn1-dc14".to_string(),
        ssh_keys: vec![role::key_name(PREFIX)],
        firewalls: Vec::new(),
        labels: Labels::new(),
        start_after_create: true,
    }
}

async fn create_node(harness: &Harness, role: NodeRole) -> Node {
    let network = Provisioner::new(harness.ctx.clone())
        .create_network()
        .await
        .unwrap();
    Node::create(&harness.ctx, &request(role), network.id).await.unwrap()
}

fn pings(harness: &Harness) -> usize {
    harness
        .runner
        .executed_commands()
        .iter()
        .filter(|spec| remote_command(spec) == Some("exit"))
        .count()
}

#[tokio::test]
async fn test_create_attaches_role_address() {
    let provider = MockProvider::new().with_reads_until_running(4);
    let harness = Harness::new(config(1), provider, ScriptedRunner::new());

    let node = create_node(&harness, NodeRole::Worker(0)).await;
    assert_eq!(node.name(), "demo-node-worker000");
    assert_eq!(node.state(), BootstrapState::NetworkAttached);
    assert_eq!(node.private_ip().unwrap(), Ipv4Addr::new(10, 0, 1, 100));
    assert!(node.public_ip().is_ok());
    assert!(node.to_string().contains("private=10.0.1.100"));
}

#[tokio::test]
async fn test_bootstrap_waits_for_shell() {
    let failed_pings = Arc::new(AtomicUsize::new(0));
    let counter = failed_pings.clone();
    let script = runner(move |spec| {
        if remote_command(spec) == Some("exit") && counter.fetch_add(1, Ordering::SeqCst) < 2 {
            return Ok(ScriptedRunner::exit_with(spec, 255));
        }
        Ok(ScriptedRunner::succeed(spec))
    });
    let harness = Harness::new(config(1), MockProvider::new(), script);

    let mut node = create_node(&harness, NodeRole::Coordinator).await;
    node.bootstrap(&harness.ctx).await.unwrap();

    assert_eq!(node.state(), BootstrapState::Bootstrapped);
    // two refused logins as root, then one accepted login per account;
    // after the reboot a changed boot id stands in for the root login
    assert_eq!(pings(&harness), 4);
    assert_eq!(harness.remote_commands("boot_id").len(), 2);
    assert_eq!(harness.provider.rebooted(), vec!["demo-node-scheduler".to_string()]);

    let stages: Vec<String> = harness
        .runner
        .executed_commands()
        .iter()
        .filter_map(|spec| remote_command(spec).map(str::to_string))
        .filter(|command| command.starts_with("bash"))
        .collect();
    assert_eq!(
        stages,
        vec!["bash bootstrap_01.sh", "bash bootstrap_02.sh demo", "bash bootstrap_03.sh demo"]
    );

    let copies: Vec<String> = harness
        .runner
        .executed_commands()
        .iter()
        .filter(|spec| program(spec) == "scp")
        .map(|spec| spec.render())
        .collect();
    assert_eq!(copies.len(), 2);
    assert!(copies[0].contains("sshd_config.patch"));
    assert!(copies[0].contains("root@"));
    assert!(copies[1].contains("demo_ca.crt"));
    assert!(copies[1].contains("demo_node.key"));
    assert!(copies[1].contains("demouser@"));
}

/// The old sshd keeps answering with the previous boot id `stale_reads`
/// times after the reboot was requested
fn rebooting_runner(
    provider: Arc<MockProvider>,
    stale_reads: usize,
    new_boot_seen: Arc<AtomicBool>,
) -> ScriptedRunner {
    let reads_after_reboot = AtomicUsize::new(0);
    ScriptedRunner::with_script(move |spec| {
        if is_boot_id_query(spec) {
            let rebooted = !provider.rebooted().is_empty();
            if rebooted && reads_after_reboot.fetch_add(1, Ordering::SeqCst) >= stale_reads {
                new_boot_seen.store(true, Ordering::SeqCst);
                return Ok(ScriptedRunner::print(spec, "boot-b\n"));
            }
            return Ok(ScriptedRunner::print(spec, "boot-a\n"));
        }
        let command = remote_command(spec).unwrap_or_default();
        if command.contains("bootstrap_02.sh") && !new_boot_seen.load(Ordering::SeqCst) {
            return Ok(ScriptedRunner::exit_with(spec, 255));
        }
        Ok(ScriptedRunner::succeed(spec))
    })
}

#[tokio::test]
async fn test_bootstrap_waits_for_reboot() {
    let provider = Arc::new(MockProvider::new());
    let new_boot_seen = Arc::new(AtomicBool::new(false));
    let script = rebooting_runner(provider.clone(), 3, new_boot_seen.clone());
    let harness = Harness::shared(config(1), provider, script);

    let mut node = create_node(&harness, NodeRole::Coordinator).await;
    node.bootstrap(&harness.ctx).await.unwrap();

    assert_eq!(node.state(), BootstrapState::Bootstrapped);
    assert!(new_boot_seen.load(Ordering::SeqCst));
    // one read before the reboot, three stale reads, then the new boot
    assert_eq!(harness.remote_commands("boot_id").len(), 5);
    assert_eq!(harness.remote_commands("bootstrap_02.sh").len(), 1);
}

#[tokio::test]
async fn test_unchanged_boot_id_times_out() {
    let provider = Arc::new(MockProvider::new());
    let script = rebooting_runner(provider.clone(), usize::MAX, Arc::new(AtomicBool::new(false)));
    let harness = Harness::shared(
        ClusterConfig {
            shell_deadline_secs: 1,
            ..config(1)
        },
        provider,
        script,
    );

    let mut node = create_node(&harness, NodeRole::Coordinator).await;
    let err = node.bootstrap(&harness.ctx).await.unwrap_err();

    assert!(matches!(err, ClusterError::Timeout(_)));
    assert_eq!(node.state(), BootstrapState::Failed);
    assert!(harness.remote_commands("bootstrap_02.sh").is_empty());
}

#[tokio::test]
async fn test_failing_stage_fails_node() {
    let script = runner(|spec| match remote_command(spec) {
        Some(command) if command.contains("bootstrap_03.sh") => Ok(ScriptedRunner::exit_with(spec, 1)),
        _ => Ok(ScriptedRunner::succeed(spec)),
    });
    let harness = Harness::new(config(1), MockProvider::new(), script);

    let mut node = create_node(&harness, NodeRole::Worker(2)).await;
    let err = node.bootstrap(&harness.ctx).await.unwrap_err();
    assert!(matches!(err, ClusterError::CommandFailed(_)));
    assert_eq!(node.state(), BootstrapState::Failed);
    assert!(harness.remote_commands("bootstrap_worker.sh").is_empty());
}

#[tokio::test]
async fn test_start_role() {
    let harness = Harness::succeeding(config(1));
    let ports = RuntimePorts::default();

    let mut coordinator = create_node(&harness, NodeRole::Coordinator).await;
    let err = coordinator.start_role(&harness.ctx, ports, None).await.unwrap_err();
    assert!(matches!(err, ClusterError::InvariantViolation(_)));

    let mut coordinator = create_node(&harness, NodeRole::Coordinator).await;
    coordinator.bootstrap(&harness.ctx).await.unwrap();
    coordinator.start_role(&harness.ctx, ports, None).await.unwrap();
    assert_eq!(coordinator.state(), BootstrapState::RoleStarted(NodeRole::Coordinator));
    assert_eq!(
        harness.remote_commands("bootstrap_scheduler.sh"),
        vec!["bash -i bootstrap_scheduler.sh 9753 9756"]
    );

    let mut worker = create_node(&harness, NodeRole::Worker(0)).await;
    worker.bootstrap(&harness.ctx).await.unwrap();
    let err = worker.start_role(&harness.ctx, ports, None).await.unwrap_err();
    assert!(matches!(err, ClusterError::InvariantViolation(_)));
    assert_eq!(worker.state(), BootstrapState::Failed);
}

#[tokio::test]
async fn test_worker_start_command() {
    let harness = Harness::succeeding(config(1));
    let ports = RuntimePorts::new(10000, 10001, 10002).unwrap();

    let mut worker = create_node(&harness, NodeRole::Worker(1)).await;
    worker.bootstrap(&harness.ctx).await.unwrap();
    worker
        .start_role(&harness.ctx, ports, Some(Ipv4Addr::new(10, 0, 1, 200)))
        .await
        .unwrap();
    assert_eq!(
        harness.remote_commands("bootstrap_worker.sh"),
        vec!["bash -i bootstrap_worker.sh 10.0.1.200 10000 10001 10002"]
    );
}
