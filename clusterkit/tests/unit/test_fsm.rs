//! Bootstrap FSM tests

use clusterkit::node::{BootstrapEvent, BootstrapFsm, BootstrapState, NodeRole, ShellUser};

#[test]
fn test_fsm_initial_state() {
    let fsm = BootstrapFsm::new();
    assert_eq!(fsm.state(), BootstrapState::Created);
    assert!(fsm.error().is_none());
    assert!(!fsm.is_bootstrapped());
}

#[test]
fn test_fsm_root_stage_flow() {
    let mut fsm = BootstrapFsm::new();

    // Created -> NetworkAttached -> AwaitingShell(root)
    fsm.process(BootstrapEvent::AttachNetwork).unwrap();
    fsm.process(BootstrapEvent::AwaitShell(ShellUser::Root)).unwrap();
    assert_eq!(fsm.state(), BootstrapState::AwaitingShell(ShellUser::Root));

    // AwaitingShell(root) -> RootStageCopied -> RootStageRun -> Rebooted
    fsm.process(BootstrapEvent::CopyRootStage).unwrap();
    fsm.process(BootstrapEvent::RunRootStage).unwrap();
    fsm.process(BootstrapEvent::Reboot).unwrap();
    assert_eq!(fsm.state(), BootstrapState::Rebooted);

    // the root stage is not copied twice
    fsm.process(BootstrapEvent::AwaitShell(ShellUser::Root)).unwrap();
    assert!(fsm.process(BootstrapEvent::CopyRootStage).is_err());
    fsm.process(BootstrapEvent::RunSecondStage).unwrap();
    assert_eq!(fsm.state(), BootstrapState::SecondStageRun);
}

#[test]
fn test_fsm_user_stage_requires_user_shell() {
    let mut fsm = BootstrapFsm::new();
    for event in [
        BootstrapEvent::AttachNetwork,
        BootstrapEvent::AwaitShell(ShellUser::Root),
        BootstrapEvent::CopyRootStage,
        BootstrapEvent::RunRootStage,
        BootstrapEvent::Reboot,
        BootstrapEvent::AwaitShell(ShellUser::Root),
        BootstrapEvent::RunSecondStage,
    ] {
        fsm.process(event).unwrap();
    }

    assert!(fsm.process(BootstrapEvent::CopyUserStage).is_err());
    assert!(fsm.process(BootstrapEvent::AwaitShell(ShellUser::Root)).is_err());
    fsm.process(BootstrapEvent::AwaitShell(ShellUser::Cluster)).unwrap();
    fsm.process(BootstrapEvent::CopyUserStage).unwrap();
    fsm.process(BootstrapEvent::RunUserStage).unwrap();
    fsm.process(BootstrapEvent::Complete).unwrap();
    assert!(fsm.is_bootstrapped());

    fsm.process(BootstrapEvent::StartRole(NodeRole::Coordinator)).unwrap();
    assert_eq!(fsm.state(), BootstrapState::RoleStarted(NodeRole::Coordinator));
    assert!(fsm.process(BootstrapEvent::StartRole(NodeRole::Coordinator)).is_err());
}

#[test]
fn test_fsm_failure_records_error() {
    let mut fsm = BootstrapFsm::new();
    fsm.process(BootstrapEvent::Fail("server never ran".to_string())).unwrap();
    assert_eq!(fsm.state(), BootstrapState::Failed);
    assert_eq!(fsm.error(), Some("server never ran"));

    let err = fsm.process(BootstrapEvent::AttachNetwork).unwrap_err();
    assert!(err.to_string().contains("Invalid transition"));
}
