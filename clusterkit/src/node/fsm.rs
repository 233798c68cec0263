//! Finite State Machine for node bootstrap

use crate::errors::{ClusterError, Result};
use crate::node::role::NodeRole;

/// Account a shell readiness check logs in as
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellUser {
    Root,
    /// The unprivileged `<prefix>user` account
    Cluster,
}

/// Bootstrap state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    /// Server exists at the provider
    Created,

    /// Server is attached to the cluster network
    NetworkAttached,

    /// Waiting for a shell to accept logins
    AwaitingShell(ShellUser),

    /// First stage scripts are on the node
    RootStageCopied,

    /// First stage script ran as root
    RootStageRun,

    /// Reboot was requested
    Rebooted,

    /// Second stage created the cluster account
    SecondStageRun,

    /// User stage scripts and TLS material are on the node
    UserStageCopied,

    /// User stage script ran
    UserStageRun,

    /// Node is ready for its role
    Bootstrapped,

    /// Runtime process for the role is up
    RoleStarted(NodeRole),

    /// A step failed; the node is unusable
    Failed,
}

/// Bootstrap event
#[derive(Debug, Clone)]
pub enum BootstrapEvent {
    AttachNetwork,
    AwaitShell(ShellUser),
    CopyRootStage,
    RunRootStage,
    Reboot,
    RunSecondStage,
    CopyUserStage,
    RunUserStage,
    Complete,
    StartRole(NodeRole),
    Fail(String),
}

/// Bootstrap FSM
#[derive(Debug, Clone)]
pub struct BootstrapFsm {
    state: BootstrapState,
    rebooted: bool,
    error: Option<String>,
}

impl BootstrapFsm {
    /// Create a new FSM for a freshly created server
    pub fn new() -> Self {
        Self {
            state: BootstrapState::Created,
            rebooted: false,
            error: None,
        }
    }

    /// FSM of a node found running in an existing cluster
    pub fn attached(role: NodeRole) -> Self {
        Self {
            state: BootstrapState::RoleStarted(role),
            rebooted: true,
            error: None,
        }
    }

    pub fn state(&self) -> BootstrapState {
        self.state
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn is_bootstrapped(&self) -> bool {
        matches!(
            self.state,
            BootstrapState::Bootstrapped | BootstrapState::RoleStarted(_)
        )
    }

    /// Process an event and transition state
    pub fn process(&mut self, event: BootstrapEvent) -> Result<BootstrapState> {
        use BootstrapEvent as E;
        use BootstrapState as S;
        use ShellUser::{Cluster, Root};

        let new_state = match (self.state, &event) {
            (S::Created, E::AttachNetwork) => S::NetworkAttached,

            (S::NetworkAttached, E::AwaitShell(Root)) => S::AwaitingShell(Root),
            (S::AwaitingShell(Root), E::CopyRootStage) if !self.rebooted => S::RootStageCopied,
            (S::RootStageCopied, E::RunRootStage) => S::RootStageRun,
            (S::RootStageRun, E::Reboot) => {
                self.rebooted = true;
                S::Rebooted
            }

            (S::Rebooted, E::AwaitShell(Root)) => S::AwaitingShell(Root),
            (S::AwaitingShell(Root), E::RunSecondStage) if self.rebooted => S::SecondStageRun,

            (S::SecondStageRun, E::AwaitShell(Cluster)) => S::AwaitingShell(Cluster),
            (S::AwaitingShell(Cluster), E::CopyUserStage) => S::UserStageCopied,
            (S::UserStageCopied, E::RunUserStage) => S::UserStageRun,
            (S::UserStageRun, E::Complete) => S::Bootstrapped,

            (S::Bootstrapped, E::StartRole(role)) => S::RoleStarted(*role),

            (S::Failed, event) => {
                return Err(ClusterError::invariant(format!(
                    "Invalid transition: Failed -> {:?}",
                    event
                )));
            }
            (_, E::Fail(err)) => {
                self.error = Some(err.clone());
                S::Failed
            }

            // Invalid transitions
            (state, event) => {
                return Err(ClusterError::invariant(format!(
                    "Invalid transition: {:?} -> {:?}",
                    state, event
                )));
            }
        };

        self.state = new_state;
        Ok(new_state)
    }
}

impl Default for BootstrapFsm {
    fn default() -> Self {
        Self::new()
    }
}
