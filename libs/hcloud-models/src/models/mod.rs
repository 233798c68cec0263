//! API models

mod catalog;
mod common;
mod firewalls;
mod networks;
mod servers;
mod ssh_keys;

pub use catalog::*;
pub use common::*;
pub use firewalls::*;
pub use networks::*;
pub use servers::*;
pub use ssh_keys::*;
