//! Integration tests, compiled as a single target

mod support;

mod test_cluster;
mod test_command;
mod test_fsm;
mod test_node;
mod test_provision;
