//! Integration test suite for hotswap
//!
//! End-to-end tests of the engine's public API and the `hotswap` binary. Release
//! registry traffic goes to a local [`StaticServer`](hotswap_updater::test_utils::StaticServer)
//! or to a refused port on `127.0.0.1`; nothing reaches the network.
//!
//! # Running Integration Tests
//!
//! ```bash
//! cargo test --test integration
//! ```
//!
//! # Test Organization
//!
//! - **backup_restore**: snapshots, listing and restoring backups
//! - **cli**: the `hotswap` binary
//! - **merge**: merge rules and payload location against real trees
//! - **repair**: startup guard restoring missing files
//! - **update_flow**: complete update runs from release metadata to relaunch

mod common;

mod backup_restore;
mod cli;
mod merge;
mod repair;
mod update_flow;
