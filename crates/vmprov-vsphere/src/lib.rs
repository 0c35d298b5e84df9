//! # vmprov – vSphere VM provisioning core
//!
//! Clones a VM from a template and customizes memory, disk and NIC through
//! the vCenter task model. The transport is abstracted behind
//! [`client::ControlPlane`]; an in-memory implementation lives in
//! [`simulator`].
//!
//! ## Modules
//!
//! - **types**: Inventory refs, task snapshots, devices, change specs, requests
//! - **error**: Crate-specific error types
//! - **client**: `ControlPlane` trait (the only I/O boundary)
//! - **inventory**: Name / path lookup with fallback-to-first
//! - **task**: Bounded, cancellable task polling with backoff
//! - **devices**: Pure device change planning (disk, NIC, memory)
//! - **provision**: Clone-and-customize workflow
//! - **simulator**: In-memory control plane for tests and dry runs

pub mod types;
pub mod error;
pub mod client;
pub mod inventory;
pub mod task;
pub mod devices;
pub mod provision;
pub mod simulator;
