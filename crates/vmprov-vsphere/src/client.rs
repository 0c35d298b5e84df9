//! Control-plane client abstraction.
//!
//! The provisioning core never talks to vCenter directly. Session setup,
//! TLS policy and transport retries belong to whoever implements
//! [`ControlPlane`]; the core only submits tasks, polls them and runs
//! read-only inventory queries through it.

use crate::error::VsphereResult;
use crate::types::*;

/// Narrow vCenter API surface used by the provisioning core.
///
/// Implementations must be `Send + Sync` so one session can be shared by
/// several concurrent provisioning requests.
#[async_trait::async_trait]
pub trait ControlPlane: Send + Sync {
    /// Submit `CloneVM_Task` for `spec.template`.
    async fn submit_clone(&self, spec: &CloneSpec) -> VsphereResult<TaskHandle>;

    /// Submit `ReconfigVM_Task` on `vm`.
    async fn submit_reconfigure(
        &self,
        vm: &InventoryRef,
        patch: &ConfigPatch,
    ) -> VsphereResult<TaskHandle>;

    /// Current `config.hardware.device` list of `vm`.
    async fn list_devices(&self, vm: &InventoryRef) -> VsphereResult<Vec<VirtualDevice>>;

    /// All objects of `kind` below `scope` (whole inventory when `None`),
    /// in the server's enumeration order. Any container view opened for
    /// the query must be destroyed before returning.
    async fn enumerate(
        &self,
        kind: InventoryKind,
        scope: Option<&InventoryRef>,
    ) -> VsphereResult<Vec<InventoryRef>>;

    /// `SearchIndex.FindByInventoryPath`. An empty list means not found.
    async fn resolve_path(&self, path: &str) -> VsphereResult<Vec<InventoryRef>>;

    /// Read the task's current `info`.
    async fn poll_task(&self, handle: &TaskHandle) -> VsphereResult<TaskInfo>;
}
