//! # vmprov
//!
//! Application shell around [`vmprov_vsphere`]: loads an [`AppConfig`],
//! installs logging and runs one clone-and-customize request against a
//! caller-supplied control plane.

pub mod config;
pub mod logging;

pub use config::{AppConfig, ConfigError, VsphereConfig};
pub use vmprov_vsphere as vsphere;

use tokio_util::sync::CancellationToken;
use vmprov_vsphere::client::ControlPlane;
use vmprov_vsphere::provision::Provisioner;

/// Exit code for a completed request.
pub const EXIT_OK: i32 = 0;
/// Exit code for any failure.
pub const EXIT_FAILURE: i32 = -1;

/// Provision `config.request` through `client`.
///
/// Returns [`EXIT_OK`] or [`EXIT_FAILURE`]; details go to the log.
pub async fn run(config: &AppConfig, client: &dyn ControlPlane, cancel: &CancellationToken) -> i32 {
    log::info!(
        "Provisioning '{}' on {}:{} as {}",
        config.request.vm_name,
        config.connection.host,
        config.connection.port,
        config.connection.username
    );

    let provisioner = Provisioner::new(client, config.polling.clone());
    match provisioner.provision(&config.request, cancel).await {
        Ok(report) => {
            let elapsed = report.finished_at - report.started_at;
            log::info!(
                "Provisioned '{}' ({}) with {} task(s) in {}s",
                report.vm.name,
                report.vm.id,
                report.task_ids.len(),
                elapsed.num_seconds()
            );
            EXIT_OK
        }
        Err(failure) => {
            if let Some(vm) = &failure.vm {
                log::warn!("VM '{}' ({}) was left in place", vm.name, vm.id);
            }
            log::error!("{failure}");
            EXIT_FAILURE
        }
    }
}
