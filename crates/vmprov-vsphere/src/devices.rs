//! Device change planning.
//!
//! Pure functions that turn a VM's current device list into the
//! `deviceChange` entries of a reconfigure request. Nothing here talks to
//! vCenter; callers fetch the device snapshot first and submit the
//! resulting [`ConfigPatch`] themselves.

use crate::error::{VsphereError, VsphereResult};
use crate::types::*;

/// Unit number the SCSI controller itself occupies on its bus.
pub const SCSI_CONTROLLER_RESERVED_UNIT: u32 = 7;

/// Devices per SCSI controller (unit numbers 0..=15).
pub const MAX_UNITS_PER_CONTROLLER: u32 = 16;

/// Key for devices that do not exist yet; vCenter assigns the real one.
pub const NEW_DEVICE_KEY: i32 = -1;

/// Label prefix vCenter gives virtual NICs ("Network adapter 1", ...).
pub const NIC_LABEL_PREFIX: &str = "Network adapter ";

/// Disk capacities are sent in KB.
pub const KB_PER_GB: u64 = 1024 * 1024;

const PERSISTENT_DISK_MODE: &str = "persistent";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Disks
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Next free unit number above every file-backed device, skipping the
/// controller's reserved slot.
pub fn next_disk_unit_number(devices: &[VirtualDevice]) -> VsphereResult<u32> {
    let mut unit = devices
        .iter()
        .filter(|d| d.backing_file().is_some())
        .filter_map(|d| d.unit_number)
        .max()
        .map_or(0, |max| max + 1);

    if unit == SCSI_CONTROLLER_RESERVED_UNIT {
        unit += 1;
    }
    if unit >= MAX_UNITS_PER_CONTROLLER {
        return Err(VsphereError::capacity_exceeded(format!(
            "No free unit number on the SCSI controller (next would be {unit}, limit {MAX_UNITS_PER_CONTROLLER})"
        )));
    }
    Ok(unit)
}

/// Plan a new flat VMDK of `size_gb` on the VM's first SCSI controller.
pub fn plan_disk_add(
    devices: &[VirtualDevice],
    size_gb: u64,
    mode: DiskProvisioning,
) -> VsphereResult<DeviceChangeSpec> {
    if size_gb == 0 {
        return Err(VsphereError::invalid_spec("Disk size must be at least 1 GB"));
    }
    let capacity_kb = size_gb
        .checked_mul(KB_PER_GB)
        .ok_or_else(|| VsphereError::invalid_spec(format!("Disk size of {size_gb} GB is too large")))?;

    let controller = devices
        .iter()
        .find(|d| d.is_scsi_controller())
        .ok_or_else(|| VsphereError::device_not_found("VM has no SCSI controller to attach a disk to"))?;
    let unit_number = next_disk_unit_number(devices)?;

    Ok(DeviceChangeSpec {
        operation: DeviceOperation::Add,
        file_operation: Some(FileOperation::Create),
        device: VirtualDevice {
            key: NEW_DEVICE_KEY,
            label: String::new(),
            summary: String::new(),
            unit_number: Some(unit_number),
            controller_key: Some(controller.key),
            connectable: None,
            kind: DeviceKind::Disk {
                backing: DiskBacking {
                    file_name: String::new(),
                    disk_mode: PERSISTENT_DISK_MODE.to_string(),
                    thin_provisioned: mode == DiskProvisioning::Thin,
                },
                capacity_kb,
            },
        },
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  NICs
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Plan a new virtual NIC on `network` with a fixed MAC address.
///
/// The MAC is written exactly as given; its format is not checked.
pub fn plan_nic_add(
    network: &InventoryRef,
    mac_address: &str,
    adapter: NicAdapterType,
) -> DeviceChangeSpec {
    DeviceChangeSpec {
        operation: DeviceOperation::Add,
        file_operation: None,
        device: VirtualDevice {
            key: NEW_DEVICE_KEY,
            label: String::new(),
            summary: network.name.clone(),
            unit_number: None,
            controller_key: None,
            connectable: Some(ConnectInfo {
                start_connected: true,
                allow_guest_control: true,
                connected: false,
                status: "untried".to_string(),
            }),
            kind: DeviceKind::Ethernet {
                adapter,
                mac_address: Some(mac_address.to_string()),
                address_type: MacAddressType::Assigned,
                backing: NetworkBacking {
                    network: Some(network.clone()),
                    device_name: network.name.clone(),
                    use_auto_detect: false,
                },
                wake_on_lan_enabled: true,
            },
        },
    }
}

/// Find "Network adapter `nic_number`".
pub fn find_nic(devices: &[VirtualDevice], nic_number: u32) -> VsphereResult<&VirtualDevice> {
    let label = format!("{NIC_LABEL_PREFIX}{nic_number}");
    devices
        .iter()
        .find(|d| d.is_ethernet() && d.label == label)
        .ok_or_else(|| VsphereError::device_not_found(format!("Virtual {label} could not be found")))
}

/// Plan a connect / disconnect edit or a removal of an existing NIC.
///
/// Edits keep the device's key, MAC, backing and wake-on-LAN setting and
/// only replace its connect info.
pub fn plan_nic_edit(
    devices: &[VirtualDevice],
    nic_number: u32,
    new_state: NicState,
) -> VsphereResult<DeviceChangeSpec> {
    let nic = find_nic(devices, nic_number)?;
    let mut device = nic.clone();

    let operation = match new_state {
        NicState::Delete => DeviceOperation::Remove,
        NicState::Connect | NicState::Disconnect => {
            let on = new_state == NicState::Connect;
            let status = nic
                .connectable
                .as_ref()
                .map(|c| c.status.clone())
                .unwrap_or_else(|| "untried".to_string());
            let allow_guest_control = nic
                .connectable
                .as_ref()
                .map(|c| c.allow_guest_control)
                .unwrap_or(true);
            device.connectable = Some(ConnectInfo {
                start_connected: on,
                allow_guest_control,
                connected: on,
                status,
            });
            DeviceOperation::Edit
        }
    };

    Ok(DeviceChangeSpec { operation, file_operation: None, device })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  Memory
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub fn plan_memory_resize(size_mb: u64) -> ConfigPatch {
    ConfigPatch { memory_mb: Some(size_mb), device_change: Vec::new() }
}
