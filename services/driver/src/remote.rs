//! Method paths and records of the remote management API.
//!
//! Only the subset the driver consumes is described here. Method paths are
//! dispatched verbatim by the transport.

use serde::{Deserialize, Serialize};

pub const LOGIN: &str = "SessionManager.Login";
pub const LOGOUT: &str = "SessionManager.Logout";
pub const TERMINATE_SESSION: &str = "SessionManager.TerminateSession";

pub const GET_DYNAMIC_PROPERTY: &str = "PropertyCollector.get_dynamic_property";
pub const LIST_VMS: &str = "PropertyCollector.list_vms";
pub const FIND_VM: &str = "SearchIndex.FindByName";

pub const CREATE_VM_TASK: &str = "Folder.CreateVM_Task";
pub const POWER_ON_VM_TASK: &str = "VirtualMachine.PowerOnVM_Task";
pub const POWER_OFF_VM_TASK: &str = "VirtualMachine.PowerOffVM_Task";
pub const RESET_VM_TASK: &str = "VirtualMachine.ResetVM_Task";
pub const REBOOT_GUEST: &str = "VirtualMachine.RebootGuest";
pub const SUSPEND_VM_TASK: &str = "VirtualMachine.SuspendVM_Task";
pub const PAUSE_VM_TASK: &str = "VirtualMachine.PauseVM_Task";
pub const UNPAUSE_VM_TASK: &str = "VirtualMachine.UnpauseVM_Task";
pub const UNREGISTER_VM: &str = "VirtualMachine.UnregisterVM";
pub const CREATE_SNAPSHOT_TASK: &str = "VirtualMachine.CreateSnapshot_Task";
pub const RECONFIG_VM_TASK: &str = "VirtualMachine.ReconfigVM_Task";
pub const QUERY_CONSOLE_LOG: &str = "VirtualMachine.QueryConsoleLog";
pub const DELETE_DATASTORE_FILE_TASK: &str = "FileManager.DeleteDatastoreFile_Task";
pub const ADD_PORT_GROUP: &str = "HostNetworkSystem.AddPortGroup";

/// Host properties describing virtual networking.
pub const PROP_VSWITCHES: &str = "config.network.vswitch";
pub const PROP_PORT_GROUPS: &str = "config.network.portgroup";

/// Fault the host raises when a port group of that name already exists.
pub const FAULT_ALREADY_EXISTS: &str = "AlreadyExists";

/// Managed object type names used with `get_dynamic_property`.
pub const TYPE_TASK: &str = "Task";
pub const TYPE_VIRTUAL_MACHINE: &str = "VirtualMachine";
pub const TYPE_HOST_SYSTEM: &str = "HostSystem";

/// Reference to the single host system behind the endpoint.
pub const HOST_SYSTEM_REF: &str = "ha-host";

/// VM power state as reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PowerState {
    PoweredOn,
    PoweredOff,
    Suspended,
    Paused,
}

impl PowerState {
    pub fn as_str(self) -> &'static str {
        match self {
            PowerState::PoweredOn => "poweredOn",
            PowerState::PoweredOff => "poweredOff",
            PowerState::Suspended => "suspended",
            PowerState::Paused => "paused",
        }
    }
}

impl std::fmt::Display for PowerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `list_vms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmListing {
    pub name: String,
    #[serde(default)]
    pub connection_state: Option<String>,
}

impl VmListing {
    /// Orphaned and inaccessible VMs are not usable instances.
    pub fn is_usable(&self) -> bool {
        !matches!(
            self.connection_state.as_deref(),
            Some("orphaned") | Some("inaccessible")
        )
    }
}

/// The `summary` property of a VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VmSummary {
    pub power_state: PowerState,
    #[serde(default)]
    pub tools_running: bool,
    pub memory_mb: u64,
    #[serde(default)]
    pub guest_memory_usage_mb: u64,
    pub num_cpu: u32,
    #[serde(default)]
    pub vm_path: Option<String>,
}

/// A virtual switch on the host and the physical adapters backing it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostVirtualSwitch {
    pub name: String,
    /// Physical NIC keys, e.g. `key-vim.host.PhysicalNic-vmnic0`.
    #[serde(default)]
    pub pnic: Vec<String>,
}

impl HostVirtualSwitch {
    pub fn is_backed_by(&self, adapter: &str) -> bool {
        self.pnic
            .iter()
            .any(|key| key.rsplit('-').next() == Some(adapter))
    }
}

/// A port group: a named, optionally VLAN-tagged slice of a virtual switch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPortGroup {
    pub name: String,
    #[serde(default)]
    pub vlan_id: u16,
    pub vswitch_name: String,
}
