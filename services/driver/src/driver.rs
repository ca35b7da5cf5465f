//! VM lifecycle operations consumed by the orchestrator.
//!
//! Each operation shapes its arguments, issues one or more calls through the
//! retrying invoker and, for calls that return a task reference, waits for
//! the task through the poller. No local state is kept beyond the session.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::watch;
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::error::DriverError;
use crate::invoker::{Invoker, InvokerConfig};
use crate::remote::{self, HostPortGroup, HostVirtualSwitch, PowerState, VmListing, VmSummary};
use crate::session::Session;
use crate::task::{TaskHandle, TaskPoller};
use crate::transport::{Connector, HttpConnector};

/// Shape of a VM to create.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceSpec {
    /// VM name; also the instance identifier used by every other operation.
    pub name: String,
    pub memory_mb: u64,
    pub vcpus: u32,
    /// Datastore path of the root disk image.
    pub image_path: String,
    /// Port group to connect the first NIC to.
    #[serde(default)]
    pub network: Option<String>,
}

/// Power and sizing snapshot of one VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceInfo {
    pub state: PowerState,
    pub max_mem_kb: u64,
    pub mem_kb: u64,
    pub num_cpu: u32,
}

/// One virtual NIC of an instance, as described by the network service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VifSpec {
    pub id: String,
    /// Port group the NIC connects to.
    pub bridge: String,
    /// VLAN tag. Untagged interfaces need the port group to exist already.
    #[serde(default)]
    pub vlan: Option<u16>,
    #[serde(default)]
    pub mac: Option<String>,
}

/// Block device to attach (iSCSI only).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolumeConnection {
    pub driver_volume_type: String,
    pub target_portal: String,
    pub target_iqn: String,
    #[serde(default)]
    pub target_lun: u32,
}

/// What a volume service needs to export a volume to this host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeConnector {
    pub ip: String,
    pub host: String,
    pub initiator: Option<String>,
}

/// Console proxy connection details.
#[derive(Clone, Serialize, Deserialize)]
pub struct ConsolePoolInfo {
    pub address: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ConsolePoolInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsolePoolInfo")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Driver for one virtualization host.
pub struct HostDriver {
    config: DriverConfig,
    session: Arc<Session>,
    invoker: Invoker,
    tasks: TaskPoller,
}

impl HostDriver {
    /// Build a driver over an arbitrary connector.
    pub fn new(
        config: DriverConfig,
        connector: Arc<dyn Connector>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let session = Arc::new(Session::from_config(connector, &config));
        let invoker = Invoker::with_shutdown(
            Arc::clone(&session),
            InvokerConfig::from(&config),
            shutdown,
        );
        let tasks = TaskPoller::from_config(invoker.clone(), &config);
        Self {
            config,
            session,
            invoker,
            tasks,
        }
    }

    /// Build a driver talking JSON over HTTP to the configured endpoint.
    pub fn over_http(config: DriverConfig, shutdown: watch::Receiver<bool>) -> Self {
        let connector = Arc::new(HttpConnector::from_config(&config));
        Self::new(config, connector, shutdown)
    }

    /// Log in eagerly so configuration problems show up at startup.
    pub async fn init_host(&self) -> Result<(), DriverError> {
        self.session.authenticate().await?;
        info!(endpoint = %self.session.endpoint(), "Host initialised");
        Ok(())
    }

    /// Names of all usable VMs on the host.
    pub async fn list_instances(&self) -> Result<Vec<String>, DriverError> {
        let listings: Vec<VmListing> = self.invoker.invoke_as(remote::LIST_VMS, json!({})).await?;
        let total = listings.len();
        let names: Vec<String> = listings
            .into_iter()
            .filter(VmListing::is_usable)
            .map(|vm| vm.name)
            .collect();
        debug!(total, usable = names.len(), "Listed instances");
        Ok(names)
    }

    /// Create a VM and power it on.
    pub async fn spawn(&self, spec: &InstanceSpec) -> Result<(), DriverError> {
        if spec.name.trim().is_empty() {
            return Err(DriverError::InvalidArgument("instance name is empty".to_string()));
        }
        if spec.vcpus == 0 || spec.memory_mb == 0 {
            return Err(DriverError::InvalidArgument(format!(
                "instance {} needs at least one vCPU and some memory",
                spec.name
            )));
        }

        info!(instance = %spec.name, vcpus = spec.vcpus, memory_mb = spec.memory_mb, "Creating VM");
        let config = json!({
            "name": spec.name,
            "memoryMB": spec.memory_mb,
            "numCPUs": spec.vcpus,
            "disk": spec.image_path,
            "network": spec.network,
        });
        self.run_task(remote::CREATE_VM_TASK, json!({ "config": config }), &spec.name)
            .await?;

        let vm = self.vm_ref(&spec.name).await?;
        self.run_task(remote::POWER_ON_VM_TASK, json!({ "vm": vm }), &spec.name)
            .await?;
        info!(instance = %spec.name, "VM created and powered on");
        Ok(())
    }

    /// Power off, unregister and optionally delete the VM's files.
    ///
    /// Destroying an instance the host does not know is not an error.
    pub async fn destroy(&self, instance: &str, destroy_disks: bool) -> Result<(), DriverError> {
        let vm = match self.vm_ref(instance).await {
            Ok(vm) => vm,
            Err(DriverError::InstanceNotFound(_)) => {
                info!(instance, "Instance not on host, nothing to destroy");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let summary = self.summary(&vm).await?;
        if summary.power_state == PowerState::PoweredOn {
            self.run_task(remote::POWER_OFF_VM_TASK, json!({ "vm": vm }), instance)
                .await?;
        }

        self.invoker
            .invoke(remote::UNREGISTER_VM, json!({ "vm": vm }))
            .await?;

        if destroy_disks {
            if let Some(dir) = summary.vm_path.as_deref().and_then(vm_directory) {
                self.run_task(
                    remote::DELETE_DATASTORE_FILE_TASK,
                    json!({ "name": dir }),
                    instance,
                )
                .await?;
            }
        }

        info!(instance, destroy_disks, "VM destroyed");
        Ok(())
    }

    /// Snapshot a VM; returns the snapshot name.
    pub async fn snapshot(&self, instance: &str, name: &str) -> Result<String, DriverError> {
        let vm = self.vm_ref(instance).await?;
        self.run_task(
            remote::CREATE_SNAPSHOT_TASK,
            json!({
                "vm": vm,
                "name": name,
                "description": format!("Snapshot of {instance}"),
                "memory": false,
                "quiesce": true,
            }),
            instance,
        )
        .await?;
        info!(instance, snapshot = name, "Snapshot created");
        Ok(name.to_string())
    }

    /// Reboot through the guest when tools are running, otherwise reset.
    pub async fn reboot(&self, instance: &str) -> Result<(), DriverError> {
        let vm = self.vm_ref(instance).await?;
        let summary = self.summary(&vm).await?;
        if summary.power_state != PowerState::PoweredOn {
            return Err(invalid_state(instance, summary.power_state, "reboot"));
        }

        if summary.tools_running {
            self.invoker
                .invoke(remote::REBOOT_GUEST, json!({ "vm": vm }))
                .await?;
            debug!(instance, "Guest reboot requested");
        } else {
            self.run_task(remote::RESET_VM_TASK, json!({ "vm": vm }), instance)
                .await?;
            debug!(instance, "VM reset");
        }
        Ok(())
    }

    pub async fn pause(&self, instance: &str) -> Result<(), DriverError> {
        let vm = self.vm_ref(instance).await?;
        self.run_task(remote::PAUSE_VM_TASK, json!({ "vm": vm }), instance)
            .await
            .map(|_| ())
    }

    pub async fn unpause(&self, instance: &str) -> Result<(), DriverError> {
        let vm = self.vm_ref(instance).await?;
        self.run_task(remote::UNPAUSE_VM_TASK, json!({ "vm": vm }), instance)
            .await
            .map(|_| ())
    }

    /// Suspend a running VM. Suspending a suspended VM does nothing.
    pub async fn suspend(&self, instance: &str) -> Result<(), DriverError> {
        let vm = self.vm_ref(instance).await?;
        match self.summary(&vm).await?.power_state {
            PowerState::PoweredOn => {
                self.run_task(remote::SUSPEND_VM_TASK, json!({ "vm": vm }), instance)
                    .await?;
                debug!(instance, "VM suspended");
                Ok(())
            }
            PowerState::Suspended => {
                debug!(instance, "VM already suspended");
                Ok(())
            }
            state => Err(invalid_state(instance, state, "suspend")),
        }
    }

    /// Resume a suspended VM.
    pub async fn resume(&self, instance: &str) -> Result<(), DriverError> {
        let vm = self.vm_ref(instance).await?;
        match self.summary(&vm).await?.power_state {
            PowerState::Suspended => {
                self.run_task(remote::POWER_ON_VM_TASK, json!({ "vm": vm }), instance)
                    .await?;
                debug!(instance, "VM resumed");
                Ok(())
            }
            state => Err(invalid_state(instance, state, "resume")),
        }
    }

    pub async fn get_info(&self, instance: &str) -> Result<InstanceInfo, DriverError> {
        let vm = self.vm_ref(instance).await?;
        let summary = self.summary(&vm).await?;
        Ok(InstanceInfo {
            state: summary.power_state,
            max_mem_kb: summary.memory_mb * 1024,
            mem_kb: summary.guest_memory_usage_mb * 1024,
            num_cpu: summary.num_cpu,
        })
    }

    /// Diagnostics are the same data as `get_info`.
    pub async fn get_diagnostics(&self, instance: &str) -> Result<InstanceInfo, DriverError> {
        self.get_info(instance).await
    }

    pub async fn console_output(&self, instance: &str) -> Result<String, DriverError> {
        let vm = self.vm_ref(instance).await?;
        self.invoker
            .invoke_as(remote::QUERY_CONSOLE_LOG, json!({ "vm": vm }))
            .await
    }

    pub async fn attach_volume(
        &self,
        connection: &VolumeConnection,
        instance: &str,
        mountpoint: &str,
    ) -> Result<(), DriverError> {
        let unit = volume_unit(connection, mountpoint)?;
        let vm = self.vm_ref(instance).await?;
        let change = json!({
            "operation": "add",
            "device": {
                "backing": "iscsi",
                "targetPortal": connection.target_portal,
                "targetIqn": connection.target_iqn,
                "lun": connection.target_lun,
                "unitNumber": unit,
            },
        });
        self.reconfigure(&vm, change, instance).await?;
        info!(instance, mountpoint, iqn = %connection.target_iqn, "Volume attached");
        Ok(())
    }

    pub async fn detach_volume(
        &self,
        connection: &VolumeConnection,
        instance: &str,
        mountpoint: &str,
    ) -> Result<(), DriverError> {
        let unit = volume_unit(connection, mountpoint)?;
        let vm = self.vm_ref(instance).await?;
        let change = json!({
            "operation": "remove",
            "device": {
                "backing": "iscsi",
                "targetIqn": connection.target_iqn,
                "unitNumber": unit,
            },
        });
        self.reconfigure(&vm, change, instance).await?;
        info!(instance, mountpoint, iqn = %connection.target_iqn, "Volume detached");
        Ok(())
    }

    /// Connector details for exporting volumes to this host.
    pub async fn volume_connector(&self, instance: &str) -> Result<VolumeConnector, DriverError> {
        let initiator = self
            .invoker
            .get_dynamic_property(
                remote::HOST_SYSTEM_REF,
                remote::TYPE_HOST_SYSTEM,
                "iscsiInitiator",
            )
            .await?;
        let initiator = match initiator {
            Value::String(name) if !name.is_empty() => Some(name),
            _ => {
                debug!(instance, "Host has no iSCSI initiator configured");
                None
            }
        };
        Ok(VolumeConnector {
            ip: self.config.host.clone(),
            host: self.config.host.clone(),
            initiator,
        })
    }

    /// Make sure every interface's port group exists on the host.
    ///
    /// VLAN port groups that are missing are created on the virtual switch
    /// bound to the configured VLAN adapter. An existing port group on a
    /// different VLAN is an error.
    pub async fn plug_vifs(&self, instance: &str, vifs: &[VifSpec]) -> Result<(), DriverError> {
        if vifs.is_empty() {
            return Ok(());
        }
        let mut port_groups: Vec<HostPortGroup> =
            self.host_property(remote::PROP_PORT_GROUPS).await?;
        let mut vswitch: Option<String> = None;

        for vif in vifs {
            let existing = port_groups
                .iter()
                .find(|pg| pg.name == vif.bridge)
                .map(|pg| pg.vlan_id);
            match (existing, vif.vlan) {
                (Some(current), Some(vlan)) if current != vlan => {
                    return Err(DriverError::NetworkConfig(format!(
                        "port group {} is on VLAN {current}, interface {} needs VLAN {vlan}",
                        vif.bridge, vif.id
                    )));
                }
                (Some(_), _) => {
                    debug!(instance, vif = %vif.id, port_group = %vif.bridge, "Port group present");
                }
                (None, None) => {
                    return Err(DriverError::NetworkConfig(format!(
                        "port group {} does not exist on the host",
                        vif.bridge
                    )));
                }
                (None, Some(vlan)) => {
                    let vswitch_name = match &vswitch {
                        Some(name) => name.clone(),
                        None => {
                            let name = self.vlan_vswitch().await?;
                            vswitch = Some(name.clone());
                            name
                        }
                    };
                    let port_group = HostPortGroup {
                        name: vif.bridge.clone(),
                        vlan_id: vlan,
                        vswitch_name,
                    };
                    self.add_port_group(&port_group).await?;
                    info!(
                        instance,
                        vif = %vif.id,
                        port_group = %port_group.name,
                        vlan,
                        vswitch = %port_group.vswitch_name,
                        "Port group created"
                    );
                    port_groups.push(port_group);
                }
            }
        }
        Ok(())
    }

    /// Port groups are shared by every VM on the host, so unplugging leaves
    /// them in place.
    pub async fn unplug_vifs(&self, instance: &str, vifs: &[VifSpec]) -> Result<(), DriverError> {
        for vif in vifs {
            debug!(
                instance,
                vif = %vif.id,
                port_group = %vif.bridge,
                "Leaving shared port group in place"
            );
        }
        Ok(())
    }

    pub fn console_pool_info(&self) -> ConsolePoolInfo {
        ConsolePoolInfo {
            address: self.config.host.clone(),
            username: self.config.username.clone(),
            password: self.config.password.clone(),
        }
    }

    /// Log out from the host. Never fails.
    pub async fn close(&self) {
        self.session.close().await;
    }

    async fn vm_ref(&self, instance: &str) -> Result<String, DriverError> {
        let found = self
            .invoker
            .invoke(remote::FIND_VM, json!({ "name": instance }))
            .await?;
        match found {
            Value::String(vm) => Ok(vm),
            // An empty array is what the invoker returns for an idle-session
            // empty result.
            Value::Null => Err(DriverError::InstanceNotFound(instance.to_string())),
            Value::Array(items) if items.is_empty() => {
                Err(DriverError::InstanceNotFound(instance.to_string()))
            }
            other => Err(DriverError::Malformed {
                method: remote::FIND_VM.to_string(),
                detail: format!("expected a VM reference, got {other}"),
            }),
        }
    }

    async fn summary(&self, vm: &str) -> Result<VmSummary, DriverError> {
        let value = self
            .invoker
            .get_dynamic_property(vm, remote::TYPE_VIRTUAL_MACHINE, "summary")
            .await?;
        serde_json::from_value(value).map_err(|e| DriverError::Malformed {
            method: remote::GET_DYNAMIC_PROPERTY.to_string(),
            detail: e.to_string(),
        })
    }

    async fn host_property<T: DeserializeOwned>(
        &self,
        property: &str,
    ) -> Result<T, DriverError> {
        let value = self
            .invoker
            .get_dynamic_property(remote::HOST_SYSTEM_REF, remote::TYPE_HOST_SYSTEM, property)
            .await?;
        serde_json::from_value(value).map_err(|e| DriverError::Malformed {
            method: remote::GET_DYNAMIC_PROPERTY.to_string(),
            detail: format!("{property}: {e}"),
        })
    }

    /// Name of the virtual switch backed by the configured VLAN adapter.
    async fn vlan_vswitch(&self) -> Result<String, DriverError> {
        let adapter = &self.config.vlan_interface;
        let vswitches: Vec<HostVirtualSwitch> = self.host_property(remote::PROP_VSWITCHES).await?;
        vswitches
            .into_iter()
            .find(|vswitch| vswitch.is_backed_by(adapter))
            .map(|vswitch| vswitch.name)
            .ok_or_else(|| {
                DriverError::NetworkConfig(format!(
                    "no virtual switch is bound to physical adapter {adapter}"
                ))
            })
    }

    /// Another plug for the same port group may have won the race.
    async fn add_port_group(&self, port_group: &HostPortGroup) -> Result<(), DriverError> {
        let added = self
            .invoker
            .invoke(
                remote::ADD_PORT_GROUP,
                json!({
                    "host": remote::HOST_SYSTEM_REF,
                    "portgrp": {
                        "name": port_group.name,
                        "vlanId": port_group.vlan_id,
                        "vswitchName": port_group.vswitch_name,
                    },
                }),
            )
            .await;
        match added {
            Ok(_) => Ok(()),
            Err(DriverError::CallerError { faults, .. })
                if faults.contains(remote::FAULT_ALREADY_EXISTS) =>
            {
                debug!(port_group = %port_group.name, "Port group created concurrently");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn reconfigure(&self, vm: &str, change: Value, instance: &str) -> Result<(), DriverError> {
        self.run_task(
            remote::RECONFIG_VM_TASK,
            json!({ "vm": vm, "spec": { "deviceChange": [change] } }),
            instance,
        )
        .await
        .map(|_| ())
    }

    async fn run_task(
        &self,
        method: &str,
        args: Value,
        instance: &str,
    ) -> Result<String, DriverError> {
        let task_ref: String = self.invoker.invoke_as(method, args).await?;
        let handle = TaskHandle::new(task_ref, instance);
        self.tasks
            .await_completion(&handle, self.config.task_timeout)
            .await
    }
}

fn invalid_state(instance: &str, state: PowerState, operation: &'static str) -> DriverError {
    DriverError::InvalidState {
        instance: instance.to_string(),
        state: state.to_string(),
        operation,
    }
}

/// `[ds1] vm-a/vm-a.vmx` -> `[ds1] vm-a`
fn vm_directory(vm_path: &str) -> Option<&str> {
    let (dir, _file) = vm_path.rsplit_once('/')?;
    Some(dir)
}

fn volume_unit(connection: &VolumeConnection, mountpoint: &str) -> Result<u32, DriverError> {
    if connection.driver_volume_type != "iscsi" {
        return Err(DriverError::InvalidArgument(format!(
            "unsupported volume type '{}'",
            connection.driver_volume_type
        )));
    }
    mountpoint_unit(mountpoint).ok_or_else(|| {
        DriverError::InvalidArgument(format!("unsupported mountpoint '{mountpoint}'"))
    })
}

/// Highest unit number on a SCSI controller.
const MAX_SCSI_UNIT: u32 = 15;

/// Unit the SCSI controller itself occupies.
const SCSI_CONTROLLER_UNIT: u32 = 7;

/// `/dev/sdb` -> 1, `/dev/vdc` -> 2. Unit 0 holds the root disk and unit 7
/// the controller.
fn mountpoint_unit(mountpoint: &str) -> Option<u32> {
    let device = mountpoint.rsplit('/').next()?;
    let letter = device.strip_prefix("sd").or_else(|| device.strip_prefix("vd"))?;
    let mut chars = letter.chars();
    let c = chars.next()?;
    if chars.next().is_some() || !c.is_ascii_lowercase() {
        return None;
    }
    match c as u32 - 'a' as u32 {
        0 | SCSI_CONTROLLER_UNIT => None,
        unit if unit > MAX_SCSI_UNIT => None,
        unit => Some(unit),
    }
}
