//! Storage API groups served by the host proxy.
//!
//! Each group module holds the version-agnostic request types and trait for
//! that group, one wire module per superseded version, and a host-backed
//! implementation. [`register_all`] wires every group's endpoints into an
//! [`EndpointRegistry`].
//!
//! | group        | versions                     |
//! |--------------|------------------------------|
//! | `filesystem` | `v1beta1`, `v1`              |
//! | `disk`       | `v1beta3`, `v1`              |
//! | `volume`     | `v1beta3`, `v1`              |
//! | `smb`        | `v1beta2`, `v1`              |
//! | `iscsi`      | `v1alpha1`, `v1alpha2`, `v1` |
//! | `system`     | `v1alpha1`                   |

pub mod command;
pub mod disk;
pub mod filesystem;
pub mod iscsi;
pub mod smb;
pub mod system;
pub mod volume;

pub use command::{CommandRunner, PowerShell};

use hostproxy_core::{EndpointRegistry, PathRoots, Result};
use std::sync::Arc;
use tracing::debug;

/// Every group name, in wiring order.
pub const GROUPS: &[&str] = &[
    filesystem::GROUP,
    disk::GROUP,
    volume::GROUP,
    smb::GROUP,
    iscsi::GROUP,
    system::GROUP,
];

/// One implementation per group.
#[derive(Clone)]
pub struct Backends {
    pub filesystem: Arc<dyn filesystem::Filesystem>,
    pub disk: Arc<dyn disk::Disk>,
    pub volume: Arc<dyn volume::Volume>,
    pub smb: Arc<dyn smb::Smb>,
    pub iscsi: Arc<dyn iscsi::Iscsi>,
    pub system: Arc<dyn system::System>,
}

impl Backends {
    /// Host-backed implementations sharing one command runner.
    pub fn host(roots: PathRoots, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            filesystem: Arc::new(filesystem::HostFilesystem::new(roots)),
            disk: Arc::new(disk::HostDisk::new(runner.clone())),
            volume: Arc::new(volume::HostVolume::new(runner.clone())),
            smb: Arc::new(smb::HostSmb::new(runner.clone())),
            iscsi: Arc::new(iscsi::HostIscsi::new(runner.clone())),
            system: Arc::new(system::HostSystem::new(runner)),
        }
    }
}

/// Register the endpoints of every group accepted by `include`.
pub fn register_all(
    registry: &mut EndpointRegistry,
    backends: &Backends,
    include: impl Fn(&str) -> bool,
) -> Result<()> {
    if include(filesystem::GROUP) {
        registry.extend(filesystem::endpoints(backends.filesystem.clone())?)?;
    }
    if include(disk::GROUP) {
        registry.extend(disk::endpoints(backends.disk.clone())?)?;
    }
    if include(volume::GROUP) {
        registry.extend(volume::endpoints(backends.volume.clone())?)?;
    }
    if include(smb::GROUP) {
        registry.extend(smb::endpoints(backends.smb.clone())?)?;
    }
    if include(iscsi::GROUP) {
        registry.extend(iscsi::endpoints(backends.iscsi.clone())?)?;
    }
    if include(system::GROUP) {
        registry.extend(system::endpoints(backends.system.clone())?)?;
    }

    debug!("Registered {} endpoints", registry.len());
    Ok(())
}
