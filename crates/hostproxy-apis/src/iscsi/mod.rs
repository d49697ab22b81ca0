//! iSCSI API group.
//!
//! Target portals, target sessions and the disks they expose.
//!
//! Served versions: `v1alpha1`, `v1alpha2` (both with 16-bit portal ports;
//! `SetMutualChapSecret` appears in `v1alpha2`) and `v1`.

mod host;
pub mod v1alpha;

pub use host::HostIscsi;

use async_trait::async_trait;
use hostproxy_core::{EndpointDescriptor, Operation, Result, Version, VersionAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const GROUP: &str = "iscsi";

/// Served versions, oldest first.
pub const VERSIONS: &[&str] = &["v1alpha1", "v1alpha2", "v1"];

/// Default iSCSI port.
pub const DEFAULT_PORT: u32 = 3260;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetPortal {
    pub target_address: String,
    pub target_port: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthenticationType {
    #[default]
    None,
    OneWayChap,
    MutualChap,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddTargetPortalRequest {
    pub target_portal: TargetPortal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AddTargetPortalResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverTargetPortalRequest {
    pub target_portal: TargetPortal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoverTargetPortalResponse {
    pub iqns: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTargetPortalsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListTargetPortalsResponse {
    pub target_portals: Vec<TargetPortal>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveTargetPortalRequest {
    pub target_portal: TargetPortal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RemoveTargetPortalResponse {}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectTargetRequest {
    pub target_portal: TargetPortal,
    pub iqn: String,
    #[serde(default)]
    pub is_multipath: bool,
    #[serde(default)]
    pub auth_type: AuthenticationType,
    #[serde(default)]
    pub chap_username: String,
    #[serde(default)]
    pub chap_secret: String,
}

impl std::fmt::Debug for ConnectTargetRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTargetRequest")
            .field("target_portal", &self.target_portal)
            .field("iqn", &self.iqn)
            .field("is_multipath", &self.is_multipath)
            .field("auth_type", &self.auth_type)
            .field("chap_username", &self.chap_username)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectTargetResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectTargetRequest {
    pub target_portal: TargetPortal,
    pub iqn: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DisconnectTargetResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTargetDisksRequest {
    pub target_portal: TargetPortal,
    pub iqn: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetTargetDisksResponse {
    /// Disk numbers, as strings.
    pub disk_ids: Vec<String>,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct SetMutualChapSecretRequest {
    pub mutual_chap_secret: String,
}

impl std::fmt::Debug for SetMutualChapSecretRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetMutualChapSecretRequest").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetMutualChapSecretResponse {}

/// Version-agnostic iSCSI operations.
#[async_trait]
pub trait Iscsi: Send + Sync {
    async fn add_target_portal(
        &self,
        request: AddTargetPortalRequest,
        version: &Version,
    ) -> Result<AddTargetPortalResponse>;

    async fn discover_target_portal(
        &self,
        request: DiscoverTargetPortalRequest,
        version: &Version,
    ) -> Result<DiscoverTargetPortalResponse>;

    async fn list_target_portals(
        &self,
        request: ListTargetPortalsRequest,
        version: &Version,
    ) -> Result<ListTargetPortalsResponse>;

    async fn remove_target_portal(
        &self,
        request: RemoveTargetPortalRequest,
        version: &Version,
    ) -> Result<RemoveTargetPortalResponse>;

    async fn connect_target(
        &self,
        request: ConnectTargetRequest,
        version: &Version,
    ) -> Result<ConnectTargetResponse>;

    async fn disconnect_target(
        &self,
        request: DisconnectTargetRequest,
        version: &Version,
    ) -> Result<DisconnectTargetResponse>;

    async fn get_target_disks(
        &self,
        request: GetTargetDisksRequest,
        version: &Version,
    ) -> Result<GetTargetDisksResponse>;

    async fn set_mutual_chap_secret(
        &self,
        request: SetMutualChapSecretRequest,
        version: &Version,
    ) -> Result<SetMutualChapSecretResponse>;
}

/// One adapter per served version over `imp`, oldest first.
pub fn adapters(imp: Arc<dyn Iscsi>) -> Result<Vec<VersionAdapter<dyn Iscsi>>> {
    let alpha1 = VersionAdapter::new(GROUP, Version::parse("v1alpha1")?, imp.clone());
    let alpha2 = VersionAdapter::new(GROUP, Version::parse("v1alpha2")?, imp.clone());
    let stable = VersionAdapter::new(GROUP, Version::parse("v1")?, imp);
    Ok(vec![
        v1alpha::routes(alpha1)?,
        v1alpha::routes(alpha2)?,
        routes(stable),
    ])
}

/// One endpoint per served version over `imp`.
pub fn endpoints(imp: Arc<dyn Iscsi>) -> Result<Vec<EndpointDescriptor>> {
    Ok(adapters(imp)?
        .into_iter()
        .map(VersionAdapter::into_descriptor)
        .collect())
}

fn routes(adapter: VersionAdapter<dyn Iscsi>) -> VersionAdapter<dyn Iscsi> {
    adapter
        .route(
            Operation::passthrough("AddTargetPortal"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.add_target_portal(req, &v).await },
        )
        .route(
            Operation::passthrough("DiscoverTargetPortal"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.discover_target_portal(req, &v).await },
        )
        .route(
            Operation::passthrough("ListTargetPortals"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.list_target_portals(req, &v).await },
        )
        .route(
            Operation::passthrough("RemoveTargetPortal"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.remove_target_portal(req, &v).await },
        )
        .route(
            Operation::passthrough("ConnectTarget"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.connect_target(req, &v).await },
        )
        .route(
            Operation::passthrough("DisconnectTarget"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.disconnect_target(req, &v).await },
        )
        .route(
            Operation::passthrough("GetTargetDisks"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.get_target_disks(req, &v).await },
        )
        .route(
            Operation::passthrough("SetMutualChapSecret"),
            |imp: Arc<dyn Iscsi>, req, v| async move { imp.set_mutual_chap_secret(req, &v).await },
        )
}
