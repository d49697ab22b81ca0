//! Disk API group.
//!
//! Disk discovery, partitioning and online/offline state.
//!
//! Served versions: `v1beta3` (deprecated; string disk ids, `disk_size`,
//! `SetAttachState`/`GetAttachState`) and `v1`.

mod host;
pub mod v1beta3;

pub use host::HostDisk;

use async_trait::async_trait;
use hostproxy_core::{EndpointDescriptor, Operation, Result, Version, VersionAdapter};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub const GROUP: &str = "disk";

/// Served versions, oldest first.
pub const VERSIONS: &[&str] = &["v1beta3", "v1"];

/// SCSI address of a disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskLocation {
    pub adapter: String,
    pub bus: String,
    pub target: String,
    pub lun_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDiskLocationsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDiskLocationsResponse {
    /// Keyed by disk number.
    pub disk_locations: BTreeMap<u32, DiskLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDiskRequest {
    pub disk_number: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PartitionDiskResponse {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RescanRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RescanResponse {}

/// Identifiers reported for a disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskIds {
    pub page83: String,
    pub serial_number: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDiskIdsRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListDiskIdsResponse {
    /// Keyed by disk number.
    pub disk_ids: BTreeMap<u32, DiskIds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskStatsRequest {
    pub disk_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskStatsResponse {
    pub total_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetDiskStateRequest {
    pub disk_number: u32,
    pub is_online: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SetDiskStateResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskStateRequest {
    pub disk_number: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskStateResponse {
    pub is_online: bool,
}

/// Version-agnostic disk operations.
#[async_trait]
pub trait Disk: Send + Sync {
    async fn list_disk_locations(
        &self,
        request: ListDiskLocationsRequest,
        version: &Version,
    ) -> Result<ListDiskLocationsResponse>;

    async fn partition_disk(
        &self,
        request: PartitionDiskRequest,
        version: &Version,
    ) -> Result<PartitionDiskResponse>;

    async fn rescan(&self, request: RescanRequest, version: &Version) -> Result<RescanResponse>;

    async fn list_disk_ids(
        &self,
        request: ListDiskIdsRequest,
        version: &Version,
    ) -> Result<ListDiskIdsResponse>;

    async fn get_disk_stats(
        &self,
        request: GetDiskStatsRequest,
        version: &Version,
    ) -> Result<GetDiskStatsResponse>;

    async fn set_disk_state(
        &self,
        request: SetDiskStateRequest,
        version: &Version,
    ) -> Result<SetDiskStateResponse>;

    async fn get_disk_state(
        &self,
        request: GetDiskStateRequest,
        version: &Version,
    ) -> Result<GetDiskStateResponse>;
}

/// One adapter per served version over `imp`, oldest first.
pub fn adapters(imp: Arc<dyn Disk>) -> Result<Vec<VersionAdapter<dyn Disk>>> {
    let beta = VersionAdapter::new(GROUP, Version::parse("v1beta3")?, imp.clone());
    let stable = VersionAdapter::new(GROUP, Version::parse("v1")?, imp);
    Ok(vec![v1beta3::routes(beta), routes(stable)])
}

/// One endpoint per served version over `imp`.
pub fn endpoints(imp: Arc<dyn Disk>) -> Result<Vec<EndpointDescriptor>> {
    Ok(adapters(imp)?
        .into_iter()
        .map(VersionAdapter::into_descriptor)
        .collect())
}

fn routes(adapter: VersionAdapter<dyn Disk>) -> VersionAdapter<dyn Disk> {
    adapter
        .route(
            Operation::passthrough("ListDiskLocations"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.list_disk_locations(req, &v).await },
        )
        .route(
            Operation::passthrough("PartitionDisk"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.partition_disk(req, &v).await },
        )
        .route(
            Operation::passthrough("Rescan"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.rescan(req, &v).await },
        )
        .route(
            Operation::passthrough("ListDiskIDs"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.list_disk_ids(req, &v).await },
        )
        .route(
            Operation::passthrough("GetDiskStats"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.get_disk_stats(req, &v).await },
        )
        .route(
            Operation::passthrough("SetDiskState"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.set_disk_state(req, &v).await },
        )
        .route(
            Operation::passthrough("GetDiskState"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.get_disk_state(req, &v).await },
        )
}
