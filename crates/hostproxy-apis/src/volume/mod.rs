//! Volume API group.
//!
//! Served versions: `v1beta3` (deprecated) and `v1`.

mod host;
pub mod v1beta3;

pub use host::HostVolume;

use async_trait::async_trait;
use hostproxy_core::{EndpointDescriptor, Operation, Result, Version, VersionAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const GROUP: &str = "volume";

/// Served versions, oldest first.
pub const VERSIONS: &[&str] = &["v1beta3", "v1"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVolumesOnDiskRequest {
    pub disk_number: u32,
    /// Restrict to one partition; 0 lists every partition.
    #[serde(default)]
    pub partition_number: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListVolumesOnDiskResponse {
    pub volume_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MountVolumeResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmountVolumeRequest {
    pub volume_id: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnmountVolumeResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsVolumeFormattedRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsVolumeFormattedResponse {
    pub formatted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatVolumeRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatVolumeResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeVolumeRequest {
    pub volume_id: String,
    /// New size; 0 grows to the largest supported size.
    pub size_bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResizeVolumeResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVolumeStatsRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVolumeStatsResponse {
    pub total_bytes: i64,
    pub used_bytes: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskNumberFromVolumeIdRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskNumberFromVolumeIdResponse {
    pub disk_number: u32,
}

/// Version-agnostic volume operations.
#[async_trait]
pub trait Volume: Send + Sync {
    async fn list_volumes_on_disk(
        &self,
        request: ListVolumesOnDiskRequest,
        version: &Version,
    ) -> Result<ListVolumesOnDiskResponse>;

    async fn mount_volume(
        &self,
        request: MountVolumeRequest,
        version: &Version,
    ) -> Result<MountVolumeResponse>;

    async fn unmount_volume(
        &self,
        request: UnmountVolumeRequest,
        version: &Version,
    ) -> Result<UnmountVolumeResponse>;

    async fn is_volume_formatted(
        &self,
        request: IsVolumeFormattedRequest,
        version: &Version,
    ) -> Result<IsVolumeFormattedResponse>;

    async fn format_volume(
        &self,
        request: FormatVolumeRequest,
        version: &Version,
    ) -> Result<FormatVolumeResponse>;

    async fn resize_volume(
        &self,
        request: ResizeVolumeRequest,
        version: &Version,
    ) -> Result<ResizeVolumeResponse>;

    async fn get_volume_stats(
        &self,
        request: GetVolumeStatsRequest,
        version: &Version,
    ) -> Result<GetVolumeStatsResponse>;

    async fn get_disk_number_from_volume_id(
        &self,
        request: GetDiskNumberFromVolumeIdRequest,
        version: &Version,
    ) -> Result<GetDiskNumberFromVolumeIdResponse>;
}

/// One adapter per served version over `imp`, oldest first.
pub fn adapters(imp: Arc<dyn Volume>) -> Result<Vec<VersionAdapter<dyn Volume>>> {
    let beta = VersionAdapter::new(GROUP, Version::parse("v1beta3")?, imp.clone());
    let stable = VersionAdapter::new(GROUP, Version::parse("v1")?, imp);
    Ok(vec![v1beta3::routes(beta), routes(stable)])
}

/// One endpoint per served version over `imp`.
pub fn endpoints(imp: Arc<dyn Volume>) -> Result<Vec<EndpointDescriptor>> {
    Ok(adapters(imp)?
        .into_iter()
        .map(VersionAdapter::into_descriptor)
        .collect())
}

fn routes(adapter: VersionAdapter<dyn Volume>) -> VersionAdapter<dyn Volume> {
    adapter
        .route(
            Operation::passthrough("ListVolumesOnDisk"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.list_volumes_on_disk(req, &v).await },
        )
        .route(
            Operation::passthrough("MountVolume"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.mount_volume(req, &v).await },
        )
        .route(
            Operation::passthrough("UnmountVolume"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.unmount_volume(req, &v).await },
        )
        .route(
            Operation::passthrough("IsVolumeFormatted"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.is_volume_formatted(req, &v).await },
        )
        .route(
            Operation::passthrough("FormatVolume"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.format_volume(req, &v).await },
        )
        .route(
            Operation::passthrough("ResizeVolume"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.resize_volume(req, &v).await },
        )
        .route(
            Operation::passthrough("GetVolumeStats"),
            |imp: Arc<dyn Volume>, req, v| async move { imp.get_volume_stats(req, &v).await },
        )
        .route(
            Operation::passthrough("GetDiskNumberFromVolumeID"),
            |imp: Arc<dyn Volume>, req, v| async move {
                imp.get_disk_number_from_volume_id(req, &v).await
            },
        )
}
