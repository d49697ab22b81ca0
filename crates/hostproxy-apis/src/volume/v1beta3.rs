//! `volume` v1beta3 wire schema.
//!
//! Disks are addressed by string id, mount paths are called `path`, resize
//! takes `size`, stats report `volume_size`/`volume_used_size`, and the disk
//! lookup is named `GetVolumeDiskNumber` with a 64-bit result.

use super::*;
use hostproxy_core::adapter::parse_number;
use hostproxy_core::ConversionError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListVolumesOnDiskRequest {
    pub disk_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountVolumeRequest {
    pub volume_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnmountVolumeRequest {
    pub volume_id: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeVolumeRequest {
    pub volume_id: String,
    pub size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetVolumeStatsResponse {
    pub volume_size: i64,
    pub volume_used_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetVolumeDiskNumberRequest {
    pub volume_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetVolumeDiskNumberResponse {
    pub disk_number: i64,
}

type Conv<B> = std::result::Result<B, ConversionError>;

fn decode_list(wire: ListVolumesOnDiskRequest) -> Conv<super::ListVolumesOnDiskRequest> {
    Ok(super::ListVolumesOnDiskRequest {
        disk_number: parse_number("disk_id", &wire.disk_id)?,
        partition_number: 0,
    })
}

fn decode_mount(wire: MountVolumeRequest) -> Conv<super::MountVolumeRequest> {
    Ok(super::MountVolumeRequest {
        volume_id: wire.volume_id,
        target_path: wire.path,
    })
}

fn decode_unmount(wire: UnmountVolumeRequest) -> Conv<super::UnmountVolumeRequest> {
    Ok(super::UnmountVolumeRequest {
        volume_id: wire.volume_id,
        target_path: wire.path,
    })
}

fn decode_resize(wire: ResizeVolumeRequest) -> Conv<super::ResizeVolumeRequest> {
    Ok(super::ResizeVolumeRequest {
        volume_id: wire.volume_id,
        size_bytes: wire.size,
    })
}

fn encode_stats(response: super::GetVolumeStatsResponse) -> Conv<GetVolumeStatsResponse> {
    Ok(GetVolumeStatsResponse {
        volume_size: response.total_bytes,
        volume_used_size: response.used_bytes,
    })
}

fn encode_disk_number(
    response: GetDiskNumberFromVolumeIdResponse,
) -> Conv<GetVolumeDiskNumberResponse> {
    Ok(GetVolumeDiskNumberResponse {
        disk_number: i64::from(response.disk_number),
    })
}

pub(super) fn routes(adapter: VersionAdapter<dyn Volume>) -> VersionAdapter<dyn Volume> {
    adapter
        .route(
            Operation::new("ListVolumesOnDisk", decode_list, Ok),
            |imp: Arc<dyn Volume>, req, v| async move { imp.list_volumes_on_disk(req, &v).await },
        )
        .route(
            Operation::new("MountVolume", decode_mount, Ok),
            |imp: Arc<dyn Volume>, req, v| async move { imp.mount_volume(req, &v).await },
        )
        .route(
            Operation::new("UnmountVolume", decode_unmount, Ok),
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
            Operation::new("ResizeVolume", decode_resize, Ok),
            |imp: Arc<dyn Volume>, req, v| async move { imp.resize_volume(req, &v).await },
        )
        .route(
            Operation::new("GetVolumeStats", Ok, encode_stats),
            |imp: Arc<dyn Volume>, req, v| async move { imp.get_volume_stats(req, &v).await },
        )
        .route(
            Operation::<GetVolumeDiskNumberRequest, GetDiskNumberFromVolumeIdRequest, _, _>::structural(
                "GetVolumeDiskNumber",
            )
            .encode_with(encode_disk_number),
            |imp: Arc<dyn Volume>, req, v| async move {
                imp.get_disk_number_from_volume_id(req, &v).await
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_renamed_to_target_path() {
        let internal = decode_mount(MountVolumeRequest {
            volume_id: r"\\?\Volume{abc}\".into(),
            path: r"C:\var\lib\kubelet\pods\x".into(),
        })
        .unwrap();
        assert_eq!(internal.target_path, r"C:\var\lib\kubelet\pods\x");
    }

    #[test]
    fn test_list_on_disk_requires_numeric_id() {
        let internal = decode_list(ListVolumesOnDiskRequest { disk_id: "4".into() }).unwrap();
        assert_eq!(internal.disk_number, 4);
        assert_eq!(internal.partition_number, 0);
        assert!(decode_list(ListVolumesOnDiskRequest { disk_id: "four".into() }).is_err());
    }

    #[test]
    fn test_stats_field_names() {
        let wire = encode_stats(super::super::GetVolumeStatsResponse {
            total_bytes: 100,
            used_bytes: 40,
        })
        .unwrap();
        assert_eq!(
            serde_json::to_value(wire).unwrap(),
            serde_json::json!({"volume_size": 100, "volume_used_size": 40})
        );
    }
}
