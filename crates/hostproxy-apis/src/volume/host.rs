//! Volume operations driven through the host's storage cmdlets.

use super::*;
use crate::command::{parse_json, parse_json_list, quote, CommandRunner};
use hostproxy_core::ProxyError;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct VolumeSizeRow {
    size: i64,
    size_remaining: i64,
}

/// Volume implementation backed by a [`CommandRunner`].
#[derive(Clone)]
pub struct HostVolume {
    runner: Arc<dyn CommandRunner>,
}

impl HostVolume {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn run(&self, script: &str) -> Result<String> {
        self.runner.run(script, &[]).await
    }
}

fn require_id(volume_id: &str) -> Result<()> {
    if volume_id.trim().is_empty() {
        return Err(ProxyError::invalid_argument("volume_id must not be empty"));
    }
    Ok(())
}

fn get_volume(volume_id: &str) -> String {
    format!("Get-Volume -UniqueId {}", quote(volume_id))
}

#[async_trait]
impl Volume for HostVolume {
    async fn list_volumes_on_disk(
        &self,
        request: ListVolumesOnDiskRequest,
        _version: &Version,
    ) -> Result<ListVolumesOnDiskResponse> {
        let partition_filter = if request.partition_number == 0 {
            String::new()
        } else {
            format!(" -PartitionNumber {}", request.partition_number)
        };
        let script = format!(
            "Get-Partition -DiskNumber {}{} | Get-Volume | Select-Object -ExpandProperty UniqueId | ConvertTo-Json",
            request.disk_number, partition_filter
        );
        let volume_ids = parse_json_list("Get-Partition", &self.run(&script).await?)?;
        Ok(ListVolumesOnDiskResponse { volume_ids })
    }

    async fn mount_volume(
        &self,
        request: MountVolumeRequest,
        _version: &Version,
    ) -> Result<MountVolumeResponse> {
        require_id(&request.volume_id)?;
        let script = format!(
            "{} | Get-Partition | Add-PartitionAccessPath -AccessPath {}",
            get_volume(&request.volume_id),
            quote(&request.target_path)
        );
        self.run(&script).await?;
        info!("Mounted {} at {}", request.volume_id, request.target_path);
        Ok(MountVolumeResponse {})
    }

    async fn unmount_volume(
        &self,
        request: UnmountVolumeRequest,
        _version: &Version,
    ) -> Result<UnmountVolumeResponse> {
        require_id(&request.volume_id)?;
        let script = format!(
            "{} | Get-Partition | Remove-PartitionAccessPath -AccessPath {}",
            get_volume(&request.volume_id),
            quote(&request.target_path)
        );
        self.run(&script).await?;
        info!("Unmounted {} from {}", request.volume_id, request.target_path);
        Ok(UnmountVolumeResponse {})
    }

    async fn is_volume_formatted(
        &self,
        request: IsVolumeFormattedRequest,
        _version: &Version,
    ) -> Result<IsVolumeFormattedResponse> {
        require_id(&request.volume_id)?;
        let script = format!(
            "({}).FileSystemType | ConvertTo-Json",
            get_volume(&request.volume_id)
        );
        let output = self.run(&script).await?;
        let fs_type: Option<String> = if output.trim().is_empty() {
            None
        } else {
            parse_json("Get-Volume", &output)?
        };
        let formatted = matches!(fs_type.as_deref(), Some(t) if !t.is_empty() && t != "Unknown");
        Ok(IsVolumeFormattedResponse { formatted })
    }

    async fn format_volume(
        &self,
        request: FormatVolumeRequest,
        _version: &Version,
    ) -> Result<FormatVolumeResponse> {
        require_id(&request.volume_id)?;
        let script = format!(
            "{} | Format-Volume -FileSystem NTFS -Confirm:$false | Out-Null",
            get_volume(&request.volume_id)
        );
        self.run(&script).await?;
        info!("Formatted {}", request.volume_id);
        Ok(FormatVolumeResponse {})
    }

    async fn resize_volume(
        &self,
        request: ResizeVolumeRequest,
        _version: &Version,
    ) -> Result<ResizeVolumeResponse> {
        require_id(&request.volume_id)?;
        if request.size_bytes < 0 {
            return Err(ProxyError::invalid_argument(format!(
                "size_bytes must not be negative: {}",
                request.size_bytes
            )));
        }
        let size = if request.size_bytes == 0 {
            format!(
                "({} | Get-Partition | Get-PartitionSupportedSize).SizeMax",
                get_volume(&request.volume_id)
            )
        } else {
            request.size_bytes.to_string()
        };
        let script = format!(
            "{} | Get-Partition | Resize-Partition -Size {}",
            get_volume(&request.volume_id),
            size
        );
        self.run(&script).await?;
        info!("Resized {} ({} bytes requested)", request.volume_id, request.size_bytes);
        Ok(ResizeVolumeResponse {})
    }

    async fn get_volume_stats(
        &self,
        request: GetVolumeStatsRequest,
        _version: &Version,
    ) -> Result<GetVolumeStatsResponse> {
        require_id(&request.volume_id)?;
        let script = format!(
            "{} | Select-Object Size, SizeRemaining | ConvertTo-Json",
            get_volume(&request.volume_id)
        );
        let output = self.run(&script).await?;
        if output.trim().is_empty() {
            return Err(ProxyError::NotFound(format!("volume {}", request.volume_id)));
        }
        let row: VolumeSizeRow = parse_json("Get-Volume", &output)?;
        Ok(GetVolumeStatsResponse {
            total_bytes: row.size,
            used_bytes: row.size - row.size_remaining,
        })
    }

    async fn get_disk_number_from_volume_id(
        &self,
        request: GetDiskNumberFromVolumeIdRequest,
        _version: &Version,
    ) -> Result<GetDiskNumberFromVolumeIdResponse> {
        require_id(&request.volume_id)?;
        let script = format!(
            "({} | Get-Partition).DiskNumber | ConvertTo-Json",
            get_volume(&request.volume_id)
        );
        let numbers: Vec<u32> = parse_json_list("Get-Partition", &self.run(&script).await?)?;
        let disk_number = numbers
            .first()
            .copied()
            .ok_or_else(|| ProxyError::NotFound(format!("volume {}", request.volume_id)))?;
        Ok(GetDiskNumberFromVolumeIdResponse { disk_number })
    }
}
