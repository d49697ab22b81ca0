//! Disk operations driven through the host's storage cmdlets.

use super::*;
use crate::command::{parse_json, parse_json_list, ps_bool, CommandRunner};
use hostproxy_core::ProxyError;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

static LOCATION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Adapter (\d+) : Port (\d+) : Target (\d+) : LUN (\d+)")
        .expect("disk location regex must compile")
});

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskRow {
    number: u32,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    serial_number: Option<String>,
    #[serde(default)]
    unique_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiskStateRow {
    size: i64,
    is_offline: bool,
}

/// Parse a `Location` string into a SCSI address.
fn parse_location(location: &str) -> Option<DiskLocation> {
    let caps = LOCATION_PATTERN.captures(location)?;
    Some(DiskLocation {
        adapter: caps[1].to_string(),
        bus: caps[2].to_string(),
        target: caps[3].to_string(),
        lun_id: caps[4].to_string(),
    })
}

/// Disk implementation backed by a [`CommandRunner`].
#[derive(Clone)]
pub struct HostDisk {
    runner: Arc<dyn CommandRunner>,
}

impl HostDisk {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }

    async fn disks(&self) -> Result<Vec<DiskRow>> {
        let output = self
            .runner
            .run(
                "Get-Disk | Select-Object Number, Location, SerialNumber, UniqueId | ConvertTo-Json",
                &[],
            )
            .await?;
        parse_json_list("Get-Disk", &output)
    }

    async fn disk_state(&self, disk_number: u32) -> Result<DiskStateRow> {
        let script = format!(
            "Get-Disk -Number {} | Select-Object Size, IsOffline | ConvertTo-Json",
            disk_number
        );
        let output = self.runner.run(&script, &[]).await?;
        if output.trim().is_empty() {
            return Err(ProxyError::NotFound(format!("disk {}", disk_number)));
        }
        parse_json("Get-Disk", &output)
    }
}

#[async_trait]
impl Disk for HostDisk {
    async fn list_disk_locations(
        &self,
        _request: ListDiskLocationsRequest,
        _version: &Version,
    ) -> Result<ListDiskLocationsResponse> {
        let mut disk_locations = BTreeMap::new();
        for disk in self.disks().await? {
            match disk.location.as_deref().and_then(parse_location) {
                Some(location) => {
                    disk_locations.insert(disk.number, location);
                }
                None => debug!("Disk {} has no SCSI location", disk.number),
            }
        }
        Ok(ListDiskLocationsResponse { disk_locations })
    }

    async fn partition_disk(
        &self,
        request: PartitionDiskRequest,
        _version: &Version,
    ) -> Result<PartitionDiskResponse> {
        let n = request.disk_number;
        let script = format!(
            "$disk = Get-Disk -Number {n}; \
             if ($disk.PartitionStyle -eq 'RAW') {{ Initialize-Disk -Number {n} -PartitionStyle GPT }}; \
             if (-not (Get-Partition -DiskNumber {n} -ErrorAction SilentlyContinue | Where-Object Type -ne 'Reserved')) \
             {{ New-Partition -DiskNumber {n} -UseMaximumSize | Out-Null }}"
        );
        self.runner.run(&script, &[]).await?;
        info!("Partitioned disk {}", n);
        Ok(PartitionDiskResponse {})
    }

    async fn rescan(&self, _request: RescanRequest, _version: &Version) -> Result<RescanResponse> {
        self.runner.run("Update-HostStorageCache", &[]).await?;
        Ok(RescanResponse {})
    }

    async fn list_disk_ids(
        &self,
        _request: ListDiskIdsRequest,
        _version: &Version,
    ) -> Result<ListDiskIdsResponse> {
        let disk_ids = self
            .disks()
            .await?
            .into_iter()
            .map(|disk| {
                (
                    disk.number,
                    DiskIds {
                        page83: disk.unique_id.unwrap_or_default(),
                        serial_number: disk.serial_number.unwrap_or_default().trim().to_string(),
                    },
                )
            })
            .collect();
        Ok(ListDiskIdsResponse { disk_ids })
    }

    async fn get_disk_stats(
        &self,
        request: GetDiskStatsRequest,
        _version: &Version,
    ) -> Result<GetDiskStatsResponse> {
        let state = self.disk_state(request.disk_number).await?;
        Ok(GetDiskStatsResponse {
            total_bytes: state.size,
        })
    }

    async fn set_disk_state(
        &self,
        request: SetDiskStateRequest,
        _version: &Version,
    ) -> Result<SetDiskStateResponse> {
        let script = format!(
            "Set-Disk -Number {} -IsOffline {}",
            request.disk_number,
            ps_bool(!request.is_online)
        );
        self.runner.run(&script, &[]).await?;
        info!(
            "Disk {} set {}",
            request.disk_number,
            if request.is_online { "online" } else { "offline" }
        );
        Ok(SetDiskStateResponse {})
    }

    async fn get_disk_state(
        &self,
        request: GetDiskStateRequest,
        _version: &Version,
    ) -> Result<GetDiskStateResponse> {
        let state = self.disk_state(request.disk_number).await?;
        Ok(GetDiskStateResponse {
            is_online: !state.is_offline,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::testing::ScriptedRunner;

    fn v1() -> Version {
        Version::parse("v1").unwrap()
    }

    const DISKS: &str = r#"[
        {"Number": 0, "Location": "PCIROOT(0)#PCI(1000) : Adapter 0 : Port 0 : Target 0 : LUN 0",
         "SerialNumber": " 6002248 ", "UniqueId": "60022480ABC"},
        {"Number": 1, "Location": "Integrated : Bus 0 : Device 1", "SerialNumber": null, "UniqueId": "XYZ"}
    ]"#;

    #[test]
    fn test_parse_location() {
        let location =
            parse_location("PCI Slot 3 : Adapter 2 : Port 1 : Target 4 : LUN 7").unwrap();
        assert_eq!(location.adapter, "2");
        assert_eq!(location.bus, "1");
        assert_eq!(location.target, "4");
        assert_eq!(location.lun_id, "7");
        assert!(parse_location("Integrated : Bus 0").is_none());
    }

    #[tokio::test]
    async fn test_list_disk_locations_skips_unaddressable_disks() {
        let runner = Arc::new(ScriptedRunner::with_outputs([DISKS]));
        let disk = HostDisk::new(runner.clone());

        let response = disk
            .list_disk_locations(ListDiskLocationsRequest {}, &v1())
            .await
            .unwrap();
        assert_eq!(response.disk_locations.len(), 1);
        assert_eq!(response.disk_locations[&0].target, "0");
        assert!(runner.scripts()[0].starts_with("Get-Disk"));
    }

    #[tokio::test]
    async fn test_list_disk_ids() {
        let runner = Arc::new(ScriptedRunner::with_outputs([DISKS]));
        let disk = HostDisk::new(runner);

        let response = disk.list_disk_ids(ListDiskIdsRequest {}, &v1()).await.unwrap();
        assert_eq!(response.disk_ids[&0].serial_number, "6002248");
        assert_eq!(response.disk_ids[&1].page83, "XYZ");
        assert_eq!(response.disk_ids[&1].serial_number, "");
    }

    #[tokio::test]
    async fn test_disk_state_roundtrip() {
        let runner = Arc::new(ScriptedRunner::with_outputs([
            "",
            r#"{"Size": 10737418240, "IsOffline": false}"#,
        ]));
        let disk = HostDisk::new(runner.clone());

        disk.set_disk_state(
            SetDiskStateRequest {
                disk_number: 2,
                is_online: true,
            },
            &v1(),
        )
        .await
        .unwrap();
        assert_eq!(runner.scripts()[0], "Set-Disk -Number 2 -IsOffline $false");

        let state = disk
            .get_disk_state(GetDiskStateRequest { disk_number: 2 }, &v1())
            .await
            .unwrap();
        assert!(state.is_online);
    }

    #[tokio::test]
    async fn test_missing_disk_is_not_found() {
        let runner = Arc::new(ScriptedRunner::with_outputs([""]));
        let disk = HostDisk::new(runner);
        let err = disk
            .get_disk_stats(GetDiskStatsRequest { disk_number: 9 }, &v1())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_command_failure_passes_through() {
        let runner = Arc::new(ScriptedRunner::default());
        runner.push_error(ProxyError::CommandFailed {
            command: "Update-HostStorageCache".into(),
            message: "access denied".into(),
        });
        let disk = HostDisk::new(runner);
        let err = disk.rescan(RescanRequest {}, &v1()).await.unwrap_err();
        assert!(matches!(err, ProxyError::CommandFailed { .. }));
    }
}
