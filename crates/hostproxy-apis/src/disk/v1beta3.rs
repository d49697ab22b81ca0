//! `disk` v1beta3 wire schema.
//!
//! Disks are addressed by decimal string ids and maps are keyed by them.
//! `GetDiskStats` reports `disk_size`; the online state calls are named
//! `SetAttachState` and `GetAttachState`.

use super::*;
use hostproxy_core::adapter::parse_number;
use hostproxy_core::ConversionError;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListDiskLocationsResponse {
    pub disk_locations: BTreeMap<String, DiskLocation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartitionDiskRequest {
    pub disk_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ListDiskIdsResponse {
    pub disk_ids: BTreeMap<String, DiskIds>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetDiskStatsRequest {
    pub disk_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GetDiskStatsResponse {
    pub disk_size: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetAttachStateRequest {
    pub disk_id: String,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetAttachStateRequest {
    pub disk_id: String,
}

fn string_keys<V>(map: BTreeMap<u32, V>) -> BTreeMap<String, V> {
    map.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

fn encode_locations(
    response: super::ListDiskLocationsResponse,
) -> std::result::Result<ListDiskLocationsResponse, ConversionError> {
    Ok(ListDiskLocationsResponse {
        disk_locations: string_keys(response.disk_locations),
    })
}

fn encode_ids(
    response: super::ListDiskIdsResponse,
) -> std::result::Result<ListDiskIdsResponse, ConversionError> {
    Ok(ListDiskIdsResponse {
        disk_ids: string_keys(response.disk_ids),
    })
}

fn decode_partition(
    wire: PartitionDiskRequest,
) -> std::result::Result<super::PartitionDiskRequest, ConversionError> {
    Ok(super::PartitionDiskRequest {
        disk_number: parse_number("disk_id", &wire.disk_id)?,
    })
}

fn decode_stats(
    wire: GetDiskStatsRequest,
) -> std::result::Result<super::GetDiskStatsRequest, ConversionError> {
    Ok(super::GetDiskStatsRequest {
        disk_number: parse_number("disk_id", &wire.disk_id)?,
    })
}

fn encode_stats(
    response: super::GetDiskStatsResponse,
) -> std::result::Result<GetDiskStatsResponse, ConversionError> {
    Ok(GetDiskStatsResponse {
        disk_size: response.total_bytes,
    })
}

fn decode_set_attach(
    wire: SetAttachStateRequest,
) -> std::result::Result<SetDiskStateRequest, ConversionError> {
    Ok(SetDiskStateRequest {
        disk_number: parse_number("disk_id", &wire.disk_id)?,
        is_online: wire.is_online,
    })
}

fn decode_get_attach(
    wire: GetAttachStateRequest,
) -> std::result::Result<GetDiskStateRequest, ConversionError> {
    Ok(GetDiskStateRequest {
        disk_number: parse_number("disk_id", &wire.disk_id)?,
    })
}

pub(super) fn routes(adapter: VersionAdapter<dyn Disk>) -> VersionAdapter<dyn Disk> {
    adapter
        .route(
            Operation::new("ListDiskLocations", Ok, encode_locations),
            |imp: Arc<dyn Disk>, req, v| async move { imp.list_disk_locations(req, &v).await },
        )
        .route(
            Operation::new("PartitionDisk", decode_partition, Ok),
            |imp: Arc<dyn Disk>, req, v| async move { imp.partition_disk(req, &v).await },
        )
        .route(
            Operation::passthrough("Rescan"),
            |imp: Arc<dyn Disk>, req, v| async move { imp.rescan(req, &v).await },
        )
        .route(
            Operation::new("ListDiskIDs", Ok, encode_ids),
            |imp: Arc<dyn Disk>, req, v| async move { imp.list_disk_ids(req, &v).await },
        )
        .route(
            Operation::new("GetDiskStats", decode_stats, encode_stats),
            |imp: Arc<dyn Disk>, req, v| async move { imp.get_disk_stats(req, &v).await },
        )
        .route(
            Operation::new("SetAttachState", decode_set_attach, Ok),
            |imp: Arc<dyn Disk>, req, v| async move { imp.set_disk_state(req, &v).await },
        )
        .route(
            Operation::new("GetAttachState", decode_get_attach, Ok),
            |imp: Arc<dyn Disk>, req, v| async move { imp.get_disk_state(req, &v).await },
        )
}
