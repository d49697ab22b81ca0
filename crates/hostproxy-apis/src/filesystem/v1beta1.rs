//! `filesystem` v1beta1 wire schema.
//!
//! Differs from v1 only by method and field names: `LinkPath` creates a
//! symlink and `IsMountPoint` reports whether a path is a symlink.

use super::{
    CreateSymlinkRequest, CreateSymlinkResponse, Filesystem, IsSymlinkRequest, IsSymlinkResponse,
};
use hostproxy_core::{ConversionError, Operation, VersionAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkPathRequest {
    pub source_path: String,
    pub target_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkPathResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsMountPointRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IsMountPointResponse {
    pub is_mount_point: bool,
}

fn encode_is_mount_point(
    response: IsSymlinkResponse,
) -> Result<IsMountPointResponse, ConversionError> {
    Ok(IsMountPointResponse {
        is_mount_point: response.is_symlink,
    })
}

pub(super) fn routes(adapter: VersionAdapter<dyn Filesystem>) -> VersionAdapter<dyn Filesystem> {
    adapter
        .route(
            Operation::passthrough("PathExists"),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.path_exists(req, &v).await },
        )
        .route(
            Operation::passthrough("Mkdir"),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.mkdir(req, &v).await },
        )
        .route(
            Operation::passthrough("Rmdir"),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.rmdir(req, &v).await },
        )
        .route(
            Operation::<LinkPathRequest, CreateSymlinkRequest, CreateSymlinkResponse, LinkPathResponse>::structural(
                "LinkPath",
            ),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.create_symlink(req, &v).await },
        )
        .route(
            Operation::<IsMountPointRequest, IsSymlinkRequest, IsSymlinkResponse, IsMountPointResponse>::structural(
                "IsMountPoint",
            )
            .encode_with(encode_is_mount_point),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.is_symlink(req, &v).await },
        )
}
