//! Filesystem API group.
//!
//! Path queries and directory/symlink management, confined to the kubelet
//! and plugin roots.
//!
//! Served versions: `v1beta1` (deprecated; `LinkPath`, `IsMountPoint`) and `v1`.

mod host;
pub mod v1beta1;

pub use host::HostFilesystem;

use async_trait::async_trait;
use hostproxy_core::{EndpointDescriptor, Operation, Result, Version, VersionAdapter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const GROUP: &str = "filesystem";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathExistsRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathExistsResponse {
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MkdirRequest {
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MkdirResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RmdirRequest {
    pub path: String,
    /// Remove contents recursively.
    #[serde(default)]
    pub force: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RmdirResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSymlinkRequest {
    /// Existing path the link points at.
    pub source_path: String,
    /// Link to create.
    pub target_path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSymlinkResponse {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsSymlinkRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsSymlinkResponse {
    pub is_symlink: bool,
}

/// Version-agnostic filesystem operations.
#[async_trait]
pub trait Filesystem: Send + Sync {
    async fn path_exists(&self, request: PathExistsRequest, version: &Version)
        -> Result<PathExistsResponse>;

    async fn mkdir(&self, request: MkdirRequest, version: &Version) -> Result<MkdirResponse>;

    async fn rmdir(&self, request: RmdirRequest, version: &Version) -> Result<RmdirResponse>;

    async fn create_symlink(
        &self,
        request: CreateSymlinkRequest,
        version: &Version,
    ) -> Result<CreateSymlinkResponse>;

    async fn is_symlink(&self, request: IsSymlinkRequest, version: &Version)
        -> Result<IsSymlinkResponse>;
}

/// Served versions, oldest first.
pub const VERSIONS: &[&str] = &["v1beta1", "v1"];

/// One adapter per served version over `imp`, oldest first.
pub fn adapters(imp: Arc<dyn Filesystem>) -> Result<Vec<VersionAdapter<dyn Filesystem>>> {
    let beta = VersionAdapter::new(GROUP, Version::parse("v1beta1")?, imp.clone());
    let stable = VersionAdapter::new(GROUP, Version::parse("v1")?, imp);
    Ok(vec![v1beta1::routes(beta), routes(stable)])
}

/// One endpoint per served version over `imp`.
pub fn endpoints(imp: Arc<dyn Filesystem>) -> Result<Vec<EndpointDescriptor>> {
    Ok(adapters(imp)?
        .into_iter()
        .map(VersionAdapter::into_descriptor)
        .collect())
}

fn routes(adapter: VersionAdapter<dyn Filesystem>) -> VersionAdapter<dyn Filesystem> {
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
            Operation::passthrough("CreateSymlink"),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.create_symlink(req, &v).await },
        )
        .route(
            Operation::passthrough("IsSymlink"),
            |imp: Arc<dyn Filesystem>, req, v| async move { imp.is_symlink(req, &v).await },
        )
}
