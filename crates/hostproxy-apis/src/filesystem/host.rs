//! Filesystem operations on the local host.

use super::*;
use hostproxy_core::{PathRoots, ProxyError};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Filesystem backed by the local disk, confined to [`PathRoots`].
#[derive(Debug, Clone)]
pub struct HostFilesystem {
    roots: PathRoots,
}

impl HostFilesystem {
    pub fn new(roots: PathRoots) -> Self {
        Self { roots }
    }

    fn scoped(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(ProxyError::invalid_argument("path must not be empty"));
        }
        self.roots.validate(Path::new(path))
    }
}

fn io_error(err: io::Error, path: &Path) -> ProxyError {
    if err.kind() == io::ErrorKind::NotFound {
        ProxyError::NotFound(path.display().to_string())
    } else {
        ProxyError::io_with_path(err, path)
    }
}

#[async_trait]
impl Filesystem for HostFilesystem {
    async fn path_exists(
        &self,
        request: PathExistsRequest,
        _version: &Version,
    ) -> Result<PathExistsResponse> {
        let path = self.scoped(&request.path)?;
        let exists = tokio::fs::try_exists(&path)
            .await
            .map_err(|e| io_error(e, &path))?;
        Ok(PathExistsResponse { exists })
    }

    async fn mkdir(&self, request: MkdirRequest, _version: &Version) -> Result<MkdirResponse> {
        let path = self.scoped(&request.path)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| io_error(e, &path))?;
        debug!("Created directory {}", path.display());
        Ok(MkdirResponse {})
    }

    async fn rmdir(&self, request: RmdirRequest, _version: &Version) -> Result<RmdirResponse> {
        let path = self.scoped(&request.path)?;
        let result = if request.force {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_dir(&path).await
        };
        result.map_err(|e| io_error(e, &path))?;
        info!("Removed directory {}", path.display());
        Ok(RmdirResponse {})
    }

    async fn create_symlink(
        &self,
        request: CreateSymlinkRequest,
        _version: &Version,
    ) -> Result<CreateSymlinkResponse> {
        let source = self.scoped(&request.source_path)?;
        let target = self.scoped(&request.target_path)?;

        #[cfg(unix)]
        let result = tokio::fs::symlink(&source, &target).await;

        #[cfg(windows)]
        let result = tokio::fs::symlink_dir(&source, &target).await;

        result.map_err(|e| io_error(e, &target))?;
        info!("Linked {} -> {}", target.display(), source.display());
        Ok(CreateSymlinkResponse {})
    }

    async fn is_symlink(
        &self,
        request: IsSymlinkRequest,
        _version: &Version,
    ) -> Result<IsSymlinkResponse> {
        let path = self.scoped(&request.path)?;
        let metadata = tokio::fs::symlink_metadata(&path)
            .await
            .map_err(|e| io_error(e, &path))?;
        Ok(IsSymlinkResponse {
            is_symlink: metadata.file_type().is_symlink(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        kubelet: PathBuf,
        plugin: PathBuf,
        outside: PathBuf,
        fs: HostFilesystem,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let kubelet = dir.path().join("kubelet");
        let plugin = dir.path().join("plugins");
        let outside = dir.path().join("elsewhere");
        for p in [&kubelet, &plugin, &outside] {
            std::fs::create_dir_all(p).unwrap();
        }
        let fs = HostFilesystem::new(PathRoots::new(&kubelet, &plugin).unwrap());
        Fixture {
            _dir: dir,
            kubelet,
            plugin,
            outside,
            fs,
        }
    }

    fn v1() -> Version {
        Version::parse("v1").unwrap()
    }

    fn s(p: &Path) -> String {
        p.to_string_lossy().into_owned()
    }

    #[tokio::test]
    async fn test_mkdir_exists_rmdir_inside_roots() {
        let f = fixture();
        let dir = f.kubelet.join("pods/abc/volumes");

        f.fs.mkdir(MkdirRequest { path: s(&dir) }, &v1()).await.unwrap();
        let exists = f.fs.path_exists(PathExistsRequest { path: s(&dir) }, &v1()).await.unwrap();
        assert!(exists.exists);

        let parent = f.kubelet.join("pods");
        let err = f
            .fs
            .rmdir(RmdirRequest { path: s(&parent), force: false }, &v1())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::Io { .. }), "{err:?}");

        f.fs.rmdir(RmdirRequest { path: s(&parent), force: true }, &v1())
            .await
            .unwrap();
        assert!(!parent.exists());
    }

    #[tokio::test]
    async fn test_paths_outside_roots_are_refused() {
        let f = fixture();
        let escapes = [
            f.outside.join("x"),
            f.kubelet.join("../elsewhere/x"),
            PathBuf::from("/etc"),
        ];

        for path in escapes {
            let err = f.fs.mkdir(MkdirRequest { path: s(&path) }, &v1()).await.unwrap_err();
            assert!(matches!(err, ProxyError::PathOutsideRoots(_)), "{path:?}: {err:?}");
        }
        assert!(!f.outside.join("x").exists());

        let err = f
            .fs
            .path_exists(PathExistsRequest { path: "relative/path".into() }, &v1())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_symlink_across_roots() {
        let f = fixture();
        let source = f.plugin.join("staging");
        let target = f.kubelet.join("publish");
        std::fs::create_dir_all(&source).unwrap();

        f.fs.create_symlink(
            CreateSymlinkRequest {
                source_path: s(&source),
                target_path: s(&target),
            },
            &v1(),
        )
        .await
        .unwrap();

        let link = f.fs.is_symlink(IsSymlinkRequest { path: s(&target) }, &v1()).await.unwrap();
        assert!(link.is_symlink);
        let plain = f.fs.is_symlink(IsSymlinkRequest { path: s(&source) }, &v1()).await.unwrap();
        assert!(!plain.is_symlink);

        let err = f
            .fs
            .is_symlink(IsSymlinkRequest { path: s(&f.kubelet.join("missing")) }, &v1())
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_symlink_source_outside_roots_is_refused() {
        let f = fixture();
        let err = f
            .fs
            .create_symlink(
                CreateSymlinkRequest {
                    source_path: s(&f.outside),
                    target_path: s(&f.kubelet.join("link")),
                },
                &v1(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProxyError::PathOutsideRoots(_)));
        assert!(!f.kubelet.join("link").exists());
    }
}
