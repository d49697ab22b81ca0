//! Centralized configuration for the host proxy.
//!
//! Constant tables for the IPC transport plus the runtime configuration
//! assembled once at process start.

use crate::error::{ProxyError, Result};
use std::path::{Component, Path, PathBuf};

/// Application-level configuration.
pub struct AppConfig;

impl AppConfig {
    pub const APP_NAME: &'static str = "hostproxy";
    pub const SOCKET_DIR_NAME: &'static str = "hostproxy";
    pub const FALLBACK_SOCKET_DIR: &'static str = "/run/hostproxy";
}

/// Local IPC transport limits.
pub struct IpcConfig;

impl IpcConfig {
    /// Largest accepted frame payload.
    pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;
    /// Concurrent connections served per endpoint.
    pub const MAX_CONNECTIONS: usize = 64;
    pub const SOCKET_SUFFIX: &'static str = ".sock";
    pub const PIPE_PREFIX: &'static str = r"\\.\pipe\";
    pub const JSONRPC_VERSION: &'static str = "2.0";
}

/// Default directory for endpoint sockets.
///
/// Uses `$XDG_RUNTIME_DIR/hostproxy` when a runtime dir is available.
pub fn default_socket_dir() -> PathBuf {
    dirs::runtime_dir()
        .map(|dir| dir.join(AppConfig::SOCKET_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(AppConfig::FALLBACK_SOCKET_DIR))
}

/// The two filesystem roots that scope every path-taking operation.
///
/// One root holds kubelet pod volumes, the other holds plugin state.
/// A path is accepted only when it lies under one of them after lexical
/// normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRoots {
    kubelet: PathBuf,
    plugin: PathBuf,
}

impl PathRoots {
    /// Create path roots. Both must be absolute.
    pub fn new(kubelet: impl Into<PathBuf>, plugin: impl Into<PathBuf>) -> Result<Self> {
        let kubelet = normalize(&kubelet.into());
        let plugin = normalize(&plugin.into());

        for root in [&kubelet, &plugin] {
            if !root.is_absolute() {
                return Err(ProxyError::Config {
                    message: format!("Path root must be absolute: {}", root.display()),
                });
            }
        }

        Ok(Self { kubelet, plugin })
    }

    pub fn kubelet(&self) -> &Path {
        &self.kubelet
    }

    pub fn plugin(&self) -> &Path {
        &self.plugin
    }

    /// Check that `path` lies under one of the roots and return it normalized.
    pub fn validate(&self, path: &Path) -> Result<PathBuf> {
        if !path.is_absolute() {
            return Err(ProxyError::invalid_argument(format!(
                "path must be absolute: {}",
                path.display()
            )));
        }

        let normalized = normalize(path);
        if normalized.starts_with(&self.kubelet) || normalized.starts_with(&self.plugin) {
            Ok(normalized)
        } else {
            Err(ProxyError::PathOutsideRoots(normalized))
        }
    }
}

/// Lexically resolve `.` and `..` without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Runtime configuration, parsed once at process start.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Directory (or pipe name prefix) endpoints are created under.
    pub socket_dir: PathBuf,
    pub roots: PathRoots,
    /// API groups to host; empty hosts all of them.
    pub groups: Vec<String>,
}

impl ProxyConfig {
    /// Whether `group` should be hosted.
    pub fn hosts_group(&self, group: &str) -> bool {
        self.groups.is_empty() || self.groups.iter().any(|g| g == group)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roots() -> PathRoots {
        PathRoots::new("/var/lib/kubelet/pods", "/var/lib/kubelet/plugins").unwrap()
    }

    #[test]
    fn test_relative_roots_rejected() {
        assert!(PathRoots::new("relative", "/abs").is_err());
    }

    #[test]
    fn test_validate_accepts_paths_under_either_root() {
        let roots = roots();
        assert!(roots
            .validate(Path::new("/var/lib/kubelet/pods/abc/volumes"))
            .is_ok());
        assert!(roots
            .validate(Path::new("/var/lib/kubelet/plugins/csi/staging"))
            .is_ok());
    }

    #[test]
    fn test_validate_rejects_escape_via_parent_components() {
        let err = roots()
            .validate(Path::new("/var/lib/kubelet/pods/../../../../etc/shadow"))
            .unwrap_err();
        assert!(matches!(err, ProxyError::PathOutsideRoots(_)));
    }

    #[test]
    fn test_validate_rejects_relative_path() {
        let err = roots().validate(Path::new("pods/abc")).unwrap_err();
        assert!(matches!(err, ProxyError::InvalidArgument { .. }));
    }

    #[test]
    fn test_validate_rejects_sibling_prefix() {
        // starts_with is component-wise, so "pods-evil" is not under "pods".
        let err = roots()
            .validate(Path::new("/var/lib/kubelet/pods-evil/x"))
            .unwrap_err();
        assert!(matches!(err, ProxyError::PathOutsideRoots(_)));
    }

    #[test]
    fn test_hosts_group() {
        let mut config = ProxyConfig {
            socket_dir: PathBuf::from("/tmp"),
            roots: roots(),
            groups: vec![],
        };
        assert!(config.hosts_group("disk"));
        config.groups = vec!["volume".into()];
        assert!(!config.hosts_group("disk"));
        assert!(config.hosts_group("volume"));
    }
}
