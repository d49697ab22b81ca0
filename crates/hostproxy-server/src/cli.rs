//! Command-line arguments.

use clap::Parser;
use hostproxy_apis::GROUPS;
use hostproxy_core::{default_socket_dir, PathRoots, ProxyConfig, ProxyError, Result};
use std::path::PathBuf;

#[cfg(windows)]
const DEFAULT_KUBELET_PATH: &str = r"C:\var\lib\kubelet";
#[cfg(windows)]
const DEFAULT_PLUGIN_PATH: &str = r"C:\var\lib\kubelet\plugins";

#[cfg(not(windows))]
const DEFAULT_KUBELET_PATH: &str = "/var/lib/kubelet";
#[cfg(not(windows))]
const DEFAULT_PLUGIN_PATH: &str = "/var/lib/kubelet/plugins";

#[derive(Parser, Debug)]
#[command(name = "hostproxy")]
#[command(about = "Serves privileged storage operations to local clients over versioned RPC endpoints")]
pub struct Args {
    /// Directory (or pipe name prefix) endpoints are created under
    #[arg(long)]
    pub socket_dir: Option<PathBuf>,

    /// Root of kubelet pod volumes
    #[arg(long, default_value = DEFAULT_KUBELET_PATH)]
    pub kubelet_path: PathBuf,

    /// Root of plugin state
    #[arg(long, default_value = DEFAULT_PLUGIN_PATH)]
    pub plugin_path: PathBuf,

    /// Comma-separated API groups to host (default: all)
    #[arg(long, value_delimiter = ',')]
    pub groups: Vec<String>,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Log as JSON lines
    #[arg(long)]
    pub json_logs: bool,
}

impl Args {
    /// Validate the arguments into the process configuration.
    pub fn into_config(self) -> Result<ProxyConfig> {
        let groups: Vec<String> = self
            .groups
            .into_iter()
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();

        if let Some(unknown) = groups.iter().find(|g| !GROUPS.contains(&g.as_str())) {
            return Err(ProxyError::Config {
                message: format!(
                    "Unknown API group '{}' (expected one of: {})",
                    unknown,
                    GROUPS.join(", ")
                ),
            });
        }

        Ok(ProxyConfig {
            socket_dir: self.socket_dir.unwrap_or_else(default_socket_dir),
            roots: PathRoots::new(self.kubelet_path, self.plugin_path)?,
            groups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("hostproxy").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults_host_every_group() {
        let config = parse(&[]).into_config().unwrap();
        assert!(config.groups.is_empty());
        for group in GROUPS {
            assert!(config.hosts_group(group));
        }
        assert_eq!(config.roots.kubelet(), std::path::Path::new(DEFAULT_KUBELET_PATH));
    }

    #[test]
    fn test_group_list() {
        let config = parse(&["--groups", "disk, volume", "--socket-dir", "/tmp/hp"])
            .into_config()
            .unwrap();
        assert_eq!(config.groups, ["disk", "volume"]);
        assert!(!config.hosts_group("smb"));
        assert_eq!(config.socket_dir, PathBuf::from("/tmp/hp"));
    }

    #[test]
    fn test_unknown_group_rejected() {
        let err = parse(&["--groups", "disk,tape"]).into_config().unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
        assert!(err.to_string().contains("tape"));
    }

    #[cfg(unix)]
    #[test]
    fn test_relative_root_rejected() {
        let err = parse(&["--kubelet-path", "var/lib/kubelet"])
            .into_config()
            .unwrap_err();
        assert!(matches!(err, ProxyError::Config { .. }));
    }
}
