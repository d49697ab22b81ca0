//! Endpoint addressing and listener provisioning.
//!
//! Every (group, version) endpoint gets its own deterministic local address:
//! a socket file `<dir>/<group>-<version>.sock` on Unix, a named pipe
//! `\\.\pipe\<prefix>-<group>-<version>` on Windows.
//!
//! Provisioning sits behind the [`Provisioner`] trait so the lifecycle layer
//! never names a concrete transport.

use crate::config::IpcConfig;
use crate::endpoint::EndpointDescriptor;
use crate::version::Version;
use crate::{ProxyError, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

/// A bidirectional byte stream accepted from a listener.
pub trait IpcStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IpcStream for T {}

/// Boxed connection handed to the server loop.
pub type Connection = Box<dyn IpcStream>;

/// Address of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EndpointAddress(String);

impl EndpointAddress {
    /// Derive the address for `group` at `version` under `prefix`.
    pub fn derive(prefix: &Path, group: &str, version: &Version) -> Self {
        #[cfg(windows)]
        {
            let stem = prefix
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| crate::config::AppConfig::APP_NAME.to_string());
            Self(format!(
                "{}{}-{}-{}",
                IpcConfig::PIPE_PREFIX,
                stem,
                group,
                version
            ))
        }

        #[cfg(not(windows))]
        {
            let file = format!("{}-{}{}", group, version, IpcConfig::SOCKET_SUFFIX);
            Self(prefix.join(file).to_string_lossy().into_owned())
        }
    }

    /// Wrap an already-derived address.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The address as a filesystem path (socket file on Unix).
    pub fn as_path(&self) -> &Path {
        Path::new(&self.0)
    }
}

impl fmt::Display for EndpointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An open local-IPC listener.
#[async_trait]
pub trait Listener: Send + 'static {
    fn address(&self) -> &EndpointAddress;

    /// Wait for the next connection.
    async fn accept(&mut self) -> std::io::Result<Connection>;

    /// Stop listening and release the address.
    fn close(self: Box<Self>) -> std::io::Result<()>;
}

/// Opens listeners for endpoint addresses.
pub trait Provisioner: Send + Sync + 'static {
    /// The address `group` at `version` is served on.
    fn address(&self, group: &str, version: &Version) -> EndpointAddress;

    /// Open a listener on `address`.
    ///
    /// Fails with [`ProxyError::AddressInUse`] when another live listener owns
    /// the address and [`ProxyError::Bind`] for any other failure.
    fn open(&self, address: &EndpointAddress) -> Result<Box<dyn Listener>>;
}

/// Open one listener per descriptor, in order.
///
/// Fails fast on the first error. Listeners already opened by this call are
/// closed before the error is returned; close failures are logged and never
/// replace the original error.
pub fn provision_all(
    provisioner: &dyn Provisioner,
    descriptors: &[EndpointDescriptor],
) -> Result<Vec<Box<dyn Listener>>> {
    let mut opened: Vec<Box<dyn Listener>> = Vec::with_capacity(descriptors.len());

    for descriptor in descriptors {
        let address = provisioner.address(descriptor.group(), descriptor.version());
        match provisioner.open(&address) {
            Ok(listener) => {
                debug!("Opened listener {}", address);
                opened.push(listener);
            }
            Err(err) => {
                warn!(
                    "Failed to open {} for {} {}: {}",
                    address,
                    descriptor.group(),
                    descriptor.version(),
                    err
                );
                close_all(opened);
                return Err(err);
            }
        }
    }

    Ok(opened)
}

fn close_all(listeners: Vec<Box<dyn Listener>>) {
    for listener in listeners.into_iter().rev() {
        let address = listener.address().clone();
        match listener.close() {
            Ok(()) => debug!("Closed listener {} during rollback", address),
            Err(e) => warn!("Failed to close listener {} during rollback: {}", address, e),
        }
    }
}

/// Provisions the platform's local IPC transport.
#[derive(Debug, Clone)]
pub struct LocalSocketProvisioner {
    prefix: PathBuf,
}

impl LocalSocketProvisioner {
    /// Create a provisioner rooted at `prefix` (socket directory on Unix,
    /// pipe name prefix on Windows).
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Provisioner for LocalSocketProvisioner {
    fn address(&self, group: &str, version: &Version) -> EndpointAddress {
        EndpointAddress::derive(&self.prefix, group, version)
    }

    fn open(&self, address: &EndpointAddress) -> Result<Box<dyn Listener>> {
        #[cfg(unix)]
        {
            unix::open(address)
        }

        #[cfg(windows)]
        {
            windows::open(address)
        }

        #[cfg(not(any(unix, windows)))]
        {
            Err(ProxyError::Bind {
                address: address.to_string(),
                message: "local IPC is not supported on this platform".to_string(),
                source: None,
            })
        }
    }
}

fn bind_error(address: &EndpointAddress, err: std::io::Error) -> ProxyError {
    if err.kind() == std::io::ErrorKind::AddrInUse {
        ProxyError::AddressInUse {
            address: address.to_string(),
        }
    } else {
        ProxyError::Bind {
            address: address.to_string(),
            message: err.to_string(),
            source: Some(err),
        }
    }
}

#[cfg(unix)]
mod unix {
    use super::*;
    use std::os::unix::fs::FileTypeExt;
    use tokio::net::UnixListener;

    /// Unix domain socket listener that unlinks its socket file on close.
    pub(super) struct UnixSocketListener {
        listener: Option<UnixListener>,
        address: EndpointAddress,
    }

    pub(super) fn open(address: &EndpointAddress) -> Result<Box<dyn Listener>> {
        let path = address.as_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| bind_error(address, e))?;
        }

        match std::fs::symlink_metadata(path) {
            Ok(metadata) => {
                // Only a socket file is ours to reclaim.
                if !metadata.file_type().is_socket() {
                    return Err(ProxyError::Bind {
                        address: address.to_string(),
                        message: "address is occupied by a file that is not a socket".to_string(),
                        source: None,
                    });
                }
                // A socket file with a live peer is in use; one without is stale.
                if std::os::unix::net::UnixStream::connect(path).is_ok() {
                    return Err(ProxyError::AddressInUse {
                        address: address.to_string(),
                    });
                }
                debug!("Removing stale socket {}", address);
                std::fs::remove_file(path).map_err(|e| bind_error(address, e))?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(address, e)),
        }

        let listener = UnixListener::bind(path).map_err(|e| bind_error(address, e))?;
        info!("Listening on {}", address);

        Ok(Box::new(UnixSocketListener {
            listener: Some(listener),
            address: address.clone(),
        }))
    }

    impl UnixSocketListener {
        fn release(&mut self) -> std::io::Result<()> {
            if self.listener.take().is_none() {
                return Ok(());
            }
            match std::fs::remove_file(self.address.as_path()) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
                _ => Ok(()),
            }
        }
    }

    #[async_trait]
    impl Listener for UnixSocketListener {
        fn address(&self) -> &EndpointAddress {
            &self.address
        }

        async fn accept(&mut self) -> std::io::Result<Connection> {
            let listener = self.listener.as_ref().ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "listener closed")
            })?;
            let (stream, _) = listener.accept().await?;
            Ok(Box::new(stream))
        }

        fn close(mut self: Box<Self>) -> std::io::Result<()> {
            self.release()
        }
    }

    impl Drop for UnixSocketListener {
        fn drop(&mut self) {
            if let Err(e) = self.release() {
                warn!("Failed to remove socket {}: {}", self.address, e);
            }
        }
    }
}

#[cfg(windows)]
mod windows {
    use super::*;
    use tokio::net::windows::named_pipe::{NamedPipeServer, ServerOptions};

    /// Named pipe listener. Each accepted client consumes one pipe instance;
    /// the next instance is created before the connection is handed out.
    pub(super) struct NamedPipeListener {
        next: Option<NamedPipeServer>,
        address: EndpointAddress,
    }

    pub(super) fn open(address: &EndpointAddress) -> Result<Box<dyn Listener>> {
        let first = ServerOptions::new()
            .first_pipe_instance(true)
            .create(address.as_str())
            .map_err(|e| {
                // A pipe that already exists refuses first_pipe_instance.
                if e.kind() == std::io::ErrorKind::PermissionDenied {
                    ProxyError::AddressInUse {
                        address: address.to_string(),
                    }
                } else {
                    bind_error(address, e)
                }
            })?;
        info!("Listening on {}", address);

        Ok(Box::new(NamedPipeListener {
            next: Some(first),
            address: address.clone(),
        }))
    }

    #[async_trait]
    impl Listener for NamedPipeListener {
        fn address(&self) -> &EndpointAddress {
            &self.address
        }

        async fn accept(&mut self) -> std::io::Result<Connection> {
            let server = match self.next.take() {
                Some(server) => server,
                None => ServerOptions::new().create(self.address.as_str())?,
            };
            server.connect().await?;
            self.next = Some(ServerOptions::new().create(self.address.as_str())?);
            Ok(Box::new(server))
        }

        fn close(mut self: Box<Self>) -> std::io::Result<()> {
            self.next.take();
            Ok(())
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::endpoint::{EndpointDescriptor, Registrant};
    use crate::ipc::server::IpcServer;
    use std::sync::Arc;
    use tempfile::TempDir;

    struct NoService;

    impl Registrant for NoService {
        fn register(&self, _server: &mut IpcServer) {}
    }

    fn descriptor(group: &str, version: &str) -> EndpointDescriptor {
        EndpointDescriptor::new(group, Version::parse(version).unwrap(), Arc::new(NoService))
    }

    #[test]
    fn test_address_is_unique_per_group_and_version() {
        let prefix = Path::new("/run/hostproxy");
        let v1 = Version::parse("v1").unwrap();
        let beta = Version::parse("v1beta3").unwrap();

        let a = EndpointAddress::derive(prefix, "disk", &v1);
        assert_eq!(a.as_str(), "/run/hostproxy/disk-v1.sock");
        assert_ne!(a, EndpointAddress::derive(prefix, "disk", &beta));
        assert_ne!(a, EndpointAddress::derive(prefix, "volume", &v1));
    }

    #[tokio::test]
    async fn test_open_and_close_unlinks_socket() {
        let dir = TempDir::new().unwrap();
        let provisioner = LocalSocketProvisioner::new(dir.path());
        let address = provisioner.address("disk", &Version::parse("v1").unwrap());

        let listener = provisioner.open(&address).unwrap();
        assert!(address.as_path().exists());

        listener.close().unwrap();
        assert!(!address.as_path().exists());
    }

    #[tokio::test]
    async fn test_open_live_address_is_address_in_use() {
        let dir = TempDir::new().unwrap();
        let provisioner = LocalSocketProvisioner::new(dir.path());
        let address = provisioner.address("smb", &Version::parse("v1").unwrap());

        let _live = provisioner.open(&address).unwrap();
        let err = provisioner.open(&address).err().unwrap();
        assert!(matches!(err, ProxyError::AddressInUse { .. }), "got {err:?}");
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let provisioner = LocalSocketProvisioner::new(dir.path());
        let address = provisioner.address("iscsi", &Version::parse("v1").unwrap());

        // Bind with std and drop without unlinking to leave a stale file.
        drop(std::os::unix::net::UnixListener::bind(address.as_path()).unwrap());
        assert!(address.as_path().exists());

        let listener = provisioner.open(&address).unwrap();
        listener.close().unwrap();
    }

    #[tokio::test]
    async fn test_regular_file_at_address_is_left_alone() {
        let dir = TempDir::new().unwrap();
        let provisioner = LocalSocketProvisioner::new(dir.path());
        let address = provisioner.address("disk", &Version::parse("v1").unwrap());
        std::fs::write(address.as_path(), b"user data").unwrap();

        let err = provisioner.open(&address).err().unwrap();
        assert!(matches!(err, ProxyError::Bind { .. }), "got {err:?}");
        assert_eq!(std::fs::read(address.as_path()).unwrap(), b"user data");
    }

    #[tokio::test]
    async fn test_provision_all_rolls_back_on_failure() {
        let dir = TempDir::new().unwrap();
        let provisioner = LocalSocketProvisioner::new(dir.path());
        let descriptors = vec![
            descriptor("disk", "v1"),
            descriptor("volume", "v1"),
            descriptor("smb", "v1"),
            descriptor("iscsi", "v1"),
        ];

        // Occupy the third address.
        let blocker_address = provisioner.address("smb", &Version::parse("v1").unwrap());
        let _blocker = provisioner.open(&blocker_address).unwrap();

        let err = provision_all(&provisioner, &descriptors).err().unwrap();
        assert!(matches!(err, ProxyError::AddressInUse { .. }));

        for group in ["disk", "volume"] {
            let address = provisioner.address(group, &Version::parse("v1").unwrap());
            assert!(!address.as_path().exists(), "{address} should be unlinked");
            assert!(std::os::unix::net::UnixStream::connect(address.as_path()).is_err());
        }
        let untouched = provisioner.address("iscsi", &Version::parse("v1").unwrap());
        assert!(!untouched.as_path().exists());
        assert!(blocker_address.as_path().exists());
    }

    #[tokio::test]
    async fn test_provision_all_opens_every_descriptor() {
        let dir = TempDir::new().unwrap();
        let provisioner = LocalSocketProvisioner::new(dir.path().join("nested"));
        let descriptors = vec![descriptor("disk", "v1beta3"), descriptor("disk", "v1")];

        let listeners = provision_all(&provisioner, &descriptors).unwrap();
        assert_eq!(listeners.len(), 2);
        for listener in listeners {
            assert!(listener.address().as_path().exists());
            listener.close().unwrap();
        }
    }
}
