//! hostproxy core - multi-version RPC hosting and dispatch.
//!
//! This crate hosts one local-IPC endpoint per (API group, protocol version)
//! pair and routes each call through a per-version adapter into a single
//! version-agnostic implementation. It knows nothing about the storage
//! operations themselves; those live in `hostproxy-apis`.
//!
//! # Example
//!
//! ```rust,ignore
//! use hostproxy_core::{Coordinator, EndpointRegistry, LocalSocketProvisioner};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> hostproxy_core::Result<()> {
//!     let mut registry = EndpointRegistry::new();
//!     registry.extend(my_group::endpoints(implementation))?;
//!
//!     let coordinator = Coordinator::new(
//!         registry.into_descriptors(),
//!         Arc::new(LocalSocketProvisioner::new("/run/hostproxy")),
//!     );
//!     let failures = coordinator.run().await?;
//!     println!("{} endpoint(s) failed", failures.len());
//!     Ok(())
//! }
//! ```

pub mod adapter;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod version;

pub use adapter::{structural, Conversion, ConversionError, Operation, VersionAdapter};
pub use config::{default_socket_dir, AppConfig, IpcConfig, PathRoots, ProxyConfig};
pub use endpoint::{EndpointDescriptor, EndpointRegistry, Registrant};
pub use error::{ProxyError, Result};
pub use ipc::{EndpointAddress, IpcClient, LocalSocketProvisioner, Provisioner};
pub use lifecycle::{Coordinator, EndpointFailure, LifecycleState};
pub use version::{Qualifier, Version};
