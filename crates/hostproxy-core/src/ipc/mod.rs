//! Local IPC transport.
//!
//! Length-prefixed JSON-RPC 2.0 over Unix domain sockets (named pipes on
//! Windows), one listener per hosted endpoint.
//!
//! # Architecture
//!
//! - **Listener**: derives endpoint addresses and opens/closes listeners
//! - **Server**: accepts connections for one endpoint, dispatches calls to its service
//! - **Client**: connects to one endpoint and issues calls
//! - **Protocol**: framing and JSON-RPC types shared by both sides

pub mod client;
pub mod listener;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use listener::{
    provision_all, Connection, EndpointAddress, Listener, LocalSocketProvisioner, Provisioner,
};
pub use protocol::{IpcRequest, IpcResponse};
pub use server::{Dispatch, IpcServer, RunningServer, ServerHandle, ShutdownSignal};
