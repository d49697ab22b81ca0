//! Lifecycle coordination for the hosted endpoint set.
//!
//! The [`Coordinator`] owns every hosted endpoint. It opens all listeners at
//! once, runs one server task per endpoint, and treats the set as a unit: the
//! first endpoint to exit brings the others down, and [`Coordinator::wait`]
//! returns only after every task has reported back.
//!
//! ```text
//! Unstarted -> Starting -> Running -> Stopping -> Stopped
//!                  \
//!                   -> FailedToStart
//! ```

use crate::endpoint::EndpointDescriptor;
use crate::ipc::{provision_all, EndpointAddress, IpcServer, Provisioner, ServerHandle};
use crate::version::Version;
use crate::{ProxyError, Result};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Where the coordinator is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Unstarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    FailedToStart,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unstarted => "unstarted",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::FailedToStart => "failed to start",
        };
        f.write_str(name)
    }
}

/// An endpoint whose server exited with an error.
#[derive(Debug)]
pub struct EndpointFailure {
    pub group: String,
    pub version: Version,
    pub error: ProxyError,
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.group, self.version, self.error)
    }
}

/// Posted by each server task when it exits.
struct Completion {
    group: String,
    version: Version,
    result: Result<()>,
}

type ListeningCallback = Box<dyn FnOnce(&[EndpointAddress]) + Send>;

struct Hosted {
    address: EndpointAddress,
    handle: ServerHandle,
}

struct Inner {
    state: LifecycleState,
    hosted: Vec<Hosted>,
    completions: Option<mpsc::Receiver<Completion>>,
    on_listening: Option<ListeningCallback>,
}

/// Starts, supervises and stops a fixed set of endpoints.
///
/// All methods take `&self`; share the coordinator through an `Arc` to stop
/// it from another task (a signal handler, for instance).
pub struct Coordinator {
    descriptors: Vec<EndpointDescriptor>,
    provisioner: Arc<dyn Provisioner>,
    inner: Mutex<Inner>,
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("descriptors", &self.descriptors)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn new(descriptors: Vec<EndpointDescriptor>, provisioner: Arc<dyn Provisioner>) -> Self {
        Self {
            descriptors,
            provisioner,
            inner: Mutex::new(Inner {
                state: LifecycleState::Unstarted,
                hosted: Vec::new(),
                completions: None,
                on_listening: None,
            }),
        }
    }

    /// Call `callback` once every endpoint is listening.
    pub fn on_listening(self, callback: impl FnOnce(&[EndpointAddress]) + Send + 'static) -> Self {
        self.lock().on_listening = Some(Box::new(callback));
        self
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    pub fn descriptors(&self) -> &[EndpointDescriptor] {
        &self.descriptors
    }

    /// Addresses of the endpoints currently hosted.
    pub fn addresses(&self) -> Vec<EndpointAddress> {
        self.lock().hosted.iter().map(|h| h.address.clone()).collect()
    }

    /// Open every listener and start serving.
    ///
    /// A second call fails with [`ProxyError::AlreadyStarted`] and changes
    /// nothing. If any listener fails to open, the ones already opened are
    /// closed and [`ProxyError::StartupFailed`] is returned.
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.lock();
            if inner.state != LifecycleState::Unstarted {
                return Err(ProxyError::AlreadyStarted);
            }
            inner.state = LifecycleState::Starting;
        }

        info!("Starting {} endpoint(s)", self.descriptors.len());

        let listeners = match provision_all(self.provisioner.as_ref(), &self.descriptors) {
            Ok(listeners) => listeners,
            Err(err) => {
                error!("Endpoint provisioning failed: {}", err);
                self.lock().state = LifecycleState::FailedToStart;
                return Err(ProxyError::StartupFailed { errors: vec![err] });
            }
        };

        let (tx, rx) = mpsc::channel(self.descriptors.len().max(1));
        let mut hosted = Vec::with_capacity(listeners.len());

        for (descriptor, listener) in self.descriptors.iter().zip(listeners) {
            let mut server = IpcServer::new(descriptor.group(), descriptor.version().clone());
            descriptor.registrant().register(&mut server);

            let address = listener.address().clone();
            let (handle, signal) = ServerHandle::channel();
            let group = descriptor.group().to_string();
            let version = descriptor.version().clone();
            let tx = tx.clone();

            tokio::spawn(async move {
                // A panicking server still reports back.
                let result = match tokio::spawn(server.serve(listener, signal)).await {
                    Ok(result) => result,
                    Err(e) => Err(ProxyError::Other(format!("server task failed: {}", e))),
                };
                let completion = Completion {
                    group,
                    version,
                    result,
                };
                if tx.send(completion).await.is_err() {
                    debug!("Completion dropped; coordinator is gone");
                }
            });

            hosted.push(Hosted { address, handle });
        }
        drop(tx);

        let (callback, addresses) = {
            let mut inner = self.lock();
            inner.hosted = hosted;
            inner.completions = Some(rx);
            inner.state = LifecycleState::Running;
            let addresses: Vec<_> = inner.hosted.iter().map(|h| h.address.clone()).collect();
            (inner.on_listening.take(), addresses)
        };

        info!("All {} endpoint(s) listening", addresses.len());
        if let Some(callback) = callback {
            callback(&addresses);
        }

        Ok(())
    }

    /// Block until the endpoint set is down.
    ///
    /// Waits for the first endpoint to exit, stops the rest, then collects
    /// every remaining exit. Returns the endpoints that exited with an error;
    /// endpoints stopped by the cascade exit cleanly and are not reported.
    pub async fn wait(&self) -> Result<Vec<EndpointFailure>> {
        let (mut completions, expected) = {
            let mut inner = self.lock();
            match inner.state {
                LifecycleState::Running | LifecycleState::Stopping => {}
                _ => return Err(ProxyError::NotStarted),
            }
            let completions = inner.completions.take().ok_or_else(|| {
                ProxyError::Other("coordinator is already being waited on".to_string())
            })?;
            (completions, inner.hosted.len())
        };

        let mut failures = Vec::new();

        if expected > 0 {
            if let Some(first) = completions.recv().await {
                match &first.result {
                    Ok(()) => info!("Endpoint {} {} exited", first.group, first.version),
                    Err(e) => error!("Endpoint {} {} failed: {}", first.group, first.version, e),
                }
                record(&mut failures, first);
            }

            if let Err(e) = self.stop() {
                warn!("Failed to stop endpoints: {}", e);
            }

            let mut received = 1;
            while received < expected {
                match completions.recv().await {
                    Some(completion) => {
                        received += 1;
                        match &completion.result {
                            Ok(()) => debug!("Endpoint {} {} stopped", completion.group, completion.version),
                            Err(e) => warn!(
                                "Endpoint {} {} failed during shutdown: {}",
                                completion.group, completion.version, e
                            ),
                        }
                        record(&mut failures, completion);
                    }
                    None => break,
                }
            }
        }

        {
            let mut inner = self.lock();
            inner.state = LifecycleState::Stopped;
            inner.hosted.clear();
        }

        info!("All endpoints stopped ({} failure(s))", failures.len());
        Ok(failures)
    }

    /// Signal every endpoint to stop. Does not wait.
    ///
    /// Stopping an already stopping or stopped set is a no-op. Stopping a set
    /// that never reached `Running` fails with [`ProxyError::NotStarted`].
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.lock();
        match inner.state {
            LifecycleState::Running => {}
            LifecycleState::Stopping | LifecycleState::Stopped => return Ok(()),
            _ => return Err(ProxyError::NotStarted),
        }
        inner.state = LifecycleState::Stopping;

        info!("Stopping {} endpoint(s)", inner.hosted.len());
        for hosted in inner.hosted.iter_mut() {
            if !hosted.handle.shutdown() {
                debug!("Endpoint {} had already exited", hosted.address);
            }
        }
        Ok(())
    }

    /// [`start`](Self::start) then [`wait`](Self::wait).
    pub async fn run(&self) -> Result<Vec<EndpointFailure>> {
        self.start().await?;
        self.wait().await
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn record(failures: &mut Vec<EndpointFailure>, completion: Completion) {
    if let Err(error) = completion.result {
        failures.push(EndpointFailure {
            group: completion.group,
            version: completion.version,
            error,
        });
    }
}
