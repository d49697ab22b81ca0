//! Per-version adapters between wire schemas and internal implementations.
//!
//! An [`Operation`] describes one RPC method at one wire version: how to turn
//! the wire request into the internal request, the minimum version it is
//! served from, and how to turn the internal response back into the wire
//! response. Most operations use [`structural`] conversion, which matches
//! fields by name through serde; the irregular ones (narrowed integers,
//! re-keyed maps, renamed fields) supply explicit functions.
//!
//! A [`VersionAdapter`] collects the operations of one (group, version) over
//! a single implementation and is the [`Registrant`] for that endpoint.

use crate::endpoint::{EndpointDescriptor, Registrant};
use crate::ipc::{Dispatch, IpcServer};
use crate::version::Version;
use crate::{ProxyError, Result};
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A value that could not be converted between schemas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionError {
    pub field: String,
    pub message: String,
}

impl ConversionError {
    pub fn new(field: impl Into<String>, message: impl fmt::Display) -> Self {
        Self {
            field: field.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for ConversionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.field.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

impl std::error::Error for ConversionError {}

/// A conversion between two schemas.
pub type Conversion<A, B> = fn(A) -> std::result::Result<B, ConversionError>;

/// Convert by matching serialized field names.
///
/// Integer fields are range-checked by the target type, so a value that does
/// not fit fails instead of truncating.
pub fn structural<A: Serialize, B: DeserializeOwned>(
    value: A,
) -> std::result::Result<B, ConversionError> {
    let json = serde_json::to_value(value).map_err(|e| ConversionError::new("", e))?;
    serde_json::from_value(json).map_err(|e| ConversionError::new("", e))
}

/// Narrow an integer, naming the field on failure.
pub fn narrow<A, B>(field: &str, value: A) -> std::result::Result<B, ConversionError>
where
    A: Copy + fmt::Display,
    B: TryFrom<A>,
{
    B::try_from(value)
        .map_err(|_| ConversionError::new(field, format!("{} is out of range", value)))
}

/// Parse a numeric string field.
pub fn parse_number<B: std::str::FromStr>(
    field: &str,
    value: &str,
) -> std::result::Result<B, ConversionError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConversionError::new(field, format!("{:?} is not a valid number", value)))
}

/// One RPC method at one wire version.
pub struct Operation<WReq, Req, Resp, WResp> {
    name: &'static str,
    since: Option<Version>,
    decode: Conversion<WReq, Req>,
    encode: Conversion<Resp, WResp>,
}

impl<WReq, Req, Resp, WResp> Operation<WReq, Req, Resp, WResp>
where
    WReq: Serialize,
    Req: DeserializeOwned,
    Resp: Serialize,
    WResp: DeserializeOwned,
{
    /// An operation whose request and response convert structurally.
    pub fn structural(name: &'static str) -> Self {
        Self::new(name, structural::<WReq, Req>, structural::<Resp, WResp>)
    }
}

impl<WReq, Req, Resp> Operation<WReq, Req, Resp, Resp>
where
    WReq: Serialize,
    Req: DeserializeOwned,
{
    /// An operation whose request converts structurally and whose response
    /// is sent as the implementation returns it.
    pub fn structural_request(name: &'static str) -> Self {
        Self::new(name, structural::<WReq, Req>, Ok)
    }
}

impl<Req, Resp> Operation<Req, Req, Resp, Resp> {
    /// An operation whose wire schema is the internal one.
    pub fn passthrough(name: &'static str) -> Self {
        Self::new(name, Ok, Ok)
    }
}

impl<WReq, Req, Resp, WResp> Operation<WReq, Req, Resp, WResp> {
    pub fn new(
        name: &'static str,
        decode: Conversion<WReq, Req>,
        encode: Conversion<Resp, WResp>,
    ) -> Self {
        Self {
            name,
            since: None,
            decode,
            encode,
        }
    }

    /// Reject calls negotiated below `minimum`.
    pub fn since(mut self, minimum: Version) -> Self {
        self.since = Some(minimum);
        self
    }

    pub fn decode_with(mut self, decode: Conversion<WReq, Req>) -> Self {
        self.decode = decode;
        self
    }

    pub fn encode_with(mut self, encode: Conversion<Resp, WResp>) -> Self {
        self.encode = encode;
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn minimum(&self) -> Option<&Version> {
        self.since.as_ref()
    }

    /// Serve one call.
    ///
    /// Decoding failures and version floors reject the call before `invoke`
    /// runs. Errors from `invoke` pass through untouched. A response that the
    /// wire schema cannot hold is reported as [`ProxyError::Unrepresentable`];
    /// by then the operation has already taken effect.
    pub async fn handle<F, Fut>(&self, wire: WReq, negotiated: &Version, invoke: F) -> Result<WResp>
    where
        F: FnOnce(Req) -> Fut,
        Fut: Future<Output = Result<Resp>>,
    {
        let request = (self.decode)(wire).map_err(|e| ProxyError::InvalidArgument {
            message: format!("{}: {}", self.name, e),
        })?;

        if let Some(minimum) = &self.since {
            if !negotiated.at_least(minimum) {
                return Err(ProxyError::UnsupportedVersion {
                    operation: self.name.to_string(),
                    version: negotiated.to_string(),
                    minimum: minimum.to_string(),
                });
            }
        }

        let response = invoke(request).await?;

        (self.encode)(response).map_err(|e| ProxyError::Unrepresentable {
            field: if e.field.is_empty() {
                self.name.to_string()
            } else {
                e.field
            },
            message: e.message,
        })
    }
}

type Route<T> = Arc<dyn Fn(Arc<T>, Value, Version) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Method table for one (group, version) over one implementation.
pub struct VersionAdapter<T: ?Sized> {
    group: String,
    version: Version,
    implementation: Arc<T>,
    routes: HashMap<&'static str, Route<T>>,
}

impl<T: ?Sized> Clone for VersionAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            group: self.group.clone(),
            version: self.version.clone(),
            implementation: self.implementation.clone(),
            routes: self.routes.clone(),
        }
    }
}

impl<T: ?Sized + Send + Sync + 'static> VersionAdapter<T> {
    pub fn new(group: impl Into<String>, version: Version, implementation: Arc<T>) -> Self {
        Self {
            group: group.into(),
            version,
            implementation,
            routes: HashMap::new(),
        }
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Serve `operation` by calling `call` on the implementation.
    pub fn route<WReq, Req, Resp, WResp, F, Fut>(
        mut self,
        operation: Operation<WReq, Req, Resp, WResp>,
        call: F,
    ) -> Self
    where
        WReq: DeserializeOwned + Send + 'static,
        Req: Send + 'static,
        Resp: Send + 'static,
        WResp: Serialize + Send + 'static,
        F: Fn(Arc<T>, Req, Version) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Resp>> + Send + 'static,
    {
        let name = operation.name();
        let operation = Arc::new(operation);
        let call = Arc::new(call);

        let route: Route<T> = Arc::new(move |implementation, params, version| {
            let operation = operation.clone();
            let call = call.clone();
            Box::pin(async move {
                let wire: WReq = serde_json::from_value(params).map_err(|e| {
                    ProxyError::InvalidArgument {
                        message: format!("{}: {}", operation.name(), e),
                    }
                })?;
                let response = operation
                    .handle(wire, &version, |request| {
                        call(implementation, request, version.clone())
                    })
                    .await?;
                Ok(serde_json::to_value(response)?)
            })
        });

        let replaced = self.routes.insert(name, route);
        debug_assert!(
            replaced.is_none(),
            "{} routed twice on {} {}",
            name,
            self.group,
            self.version
        );
        self
    }

    /// Method names served, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut methods: Vec<_> = self.routes.keys().copied().collect();
        methods.sort_unstable();
        methods
    }

    /// Describe this adapter as an endpoint to host.
    pub fn into_descriptor(self) -> EndpointDescriptor {
        let group = self.group.clone();
        let version = self.version.clone();
        EndpointDescriptor::new(group, version, Arc::new(self))
    }

    /// Invoke `method` with JSON params.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let route = self
            .routes
            .get(method)
            .ok_or_else(|| ProxyError::MethodNotFound(method.to_string()))?;
        route(self.implementation.clone(), params, self.version.clone()).await
    }
}

#[async_trait::async_trait]
impl<T: ?Sized + Send + Sync + 'static> Dispatch for VersionAdapter<T> {
    async fn dispatch(&self, method: &str, params: Value) -> Result<Value> {
        self.call(method, params).await
    }
}

impl<T: ?Sized + Send + Sync + 'static> Registrant for VersionAdapter<T> {
    fn register(&self, server: &mut IpcServer) {
        server.register_service(Arc::new(self.clone()));
    }
}
