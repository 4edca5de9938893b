//! Connections used by generated commands to reach the remote service.
//!
//! Commands never hold a connection. Each invocation asks its
//! [`ConnectionProvider`] for one, so the target can depend on the flags of
//! that invocation (`--node`) or on configuration loaded after the tree was
//! built.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use clap::{Arg, ArgMatches};
use http::uri::PathAndQuery;
use tonic::{
    Request, Status,
    transport::{Channel, Endpoint},
};
use tracing::debug;

use crate::{
    codec::DynamicCodec,
    command::InvokeError,
    message::DynamicMessage,
    schema::MessageDescriptor,
};

/// Id and long name of the flag selecting the endpoint.
pub const NODE_FLAG: &str = "node";

/// Endpoint used when neither `--node` nor configuration names one.
pub const DEFAULT_NODE: &str = "localhost:9090";

/// A connection able to perform unary calls with dynamic messages.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Calls `method` (a `/<service>/<method>` path) and decodes the response
    /// as `output`.
    ///
    /// # Errors
    ///
    /// Returns the [`Status`] of a failed call, transport failures included.
    async fn invoke(
        &self,
        method: &str,
        input: DynamicMessage,
        output: &MessageDescriptor,
    ) -> Result<DynamicMessage, Status>;
}

/// Supplies a connection for one invocation.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Returns a connection for the command whose matches are `matches`.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Connection`] when no connection can be made.
    async fn connection(&self, matches: &ArgMatches) -> Result<Arc<dyn Connection>, InvokeError>;
}

/// The `--node` argument, for attaching to generated commands.
pub fn node_flag() -> Arg {
    Arg::new(NODE_FLAG)
        .long(NODE_FLAG)
        .value_name("ADDR")
        .help(format!("gRPC endpoint to connect to [default: {DEFAULT_NODE}]"))
}

/// Connects to a gRPC endpoint over a tonic [`Channel`].
#[derive(Debug, Clone)]
pub struct GrpcConnector {
    default_endpoint: String,
    connect_timeout: Option<Duration>,
}

impl Default for GrpcConnector {
    fn default() -> Self {
        Self::new(DEFAULT_NODE)
    }
}

impl GrpcConnector {
    pub fn new(default_endpoint: impl Into<String>) -> Self {
        Self {
            default_endpoint: default_endpoint.into(),
            connect_timeout: None,
        }
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// The endpoint an invocation with `matches` connects to: `--node` when
    /// the command has it and it was given, the default otherwise.
    pub fn endpoint_for(&self, matches: &ArgMatches) -> String {
        let node = matches
            .try_get_one::<String>(NODE_FLAG)
            .ok()
            .flatten()
            .map_or(self.default_endpoint.as_str(), String::as_str);
        normalize_endpoint(node)
    }
}

#[async_trait]
impl ConnectionProvider for GrpcConnector {
    async fn connection(&self, matches: &ArgMatches) -> Result<Arc<dyn Connection>, InvokeError> {
        let endpoint = self.endpoint_for(matches);
        let mut target = Endpoint::from_shared(endpoint.clone())
            .map_err(|e| InvokeError::Connection(format!("invalid endpoint {endpoint}: {e}")))?;
        if let Some(timeout) = self.connect_timeout {
            target = target.connect_timeout(timeout);
        }

        debug!(%endpoint, "connecting");
        let channel = target
            .connect()
            .await
            .map_err(|e| InvokeError::Connection(format!("{endpoint}: {e}")))?;
        Ok(Arc::new(GrpcConnection::new(channel)))
    }
}

/// A [`Connection`] over an established tonic [`Channel`].
#[derive(Debug, Clone)]
pub struct GrpcConnection {
    channel: Channel,
}

impl GrpcConnection {
    pub fn new(channel: Channel) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Connection for GrpcConnection {
    async fn invoke(
        &self,
        method: &str,
        input: DynamicMessage,
        output: &MessageDescriptor,
    ) -> Result<DynamicMessage, Status> {
        let path = PathAndQuery::try_from(method)
            .map_err(|e| Status::invalid_argument(format!("invalid method path {method}: {e}")))?;

        let mut grpc = tonic::client::Grpc::new(self.channel.clone());
        grpc.ready()
            .await
            .map_err(|e| Status::unavailable(format!("service was not ready: {e}")))?;

        debug!(%method, "invoking");
        let response = grpc
            .unary(Request::new(input), path, DynamicCodec::new(output.clone()))
            .await?;
        Ok(response.into_inner())
    }
}

fn normalize_endpoint(endpoint: &str) -> String {
    if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
        endpoint.to_owned()
    } else {
        format!("http://{endpoint}")
    }
}
