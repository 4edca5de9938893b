//! Descriptor-driven command trees for gRPC query services.
//!
//! Given protobuf service descriptors and a declarative description of which
//! services belong to which module, this crate builds a `query` command group
//! with one leaf per RPC method. Every leaf maps its command-line arguments to
//! the method's request message, performs the unary call, and prints the
//! response as canonical, indented JSON.
//!
//! # Key Components
//!
//! - **Schema**: [`DescriptorPool`] indexes decoded `FileDescriptorSet`s and
//!   serves as the default [`SchemaRegistry`] and [`TypeResolver`]
//! - **Messages**: [`DynamicMessage`] values with a protobuf wire codec
//!   ([`DynamicCodec`]) and canonical JSON rendering ([`MarshalOptions`])
//! - **Descriptors**: [`CommandDescriptor`] and [`MethodOptions`], usually read
//!   from `autocli.toml` through [`Config`]
//! - **Builder**: [`Builder`] assembles [`CommandNode`] trees, delegating
//!   argument binding to a [`FieldBinder`] and connections to a
//!   [`ConnectionProvider`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use autocli::{Builder, Config, DescriptorPool, GrpcConnector, node_flag};
//!
//! # async fn example(pool: DescriptorPool) -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("autocli.toml")?;
//! let builder = Builder::new(Arc::new(pool), Arc::new(GrpcConnector::default()))
//!     .with_post_build_hook(|leaf| {
//!         leaf.add_arg(node_flag());
//!     });
//!
//! let query = builder.build_query_command(&config.modules, Default::default())?;
//! let matches = query.to_clap().get_matches();
//! query
//!     .execute(&matches, &mut std::io::stdout(), &mut std::io::stderr())
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! Built trees are immutable in use. Handlers share their binder, connection
//! provider and output descriptor through `Arc`s, so a tree may be rendered
//! and executed from any task.

mod binder;
mod builder;
mod client;
mod codec;
mod command;
mod config;
mod json;
mod message;
mod options;
mod schema;

#[cfg(test)]
pub(crate) mod testing;

pub use binder::{Arity, BindingError, FieldBinder, FlagBinder, MessageBinder};
pub use builder::{BuildError, Builder, PostBuildHook};
pub use client::{
    Connection, ConnectionProvider, DEFAULT_NODE, GrpcConnection, GrpcConnector, NODE_FLAG,
    node_flag,
};
pub use codec::{DynamicCodec, DynamicDecoder, DynamicEncoder};
pub use command::{CommandHandler, CommandNode, Invocation, InvokeError, POSITIONAL_ARGS};
pub use config::{CONFIG_ENV_VAR, CONFIG_FILE_NAME, Config, ConfigError};
pub use json::{MarshalOptions, parse_json};
pub use message::{DynamicMessage, MessageError, Value};
pub use options::{
    CommandDescriptor, EffectiveCommandSpec, FlagOptions, MethodOptions, PositionalArg,
    to_kebab_case,
};
pub use schema::{
    DescriptorPool, EnumDescriptor, FieldDescriptor, Kind, MessageDescriptor, MethodDescriptor,
    SchemaError, SchemaRegistry, ServiceDescriptor, TypeResolver, resolve_message_type,
};
