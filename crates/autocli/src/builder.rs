//! Command tree construction from descriptor trees.
//!
//! [`Builder`] turns a map of module descriptors into a `query` command group.
//! For every name at the module level exactly one command is installed, with
//! precedence: a command already present on the root, then a custom command
//! supplied by the caller, then a command generated from the descriptor.
//!
//! Generation walks each [`CommandDescriptor`] depth first. Nested groups are
//! attached before the leaves of the bound service, and every leaf is compiled
//! from one RPC method by [`Builder::build_method_command`]. Any failure
//! aborts the whole build; no partial tree is attached.
//!
//! # Example
//!
//! ```no_run
//! use std::{collections::BTreeMap, sync::Arc};
//!
//! use autocli::{Builder, CommandDescriptor, DescriptorPool, GrpcConnector};
//!
//! # fn example(pool: DescriptorPool) -> Result<(), autocli::BuildError> {
//! let builder = Builder::new(Arc::new(pool), Arc::new(GrpcConnector::default()));
//! let modules = BTreeMap::from([(
//!     "bank".to_owned(),
//!     CommandDescriptor::for_service("cosmos.bank.v1beta1.Query"),
//! )]);
//! let query = builder.build_query_command(&modules, BTreeMap::new())?;
//! let cli = query.to_clap();
//! # Ok(())
//! # }
//! ```

use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    fmt,
    sync::Arc,
};

use async_trait::async_trait;
use tracing::{debug, instrument, warn};

use crate::{
    binder::{BindingError, FieldBinder, FlagBinder, MessageBinder},
    client::ConnectionProvider,
    command::{CommandHandler, CommandNode, InvokeError, Invocation},
    json::MarshalOptions,
    options::{CommandDescriptor, EffectiveCommandSpec, MethodOptions},
    schema::{
        MessageDescriptor, MethodDescriptor, SchemaError, SchemaRegistry, TypeResolver,
        resolve_message_type,
    },
};

/// Errors that abort building a command tree.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BuildError {
    /// A descriptor names a service the registry does not know.
    #[error("can't find service {service}: {source}")]
    NotFound {
        service: String,
        #[source]
        source: SchemaError,
    },

    /// A method option record targets a method the service does not declare.
    #[error("rpc method {method:?} not found for service {service:?}")]
    UnknownMethod { method: String, service: String },

    /// The field binder rejected a method's input message.
    #[error(transparent)]
    Binding(#[from] BindingError),
}

/// Invoked on every generated leaf right after it is compiled.
pub type PostBuildHook = Arc<dyn Fn(&mut CommandNode) + Send + Sync>;

/// Builds command trees from descriptors.
///
/// Every dependency is injected: the schema registry at construction, the
/// rest through the `with_*` methods.
pub struct Builder {
    registry: Arc<dyn SchemaRegistry>,
    type_resolver: Option<Arc<dyn TypeResolver>>,
    binder: Arc<dyn FieldBinder>,
    connector: Arc<dyn ConnectionProvider>,
    post_build: Option<PostBuildHook>,
    marshal_options: MarshalOptions,
}

impl fmt::Debug for Builder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("type_resolver", &self.type_resolver.is_some())
            .field("post_build", &self.post_build.is_some())
            .field("marshal_options", &self.marshal_options)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// Creates a builder resolving services through `registry` and
    /// connecting through `connector`.
    ///
    /// # Default Values
    ///
    /// - Type resolver: none (message shapes describe themselves)
    /// - Field binder: [`FlagBinder`]
    /// - Post-build hook: none
    /// - Output: [`MarshalOptions::canonical`]
    pub fn new(registry: Arc<dyn SchemaRegistry>, connector: Arc<dyn ConnectionProvider>) -> Self {
        Self {
            registry,
            type_resolver: None,
            binder: Arc::new(FlagBinder::new()),
            connector,
            post_build: None,
            marshal_options: MarshalOptions::canonical(),
        }
    }

    #[must_use]
    pub fn with_type_resolver(mut self, resolver: Arc<dyn TypeResolver>) -> Self {
        self.type_resolver = Some(resolver);
        self
    }

    #[must_use]
    pub fn with_binder(mut self, binder: Arc<dyn FieldBinder>) -> Self {
        self.binder = binder;
        self
    }

    /// Runs `hook` on every generated leaf, typically to add connection
    /// flags such as [`crate::client::node_flag`].
    #[must_use]
    pub fn with_post_build_hook(
        mut self,
        hook: impl Fn(&mut CommandNode) + Send + Sync + 'static,
    ) -> Self {
        self.post_build = Some(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn with_marshal_options(mut self, options: MarshalOptions) -> Self {
        self.marshal_options = options;
        self
    }

    /// Builds the `query` group (alias `q`) for `modules`, preferring
    /// `custom` commands where both name the same module.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] raised while generating any module.
    #[instrument(skip_all, fields(modules = modules.len(), custom = custom.len()))]
    pub fn build_query_command(
        &self,
        modules: &BTreeMap<String, CommandDescriptor>,
        custom: BTreeMap<String, CommandNode>,
    ) -> Result<CommandNode, BuildError> {
        let mut query = CommandNode::new("query")
            .with_about("Querying subcommands")
            .with_aliases(["q"]);
        self.enhance_query_command(&mut query, modules, custom)?;
        Ok(query)
    }

    /// Adds a command for every module name in `modules` or `custom` that
    /// `root` does not already have.
    ///
    /// Names are processed in sorted order. On error `root` is left
    /// unchanged.
    ///
    /// # Errors
    ///
    /// Returns the first [`BuildError`] raised while generating any module.
    #[instrument(skip_all, fields(root = %root.name()))]
    pub fn enhance_query_command(
        &self,
        root: &mut CommandNode,
        modules: &BTreeMap<String, CommandDescriptor>,
        mut custom: BTreeMap<String, CommandNode>,
    ) -> Result<(), BuildError> {
        let names: BTreeSet<String> = modules.keys().chain(custom.keys()).cloned().collect();

        let mut built = Vec::new();
        for name in names {
            if root.find_subcommand(&name).is_some() {
                debug!(module = %name, "command already present, keeping it");
                continue;
            }
            if let Some(command) = custom.remove(&name) {
                debug!(module = %name, "using custom command");
                built.push(command);
                continue;
            }
            let Some(descriptor) = modules.get(&name) else {
                continue;
            };
            if descriptor.is_empty() {
                debug!(module = %name, "empty descriptor, no command");
                continue;
            }
            built.push(self.build_module_command(&name, descriptor)?);
        }

        for command in built {
            root.add_subcommand(command);
        }
        Ok(())
    }

    /// Builds the command group for one module.
    ///
    /// # Errors
    ///
    /// See [`Builder::add_service_commands`].
    pub fn build_module_command(
        &self,
        module_name: &str,
        descriptor: &CommandDescriptor,
    ) -> Result<CommandNode, BuildError> {
        let about = if descriptor.short.is_empty() {
            format!("Querying commands for the {module_name} module")
        } else {
            descriptor.short.clone()
        };
        let mut command = CommandNode::new(module_name).with_about(about);
        self.add_service_commands(&mut command, descriptor)?;
        Ok(command)
    }

    /// Adds the nested groups of `descriptor` and one leaf per method of its
    /// service to `command`.
    ///
    /// # Errors
    ///
    /// - [`BuildError::NotFound`] if the service is unknown to the registry
    /// - [`BuildError::UnknownMethod`] if an option record targets a method
    ///   the service does not declare
    /// - [`BuildError::Binding`] if a method's input cannot be bound
    pub fn add_service_commands(
        &self,
        command: &mut CommandNode,
        descriptor: &CommandDescriptor,
    ) -> Result<(), BuildError> {
        for (name, sub_descriptor) in &descriptor.sub_commands {
            if sub_descriptor.is_empty() {
                continue;
            }
            let about = if sub_descriptor.short.is_empty() {
                format!(
                    "Querying commands for the {} service",
                    sub_descriptor.service
                )
            } else {
                sub_descriptor.short.clone()
            };
            let mut sub_command = CommandNode::new(name.clone()).with_about(about);
            self.add_service_commands(&mut sub_command, sub_descriptor)?;
            command.add_subcommand(sub_command);
        }

        if descriptor.service.is_empty() {
            return Ok(());
        }

        let service = self
            .registry
            .find_service(&descriptor.service)
            .map_err(|source| BuildError::NotFound {
                service: descriptor.service.clone(),
                source,
            })?;

        let mut options: HashMap<&str, &MethodOptions> = HashMap::new();
        for option in &descriptor.rpc_command_options {
            if service.method_by_name(&option.rpc_method).is_none() {
                return Err(BuildError::UnknownMethod {
                    method: option.rpc_method.clone(),
                    service: service.full_name().to_owned(),
                });
            }
            options.insert(option.rpc_method.as_str(), option);
        }

        if service.methods().next().is_none() {
            debug!(service = %service.full_name(), "service declares no methods");
        }
        for method in service.methods() {
            let method_options = options.get(method.name()).copied();
            if let Some(leaf) = self.build_method_command(&method, method_options)? {
                command.add_subcommand(leaf);
            }
        }
        Ok(())
    }

    /// Compiles one RPC method into a leaf command.
    ///
    /// Returns `Ok(None)` when the options skip the method or the method is
    /// streaming.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Binding`] when the field binder rejects the
    /// method's input message.
    #[instrument(skip_all, fields(method = %method.full_name()))]
    pub fn build_method_command(
        &self,
        method: &MethodDescriptor,
        options: Option<&MethodOptions>,
    ) -> Result<Option<CommandNode>, BuildError> {
        let spec = EffectiveCommandSpec::merge(method, options);
        if spec.skip {
            debug!("skipped by options");
            return Ok(None);
        }
        if method.is_client_streaming() || method.is_server_streaming() {
            warn!(
                method = %method.full_name(),
                "streaming methods cannot be invoked from the command line, skipping"
            );
            return Ok(None);
        }

        let input = resolve_message_type(self.type_resolver.as_deref(), &method.input());
        let output = resolve_message_type(self.type_resolver.as_deref(), &method.output());

        let mut command = CommandNode::new(spec.name.clone())
            .with_about(spec.short.clone())
            .with_long_about(spec.long.clone())
            .with_example(spec.example.clone())
            .with_aliases(spec.aliases.clone())
            .with_suggest_for(spec.suggest_for.clone())
            .with_deprecated(spec.deprecated.clone())
            .with_version(spec.version.clone());
        if spec.has_custom_usage() {
            command = command.with_usage(spec.usage.clone());
        }

        let binder = self.binder.bind(&mut command, &input, &spec)?;
        command.set_arity(binder.arity());
        command.set_handler(Arc::new(MethodHandler {
            path: method.path(),
            output,
            binder,
            connector: Arc::clone(&self.connector),
            marshal_options: self.marshal_options.clone(),
            type_resolver: self.type_resolver.clone(),
        }));

        if let Some(hook) = &self.post_build {
            hook(&mut command);
        }

        debug!(command = %command.name(), "built method command");
        Ok(Some(command))
    }
}

/// Runs one RPC: connect, build the request, call, render, write.
struct MethodHandler {
    path: String,
    output: MessageDescriptor,
    binder: Box<dyn MessageBinder>,
    connector: Arc<dyn ConnectionProvider>,
    marshal_options: MarshalOptions,
    type_resolver: Option<Arc<dyn TypeResolver>>,
}

#[async_trait]
impl CommandHandler for MethodHandler {
    async fn run(&self, invocation: Invocation<'_>) -> Result<(), InvokeError> {
        let Invocation { matches, args, out } = invocation;

        let connection = self.connector.connection(matches).await?;
        let input = self.binder.build_message(matches, &args)?;

        debug!(method = %self.path, "invoking");
        let response = connection.invoke(&self.path, input, &self.output).await?;

        let text = match &self.type_resolver {
            Some(resolver) => self
                .marshal_options
                .marshal_with_resolver(&response, resolver.as_ref())?,
            None => self.marshal_options.marshal(&response)?,
        };
        writeln!(out, "{text}")?;
        Ok(())
    }
}
