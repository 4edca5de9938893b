//! Schema registry built from compiled protobuf descriptor sets.
//!
//! A [`DescriptorPool`] indexes every message, enum and service declared in one
//! or more `FileDescriptorSet`s (the output of
//! `protoc --include_imports --descriptor_set_out`). The pool is immutable once
//! built and cheap to clone; descriptor handles ([`ServiceDescriptor`],
//! [`MethodDescriptor`], [`MessageDescriptor`], [`FieldDescriptor`],
//! [`EnumDescriptor`]) carry a reference to the pool plus an index, so
//! recursive message graphs need no owning cycles.
//!
//! # Seams
//!
//! The command builder only talks to schemas through two traits:
//!
//! - [`SchemaRegistry`] resolves a service by its fully-qualified name.
//! - [`TypeResolver`] maps a message shape to the concrete message type used
//!   to construct values at run time.
//!
//! `DescriptorPool` implements both.
//!
//! # Documentation
//!
//! Leading comments recorded in `SourceCodeInfo` become the `docs()` of
//! services, methods, messages and fields. Descriptor sets compiled without
//! `--include_source_info` simply yield empty docs.

use std::{
    collections::{HashMap, HashSet},
    fmt,
    sync::Arc,
};

use prost::Message as _;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
    FileDescriptorSet,
    field_descriptor_proto::{Label, Type},
};

// Field numbers inside descriptor.proto, used to address SourceCodeInfo paths.
const FILE_MESSAGE_TYPE: i32 = 4;
const FILE_SERVICE: i32 = 6;
const MESSAGE_FIELD: i32 = 2;
const MESSAGE_NESTED_TYPE: i32 = 3;
const SERVICE_METHOD: i32 = 2;

/// Errors raised while building or querying a [`DescriptorPool`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum SchemaError {
    /// No service with the given fully-qualified name is registered.
    #[error("service not found: {0}")]
    ServiceNotFound(String),

    /// A field or method references a type that is not part of the pool.
    #[error("unresolved type {type_name} referenced by {referrer}")]
    UnresolvedType {
        /// Fully-qualified name of the field or method holding the reference.
        referrer: String,
        /// The type name that could not be resolved.
        type_name: String,
    },

    /// The serialized descriptor set could not be decoded.
    #[error("failed to decode descriptor set: {0}")]
    Decode(#[from] prost::DecodeError),

    /// The descriptor set is structurally invalid.
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
}

/// Looks up service signatures by fully-qualified name.
pub trait SchemaRegistry: Send + Sync {
    /// Finds the service named `full_name` (for example `cosmos.bank.v1beta1.Query`).
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::ServiceNotFound`] when the registry has no such
    /// service.
    fn find_service(&self, full_name: &str) -> Result<ServiceDescriptor, SchemaError>;
}

/// Maps message shapes to the concrete message types values are built from.
pub trait TypeResolver: Send + Sync {
    /// Returns the message type registered under `full_name`, if any.
    fn find_message_by_name(&self, full_name: &str) -> Option<MessageDescriptor>;
}

/// Returns the concrete type for `shape`.
///
/// When a resolver is configured and knows the shape's name its descriptor is
/// used, otherwise the shape describes itself.
pub fn resolve_message_type(
    resolver: Option<&dyn TypeResolver>,
    shape: &MessageDescriptor,
) -> MessageDescriptor {
    resolver
        .and_then(|resolver| resolver.find_message_by_name(shape.full_name()))
        .unwrap_or_else(|| shape.clone())
}

/// Immutable index of protobuf definitions.
#[derive(Clone, Default)]
pub struct DescriptorPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug, Default)]
struct PoolInner {
    messages: Vec<MessageInner>,
    enums: Vec<EnumInner>,
    services: Vec<ServiceInner>,
    names: HashMap<String, Definition>,
}

#[derive(Debug, Clone, Copy)]
enum Definition {
    Message(usize),
    Enum(usize),
    Service(usize),
}

#[derive(Debug)]
struct MessageInner {
    full_name: String,
    name: String,
    docs: String,
    map_entry: bool,
    fields: Vec<FieldInner>,
}

#[derive(Debug)]
struct FieldInner {
    name: String,
    json_name: String,
    number: u32,
    list: bool,
    packed: bool,
    presence: bool,
    oneof: Option<u32>,
    kind: KindIndex,
    docs: String,
}

#[derive(Debug)]
struct EnumInner {
    full_name: String,
    name: String,
    values: Vec<(String, i32)>,
}

#[derive(Debug)]
struct ServiceInner {
    full_name: String,
    name: String,
    docs: String,
    methods: Vec<MethodInner>,
}

#[derive(Debug)]
struct MethodInner {
    name: String,
    input: usize,
    output: usize,
    client_streaming: bool,
    server_streaming: bool,
    docs: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KindIndex {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Bytes,
    Uint32,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
    Message(usize),
    Enum(usize),
}

impl fmt::Debug for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescriptorPool")
            .field("messages", &self.inner.messages.len())
            .field("enums", &self.inner.enums.len())
            .field("services", &self.inner.services.len())
            .finish()
    }
}

impl DescriptorPool {
    /// Builds a pool from a single descriptor set.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced type is missing, a name is declared
    /// twice, or the set uses constructs the pool cannot represent.
    pub fn from_file_descriptor_set(set: FileDescriptorSet) -> Result<Self, SchemaError> {
        Self::from_file_descriptor_sets([set])
    }

    /// Builds a pool from several descriptor sets.
    ///
    /// Files are identified by name; a file present in more than one set is
    /// indexed once.
    ///
    /// # Errors
    ///
    /// Same as [`DescriptorPool::from_file_descriptor_set`].
    pub fn from_file_descriptor_sets(
        sets: impl IntoIterator<Item = FileDescriptorSet>,
    ) -> Result<Self, SchemaError> {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for set in sets {
            for file in set.file {
                if seen.insert(file.name().to_owned()) {
                    files.push(file);
                }
            }
        }

        let mut builder = PoolBuilder::default();
        for file in &files {
            builder.declare_file(file)?;
        }
        for file in &files {
            builder.define_file(file)?;
        }

        Ok(Self {
            inner: Arc::new(builder.inner),
        })
    }

    /// Decodes a serialized `FileDescriptorSet` and builds a pool from it.
    ///
    /// # Errors
    ///
    /// Returns [`SchemaError::Decode`] for malformed bytes, or any error of
    /// [`DescriptorPool::from_file_descriptor_set`].
    pub fn decode(bytes: &[u8]) -> Result<Self, SchemaError> {
        let set = FileDescriptorSet::decode(bytes)?;
        Self::from_file_descriptor_set(set)
    }

    /// Iterates over every service in the pool.
    pub fn services(&self) -> impl ExactSizeIterator<Item = ServiceDescriptor> + '_ {
        (0..self.inner.services.len()).map(|index| ServiceDescriptor {
            pool: self.clone(),
            index,
        })
    }

    /// Returns the service named `full_name`.
    pub fn get_service_by_name(&self, full_name: &str) -> Option<ServiceDescriptor> {
        match self.inner.names.get(full_name)? {
            Definition::Service(index) => Some(ServiceDescriptor {
                pool: self.clone(),
                index: *index,
            }),
            _ => None,
        }
    }

    /// Returns the message named `full_name`.
    pub fn get_message_by_name(&self, full_name: &str) -> Option<MessageDescriptor> {
        match self.inner.names.get(full_name)? {
            Definition::Message(index) => Some(MessageDescriptor {
                pool: self.clone(),
                index: *index,
            }),
            _ => None,
        }
    }

    /// Returns the enum named `full_name`.
    pub fn get_enum_by_name(&self, full_name: &str) -> Option<EnumDescriptor> {
        match self.inner.names.get(full_name)? {
            Definition::Enum(index) => Some(EnumDescriptor {
                pool: self.clone(),
                index: *index,
            }),
            _ => None,
        }
    }

    fn same_pool(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl SchemaRegistry for DescriptorPool {
    fn find_service(&self, full_name: &str) -> Result<ServiceDescriptor, SchemaError> {
        self.get_service_by_name(full_name)
            .ok_or_else(|| SchemaError::ServiceNotFound(full_name.to_owned()))
    }
}

impl TypeResolver for DescriptorPool {
    fn find_message_by_name(&self, full_name: &str) -> Option<MessageDescriptor> {
        self.get_message_by_name(full_name)
    }
}

#[derive(Default)]
struct PoolBuilder {
    inner: PoolInner,
}

impl PoolBuilder {
    fn register(&mut self, full_name: String, definition: Definition) -> Result<(), SchemaError> {
        if self.inner.names.contains_key(&full_name) {
            return Err(SchemaError::InvalidDescriptor(format!(
                "{full_name} is declared more than once"
            )));
        }
        self.inner.names.insert(full_name, definition);
        Ok(())
    }

    fn declare_file(&mut self, file: &FileDescriptorProto) -> Result<(), SchemaError> {
        let docs = file_docs(file);
        let package = file.package();

        for (i, message) in file.message_type.iter().enumerate() {
            self.declare_message(package, message, vec![FILE_MESSAGE_TYPE, index(i)], &docs)?;
        }
        for enum_type in &file.enum_type {
            self.declare_enum(package, enum_type)?;
        }
        for (i, service) in file.service.iter().enumerate() {
            let full_name = qualify(package, service.name());
            let service_docs = docs
                .get(&vec![FILE_SERVICE, index(i)])
                .cloned()
                .unwrap_or_default();
            self.register(
                full_name.clone(),
                Definition::Service(self.inner.services.len()),
            )?;
            self.inner.services.push(ServiceInner {
                full_name,
                name: service.name().to_owned(),
                docs: service_docs,
                methods: Vec::new(),
            });
        }
        Ok(())
    }

    fn declare_message(
        &mut self,
        scope: &str,
        message: &DescriptorProto,
        path: Vec<i32>,
        docs: &HashMap<Vec<i32>, String>,
    ) -> Result<(), SchemaError> {
        let full_name = qualify(scope, message.name());
        self.register(
            full_name.clone(),
            Definition::Message(self.inner.messages.len()),
        )?;
        self.inner.messages.push(MessageInner {
            full_name: full_name.clone(),
            name: message.name().to_owned(),
            docs: docs.get(&path).cloned().unwrap_or_default(),
            map_entry: message
                .options
                .as_ref()
                .is_some_and(prost_types::MessageOptions::map_entry),
            fields: Vec::new(),
        });

        for (i, nested) in message.nested_type.iter().enumerate() {
            let mut nested_path = path.clone();
            nested_path.extend([MESSAGE_NESTED_TYPE, index(i)]);
            self.declare_message(&full_name, nested, nested_path, docs)?;
        }
        for enum_type in &message.enum_type {
            self.declare_enum(&full_name, enum_type)?;
        }
        Ok(())
    }

    fn declare_enum(&mut self, scope: &str, enum_type: &EnumDescriptorProto) -> Result<(), SchemaError> {
        let full_name = qualify(scope, enum_type.name());
        self.register(full_name.clone(), Definition::Enum(self.inner.enums.len()))?;
        self.inner.enums.push(EnumInner {
            full_name,
            name: enum_type.name().to_owned(),
            values: enum_type
                .value
                .iter()
                .map(|value| (value.name().to_owned(), value.number()))
                .collect(),
        });
        Ok(())
    }

    fn define_file(&mut self, file: &FileDescriptorProto) -> Result<(), SchemaError> {
        let docs = file_docs(file);
        let package = file.package();
        let proto3 = file.syntax() == "proto3";

        for (i, message) in file.message_type.iter().enumerate() {
            self.define_message(
                package,
                message,
                &[FILE_MESSAGE_TYPE, index(i)],
                &docs,
                proto3,
            )?;
        }

        for (i, service) in file.service.iter().enumerate() {
            let full_name = qualify(package, service.name());
            let Some(Definition::Service(service_index)) = self.inner.names.get(&full_name).copied()
            else {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "service {full_name} was not declared"
                )));
            };

            let mut methods = Vec::with_capacity(service.method.len());
            for (j, method) in service.method.iter().enumerate() {
                let method_name = format!("{full_name}.{}", method.name());
                methods.push(MethodInner {
                    name: method.name().to_owned(),
                    input: self.resolve_message(&method_name, method.input_type())?,
                    output: self.resolve_message(&method_name, method.output_type())?,
                    client_streaming: method.client_streaming(),
                    server_streaming: method.server_streaming(),
                    docs: docs
                        .get(&vec![FILE_SERVICE, index(i), SERVICE_METHOD, index(j)])
                        .cloned()
                        .unwrap_or_default(),
                });
            }
            self.inner.services[service_index].methods = methods;
        }
        Ok(())
    }

    fn define_message(
        &mut self,
        scope: &str,
        message: &DescriptorProto,
        path: &[i32],
        docs: &HashMap<Vec<i32>, String>,
        proto3: bool,
    ) -> Result<(), SchemaError> {
        let full_name = qualify(scope, message.name());
        let Some(Definition::Message(message_index)) = self.inner.names.get(&full_name).copied()
        else {
            return Err(SchemaError::InvalidDescriptor(format!(
                "message {full_name} was not declared"
            )));
        };

        let mut fields = Vec::with_capacity(message.field.len());
        for (i, field) in message.field.iter().enumerate() {
            let mut field_path = path.to_vec();
            field_path.extend([MESSAGE_FIELD, index(i)]);
            fields.push(self.define_field(&full_name, field, proto3, docs.get(&field_path))?);
        }
        self.inner.messages[message_index].fields = fields;

        for (i, nested) in message.nested_type.iter().enumerate() {
            let mut nested_path = path.to_vec();
            nested_path.extend([MESSAGE_NESTED_TYPE, index(i)]);
            self.define_message(&full_name, nested, &nested_path, docs, proto3)?;
        }
        Ok(())
    }

    fn define_field(
        &self,
        message_name: &str,
        field: &FieldDescriptorProto,
        proto3: bool,
        docs: Option<&String>,
    ) -> Result<FieldInner, SchemaError> {
        let referrer = format!("{message_name}.{}", field.name());
        let kind = match field.r#type() {
            Type::Double => KindIndex::Double,
            Type::Float => KindIndex::Float,
            Type::Int64 => KindIndex::Int64,
            Type::Uint64 => KindIndex::Uint64,
            Type::Int32 => KindIndex::Int32,
            Type::Fixed64 => KindIndex::Fixed64,
            Type::Fixed32 => KindIndex::Fixed32,
            Type::Bool => KindIndex::Bool,
            Type::String => KindIndex::String,
            Type::Bytes => KindIndex::Bytes,
            Type::Uint32 => KindIndex::Uint32,
            Type::Sfixed32 => KindIndex::Sfixed32,
            Type::Sfixed64 => KindIndex::Sfixed64,
            Type::Sint32 => KindIndex::Sint32,
            Type::Sint64 => KindIndex::Sint64,
            Type::Message => KindIndex::Message(self.resolve_message(&referrer, field.type_name())?),
            Type::Enum => KindIndex::Enum(self.resolve_enum(&referrer, field.type_name())?),
            Type::Group => {
                return Err(SchemaError::InvalidDescriptor(format!(
                    "{referrer} uses a group, which is not supported"
                )));
            }
        };

        let number = u32::try_from(field.number()).map_err(|_| {
            SchemaError::InvalidDescriptor(format!("{referrer} has invalid number {}", field.number()))
        })?;
        let list = field.label() == Label::Repeated;
        let packable = !matches!(
            kind,
            KindIndex::String | KindIndex::Bytes | KindIndex::Message(_)
        );
        let packed = list
            && packable
            && field
                .options
                .as_ref()
                .and_then(|options| options.packed)
                .unwrap_or(proto3);

        Ok(FieldInner {
            name: field.name().to_owned(),
            json_name: match &field.json_name {
                Some(json_name) => json_name.clone(),
                None => to_lower_camel(field.name()),
            },
            number,
            list,
            packed,
            presence: field.oneof_index.is_some() || field.proto3_optional(),
            oneof: field.oneof_index.and_then(|index| u32::try_from(index).ok()),
            kind,
            docs: docs.cloned().unwrap_or_default(),
        })
    }

    fn resolve_message(&self, referrer: &str, type_name: &str) -> Result<usize, SchemaError> {
        match self.inner.names.get(type_name.trim_start_matches('.')) {
            Some(Definition::Message(index)) => Ok(*index),
            _ => Err(SchemaError::UnresolvedType {
                referrer: referrer.to_owned(),
                type_name: type_name.to_owned(),
            }),
        }
    }

    fn resolve_enum(&self, referrer: &str, type_name: &str) -> Result<usize, SchemaError> {
        match self.inner.names.get(type_name.trim_start_matches('.')) {
            Some(Definition::Enum(index)) => Ok(*index),
            _ => Err(SchemaError::UnresolvedType {
                referrer: referrer.to_owned(),
                type_name: type_name.to_owned(),
            }),
        }
    }
}

/// A protobuf service.
#[derive(Clone)]
pub struct ServiceDescriptor {
    pool: DescriptorPool,
    index: usize,
}

impl ServiceDescriptor {
    fn inner(&self) -> &ServiceInner {
        &self.pool.inner.services[self.index]
    }

    /// Fully-qualified name, e.g. `cosmos.bank.v1beta1.Query`.
    pub fn full_name(&self) -> &str {
        &self.inner().full_name
    }

    /// Short name, e.g. `Query`.
    pub fn name(&self) -> &str {
        &self.inner().name
    }

    /// Leading comment of the service declaration.
    pub fn docs(&self) -> &str {
        &self.inner().docs
    }

    /// Methods in declaration order.
    pub fn methods(&self) -> impl ExactSizeIterator<Item = MethodDescriptor> + '_ {
        (0..self.inner().methods.len()).map(|index| MethodDescriptor {
            service: self.clone(),
            index,
        })
    }

    /// Returns the method called `name`.
    pub fn method_by_name(&self, name: &str) -> Option<MethodDescriptor> {
        self.inner()
            .methods
            .iter()
            .position(|method| method.name == name)
            .map(|index| MethodDescriptor {
                service: self.clone(),
                index,
            })
    }
}

impl fmt::Debug for ServiceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ServiceDescriptor")
            .field(&self.full_name())
            .finish()
    }
}

impl PartialEq for ServiceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.pool.same_pool(&other.pool) && self.index == other.index
    }
}

impl Eq for ServiceDescriptor {}

/// A method of a protobuf service.
#[derive(Clone)]
pub struct MethodDescriptor {
    service: ServiceDescriptor,
    index: usize,
}

impl MethodDescriptor {
    fn inner(&self) -> &MethodInner {
        &self.service.inner().methods[self.index]
    }

    /// Method name as declared, e.g. `SendCoins`.
    pub fn name(&self) -> &str {
        &self.inner().name
    }

    /// Fully-qualified name, e.g. `pkg.Bank.SendCoins`.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.service.full_name(), self.name())
    }

    /// The service declaring this method.
    pub fn parent_service(&self) -> &ServiceDescriptor {
        &self.service
    }

    /// Request message type.
    pub fn input(&self) -> MessageDescriptor {
        MessageDescriptor {
            pool: self.service.pool.clone(),
            index: self.inner().input,
        }
    }

    /// Response message type.
    pub fn output(&self) -> MessageDescriptor {
        MessageDescriptor {
            pool: self.service.pool.clone(),
            index: self.inner().output,
        }
    }

    /// Leading comment of the method declaration.
    pub fn docs(&self) -> &str {
        &self.inner().docs
    }

    pub fn is_client_streaming(&self) -> bool {
        self.inner().client_streaming
    }

    pub fn is_server_streaming(&self) -> bool {
        self.inner().server_streaming
    }

    /// The gRPC request path, `/<service full name>/<method name>`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.service.full_name(), self.name())
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MethodDescriptor")
            .field(&self.full_name())
            .finish()
    }
}

/// A protobuf message type.
#[derive(Clone)]
pub struct MessageDescriptor {
    pool: DescriptorPool,
    index: usize,
}

impl MessageDescriptor {
    fn inner(&self) -> &MessageInner {
        &self.pool.inner.messages[self.index]
    }

    /// Fully-qualified name, e.g. `pkg.QueryBalanceRequest`.
    pub fn full_name(&self) -> &str {
        &self.inner().full_name
    }

    pub fn name(&self) -> &str {
        &self.inner().name
    }

    /// Leading comment of the message declaration.
    pub fn docs(&self) -> &str {
        &self.inner().docs
    }

    /// The pool this message was defined in.
    pub fn parent_pool(&self) -> &DescriptorPool {
        &self.pool
    }

    /// Whether this is the synthetic entry type of a map field.
    pub fn is_map_entry(&self) -> bool {
        self.inner().map_entry
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = FieldDescriptor> + '_ {
        (0..self.inner().fields.len()).map(|index| FieldDescriptor {
            message: self.clone(),
            index,
        })
    }

    pub fn field_by_name(&self, name: &str) -> Option<FieldDescriptor> {
        self.find_field(|field| field.name == name)
    }

    pub fn field_by_json_name(&self, json_name: &str) -> Option<FieldDescriptor> {
        self.find_field(|field| field.json_name == json_name)
    }

    pub fn field_by_number(&self, number: u32) -> Option<FieldDescriptor> {
        self.find_field(|field| field.number == number)
    }

    fn find_field(&self, predicate: impl Fn(&FieldInner) -> bool) -> Option<FieldDescriptor> {
        self.inner()
            .fields
            .iter()
            .position(predicate)
            .map(|index| FieldDescriptor {
                message: self.clone(),
                index,
            })
    }
}

impl fmt::Debug for MessageDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("MessageDescriptor")
            .field(&self.full_name())
            .finish()
    }
}

impl PartialEq for MessageDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.pool.same_pool(&other.pool) && self.index == other.index
    }
}

impl Eq for MessageDescriptor {}

/// The value type of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Kind {
    Double,
    Float,
    Int64,
    Uint64,
    Int32,
    Fixed64,
    Fixed32,
    Bool,
    String,
    Bytes,
    Uint32,
    Sfixed32,
    Sfixed64,
    Sint32,
    Sint64,
    Message(MessageDescriptor),
    Enum(EnumDescriptor),
}

/// A field of a protobuf message.
#[derive(Clone)]
pub struct FieldDescriptor {
    message: MessageDescriptor,
    index: usize,
}

impl FieldDescriptor {
    fn inner(&self) -> &FieldInner {
        &self.message.inner().fields[self.index]
    }

    /// Field name as declared in the `.proto` file.
    pub fn name(&self) -> &str {
        &self.inner().name
    }

    /// lowerCamelCase JSON name.
    pub fn json_name(&self) -> &str {
        &self.inner().json_name
    }

    pub fn number(&self) -> u32 {
        self.inner().number
    }

    pub fn kind(&self) -> Kind {
        let pool = &self.message.pool;
        match self.inner().kind {
            KindIndex::Double => Kind::Double,
            KindIndex::Float => Kind::Float,
            KindIndex::Int64 => Kind::Int64,
            KindIndex::Uint64 => Kind::Uint64,
            KindIndex::Int32 => Kind::Int32,
            KindIndex::Fixed64 => Kind::Fixed64,
            KindIndex::Fixed32 => Kind::Fixed32,
            KindIndex::Bool => Kind::Bool,
            KindIndex::String => Kind::String,
            KindIndex::Bytes => Kind::Bytes,
            KindIndex::Uint32 => Kind::Uint32,
            KindIndex::Sfixed32 => Kind::Sfixed32,
            KindIndex::Sfixed64 => Kind::Sfixed64,
            KindIndex::Sint32 => Kind::Sint32,
            KindIndex::Sint64 => Kind::Sint64,
            KindIndex::Message(index) => Kind::Message(MessageDescriptor {
                pool: pool.clone(),
                index,
            }),
            KindIndex::Enum(index) => Kind::Enum(EnumDescriptor {
                pool: pool.clone(),
                index,
            }),
        }
    }

    /// Whether the field is `repeated` (maps included).
    pub fn is_list(&self) -> bool {
        self.inner().list
    }

    /// Whether the field is a `map<K, V>`.
    pub fn is_map(&self) -> bool {
        self.inner().list
            && matches!(self.inner().kind, KindIndex::Message(index)
                if self.message.pool.inner.messages[index].map_entry)
    }

    /// Whether repeated numeric values use the packed encoding.
    pub fn is_packed(&self) -> bool {
        self.inner().packed
    }

    /// Whether unset values are distinguishable from defaults (oneof members
    /// and proto3 `optional` fields).
    pub fn has_presence(&self) -> bool {
        self.inner().presence
    }

    /// Index of the oneof this field belongs to, synthetic ones included.
    pub fn oneof_index(&self) -> Option<u32> {
        self.inner().oneof
    }

    /// Leading comment of the field declaration.
    pub fn docs(&self) -> &str {
        &self.inner().docs
    }

    /// The message declaring this field.
    pub fn containing_message(&self) -> &MessageDescriptor {
        &self.message
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FieldDescriptor({}.{} = {})",
            self.message.full_name(),
            self.name(),
            self.number()
        )
    }
}

impl PartialEq for FieldDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.index == other.index
    }
}

impl Eq for FieldDescriptor {}

/// A protobuf enum type.
#[derive(Clone)]
pub struct EnumDescriptor {
    pool: DescriptorPool,
    index: usize,
}

impl EnumDescriptor {
    fn inner(&self) -> &EnumInner {
        &self.pool.inner.enums[self.index]
    }

    pub fn full_name(&self) -> &str {
        &self.inner().full_name
    }

    pub fn name(&self) -> &str {
        &self.inner().name
    }

    /// Value names and numbers in declaration order.
    pub fn values(&self) -> impl ExactSizeIterator<Item = (&str, i32)> + '_ {
        self.inner()
            .values
            .iter()
            .map(|(name, number)| (name.as_str(), *number))
    }

    pub fn value_by_name(&self, name: &str) -> Option<i32> {
        self.values()
            .find(|(value, _)| *value == name)
            .map(|(_, number)| number)
    }

    /// Name of the first value declared with `number`.
    pub fn value_by_number(&self, number: i32) -> Option<&str> {
        self.values()
            .find(|(_, value)| *value == number)
            .map(|(name, _)| name)
    }

    /// The number of the first declared value, which is the enum's default.
    pub fn default_number(&self) -> i32 {
        self.inner().values.first().map_or(0, |(_, number)| *number)
    }
}

impl fmt::Debug for EnumDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnumDescriptor")
            .field(&self.full_name())
            .finish()
    }
}

impl PartialEq for EnumDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.pool.same_pool(&other.pool) && self.index == other.index
    }
}

impl Eq for EnumDescriptor {}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_owned()
    } else {
        format!("{scope}.{name}")
    }
}

fn index(i: usize) -> i32 {
    i32::try_from(i).unwrap_or(i32::MAX)
}

fn file_docs(file: &FileDescriptorProto) -> HashMap<Vec<i32>, String> {
    file.source_code_info
        .iter()
        .flat_map(|info| &info.location)
        .filter_map(|location| {
            let comment = location.leading_comments.as_deref()?;
            let docs = comment
                .lines()
                .map(str::trim)
                .collect::<Vec<_>>()
                .join("\n")
                .trim()
                .to_owned();
            (!docs.is_empty()).then(|| (location.path.clone(), docs))
        })
        .collect()
}

/// Converts a `snake_case` field name to the lowerCamelCase JSON name protoc
/// would assign.
fn to_lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}
