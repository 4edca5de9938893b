//! Dynamically typed protobuf messages.
//!
//! A [`DynamicMessage`] pairs a [`MessageDescriptor`] with the values of its
//! populated fields. Values are checked against the field's declared kind when
//! they are set, so a message can always be encoded without further
//! validation. Map fields are stored as lists of map-entry messages whose key
//! is field 1 and value field 2.

use std::collections::BTreeMap;

use bytes::{Buf, BufMut, Bytes};

use crate::{
    codec,
    schema::{FieldDescriptor, Kind, MessageDescriptor},
};

/// Errors raised while building, decoding or parsing dynamic messages.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum MessageError {
    /// A value does not match the declared type of the field it was set on.
    #[error("value for field {field} does not match its declared type")]
    TypeMismatch {
        /// Fully-qualified field name.
        field: String,
    },

    /// The message has no field with the given name.
    #[error("message {message} has no field named {field}")]
    UnknownField {
        /// Fully-qualified message name.
        message: String,
        /// The field name that was looked up.
        field: String,
    },

    /// A JSON document does not fit the message shape.
    #[error("invalid JSON for {path}: {reason}")]
    InvalidJson {
        /// Message or field the offending value belongs to.
        path: String,
        /// Human-readable description of the mismatch.
        reason: String,
    },

    /// The protobuf wire data is malformed.
    #[error("failed to decode {message}: {reason}")]
    Decode {
        /// Fully-qualified name of the message being decoded.
        message: String,
        /// What went wrong.
        reason: String,
    },
}

/// A single field value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    I32(i32),
    I64(i64),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    String(String),
    Bytes(Bytes),
    EnumNumber(i32),
    Message(DynamicMessage),
    List(Vec<Value>),
}

impl Value {
    /// The zero value of `kind`.
    pub fn default_for(kind: &Kind) -> Self {
        match kind {
            Kind::Double => Self::F64(0.0),
            Kind::Float => Self::F32(0.0),
            Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Self::I32(0),
            Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Self::I64(0),
            Kind::Uint32 | Kind::Fixed32 => Self::U32(0),
            Kind::Uint64 | Kind::Fixed64 => Self::U64(0),
            Kind::Bool => Self::Bool(false),
            Kind::String => Self::String(String::new()),
            Kind::Bytes => Self::Bytes(Bytes::new()),
            Kind::Enum(enum_type) => Self::EnumNumber(enum_type.default_number()),
            Kind::Message(message) => Self::Message(DynamicMessage::new(message.clone())),
        }
    }

    /// Whether this value can be stored as a single element of `kind`.
    pub fn is_valid_for(&self, kind: &Kind) -> bool {
        match (kind, self) {
            (Kind::Double, Self::F64(_))
            | (Kind::Float, Self::F32(_))
            | (Kind::Int32 | Kind::Sint32 | Kind::Sfixed32, Self::I32(_))
            | (Kind::Int64 | Kind::Sint64 | Kind::Sfixed64, Self::I64(_))
            | (Kind::Uint32 | Kind::Fixed32, Self::U32(_))
            | (Kind::Uint64 | Kind::Fixed64, Self::U64(_))
            | (Kind::Bool, Self::Bool(_))
            | (Kind::String, Self::String(_))
            | (Kind::Bytes, Self::Bytes(_))
            | (Kind::Enum(_), Self::EnumNumber(_)) => true,
            (Kind::Message(expected), Self::Message(message)) => {
                message.descriptor().full_name() == expected.full_name()
            }
            _ => false,
        }
    }

    /// Whether this value can be stored in `field`, accounting for lists.
    pub fn is_valid_for_field(&self, field: &FieldDescriptor) -> bool {
        let kind = field.kind();
        match self {
            Self::List(items) if field.is_list() => items.iter().all(|item| item.is_valid_for(&kind)),
            _ if field.is_list() => false,
            value => value.is_valid_for(&kind),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_message(&self) -> Option<&DynamicMessage> {
        match self {
            Self::Message(message) => Some(message),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }
}

/// A protobuf message whose type is only known at run time.
#[derive(Debug, Clone, PartialEq)]
pub struct DynamicMessage {
    descriptor: MessageDescriptor,
    fields: BTreeMap<u32, Value>,
}

impl DynamicMessage {
    /// Creates an empty message of type `descriptor`.
    pub fn new(descriptor: MessageDescriptor) -> Self {
        Self {
            descriptor,
            fields: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Returns the value of `field` if it is populated.
    pub fn get(&self, field: &FieldDescriptor) -> Option<&Value> {
        self.fields.get(&field.number())
    }

    /// Returns the value of the field called `name` if it is populated.
    pub fn get_by_name(&self, name: &str) -> Option<&Value> {
        let field = self.descriptor.field_by_name(name)?;
        self.fields.get(&field.number())
    }

    pub fn has(&self, field: &FieldDescriptor) -> bool {
        self.fields.contains_key(&field.number())
    }

    /// Sets `field` to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::TypeMismatch`] when the value does not fit the
    /// field, including a non-list value for a repeated field.
    pub fn set(&mut self, field: &FieldDescriptor, value: Value) -> Result<(), MessageError> {
        if !value.is_valid_for_field(field) {
            return Err(MessageError::TypeMismatch {
                field: format!("{}.{}", self.descriptor.full_name(), field.name()),
            });
        }
        self.clear_oneof_siblings(field);
        self.fields.insert(field.number(), value);
        Ok(())
    }

    /// Sets the field called `name` to `value`.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::UnknownField`] for names the message does not
    /// declare, or any error of [`DynamicMessage::set`].
    pub fn set_by_name(&mut self, name: &str, value: Value) -> Result<(), MessageError> {
        let field = self
            .descriptor
            .field_by_name(name)
            .ok_or_else(|| MessageError::UnknownField {
                message: self.descriptor.full_name().to_owned(),
                field: name.to_owned(),
            })?;
        self.set(&field, value)
    }

    pub fn clear(&mut self, field: &FieldDescriptor) {
        self.fields.remove(&field.number());
    }

    /// Populated fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = (FieldDescriptor, &Value)> + '_ {
        self.descriptor
            .fields()
            .filter_map(|field| self.fields.get(&field.number()).map(|value| (field, value)))
    }

    /// Writes the protobuf binary encoding of this message to `buf`.
    pub fn encode(&self, buf: &mut impl BufMut) {
        codec::encode_message(self, buf);
    }

    pub fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }

    /// Decodes a message of type `descriptor` from its binary encoding.
    ///
    /// # Errors
    ///
    /// Returns [`MessageError::Decode`] for truncated or malformed input.
    pub fn decode(descriptor: &MessageDescriptor, buf: &mut impl Buf) -> Result<Self, MessageError> {
        codec::decode_message(descriptor, buf)
    }

    /// Appends decoded elements to a repeated field.
    pub(crate) fn extend_list(&mut self, field: &FieldDescriptor, items: Vec<Value>) {
        match self.fields.entry(field.number()).or_insert_with(|| Value::List(Vec::new())) {
            Value::List(existing) => existing.extend(items),
            other => *other = Value::List(items),
        }
    }

    /// Stores a decoded singular value, merging repeated occurrences of
    /// embedded messages.
    pub(crate) fn merge_singular(&mut self, field: &FieldDescriptor, value: Value) {
        match (self.fields.get_mut(&field.number()), value) {
            (Some(Value::Message(existing)), Value::Message(incoming)) => existing.merge(incoming),
            (_, value) => {
                self.clear_oneof_siblings(field);
                self.fields.insert(field.number(), value);
            }
        }
    }

    /// Unsets the other members of the oneof `field` belongs to.
    fn clear_oneof_siblings(&mut self, field: &FieldDescriptor) {
        let Some(oneof) = field.oneof_index() else {
            return;
        };
        for sibling in self.descriptor.fields() {
            if sibling.oneof_index() == Some(oneof) && sibling.number() != field.number() {
                self.fields.remove(&sibling.number());
            }
        }
    }

    fn merge(&mut self, other: DynamicMessage) {
        for (number, value) in other.fields {
            match (self.fields.get_mut(&number), value) {
                (Some(Value::List(existing)), Value::List(items)) => existing.extend(items),
                (Some(Value::Message(existing)), Value::Message(incoming)) => {
                    existing.merge(incoming);
                }
                (_, value) => {
                    if let Some(field) = self.descriptor.field_by_number(number) {
                        self.clear_oneof_siblings(&field);
                    }
                    self.fields.insert(number, value);
                }
            }
        }
    }
}
