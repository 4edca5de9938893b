//! Canonical JSON rendering and parsing of [`DynamicMessage`]s.
//!
//! Output follows the protobuf JSON mapping: fields in declaration order,
//! 64-bit integers as strings, bytes as standard base64 and enums by name.
//! Well-known types use their special forms: `Timestamp` as an RFC 3339
//! string, `Duration` as seconds with an `s` suffix, wrappers as their bare
//! value and `Any` as the embedded message plus an `@type` key.
//! Rendering is a [`Serialize`] view over the message, so any `serde_json`
//! formatter can drive it.

use std::str::FromStr;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use bytes::Bytes;
use serde::{
    Serialize, Serializer,
    ser::{Error as _, SerializeMap, SerializeSeq},
};
use serde_json::ser::PrettyFormatter;

use crate::{
    message::{DynamicMessage, MessageError, Value},
    schema::{FieldDescriptor, Kind, MessageDescriptor, TypeResolver},
};

const ANY: &str = "google.protobuf.Any";
const TIMESTAMP: &str = "google.protobuf.Timestamp";
const DURATION: &str = "google.protobuf.Duration";
const WRAPPERS: [&str; 9] = [
    "google.protobuf.DoubleValue",
    "google.protobuf.FloatValue",
    "google.protobuf.Int64Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.Int32Value",
    "google.protobuf.UInt32Value",
    "google.protobuf.BoolValue",
    "google.protobuf.StringValue",
    "google.protobuf.BytesValue",
];

/// Earliest and latest seconds of a valid `Timestamp` (years 1 to 9999).
const TIMESTAMP_SECONDS: std::ops::RangeInclusive<i64> = -62_135_596_800..=253_402_300_799;
const MAX_DURATION_SECONDS: u64 = 315_576_000_000;

/// Controls how [`MarshalOptions::marshal`] renders a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarshalOptions {
    /// Indentation unit; empty renders compact single-line JSON.
    pub indent: String,
    /// Use `.proto` field names instead of lowerCamelCase JSON names.
    pub use_proto_names: bool,
    /// Render enums as numbers instead of value names.
    pub use_enum_numbers: bool,
    /// Include fields that are not populated, rendered as their zero value.
    pub emit_unpopulated: bool,
}

impl MarshalOptions {
    /// The options command output is written with: two-space indent, proto
    /// names, enum names and every non-optional field present.
    pub fn canonical() -> Self {
        Self {
            indent: "  ".to_owned(),
            use_proto_names: true,
            use_enum_numbers: false,
            emit_unpopulated: true,
        }
    }

    /// Renders `message` as JSON text.
    ///
    /// `Any` payloads are resolved against the pool `message` was defined in.
    ///
    /// # Errors
    ///
    /// Returns an error for invalid UTF-8 in the indent unit, for
    /// out-of-range `Timestamp` or `Duration` values, and for `Any` payloads
    /// whose type cannot be resolved or decoded.
    pub fn marshal(&self, message: &DynamicMessage) -> Result<String, serde_json::Error> {
        self.render(message, None)
    }

    /// Like [`MarshalOptions::marshal`], but resolves `Any` payloads through
    /// `resolver` first.
    ///
    /// # Errors
    ///
    /// See [`MarshalOptions::marshal`].
    pub fn marshal_with_resolver(
        &self,
        message: &DynamicMessage,
        resolver: &dyn TypeResolver,
    ) -> Result<String, serde_json::Error> {
        self.render(message, Some(resolver))
    }

    fn render(
        &self,
        message: &DynamicMessage,
        resolver: Option<&dyn TypeResolver>,
    ) -> Result<String, serde_json::Error> {
        let cx = Context {
            options: self,
            resolver,
        };
        let view = MessageView { message, cx: &cx };
        if self.indent.is_empty() {
            return serde_json::to_string(&view);
        }

        let mut out = Vec::new();
        let formatter = PrettyFormatter::with_indent(self.indent.as_bytes());
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        view.serialize(&mut serializer)?;
        String::from_utf8(out).map_err(serde_json::Error::custom)
    }

    fn field_name<'a>(&self, field: &'a FieldDescriptor) -> &'a str {
        if self.use_proto_names {
            field.name()
        } else {
            field.json_name()
        }
    }
}

struct Context<'a> {
    options: &'a MarshalOptions,
    resolver: Option<&'a dyn TypeResolver>,
}

impl Context<'_> {
    fn find_message(&self, pool_of: &MessageDescriptor, name: &str) -> Option<MessageDescriptor> {
        self.resolver
            .and_then(|resolver| resolver.find_message_by_name(name))
            .or_else(|| pool_of.parent_pool().get_message_by_name(name))
    }
}

/// Whether `descriptor` renders as something other than a plain JSON object.
fn has_special_form(descriptor: &MessageDescriptor) -> bool {
    has_string_form(descriptor) || WRAPPERS.contains(&descriptor.full_name())
}

/// Whether `descriptor` is `Timestamp` or `Duration`, whose JSON form is a
/// string.
pub(crate) fn has_string_form(descriptor: &MessageDescriptor) -> bool {
    matches!(descriptor.full_name(), TIMESTAMP | DURATION)
}

/// The `value` field of a wrapper type.
pub(crate) fn wrapped_field(descriptor: &MessageDescriptor) -> Option<FieldDescriptor> {
    if WRAPPERS.contains(&descriptor.full_name()) {
        descriptor.field_by_name("value")
    } else {
        None
    }
}

struct MessageView<'a> {
    message: &'a DynamicMessage,
    cx: &'a Context<'a>,
}

impl MessageView<'_> {
    fn serialize_fields<M: SerializeMap>(&self, map: &mut M) -> Result<(), M::Error> {
        let options = self.cx.options;
        for field in self.message.descriptor().fields() {
            let value = self.message.get(&field);
            if value.is_none() && (!options.emit_unpopulated || field.has_presence()) {
                continue;
            }
            map.serialize_entry(
                options.field_name(&field),
                &FieldView {
                    field: &field,
                    value,
                    cx: self.cx,
                },
            )?;
        }
        Ok(())
    }

    fn int_field(&self, name: &str) -> i64 {
        match self.message.get_by_name(name) {
            Some(Value::I64(n)) => *n,
            Some(Value::I32(n)) => i64::from(*n),
            _ => 0,
        }
    }

    fn serialize_timestamp<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let seconds = self.int_field("seconds");
        let nanos = i32::try_from(self.int_field("nanos")).unwrap_or(-1);
        if !TIMESTAMP_SECONDS.contains(&seconds) || !(0..1_000_000_000).contains(&nanos) {
            return Err(S::Error::custom(format!(
                "timestamp out of range: {seconds}s {nanos}ns"
            )));
        }
        serializer.collect_str(&prost_types::Timestamp { seconds, nanos })
    }

    fn serialize_duration<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let seconds = self.int_field("seconds");
        let nanos = i32::try_from(self.int_field("nanos")).unwrap_or(i32::MAX);
        let mixed_signs = (seconds > 0 && nanos < 0) || (seconds < 0 && nanos > 0);
        if seconds.unsigned_abs() > MAX_DURATION_SECONDS
            || nanos.unsigned_abs() >= 1_000_000_000
            || mixed_signs
        {
            return Err(S::Error::custom(format!(
                "duration out of range: {seconds}s {nanos}ns"
            )));
        }
        serializer.collect_str(&prost_types::Duration { seconds, nanos })
    }

    fn serialize_wrapper<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let Some(field) = self.message.descriptor().field_by_name("value") else {
            return serializer.serialize_unit();
        };
        let kind = field.kind();
        let value = self
            .message
            .get(&field)
            .cloned()
            .unwrap_or_else(|| Value::default_for(&kind));
        ValueView {
            value: &value,
            kind: &kind,
            cx: self.cx,
        }
        .serialize(serializer)
    }

    fn serialize_any<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let type_url = self
            .message
            .get_by_name("type_url")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let payload = match self.message.get_by_name("value") {
            Some(Value::Bytes(bytes)) => bytes.clone(),
            _ => Bytes::new(),
        };
        if type_url.is_empty() {
            if payload.is_empty() {
                return serializer.serialize_map(Some(0))?.end();
            }
            return Err(S::Error::custom("Any has a value but no type URL"));
        }

        let name = type_url.rsplit('/').next().unwrap_or(type_url);
        let descriptor = self
            .cx
            .find_message(self.message.descriptor(), name)
            .ok_or_else(|| S::Error::custom(format!("unable to resolve {type_url:?}")))?;
        let embedded =
            DynamicMessage::decode(&descriptor, &mut &payload[..]).map_err(S::Error::custom)?;
        let view = MessageView {
            message: &embedded,
            cx: self.cx,
        };

        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("@type", type_url)?;
        if has_special_form(&descriptor) || descriptor.full_name() == ANY {
            map.serialize_entry("value", &view)?;
        } else {
            view.serialize_fields(&mut map)?;
        }
        map.end()
    }
}

impl Serialize for MessageView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.message.descriptor().full_name() {
            ANY => self.serialize_any(serializer),
            TIMESTAMP => self.serialize_timestamp(serializer),
            DURATION => self.serialize_duration(serializer),
            name if WRAPPERS.contains(&name) => self.serialize_wrapper(serializer),
            _ => {
                let mut map = serializer.serialize_map(None)?;
                self.serialize_fields(&mut map)?;
                map.end()
            }
        }
    }
}

struct FieldView<'a> {
    field: &'a FieldDescriptor,
    value: Option<&'a Value>,
    cx: &'a Context<'a>,
}

impl Serialize for FieldView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let kind = self.field.kind();
        let items = self.value.and_then(Value::as_list).unwrap_or_default();

        if self.field.is_map() {
            let mut map = serializer.serialize_map(Some(items.len()))?;
            for entry in items.iter().filter_map(Value::as_message) {
                let (key, value) = map_entry_parts(entry);
                map.serialize_entry(
                    &key,
                    &ValueView {
                        value: &value,
                        kind: &value_kind(entry),
                        cx: self.cx,
                    },
                )?;
            }
            return map.end();
        }

        if self.field.is_list() {
            let mut seq = serializer.serialize_seq(Some(items.len()))?;
            for item in items {
                seq.serialize_element(&ValueView {
                    value: item,
                    kind: &kind,
                    cx: self.cx,
                })?;
            }
            return seq.end();
        }

        match (self.value, &kind) {
            (Some(value), _) => ValueView {
                value,
                kind: &kind,
                cx: self.cx,
            }
            .serialize(serializer),
            (None, Kind::Message(_)) => serializer.serialize_unit(),
            (None, _) => ValueView {
                value: &Value::default_for(&kind),
                kind: &kind,
                cx: self.cx,
            }
            .serialize(serializer),
        }
    }
}

/// Stringified key and value of a map entry, with defaults for missing parts.
fn map_entry_parts(entry: &DynamicMessage) -> (String, Value) {
    let descriptor = entry.descriptor();
    let key = descriptor
        .field_by_number(1)
        .map(|field| {
            entry
                .get(&field)
                .cloned()
                .unwrap_or_else(|| Value::default_for(&field.kind()))
        })
        .map(|key| match key {
            Value::String(text) => text,
            Value::Bool(flag) => flag.to_string(),
            Value::I32(n) => n.to_string(),
            Value::I64(n) => n.to_string(),
            Value::U32(n) => n.to_string(),
            Value::U64(n) => n.to_string(),
            other => format!("{other:?}"),
        })
        .unwrap_or_default();
    let value = descriptor
        .field_by_number(2)
        .map(|field| {
            entry
                .get(&field)
                .cloned()
                .unwrap_or_else(|| Value::default_for(&field.kind()))
        })
        .unwrap_or(Value::Bool(false));
    (key, value)
}

fn value_kind(entry: &DynamicMessage) -> Kind {
    entry
        .descriptor()
        .field_by_number(2)
        .map_or(Kind::Bool, |field| field.kind())
}

struct ValueView<'a> {
    value: &'a Value,
    kind: &'a Kind,
    cx: &'a Context<'a>,
}

impl Serialize for ValueView<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.value {
            Value::Bool(flag) => serializer.serialize_bool(*flag),
            Value::I32(n) => serializer.serialize_i32(*n),
            Value::U32(n) => serializer.serialize_u32(*n),
            Value::I64(n) => serializer.collect_str(n),
            Value::U64(n) => serializer.collect_str(n),
            Value::F32(n) => serialize_float(f64::from(*n), serializer, |s| s.serialize_f32(*n)),
            Value::F64(n) => serialize_float(*n, serializer, |s| s.serialize_f64(*n)),
            Value::String(text) => serializer.serialize_str(text),
            Value::Bytes(bytes) => serializer.serialize_str(&STANDARD.encode(bytes)),
            Value::EnumNumber(number) => match self.kind {
                Kind::Enum(enum_type) if !self.cx.options.use_enum_numbers => {
                    match enum_type.value_by_number(*number) {
                        Some(name) => serializer.serialize_str(name),
                        None => serializer.serialize_i32(*number),
                    }
                }
                _ => serializer.serialize_i32(*number),
            },
            Value::Message(message) => MessageView {
                message,
                cx: self.cx,
            }
            .serialize(serializer),
            Value::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&ValueView {
                        value: item,
                        kind: self.kind,
                        cx: self.cx,
                    })?;
                }
                seq.end()
            }
        }
    }
}

/// Writes non-finite values as their JSON strings and integral values without
/// a fraction; everything else goes through `finite`, which keeps the
/// shortest representation of the original width.
#[expect(
    clippy::cast_possible_truncation,
    reason = "integral floats below 2^53 are exact as i64"
)]
fn serialize_float<S: Serializer>(
    n: f64,
    serializer: S,
    finite: impl FnOnce(S) -> Result<S::Ok, S::Error>,
) -> Result<S::Ok, S::Error> {
    if n.is_nan() {
        serializer.serialize_str("NaN")
    } else if n.is_infinite() {
        serializer.serialize_str(if n > 0.0 { "Infinity" } else { "-Infinity" })
    } else if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        serializer.serialize_i64(n as i64)
    } else {
        finite(serializer)
    }
}

/// Parses a JSON object into a message of type `descriptor`.
///
/// Keys may be proto field names or JSON names. `null` leaves a field unset.
///
/// # Errors
///
/// Returns [`MessageError::UnknownField`] for keys the message does not
/// declare and [`MessageError::InvalidJson`] for values of the wrong shape.
pub fn parse_json(
    descriptor: &MessageDescriptor,
    json: &serde_json::Value,
) -> Result<DynamicMessage, MessageError> {
    let object = json
        .as_object()
        .ok_or_else(|| invalid(descriptor.full_name(), "expected a JSON object"))?;

    let mut message = DynamicMessage::new(descriptor.clone());
    for (key, value) in object {
        let field = descriptor
            .field_by_name(key)
            .or_else(|| descriptor.field_by_json_name(key))
            .ok_or_else(|| MessageError::UnknownField {
                message: descriptor.full_name().to_owned(),
                field: key.clone(),
            })?;
        if value.is_null() {
            continue;
        }
        let parsed = parse_field(&field, value)?;
        message.set(&field, parsed)?;
    }
    Ok(message)
}

fn parse_field(field: &FieldDescriptor, json: &serde_json::Value) -> Result<Value, MessageError> {
    let path = field_path(field);
    let kind = field.kind();

    if field.is_map() {
        let Kind::Message(entry_type) = &kind else {
            return Err(invalid(&path, "map field without an entry type"));
        };
        let (Some(key_field), Some(value_field)) =
            (entry_type.field_by_number(1), entry_type.field_by_number(2))
        else {
            return Err(invalid(&path, "malformed map entry type"));
        };
        let object = json
            .as_object()
            .ok_or_else(|| invalid(&path, "expected a JSON object"))?;

        let mut entries = Vec::with_capacity(object.len());
        for (key, value) in object {
            let mut entry = DynamicMessage::new(entry_type.clone());
            entry.set(&key_field, parse_map_key(&key_field.kind(), key, &path)?)?;
            entry.set(&value_field, parse_value(&value_field.kind(), value, &path)?)?;
            entries.push(Value::Message(entry));
        }
        return Ok(Value::List(entries));
    }

    if field.is_list() {
        let array = json
            .as_array()
            .ok_or_else(|| invalid(&path, "expected a JSON array"))?;
        return array
            .iter()
            .map(|item| parse_value(&kind, item, &path))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List);
    }

    parse_value(&kind, json, &path)
}

fn parse_map_key(kind: &Kind, key: &str, path: &str) -> Result<Value, MessageError> {
    match (kind, key) {
        (Kind::Bool, "true") => Ok(Value::Bool(true)),
        (Kind::Bool, "false") => Ok(Value::Bool(false)),
        (Kind::Bool, _) => Err(invalid(path, "map key must be true or false")),
        _ => parse_value(kind, &serde_json::Value::String(key.to_owned()), path),
    }
}

/// Parses a single (non-list) value of `kind`.
///
/// Integers accept JSON numbers and numeric strings; floats additionally accept
/// `"NaN"`, `"Infinity"` and `"-Infinity"`.
pub(crate) fn parse_value(
    kind: &Kind,
    json: &serde_json::Value,
    path: &str,
) -> Result<Value, MessageError> {
    let value = match kind {
        Kind::Bool => Value::Bool(
            json.as_bool()
                .ok_or_else(|| invalid(path, "expected a boolean"))?,
        ),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 => Value::I32(parse_integer(json, path)?),
        Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => Value::I64(parse_integer(json, path)?),
        Kind::Uint32 | Kind::Fixed32 => Value::U32(parse_integer(json, path)?),
        Kind::Uint64 | Kind::Fixed64 => Value::U64(parse_integer(json, path)?),
        Kind::Float => Value::F32(narrow(parse_float(json, path)?)),
        Kind::Double => Value::F64(parse_float(json, path)?),
        Kind::String => Value::String(
            json.as_str()
                .ok_or_else(|| invalid(path, "expected a string"))?
                .to_owned(),
        ),
        Kind::Bytes => {
            let text = json
                .as_str()
                .ok_or_else(|| invalid(path, "expected a base64 string"))?;
            let bytes = STANDARD
                .decode(text)
                .map_err(|e| invalid(path, &format!("invalid base64: {e}")))?;
            Value::Bytes(bytes.into())
        }
        Kind::Enum(enum_type) => {
            let number = match json {
                serde_json::Value::String(name) => enum_type.value_by_name(name).ok_or_else(|| {
                    invalid(
                        path,
                        &format!("{name:?} is not a value of {}", enum_type.full_name()),
                    )
                })?,
                _ => parse_integer(json, path)?,
            };
            Value::EnumNumber(number)
        }
        Kind::Message(descriptor) => Value::Message(parse_message_value(descriptor, json, path)?),
    };
    Ok(value)
}

/// Parses a message value, accepting the string forms of `Timestamp` and
/// `Duration` and bare wrapper values next to plain JSON objects.
fn parse_message_value(
    descriptor: &MessageDescriptor,
    json: &serde_json::Value,
    path: &str,
) -> Result<DynamicMessage, MessageError> {
    let name = descriptor.full_name();
    match json {
        serde_json::Value::String(text) if name == TIMESTAMP => {
            let timestamp = prost_types::Timestamp::from_str(text)
                .map_err(|e| invalid(path, &e.to_string()))?;
            seconds_nanos(descriptor, timestamp.seconds, timestamp.nanos)
        }
        serde_json::Value::String(text) if name == DURATION => {
            let duration = prost_types::Duration::from_str(text)
                .map_err(|e| invalid(path, &e.to_string()))?;
            seconds_nanos(descriptor, duration.seconds, duration.nanos)
        }
        _ if WRAPPERS.contains(&name) && !json.is_object() => {
            let mut message = DynamicMessage::new(descriptor.clone());
            if let Some(field) = descriptor.field_by_name("value") {
                message.set(&field, parse_value(&field.kind(), json, path)?)?;
            }
            Ok(message)
        }
        _ => parse_json(descriptor, json),
    }
}

fn seconds_nanos(
    descriptor: &MessageDescriptor,
    seconds: i64,
    nanos: i32,
) -> Result<DynamicMessage, MessageError> {
    let mut message = DynamicMessage::new(descriptor.clone());
    if seconds != 0 {
        message.set_by_name("seconds", Value::I64(seconds))?;
    }
    if nanos != 0 {
        message.set_by_name("nanos", Value::I32(nanos))?;
    }
    Ok(message)
}

fn parse_integer<T>(json: &serde_json::Value, path: &str) -> Result<T, MessageError>
where
    T: TryFrom<i64> + TryFrom<u64> + std::str::FromStr,
{
    let parsed = match json {
        serde_json::Value::Number(number) => number
            .as_i64()
            .and_then(|n| <T as TryFrom<i64>>::try_from(n).ok())
            .or_else(|| {
                number
                    .as_u64()
                    .and_then(|n| <T as TryFrom<u64>>::try_from(n).ok())
            }),
        serde_json::Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| invalid(path, &format!("expected an integer in range, got {json}")))
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "float fields accept any double and round it"
)]
fn narrow(n: f64) -> f32 {
    n as f32
}

fn parse_float(json: &serde_json::Value, path: &str) -> Result<f64, MessageError> {
    let parsed = match json {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(text) => match text.as_str() {
            "NaN" => Some(f64::NAN),
            "Infinity" => Some(f64::INFINITY),
            "-Infinity" => Some(f64::NEG_INFINITY),
            other => other.trim().parse().ok(),
        },
        _ => None,
    };
    parsed.ok_or_else(|| invalid(path, &format!("expected a number, got {json}")))
}

fn field_path(field: &FieldDescriptor) -> String {
    format!("{}.{}", field.containing_message().full_name(), field.name())
}

fn invalid(path: &str, reason: &str) -> MessageError {
    MessageError::InvalidJson {
        path: path.to_owned(),
        reason: reason.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing;

    fn response() -> DynamicMessage {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.QueryBalanceResponse").unwrap();
        parse_json(
            &descriptor,
            &json!({
                "balance": { "denom": "uatom", "amount": "42" },
                "heights": [1, "2"],
            }),
        )
        .unwrap()
    }

    #[test]
    fn test_canonical_output_includes_defaults_in_declaration_order() {
        let text = MarshalOptions::canonical().marshal(&response()).unwrap();

        let expected = r#"{
  "balance": {
    "denom": "uatom",
    "amount": "42"
  },
  "heights": [
    "1",
    "2"
  ],
  "labels": {},
  "status": "STATUS_UNSPECIFIED",
  "page": 0,
  "checksum": "",
  "ratio": 0,
  "offset": 0
}"#;
        assert_eq!(text, expected);
    }

    #[test]
    fn test_compact_output_omits_unpopulated_fields() {
        let text = MarshalOptions::default().marshal(&response()).unwrap();

        assert_eq!(
            text,
            r#"{"balance":{"denom":"uatom","amount":"42"},"heights":["1","2"]}"#
        );
    }

    #[test]
    fn test_json_names_and_enum_numbers() {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.QueryBalanceRequest").unwrap();
        let message = parse_json(
            &descriptor,
            &json!({ "extraDenoms": ["uosmo"], "status": "STATUS_FROZEN" }),
        )
        .unwrap();

        let options = MarshalOptions {
            use_enum_numbers: true,
            ..MarshalOptions::default()
        };

        assert_eq!(
            options.marshal(&message).unwrap(),
            r#"{"extraDenoms":["uosmo"],"status":2}"#
        );
    }

    #[test]
    fn test_presence_fields_render_only_when_set() {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.QueryBalanceResponse").unwrap();
        let message = parse_json(&descriptor, &json!({ "note": "" })).unwrap();

        let text = MarshalOptions {
            emit_unpopulated: true,
            use_proto_names: true,
            ..MarshalOptions::default()
        }
        .marshal(&message)
        .unwrap();

        assert!(text.contains(r#""note":"""#));
        assert!(!MarshalOptions::canonical()
            .marshal(&DynamicMessage::new(descriptor))
            .unwrap()
            .contains("note"));
    }

    #[test]
    fn test_scalars_follow_json_mapping() {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.QueryBalanceResponse").unwrap();
        let message = parse_json(
            &descriptor,
            &json!({
                "labels": { "zone": "eu" },
                "checksum": "3q0=",
                "ratio": "-Infinity",
                "offset": -3,
            }),
        )
        .unwrap();

        let text = MarshalOptions::default().marshal(&message).unwrap();

        assert_eq!(
            text,
            r#"{"labels":{"zone":"eu"},"checksum":"3q0=","ratio":"-Infinity","offset":-3}"#
        );
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.Coin").unwrap();

        let err = parse_json(&descriptor, &json!({ "denomination": "uatom" })).unwrap_err();

        assert!(matches!(err, MessageError::UnknownField { field, .. } if field == "denomination"));
    }

    #[test]
    fn test_parse_rejects_wrong_shapes() {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.QueryBalanceRequest").unwrap();

        for bad in [
            json!({ "min_height": "tall" }),
            json!({ "status": "STATUS_MISSING" }),
            json!({ "extra_denoms": "uatom" }),
            json!({ "memo": "not base64!" }),
            json!({ "include_locked": "yes" }),
            json!([]),
        ] {
            let err = parse_json(&descriptor, &bad).unwrap_err();
            assert!(matches!(err, MessageError::InvalidJson { .. }), "{bad}");
        }
    }

    #[test]
    fn test_parse_treats_null_as_unset() {
        let pool = testing::bank_pool();
        let descriptor = pool.get_message_by_name("pkg.Coin").unwrap();

        let message = parse_json(&descriptor, &json!({ "denom": null })).unwrap();

        assert_eq!(message.fields().count(), 0);
    }

    #[test]
    fn test_float_fields_use_shortest_single_precision_form() {
        let pool = testing::extras_pool();
        let descriptor = pool.get_message_by_name("pkg.Choice").unwrap();
        let mut message = DynamicMessage::new(descriptor);
        message.set_by_name("weight", Value::F32(0.1)).unwrap();

        assert_eq!(
            MarshalOptions::default().marshal(&message).unwrap(),
            r#"{"weight":0.1}"#
        );

        message.set_by_name("weight", Value::F32(3.0)).unwrap();
        assert_eq!(
            MarshalOptions::default().marshal(&message).unwrap(),
            r#"{"weight":3}"#
        );
    }

    #[test]
    fn test_well_known_types_use_their_json_forms() {
        let pool = testing::extras_pool();
        let descriptor = pool.get_message_by_name("pkg.Event").unwrap();
        let message = parse_json(
            &descriptor,
            &json!({
                "at": "2023-11-14T22:13:20.500Z",
                "took": "1.5s",
                "label": "hi",
                "count": "5",
                "weight": 0.1,
            }),
        )
        .unwrap();

        let text = MarshalOptions::default().marshal(&message).unwrap();

        assert_eq!(
            text,
            r#"{"at":"2023-11-14T22:13:20.500Z","took":"1.500s","label":"hi","count":"5","weight":0.1}"#
        );
    }

    #[test]
    fn test_timestamp_fields_hold_seconds_and_nanos() {
        let pool = testing::extras_pool();
        let descriptor = pool.get_message_by_name("pkg.Event").unwrap();

        let message = parse_json(&descriptor, &json!({ "at": "1970-01-01T00:00:01Z" })).unwrap();

        let Some(Value::Message(at)) = message.get_by_name("at") else {
            panic!("at should be set");
        };
        assert_eq!(at.get_by_name("seconds"), Some(&Value::I64(1)));
        assert_eq!(at.get_by_name("nanos"), None);
    }

    #[test]
    fn test_out_of_range_timestamp_fails_to_render() {
        let pool = testing::extras_pool();
        let timestamp = pool.get_message_by_name("google.protobuf.Timestamp").unwrap();
        let mut message = DynamicMessage::new(timestamp);
        message.set_by_name("nanos", Value::I32(-1)).unwrap();

        assert!(MarshalOptions::default().marshal(&message).is_err());
    }

    fn any(type_url: &str, payload: Vec<u8>) -> DynamicMessage {
        let pool = testing::extras_pool();
        let mut event = DynamicMessage::new(pool.get_message_by_name("pkg.Event").unwrap());
        let mut any = DynamicMessage::new(pool.get_message_by_name("google.protobuf.Any").unwrap());
        any.set_by_name("type_url", Value::String(type_url.to_owned()))
            .unwrap();
        any.set_by_name("value", Value::Bytes(payload.into()))
            .unwrap();
        event.set_by_name("payload", Value::Message(any)).unwrap();
        event
    }

    #[test]
    fn test_any_inlines_the_embedded_message() {
        let pool = testing::extras_pool();
        let mut choice = DynamicMessage::new(pool.get_message_by_name("pkg.Choice").unwrap());
        choice.set_by_name("a", Value::String("x".to_owned())).unwrap();

        let event = any("type.googleapis.com/pkg.Choice", choice.encode_to_vec());

        assert_eq!(
            MarshalOptions::default().marshal(&event).unwrap(),
            r#"{"payload":{"@type":"type.googleapis.com/pkg.Choice","a":"x"}}"#
        );
    }

    #[test]
    fn test_any_wraps_special_forms_in_value() {
        // seconds = 1
        let event = any("type.googleapis.com/google.protobuf.Timestamp", vec![0x08, 0x01]);

        assert_eq!(
            MarshalOptions::default().marshal(&event).unwrap(),
            r#"{"payload":{"@type":"type.googleapis.com/google.protobuf.Timestamp","value":"1970-01-01T00:00:01Z"}}"#
        );
    }

    #[test]
    fn test_any_resolves_through_the_type_resolver() {
        let bank = testing::bank_pool();
        let coin_type = bank.get_message_by_name("pkg.Coin").unwrap();
        let mut coin = DynamicMessage::new(coin_type);
        coin.set_by_name("denom", Value::String("uatom".to_owned()))
            .unwrap();

        let event = any("type.googleapis.com/pkg.Coin", coin.encode_to_vec());

        assert!(MarshalOptions::default().marshal(&event).is_err());
        assert_eq!(
            MarshalOptions::default()
                .marshal_with_resolver(&event, &bank)
                .unwrap(),
            r#"{"payload":{"@type":"type.googleapis.com/pkg.Coin","denom":"uatom"}}"#
        );
    }
}
