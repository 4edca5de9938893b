//! Protobuf binary encoding for [`DynamicMessage`] and the matching tonic codec.
//!
//! Fields are written in declaration order. Repeated scalar fields honour the
//! `packed` flag of their descriptor on output and accept both encodings on
//! input. Unknown fields, groups included, are skipped when decoding. Wire
//! primitives (keys, varints, scalar merges, skipping) come from
//! [`prost::encoding`].

use bytes::{Buf, BufMut, Bytes};
use prost::{
    DecodeError,
    encoding::{self, DecodeContext, WireType, decode_key, encode_key, encode_varint},
};
use tonic::{
    Status,
    codec::{Codec, DecodeBuf, Decoder, EncodeBuf, Encoder},
};

use crate::{
    message::{DynamicMessage, MessageError, Value},
    schema::{FieldDescriptor, Kind, MessageDescriptor},
};

/// A [`Codec`] that writes any [`DynamicMessage`] and reads responses of one
/// message type.
#[derive(Debug, Clone)]
pub struct DynamicCodec {
    output: MessageDescriptor,
}

impl DynamicCodec {
    /// Creates a codec decoding responses as `output`.
    pub fn new(output: MessageDescriptor) -> Self {
        Self { output }
    }
}

impl Codec for DynamicCodec {
    type Encode = DynamicMessage;
    type Decode = DynamicMessage;
    type Encoder = DynamicEncoder;
    type Decoder = DynamicDecoder;

    fn encoder(&mut self) -> Self::Encoder {
        DynamicEncoder
    }

    fn decoder(&mut self) -> Self::Decoder {
        DynamicDecoder {
            output: self.output.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DynamicEncoder;

impl Encoder for DynamicEncoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn encode(&mut self, item: Self::Item, dst: &mut EncodeBuf<'_>) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DynamicDecoder {
    output: MessageDescriptor,
}

impl Decoder for DynamicDecoder {
    type Item = DynamicMessage;
    type Error = Status;

    fn decode(&mut self, src: &mut DecodeBuf<'_>) -> Result<Option<Self::Item>, Self::Error> {
        DynamicMessage::decode(&self.output, src)
            .map(Some)
            .map_err(|e| Status::internal(e.to_string()))
    }
}

pub(crate) fn encode_message(message: &DynamicMessage, buf: &mut impl BufMut) {
    for (field, value) in message.fields() {
        encode_field(&field, value, buf);
    }
}

fn encode_field(field: &FieldDescriptor, value: &Value, buf: &mut impl BufMut) {
    let kind = field.kind();
    match value {
        Value::List(items) if field.is_packed() => {
            if items.is_empty() {
                return;
            }
            let mut packed = Vec::new();
            for item in items {
                encode_value(item, &kind, &mut packed);
            }
            encode_key(field.number(), WireType::LengthDelimited, buf);
            encode_len_prefixed(&packed, buf);
        }
        Value::List(items) => {
            for item in items {
                encode_key(field.number(), wire_type(&kind), buf);
                encode_value(item, &kind, buf);
            }
        }
        value => {
            encode_key(field.number(), wire_type(&kind), buf);
            encode_value(value, &kind, buf);
        }
    }
}

#[expect(
    clippy::cast_sign_loss,
    reason = "negative integers are sign-extended to ten-byte varints"
)]
fn encode_value(value: &Value, kind: &Kind, buf: &mut impl BufMut) {
    match (kind, value) {
        (Kind::Double, Value::F64(v)) => buf.put_f64_le(*v),
        (Kind::Float, Value::F32(v)) => buf.put_f32_le(*v),
        (Kind::Int32, Value::I32(v)) | (Kind::Enum(_), Value::EnumNumber(v)) => {
            encode_varint(i64::from(*v) as u64, buf);
        }
        (Kind::Int64, Value::I64(v)) => encode_varint(*v as u64, buf),
        (Kind::Uint32, Value::U32(v)) => encode_varint(u64::from(*v), buf),
        (Kind::Uint64, Value::U64(v)) => encode_varint(*v, buf),
        (Kind::Sint32, Value::I32(v)) => {
            encode_varint(u64::from(((v << 1) ^ (v >> 31)) as u32), buf);
        }
        (Kind::Sint64, Value::I64(v)) => encode_varint(((v << 1) ^ (v >> 63)) as u64, buf),
        (Kind::Fixed32, Value::U32(v)) => buf.put_u32_le(*v),
        (Kind::Fixed64, Value::U64(v)) => buf.put_u64_le(*v),
        (Kind::Sfixed32, Value::I32(v)) => buf.put_i32_le(*v),
        (Kind::Sfixed64, Value::I64(v)) => buf.put_i64_le(*v),
        (Kind::Bool, Value::Bool(v)) => encode_varint(u64::from(*v), buf),
        (Kind::String, Value::String(v)) => encode_len_prefixed(v.as_bytes(), buf),
        (Kind::Bytes, Value::Bytes(v)) => encode_len_prefixed(v, buf),
        (Kind::Message(_), Value::Message(message)) => {
            encode_len_prefixed(&message.encode_to_vec(), buf);
        }
        // Values are type-checked when stored, so no other pairing is reachable.
        _ => {}
    }
}

fn wire_type(kind: &Kind) -> WireType {
    match kind {
        Kind::Double | Kind::Fixed64 | Kind::Sfixed64 => WireType::SixtyFourBit,
        Kind::Float | Kind::Fixed32 | Kind::Sfixed32 => WireType::ThirtyTwoBit,
        Kind::String | Kind::Bytes | Kind::Message(_) => WireType::LengthDelimited,
        _ => WireType::Varint,
    }
}

fn encode_len_prefixed(bytes: &[u8], buf: &mut impl BufMut) {
    encode_varint(bytes.len() as u64, buf);
    buf.put_slice(bytes);
}

pub(crate) fn decode_message(
    descriptor: &MessageDescriptor,
    buf: &mut impl Buf,
) -> Result<DynamicMessage, MessageError> {
    let error = |reason: String| MessageError::Decode {
        message: descriptor.full_name().to_owned(),
        reason,
    };

    let mut message = DynamicMessage::new(descriptor.clone());
    while buf.has_remaining() {
        let (number, wire) = decode_key(buf).map_err(|e| error(reason(&e)))?;
        match descriptor.field_by_number(number) {
            Some(field) => decode_field(&mut message, &field, wire, buf)
                .map_err(|cause| error(format!("field {}: {cause}", field.name())))?,
            None => encoding::skip_field(wire, number, buf, DecodeContext::default())
                .map_err(|e| error(reason(&e)))?,
        }
    }
    Ok(message)
}

/// The description of a prost decode error, without its generic prefix.
fn reason(error: &DecodeError) -> String {
    let text = error.to_string();
    text.strip_prefix("failed to decode Protobuf message: ")
        .map_or_else(|| text.clone(), str::to_owned)
}

fn decode_field(
    message: &mut DynamicMessage,
    field: &FieldDescriptor,
    wire: WireType,
    buf: &mut impl Buf,
) -> Result<(), String> {
    let kind = field.kind();
    let element = wire_type(&kind);

    if field.is_list() && wire == WireType::LengthDelimited && element != WireType::LengthDelimited
    {
        let mut chunk = take_len_prefixed(buf)?;
        let mut items = Vec::new();
        while chunk.has_remaining() {
            items.push(decode_value(&kind, element, &mut chunk)?);
        }
        message.extend_list(field, items);
        return Ok(());
    }

    let value = decode_value(&kind, wire, buf)?;
    if field.is_list() {
        message.extend_list(field, vec![value]);
    } else {
        message.merge_singular(field, value);
    }
    Ok(())
}

/// Reads one value of `kind` with prost's scalar merge for that type, which
/// also checks the wire type.
macro_rules! merge_scalar {
    ($module:ident, $variant:ident, $wire:expr, $buf:expr) => {{
        let mut value = Default::default();
        encoding::$module::merge($wire, &mut value, $buf, DecodeContext::default())
            .map_err(|e| reason(&e))?;
        Value::$variant(value)
    }};
}

fn decode_value(kind: &Kind, wire: WireType, buf: &mut impl Buf) -> Result<Value, String> {
    let value = match kind {
        Kind::Double => merge_scalar!(double, F64, wire, buf),
        Kind::Float => merge_scalar!(float, F32, wire, buf),
        Kind::Int32 => merge_scalar!(int32, I32, wire, buf),
        Kind::Int64 => merge_scalar!(int64, I64, wire, buf),
        Kind::Uint32 => merge_scalar!(uint32, U32, wire, buf),
        Kind::Uint64 => merge_scalar!(uint64, U64, wire, buf),
        Kind::Sint32 => merge_scalar!(sint32, I32, wire, buf),
        Kind::Sint64 => merge_scalar!(sint64, I64, wire, buf),
        Kind::Fixed32 => merge_scalar!(fixed32, U32, wire, buf),
        Kind::Fixed64 => merge_scalar!(fixed64, U64, wire, buf),
        Kind::Sfixed32 => merge_scalar!(sfixed32, I32, wire, buf),
        Kind::Sfixed64 => merge_scalar!(sfixed64, I64, wire, buf),
        Kind::Bool => merge_scalar!(bool, Bool, wire, buf),
        Kind::Enum(_) => merge_scalar!(int32, EnumNumber, wire, buf),
        Kind::String => merge_scalar!(string, String, wire, buf),
        Kind::Bytes => {
            let mut value = Bytes::new();
            encoding::bytes::merge(wire, &mut value, buf, DecodeContext::default())
                .map_err(|e| reason(&e))?;
            Value::Bytes(value)
        }
        Kind::Message(descriptor) => {
            encoding::check_wire_type(WireType::LengthDelimited, wire).map_err(|e| reason(&e))?;
            let mut chunk = take_len_prefixed(buf)?;
            let nested = decode_message(descriptor, &mut chunk).map_err(|e| e.to_string())?;
            Value::Message(nested)
        }
    };
    Ok(value)
}

fn take_len_prefixed(buf: &mut impl Buf) -> Result<Bytes, String> {
    let len = encoding::decode_varint(buf).map_err(|e| reason(&e))?;
    let len = usize::try_from(len).map_err(|_| "length overflows usize".to_owned())?;
    if buf.remaining() < len {
        return Err(format!(
            "length {len} exceeds the {} remaining bytes",
            buf.remaining()
        ));
    }
    Ok(buf.copy_to_bytes(len))
}
