//! Binding of request message fields to command-line arguments.
//!
//! The builder only depends on the [`FieldBinder`] and [`MessageBinder`]
//! traits. [`FlagBinder`] is the stock implementation: positional fields come
//! from the method options, every other field becomes a `--kebab-case` flag.
//! Field flags never take a name the command itself needs (`--help`,
//! `--node`, `--version` on versioned leaves, or any name reserved with
//! [`FlagBinder::with_reserved_flags`]); such fields get a `-field` suffix.

use clap::{
    Arg, ArgAction, ArgMatches,
    builder::PossibleValuesParser,
    parser::ValueSource,
};
use tracing::{debug, warn};

use crate::{
    client::NODE_FLAG,
    command::{CommandNode, InvokeError, POSITIONAL_ARGS},
    json,
    message::{DynamicMessage, MessageError, Value},
    options::{EffectiveCommandSpec, FlagOptions, PositionalArg, to_kebab_case},
    schema::{FieldDescriptor, Kind, MessageDescriptor},
};

/// Errors raised while binding fields to arguments or converting argument
/// values.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum BindingError {
    /// An option names a field the request message does not declare.
    #[error("{message} has no field named {field:?}")]
    UnknownField {
        /// Fully-qualified request message name.
        message: String,
        field: String,
    },

    /// A flag option renames a field to a flag name the command needs.
    #[error("field {field:?} cannot use the reserved flag name --{flag}")]
    ReservedFlag { field: String, flag: String },

    /// A positional argument binding is not allowed.
    #[error("invalid positional argument {field:?}: {reason}")]
    InvalidPositional { field: String, reason: String },

    /// Argument text could not be converted to the field's type.
    #[error("invalid value {value:?} for field {field}: {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Message(#[from] MessageError),
}

/// How many positional arguments a command accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    /// Checks the positional count.
    ///
    /// # Errors
    ///
    /// Returns [`InvokeError::Arguments`] describing the expected count.
    pub fn validate(self, args: &[String]) -> Result<(), InvokeError> {
        match self {
            Self::Exact(n) if args.len() != n => Err(InvokeError::Arguments(format!(
                "accepts {n} arg(s), received {}",
                args.len()
            ))),
            Self::AtLeast(n) if args.len() < n => Err(InvokeError::Arguments(format!(
                "requires at least {n} arg(s), only received {}",
                args.len()
            ))),
            _ => Ok(()),
        }
    }
}

/// Adds the arguments for a request message to a leaf command.
pub trait FieldBinder: Send + Sync {
    /// Registers arguments for the fields of `input` on `node`.
    ///
    /// # Errors
    ///
    /// Returns a [`BindingError`] when the options in `spec` reference fields
    /// that do not exist or cannot be bound the way they ask.
    fn bind(
        &self,
        node: &mut CommandNode,
        input: &MessageDescriptor,
        spec: &EffectiveCommandSpec,
    ) -> Result<Box<dyn MessageBinder>, BindingError>;
}

/// Turns parsed arguments back into a request message.
pub trait MessageBinder: Send + Sync {
    /// The positional count the bound command accepts.
    fn arity(&self) -> Arity;

    /// Builds the request from the leaf's matches and positional values.
    ///
    /// # Errors
    ///
    /// Returns [`BindingError::InvalidValue`] when an argument cannot be
    /// converted to its field's type.
    fn build_message(
        &self,
        matches: &ArgMatches,
        args: &[String],
    ) -> Result<DynamicMessage, BindingError>;
}

/// The default [`FieldBinder`].
///
/// | Field type | Flag |
/// |------------|------|
/// | `bool` | `--flag` or `--flag=false` |
/// | integers, floats, strings | one value (`INT`, `UINT`, `FLOAT`, `STRING`) |
/// | `bytes` | base64 text |
/// | enums | one of the value names |
/// | messages | a JSON object |
/// | `repeated` | the flag may be repeated |
/// | `map<K, V>` | repeated `key=value` |
#[derive(Debug, Clone, Default)]
pub struct FlagBinder {
    reserved: Vec<String>,
}

/// Flags every leaf keeps for itself.
const RESERVED_FLAGS: [&str; 2] = ["help", NODE_FLAG];

/// Appended to derived flag names that are reserved.
const RENAMED_SUFFIX: &str = "-field";

impl FlagBinder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps `names` free as well, typically the global flags of the
    /// surrounding program.
    pub fn with_reserved_flags<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.reserved.extend(names.into_iter().map(Into::into));
        self
    }

    fn is_reserved(&self, name: &str, spec: &EffectiveCommandSpec) -> bool {
        RESERVED_FLAGS.contains(&name)
            || (name == "version" && !spec.version.is_empty())
            || self.reserved.iter().any(|reserved| reserved == name)
    }

    fn flag_name(
        &self,
        field: &FieldDescriptor,
        options: &FlagOptions,
        spec: &EffectiveCommandSpec,
    ) -> Result<String, BindingError> {
        if !options.name.is_empty() {
            if self.is_reserved(&options.name, spec) {
                return Err(BindingError::ReservedFlag {
                    field: field.name().to_owned(),
                    flag: options.name.clone(),
                });
            }
            return Ok(options.name.clone());
        }

        let name = to_kebab_case(field.name());
        if !self.is_reserved(&name, spec) {
            return Ok(name);
        }
        let renamed = format!("{name}{RENAMED_SUFFIX}");
        debug!(
            command = %spec.name,
            field = %field.name(),
            flag = %renamed,
            "flag name is reserved, renaming"
        );
        Ok(renamed)
    }
}

impl FieldBinder for FlagBinder {
    fn bind(
        &self,
        node: &mut CommandNode,
        input: &MessageDescriptor,
        spec: &EffectiveCommandSpec,
    ) -> Result<Box<dyn MessageBinder>, BindingError> {
        let positionals = positional_fields(input, &spec.positional_args)?;

        if let Some(name) = spec
            .flag_options
            .keys()
            .find(|name| input.field_by_name(name).is_none())
        {
            return Err(BindingError::UnknownField {
                message: input.full_name().to_owned(),
                field: name.clone(),
            });
        }

        let mut flags = Vec::new();
        for field in input.fields() {
            if positionals.iter().any(|p| p.field == field) {
                continue;
            }
            let options = spec
                .flag_options
                .get(field.name())
                .cloned()
                .unwrap_or_default();
            let name = self.flag_name(&field, &options, spec)?;
            let arg = flag_arg(name, &field, &options, !spec.version.is_empty());
            let id = arg.get_id().as_str().to_owned();
            if node.add_arg(arg) {
                flags.push(FlagBinding {
                    field,
                    id,
                    deprecated: options.deprecated,
                });
            }
        }
        node.add_arg(positional_arg(&positionals));

        let arity = if positionals.iter().any(|p| p.varargs) {
            Arity::AtLeast(positionals.len() - 1)
        } else {
            Arity::Exact(positionals.len())
        };

        Ok(Box::new(FlagMessageBinder {
            input: input.clone(),
            positionals,
            flags,
            arity,
        }))
    }
}

struct Positional {
    field: FieldDescriptor,
    varargs: bool,
}

struct FlagBinding {
    field: FieldDescriptor,
    id: String,
    deprecated: String,
}

struct FlagMessageBinder {
    input: MessageDescriptor,
    positionals: Vec<Positional>,
    flags: Vec<FlagBinding>,
    arity: Arity,
}

impl MessageBinder for FlagMessageBinder {
    fn arity(&self) -> Arity {
        self.arity
    }

    fn build_message(
        &self,
        matches: &ArgMatches,
        args: &[String],
    ) -> Result<DynamicMessage, BindingError> {
        let mut message = DynamicMessage::new(self.input.clone());

        let mut remaining = args.iter();
        for positional in &self.positionals {
            let field = &positional.field;
            let kind = field.kind();
            if positional.varargs {
                let items = remaining
                    .by_ref()
                    .map(|text| parse_text(field, &kind, text))
                    .collect::<Result<Vec<_>, _>>()?;
                if !items.is_empty() {
                    message.set(field, Value::List(items))?;
                }
                break;
            }
            let Some(text) = remaining.next() else {
                break;
            };
            let value = parse_text(field, &kind, text)?;
            if field.is_list() {
                message.set(field, Value::List(vec![value]))?;
            } else {
                message.set(field, value)?;
            }
        }

        for flag in &self.flags {
            let Some(values) = matches.try_get_many::<String>(&flag.id).ok().flatten() else {
                continue;
            };
            let values: Vec<&String> = values.collect();
            let Some(last) = values.last() else {
                continue;
            };
            if !flag.deprecated.is_empty()
                && matches.value_source(&flag.id) == Some(ValueSource::CommandLine)
            {
                warn!("Flag --{} has been deprecated, {}", flag.id, flag.deprecated);
            }

            let field = &flag.field;
            let kind = field.kind();
            let value = if field.is_map() {
                Value::List(
                    values
                        .iter()
                        .map(|text| parse_map_entry(field, text))
                        .collect::<Result<_, _>>()?,
                )
            } else if field.is_list() {
                Value::List(
                    values
                        .iter()
                        .map(|text| parse_text(field, &kind, text))
                        .collect::<Result<_, _>>()?,
                )
            } else {
                parse_text(field, &kind, last)?
            };
            message.set(field, value)?;
        }

        Ok(message)
    }
}

fn positional_fields(
    input: &MessageDescriptor,
    args: &[PositionalArg],
) -> Result<Vec<Positional>, BindingError> {
    let invalid = |field: &str, reason: &str| BindingError::InvalidPositional {
        field: field.to_owned(),
        reason: reason.to_owned(),
    };

    let mut positionals: Vec<Positional> = Vec::with_capacity(args.len());
    for (i, arg) in args.iter().enumerate() {
        let field =
            input
                .field_by_name(&arg.proto_field)
                .ok_or_else(|| BindingError::UnknownField {
                    message: input.full_name().to_owned(),
                    field: arg.proto_field.clone(),
                })?;
        if field.is_map() {
            return Err(invalid(&arg.proto_field, "map fields cannot be positional"));
        }
        if arg.varargs && i + 1 != args.len() {
            return Err(invalid(
                &arg.proto_field,
                "only the last positional argument may be varargs",
            ));
        }
        if arg.varargs && !field.is_list() {
            return Err(invalid(&arg.proto_field, "varargs requires a repeated field"));
        }
        if positionals.iter().any(|p| p.field == field) {
            return Err(invalid(&arg.proto_field, "field is bound more than once"));
        }
        positionals.push(Positional {
            field,
            varargs: arg.varargs,
        });
    }
    Ok(positionals)
}

fn positional_arg(positionals: &[Positional]) -> Arg {
    let arg = Arg::new(POSITIONAL_ARGS)
        .num_args(0..)
        .action(ArgAction::Append)
        .allow_negative_numbers(true);
    if positionals.is_empty() {
        return arg.hide(true);
    }
    let names: Vec<&str> = positionals.iter().map(|p| p.field.name()).collect();
    arg.value_name(names.join(" "))
}

fn flag_arg(name: String, field: &FieldDescriptor, options: &FlagOptions, versioned: bool) -> Arg {
    let help = if options.usage.is_empty() {
        field.docs().to_owned()
    } else {
        options.usage.clone()
    };

    let mut arg = Arg::new(name.clone()).long(name);
    if !help.is_empty() {
        arg = arg.help(help);
    }
    // -h belongs to help, -V to the version flag of versioned leaves.
    if let Some(short) = options.shorthand.chars().next()
        && short != 'h'
        && !(versioned && short == 'V')
    {
        arg = arg.short(short);
    }
    if options.hidden || !options.deprecated.is_empty() {
        arg = arg.hide(true);
    }
    if !options.default_value.is_empty() {
        arg = arg.default_value(options.default_value.clone());
    }

    if field.is_map() {
        return arg.action(ArgAction::Append).value_name("KEY=VALUE");
    }

    let kind = field.kind();
    arg = match &kind {
        Kind::Bool => arg
            .num_args(0..=1)
            .require_equals(true)
            .default_missing_value("true")
            .value_parser(PossibleValuesParser::new(["true", "false"])),
        Kind::Enum(enum_type) => arg.value_parser(PossibleValuesParser::new(
            enum_type
                .values()
                .map(|(name, _)| name.to_owned())
                .collect::<Vec<_>>(),
        )),
        Kind::Int32 | Kind::Sint32 | Kind::Sfixed32 | Kind::Int64 | Kind::Sint64 | Kind::Sfixed64 => {
            arg.value_name("INT").allow_negative_numbers(true)
        }
        Kind::Uint32 | Kind::Fixed32 | Kind::Uint64 | Kind::Fixed64 => arg.value_name("UINT"),
        Kind::Float | Kind::Double => arg.value_name("FLOAT").allow_negative_numbers(true),
        Kind::String => arg.value_name("STRING"),
        Kind::Bytes => arg.value_name("BASE64"),
        Kind::Message(_) => arg.value_name("JSON"),
    };
    if field.is_list() {
        arg = arg.action(ArgAction::Append);
    }
    arg
}

fn parse_map_entry(field: &FieldDescriptor, text: &str) -> Result<Value, BindingError> {
    let Kind::Message(entry_type) = field.kind() else {
        return Err(invalid_value(field, text, "not a map field"));
    };
    let (Some(key_field), Some(value_field)) =
        (entry_type.field_by_number(1), entry_type.field_by_number(2))
    else {
        return Err(invalid_value(field, text, "malformed map entry type"));
    };
    let (key, value) = text
        .split_once('=')
        .ok_or_else(|| invalid_value(field, text, "expected KEY=VALUE"))?;

    let mut entry = DynamicMessage::new(entry_type.clone());
    entry.set(&key_field, parse_text(field, &key_field.kind(), key)?)?;
    entry.set(&value_field, parse_text(field, &value_field.kind(), value)?)?;
    Ok(Value::Message(entry))
}

fn parse_text(field: &FieldDescriptor, kind: &Kind, text: &str) -> Result<Value, BindingError> {
    if let Kind::Message(descriptor) = kind
        && let Some(value_field) = json::wrapped_field(descriptor)
    {
        let mut message = DynamicMessage::new(descriptor.clone());
        message.set(&value_field, parse_text(field, &value_field.kind(), text)?)?;
        return Ok(Value::Message(message));
    }

    let json_value = match kind {
        Kind::Message(descriptor)
            if json::has_string_form(descriptor) && !text.trim_start().starts_with('{') =>
        {
            serde_json::Value::String(text.to_owned())
        }
        Kind::Message(_) => serde_json::from_str(text)
            .map_err(|e| invalid_value(field, text, &format!("invalid JSON: {e}")))?,
        Kind::Bool => match text {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            _ => return Err(invalid_value(field, text, "expected true or false")),
        },
        _ => serde_json::Value::String(text.to_owned()),
    };
    json::parse_value(kind, &json_value, field.name()).map_err(|e| match e {
        MessageError::InvalidJson { reason, .. } => invalid_value(field, text, &reason),
        other => BindingError::Message(other),
    })
}

fn invalid_value(field: &FieldDescriptor, text: &str, reason: &str) -> BindingError {
    BindingError::InvalidValue {
        field: field.name().to_owned(),
        value: text.to_owned(),
        reason: reason.to_owned(),
    }
}
