//! Declarative command descriptors and per-method option records.
//!
//! These types are plain data: they deserialize from the `[modules]` tables
//! of `autocli.toml` and can equally be constructed in code. A
//! [`CommandDescriptor`] binds a command group to a service and nests further
//! groups; [`MethodOptions`] tweaks or suppresses the command generated for a
//! single RPC method. [`EffectiveCommandSpec::merge`] folds the options over
//! the defaults derived from the method descriptor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::MethodDescriptor;

/// A named command group in the static descriptor tree.
///
/// The name is the key under which the descriptor is stored, either in the
/// module map or in a parent's `sub_commands`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CommandDescriptor {
    /// Fully-qualified service name. Empty means the group has no leaves of
    /// its own and only carries `sub_commands`.
    pub service: String,

    /// One-line summary shown in the parent's command list.
    pub short: String,

    /// Per-method overrides, keyed by `rpc_method`.
    pub rpc_command_options: Vec<MethodOptions>,

    /// Nested command groups.
    pub sub_commands: BTreeMap<String, CommandDescriptor>,
}

impl CommandDescriptor {
    /// A descriptor bound to `service` with no overrides.
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            ..Self::default()
        }
    }

    /// Whether this descriptor can produce any command at all.
    pub fn is_empty(&self) -> bool {
        self.service.is_empty() && self.sub_commands.is_empty()
    }
}

/// Overrides for the command generated from one RPC method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MethodOptions {
    /// Method name as declared in the service, e.g. `Balance`.
    pub rpc_method: String,

    /// Usage line; its first word becomes the command name.
    #[serde(rename = "use")]
    pub usage: String,

    pub long: String,
    pub short: String,
    pub example: String,
    pub alias: Vec<String>,
    pub suggest_for: Vec<String>,

    /// Deprecation notice printed before the command runs.
    pub deprecated: String,

    pub version: String,

    /// Per-field flag tweaks, keyed by proto field name.
    pub flag_options: BTreeMap<String, FlagOptions>,

    /// Input fields bound to positional arguments, in order.
    pub positional_args: Vec<PositionalArg>,

    /// Suppresses the command entirely.
    pub skip: bool,
}

impl MethodOptions {
    /// Options targeting `rpc_method` with every other setting at its default.
    pub fn for_method(rpc_method: impl Into<String>) -> Self {
        Self {
            rpc_method: rpc_method.into(),
            ..Self::default()
        }
    }
}

/// Binds an input field to a positional argument.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PositionalArg {
    pub proto_field: String,

    /// Collects every remaining argument; only valid on the last positional
    /// and for repeated fields.
    pub varargs: bool,
}

impl PositionalArg {
    pub fn new(proto_field: impl Into<String>) -> Self {
        Self {
            proto_field: proto_field.into(),
            varargs: false,
        }
    }

    pub fn varargs(proto_field: impl Into<String>) -> Self {
        Self {
            proto_field: proto_field.into(),
            varargs: true,
        }
    }
}

/// Tweaks for the flag generated from one input field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FlagOptions {
    /// Replaces the kebab-case flag name.
    pub name: String,
    /// Single-character short flag.
    pub shorthand: String,
    /// Replaces the help text taken from the field docs.
    pub usage: String,
    pub default_value: String,
    pub deprecated: String,
    pub hidden: bool,
}

/// The fully-resolved shape of one generated leaf command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EffectiveCommandSpec {
    /// Command name: the first word of `usage`.
    pub name: String,
    pub usage: String,
    pub short: String,
    pub long: String,
    pub example: String,
    pub aliases: Vec<String>,
    pub suggest_for: Vec<String>,
    pub deprecated: String,
    pub version: String,
    pub flag_options: BTreeMap<String, FlagOptions>,
    pub positional_args: Vec<PositionalArg>,
    pub skip: bool,
}

impl EffectiveCommandSpec {
    /// Merges `options` (or the all-default record when `None`) over the
    /// defaults derived from `method`.
    ///
    /// An empty `use` falls back to the kebab-case method name and an empty
    /// `long` to the method's documentation.
    pub fn merge(method: &MethodDescriptor, options: Option<&MethodOptions>) -> Self {
        let defaults = MethodOptions::default();
        let options = options.unwrap_or(&defaults);

        let usage = if options.usage.trim().is_empty() {
            to_kebab_case(method.name())
        } else {
            options.usage.trim().to_owned()
        };
        let name = usage
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_owned();
        let long = if options.long.is_empty() {
            method.docs().to_owned()
        } else {
            options.long.clone()
        };

        Self {
            name,
            usage,
            short: options.short.clone(),
            long,
            example: options.example.clone(),
            aliases: options.alias.clone(),
            suggest_for: options.suggest_for.clone(),
            deprecated: options.deprecated.clone(),
            version: options.version.clone(),
            flag_options: options.flag_options.clone(),
            positional_args: options.positional_args.clone(),
            skip: options.skip,
        }
    }

    /// Whether the usage line carries more than the command name.
    pub fn has_custom_usage(&self) -> bool {
        self.usage != self.name
    }
}

/// Converts a `CamelCase`, `snake_case` or mixed identifier to kebab-case.
///
/// Runs of capitals are treated as one word, so `GetABCInfo` becomes
/// `get-abc-info`.
pub fn to_kebab_case(name: &str) -> String {
    let chars: Vec<char> = name.chars().collect();
    let mut out = String::with_capacity(name.len() + 4);

    for (i, &c) in chars.iter().enumerate() {
        if c == '_' || c == '-' || c.is_whitespace() {
            if !out.is_empty() && !out.ends_with('-') {
                out.push('-');
            }
            continue;
        }
        if c.is_uppercase() && i > 0 && !out.is_empty() && !out.ends_with('-') {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
            if prev.is_lowercase() || prev.is_ascii_digit() || (prev.is_uppercase() && next_is_lower)
            {
                out.push('-');
            }
        }
        out.extend(c.to_lowercase());
    }

    while out.ends_with('-') {
        out.pop();
    }
    out
}
