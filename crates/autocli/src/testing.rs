//! Shared test fixtures: a hand-built `pkg` schema and fake transports.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clap::ArgMatches;
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto, FileDescriptorSet, MessageOptions, MethodDescriptorProto,
    OneofDescriptorProto, ServiceDescriptorProto, SourceCodeInfo,
    field_descriptor_proto::{Label, Type},
    source_code_info::Location,
};
use tonic::Status;

use crate::{
    client::{Connection, ConnectionProvider},
    command::InvokeError,
    message::DynamicMessage,
    schema::{DescriptorPool, MessageDescriptor},
};

pub(crate) fn field(
    name: &str,
    number: i32,
    ty: Type,
    type_name: Option<&str>,
) -> FieldDescriptorProto {
    FieldDescriptorProto {
        name: Some(name.to_owned()),
        number: Some(number),
        label: Some(Label::Optional as i32),
        r#type: Some(ty as i32),
        type_name: type_name.map(str::to_owned),
        ..Default::default()
    }
}

pub(crate) fn repeated(mut field: FieldDescriptorProto) -> FieldDescriptorProto {
    field.label = Some(Label::Repeated as i32);
    field
}

pub(crate) fn message(name: &str) -> DescriptorProto {
    DescriptorProto {
        name: Some(name.to_owned()),
        ..Default::default()
    }
}

fn string_map_entry(name: &str) -> DescriptorProto {
    let mut entry = message(name);
    entry.field = vec![
        field("key", 1, Type::String, None),
        field("value", 2, Type::String, None),
    ];
    entry.options = Some(MessageOptions {
        map_entry: Some(true),
        ..Default::default()
    });
    entry
}

fn method(name: &str, input: &str, output: &str) -> MethodDescriptorProto {
    MethodDescriptorProto {
        name: Some(name.to_owned()),
        input_type: Some(input.to_owned()),
        output_type: Some(output.to_owned()),
        ..Default::default()
    }
}

fn service(name: &str, methods: Vec<MethodDescriptorProto>) -> ServiceDescriptorProto {
    ServiceDescriptorProto {
        name: Some(name.to_owned()),
        method: methods,
        ..Default::default()
    }
}

pub(crate) fn service_file(
    file_name: &str,
    package: &str,
    services: Vec<ServiceDescriptorProto>,
) -> FileDescriptorProto {
    FileDescriptorProto {
        name: Some(file_name.to_owned()),
        package: Some(package.to_owned()),
        service: services,
        syntax: Some("proto3".to_owned()),
        ..Default::default()
    }
}

fn doc(path: &[i32], comment: &str) -> Location {
    Location {
        path: path.to_vec(),
        leading_comments: Some(format!(" {comment}\n")),
        ..Default::default()
    }
}

/// `pkg/bank.proto`: services `pkg.Bank` (`Balance`, `SendCoins`),
/// `pkg.Empty` (no methods) and `pkg.Watch` (`Subscribe` is server
/// streaming, `Latest` is unary).
pub(crate) fn bank_descriptor_set() -> FileDescriptorSet {
    let status = EnumDescriptorProto {
        name: Some("Status".to_owned()),
        value: ["STATUS_UNSPECIFIED", "STATUS_ACTIVE", "STATUS_FROZEN"]
            .iter()
            .zip(0..)
            .map(|(name, number)| EnumValueDescriptorProto {
                name: Some((*name).to_owned()),
                number: Some(number),
                ..Default::default()
            })
            .collect(),
        ..Default::default()
    };

    let mut coin = message("Coin");
    coin.field = vec![
        field("denom", 1, Type::String, None),
        field("amount", 2, Type::String, None),
    ];

    let mut request = message("QueryBalanceRequest");
    request.field = vec![
        field("address", 1, Type::String, None),
        field("denom", 2, Type::String, None),
        repeated(field("extra_denoms", 3, Type::String, None)),
        field("status", 4, Type::Enum, Some(".pkg.Status")),
        field("include_locked", 5, Type::Bool, None),
        field("min_height", 6, Type::Int64, None),
        field("filter", 7, Type::Message, Some(".pkg.Coin")),
        repeated(field(
            "tags",
            8,
            Type::Message,
            Some(".pkg.QueryBalanceRequest.TagsEntry"),
        )),
        field("memo", 9, Type::Bytes, None),
    ];
    request.nested_type = vec![string_map_entry("TagsEntry")];

    let mut note = field("note", 6, Type::String, None);
    note.oneof_index = Some(0);
    note.proto3_optional = Some(true);

    let mut response = message("QueryBalanceResponse");
    response.field = vec![
        field("balance", 1, Type::Message, Some(".pkg.Coin")),
        repeated(field("heights", 2, Type::Int64, None)),
        repeated(field(
            "labels",
            3,
            Type::Message,
            Some(".pkg.QueryBalanceResponse.LabelsEntry"),
        )),
        field("status", 4, Type::Enum, Some(".pkg.Status")),
        field("page", 5, Type::Uint32, None),
        note,
        field("checksum", 7, Type::Bytes, None),
        field("ratio", 8, Type::Double, None),
        field("offset", 9, Type::Sint32, None),
    ];
    response.nested_type = vec![string_map_entry("LabelsEntry")];
    response.oneof_decl = vec![OneofDescriptorProto {
        name: Some("_note".to_owned()),
        ..Default::default()
    }];

    let mut send = message("MsgSendCoins");
    send.field = vec![
        field("from_address", 1, Type::String, None),
        field("to_address", 2, Type::String, None),
        repeated(field("amount", 3, Type::Message, Some(".pkg.Coin"))),
    ];

    let mut file = service_file(
        "pkg/bank.proto",
        "pkg",
        vec![
            service(
                "Bank",
                vec![
                    method("Balance", ".pkg.QueryBalanceRequest", ".pkg.QueryBalanceResponse"),
                    method("SendCoins", ".pkg.MsgSendCoins", ".pkg.MsgSendCoinsResponse"),
                ],
            ),
            service("Empty", Vec::new()),
            service(
                "Watch",
                vec![
                    MethodDescriptorProto {
                        server_streaming: Some(true),
                        ..method(
                            "Subscribe",
                            ".pkg.QueryBalanceRequest",
                            ".pkg.QueryBalanceResponse",
                        )
                    },
                    method("Latest", ".pkg.QueryBalanceRequest", ".pkg.QueryBalanceResponse"),
                ],
            ),
        ],
    );
    file.enum_type = vec![status];
    file.message_type = vec![
        coin,
        request,
        response,
        send,
        message("MsgSendCoinsResponse"),
    ];
    file.source_code_info = Some(SourceCodeInfo {
        location: vec![
            doc(&[6, 0], "Bank exposes account balances."),
            doc(&[6, 0, 2, 0], "Balance queries the balance of a single coin."),
            doc(&[4, 1, 2, 0], "address is the account to query."),
        ],
    });

    FileDescriptorSet { file: vec![file] }
}

pub(crate) fn bank_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(bank_descriptor_set())
        .expect("bank fixture should build")
}

/// `google/protobuf/wkt.proto`: the well-known types rendered specially in
/// JSON, declared the way protoc emits them.
fn well_known_file() -> FileDescriptorProto {
    let seconds_nanos = |name: &str| {
        let mut message = message(name);
        message.field = vec![
            field("seconds", 1, Type::Int64, None),
            field("nanos", 2, Type::Int32, None),
        ];
        message
    };
    let wrapper = |name: &str, ty: Type| {
        let mut message = message(name);
        message.field = vec![field("value", 1, ty, None)];
        message
    };

    let mut any = message("Any");
    any.field = vec![
        field("type_url", 1, Type::String, None),
        field("value", 2, Type::Bytes, None),
    ];

    let mut file = service_file("google/protobuf/wkt.proto", "google.protobuf", Vec::new());
    file.message_type = vec![
        any,
        seconds_nanos("Timestamp"),
        seconds_nanos("Duration"),
        wrapper("StringValue", Type::String),
        wrapper("UInt64Value", Type::Uint64),
        wrapper("FloatValue", Type::Float),
        wrapper("BoolValue", Type::Bool),
    ];
    file
}

/// `pkg/extras.proto`: `pkg.Choice` (a real oneof and a float field),
/// `pkg.Event` (well-known type fields), `pkg.Reserved` (field names that
/// clash with built-in flags) and service `pkg.Extras` (`Lookup`).
pub(crate) fn extras_descriptor_set() -> FileDescriptorSet {
    let mut a = field("a", 1, Type::String, None);
    a.oneof_index = Some(0);
    let mut b = field("b", 2, Type::String, None);
    b.oneof_index = Some(0);
    let mut inner = field("inner", 4, Type::Message, Some(".pkg.Choice"));
    inner.oneof_index = Some(0);

    let mut choice = message("Choice");
    choice.field = vec![a, b, field("weight", 3, Type::Float, None), inner];
    choice.oneof_decl = vec![OneofDescriptorProto {
        name: Some("pick".to_owned()),
        ..Default::default()
    }];

    let mut event = message("Event");
    event.field = vec![
        field("at", 1, Type::Message, Some(".google.protobuf.Timestamp")),
        field("took", 2, Type::Message, Some(".google.protobuf.Duration")),
        field("payload", 3, Type::Message, Some(".google.protobuf.Any")),
        field("label", 4, Type::Message, Some(".google.protobuf.StringValue")),
        field("count", 5, Type::Message, Some(".google.protobuf.UInt64Value")),
        field("weight", 6, Type::Message, Some(".google.protobuf.FloatValue")),
        repeated(field(
            "history",
            7,
            Type::Message,
            Some(".google.protobuf.Timestamp"),
        )),
    ];

    let mut reserved = message("Reserved");
    reserved.field = vec![
        field("address", 1, Type::String, None),
        field("help", 2, Type::String, None),
        field("node", 3, Type::String, None),
        field("config", 4, Type::String, None),
        field("descriptor_set", 5, Type::String, None),
        field("version", 6, Type::String, None),
    ];

    let mut file = service_file(
        "pkg/extras.proto",
        "pkg",
        vec![service(
            "Extras",
            vec![method("Lookup", ".pkg.Reserved", ".pkg.Event")],
        )],
    );
    file.dependency = vec!["google/protobuf/wkt.proto".to_owned()];
    file.message_type = vec![choice, event, reserved];

    FileDescriptorSet {
        file: vec![well_known_file(), file],
    }
}

pub(crate) fn extras_pool() -> DescriptorPool {
    DescriptorPool::from_file_descriptor_set(extras_descriptor_set())
        .expect("extras fixture should build")
}

/// A connection that records every call and replies with a canned outcome.
pub(crate) struct FakeConnection {
    pub(crate) calls: Mutex<Vec<(String, DynamicMessage)>>,
    reply: Box<dyn Fn(&MessageDescriptor) -> Result<DynamicMessage, Status> + Send + Sync>,
}

impl FakeConnection {
    pub(crate) fn replying(
        reply: impl Fn(&MessageDescriptor) -> Result<DynamicMessage, Status> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            reply: Box::new(reply),
        })
    }

    pub(crate) fn calls(&self) -> Vec<(String, DynamicMessage)> {
        self.calls.lock().expect("calls lock").clone()
    }
}

#[async_trait]
impl Connection for FakeConnection {
    async fn invoke(
        &self,
        method: &str,
        input: DynamicMessage,
        output: &MessageDescriptor,
    ) -> Result<DynamicMessage, Status> {
        self.calls
            .lock()
            .expect("calls lock")
            .push((method.to_owned(), input));
        (self.reply)(output)
    }
}

/// Hands out one shared [`FakeConnection`], or fails when `refuse` is set.
pub(crate) struct FakeProvider {
    pub(crate) connection: Arc<FakeConnection>,
    pub(crate) refuse: bool,
    pub(crate) requests: Mutex<usize>,
}

impl FakeProvider {
    pub(crate) fn new(connection: Arc<FakeConnection>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            refuse: false,
            requests: Mutex::new(0),
        })
    }

    pub(crate) fn refusing(connection: Arc<FakeConnection>) -> Arc<Self> {
        Arc::new(Self {
            connection,
            refuse: true,
            requests: Mutex::new(0),
        })
    }

    pub(crate) fn requests(&self) -> usize {
        *self.requests.lock().expect("requests lock")
    }
}

#[async_trait]
impl ConnectionProvider for FakeProvider {
    async fn connection(&self, _matches: &ArgMatches) -> Result<Arc<dyn Connection>, InvokeError> {
        *self.requests.lock().expect("requests lock") += 1;
        if self.refuse {
            return Err(InvokeError::Connection("connection refused".to_owned()));
        }
        let connection: Arc<dyn Connection> = self.connection.clone();
        Ok(connection)
    }
}
