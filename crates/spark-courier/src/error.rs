//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 为协议各层的失败语义提供集中定义：分帧、解析、校验、发送、请求关联、回复与注册；
//! - 每个错误都带稳定错误码（`code()`），便于日志聚合与告警维度对齐。
//!
//! ## 传播策略（What）
//! - 连接层与分发层的失败都不是致命的：要么丢弃并记录日志，要么重试，
//!   要么以被拒绝的 [`ResponseFuture`](crate::ResponseFuture) 交给等待该回复的调用方；
//! - 处理器内部的错误使用 `anyhow::Error` 传播，结构化错误对象通过 [`Fault`] 携带额外字段。

use std::str::Utf8Error;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::{id::ConnectionId, message::Message};

/// 帧内容无法解析为 JSON 对象（FrameParseError）。
///
/// 连接保持存活，该帧在记录调试日志后被丢弃。
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] Utf8Error),
    #[error("frame payload is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("frame payload is not a JSON object")]
    NotAnObject,
}

/// 消息缺少必需字段（ValidationError），消息被丢弃且不尝试回复。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("message path is missing or empty")]
    MissingPath,
}

/// 由一帧构造消息失败。
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl DecodeError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::Parse(_) => "spark.courier.frame.parse",
            DecodeError::Validation(_) => "spark.courier.message.invalid",
        }
    }
}

/// 分帧失败：缓冲在遇到分隔符之前就超过了帧预算。
///
/// 属于协议违例，连接会被销毁。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("undelimited frame of {buffered} bytes exceeds budget of {limit} bytes")]
    Oversized { buffered: usize, limit: usize },
}

/// 发送失败（SendError）。
///
/// 仅报告给调用方，不会因此拆除连接；连接的拆除只由流级错误或关闭事件驱动。
#[derive(Debug, Error)]
pub enum SendError {
    /// 消息未绑定到任何端点。
    #[error("message is not bound to an endpoint")]
    Unbound,
    /// 拥有该消息的端点已被释放。
    #[error("owning endpoint has been dropped")]
    EndpointGone,
    /// 目的地解析后没有任何连接。
    #[error("no destination connection available")]
    NoDestination,
    /// 指定的连接不存在。
    #[error("connection `{0}` is not registered")]
    UnknownConnection(ConnectionId),
    /// 连接的写任务已经结束。
    #[error("connection `{0}` is closed")]
    ConnectionClosed(ConnectionId),
    /// 消息无法编码为 JSON。
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    /// 待发送的消息无法构造。
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl SendError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            SendError::Unbound => "spark.courier.send.unbound",
            SendError::EndpointGone => "spark.courier.send.endpoint_gone",
            SendError::NoDestination => "spark.courier.send.no_destination",
            SendError::UnknownConnection(_) => "spark.courier.send.unknown_connection",
            SendError::ConnectionClosed(_) => "spark.courier.send.connection_closed",
            SendError::Encode(_) => "spark.courier.send.encode",
            SendError::Invalid(_) => "spark.courier.message.invalid",
        }
    }
}

/// 回复失败。
#[derive(Debug, Error)]
pub enum RespondError {
    #[error("message was already replied to")]
    AlreadyReplied,
    #[error("local messages cannot be replied to")]
    Local,
    #[error("message is not bound to an endpoint")]
    Unbound,
    #[error(transparent)]
    Send(#[from] SendError),
}

/// 注册连接失败。
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("connection `{0}` is already registered")]
    DuplicateConnection(ConnectionId),
}

/// 加载配置失败。
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// 请求的失败结果。
///
/// # 教案式说明
/// - **意图 (Why)**：请求的四种结局（超时、被清理、发送失败、对端报错）需要让调用方精确区分；
/// - **契约 (What)**：`Display` 即错误消息，超时固定为 `"Request timed out."`；
///   对端报错时可通过 [`RequestError::response`] 取回触发拒绝的回复消息。
#[derive(Debug, Error)]
pub enum RequestError {
    /// 计时器先于回复触发。
    #[error("Request timed out.")]
    TimedOut,
    /// 端点停止或显式清理挂起请求。
    #[error("{reason}")]
    Cleared { reason: String },
    /// 发送请求本身失败。
    #[error(transparent)]
    Send(#[from] SendError),
    /// 对端以 `body.error` 回复。
    #[error("{}", .0.message())]
    Remote(Box<RemoteError>),
    /// 关联器在结算前被整体释放。
    #[error("request was abandoned before settlement")]
    Abandoned,
}

impl RequestError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            RequestError::TimedOut => "spark.courier.request.timeout",
            RequestError::Cleared { .. } => "spark.courier.request.cleared",
            RequestError::Send(err) => err.code(),
            RequestError::Remote(_) => "spark.courier.request.remote",
            RequestError::Abandoned => "spark.courier.request.abandoned",
        }
    }

    /// 触发拒绝的回复消息（仅对端报错时存在）。
    pub fn response(&self) -> Option<&Message> {
        match self {
            RequestError::Remote(remote) => Some(remote.response()),
            _ => None,
        }
    }

    /// 对端错误的详细信息。
    pub fn remote(&self) -> Option<&RemoteError> {
        match self {
            RequestError::Remote(remote) => Some(remote),
            _ => None,
        }
    }
}

/// 对端通过回复体 `error` 字段报告的错误。
///
/// - 字符串形式：`message` 即该字符串，`fields` 为空；
/// - 对象形式：`fields` 为对象的全部字段，若其中 `message` 为字符串则作为错误消息。
#[derive(Clone, Debug)]
pub struct RemoteError {
    message: String,
    fields: Map<String, Value>,
    response: Message,
}

impl RemoteError {
    pub(crate) fn new(message: String, fields: Map<String, Value>, response: Message) -> Self {
        Self {
            message,
            fields,
            response,
        }
    }

    /// 错误消息。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 结构化错误对象的字段。
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// 读取单个字段。
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// 触发拒绝的回复消息。
    pub fn response(&self) -> &Message {
        &self.response
    }
}

/// 处理器抛出的结构化错误对象。
///
/// 分发边界会把它序列化为 `{"message": ..., <fields>}` 并自动回复给远端发送者；
/// 普通错误只序列化 `message`。
///
/// ```
/// use spark_courier::Fault;
///
/// let fault = Fault::new("quota exceeded").with_field("code", 429);
/// assert_eq!(fault.to_value()["code"], 429);
/// ```
#[derive(Clone, Debug, Error)]
#[error("{message}")]
pub struct Fault {
    message: String,
    fields: Map<String, Value>,
}

impl Fault {
    /// 以错误消息构造。
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fields: Map::new(),
        }
    }

    /// 附加一个字段；`message` 字段始终以构造时的消息为准。
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// 错误消息。
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 序列化为错误对象。
    pub fn to_value(&self) -> Value {
        let mut object = self.fields.clone();
        object.insert("message".to_owned(), Value::String(self.message.clone()));
        Value::Object(object)
    }
}
