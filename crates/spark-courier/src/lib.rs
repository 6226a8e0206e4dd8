#![deny(unsafe_code)]
#![doc = "spark-courier: 基于分隔帧 JSON 的双向消息与请求/响应协议。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：在一条有序、可靠的双向字节流上提供两种对称能力：按路径分发的单向消息，"]
#![doc = "  以及带超时与错误传播的请求/回复；任一方（拨号方或监听方）都可以发起请求。"]
#![doc = "- **What**：分帧器 [`FrameDecoder`]、消息 [`Message`]、处理链（[`Endpoint::use_handler`] 与 [`Next`]）、"]
#![doc = "  请求关联（[`ResponseFuture`]）、连接清单，以及拨号端点 [`DialingEndpoint`] 与监听端点 [`ListeningEndpoint`]。"]
#![doc = "- **How**：线上每帧是一个 UTF-8 JSON 对象 `{id, path, body}`，以 `0x00` 结尾；"]
#![doc = "  回复沿用请求的 `id`，错误通过回复体的 `error` 字段表达。"]
#![doc = ""]
#![doc = "== 运行时 =="]
#![doc = "- 依赖 Tokio；`runtime-tokio` 特性（默认开启）装配 TCP 传输，"]
#![doc = "  关闭后仍可通过 [`Endpoint::register`] 注册任意实现 `AsyncRead + AsyncWrite` 的流。"]

pub mod config;
mod correlator;
mod endpoint;
pub mod error;
pub mod event;
pub mod frame;
pub mod id;
pub mod message;
pub mod pattern;
mod registry;
pub mod retry;
mod router;

pub use config::EndpointConfig;
pub use correlator::{DEFAULT_CLEAR_REASON, ResponseFuture};
pub use endpoint::{
    CLIENT_STOPPED_REASON, DialingEndpoint, Endpoint, ListeningEndpoint, SERVER_STOPPED_REASON,
};
pub use error::{
    ConfigError, DecodeError, Fault, FrameError, ParseError, RegistryError, RemoteError,
    RequestError, RespondError, SendError, ValidationError,
};
pub use event::{EndpointEvent, EventKind, EventStream};
pub use frame::{FRAME_DELIMITER, FrameDecoder, encode_frame};
pub use id::{ConnectionId, IdGenerator, MAIN_CONNECTION_ID, UuidGenerator};
pub use message::{Body, Destination, Message, MessageOverrides, MessageSeed};
pub use pattern::{GlobPattern, LiteralPath, PathMatcher, PathPattern, SEGMENT_SEPARATOR};
pub use registry::ConnectionInfo;
pub use retry::RetryPolicy;
pub use router::{Handler, INTERNAL_ERROR_MESSAGE, Next, handler};
pub use spark_transport::{ChannelParts, TransportSocketAddr, TransportTarget};

#[cfg(feature = "runtime-tokio")]
pub use spark_transport_tcp::{TcpBinder, TcpConnector, TcpSocketConfig};

/// 默认 TCP 拨号端点。
#[cfg(feature = "runtime-tokio")]
pub type TcpDialingEndpoint = DialingEndpoint<TcpConnector>;

/// 默认 TCP 监听端点。
#[cfg(feature = "runtime-tokio")]
pub type TcpListeningEndpoint = ListeningEndpoint<TcpBinder>;
