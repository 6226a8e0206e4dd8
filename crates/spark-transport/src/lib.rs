#![deny(unsafe_code)]
#![doc = "spark-transport: 字节流传输层契约的统一抽象。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：上层消息协议只要求“有序、可靠、双向的字节流，并具备建连/监听/关闭与错误通知”，"]
#![doc = "  具体实现（TCP、内存管道、未来的 TLS）应可互换，而不必让协议核心感知 Tokio 具体类型。"]
#![doc = "- **What**：定义 [`StreamConnector`]、[`StreamBinder`]、[`StreamListener`] 三个契约，"]
#![doc = "  以及地址 [`TransportSocketAddr`]、目标 [`TransportTarget`] 与错误 [`TransportError`]。"]
#![doc = "- **How**：任何实现 `AsyncRead + AsyncWrite` 的流都自动满足 [`ByteStream`]，"]
#![doc = "  建连与接受结果统一包装为 [`ChannelParts`]，附带本地/对端地址元数据。"]

pub mod addr;
pub mod connection;
pub mod error;
pub mod listener;

pub use addr::{TransportSocketAddr, TransportTarget};
pub use connection::{ByteStream, ChannelParts, StreamConnector};
pub use error::{OperationKind, TransportError};
pub use listener::{StreamBinder, StreamListener};
