use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{TransportError, TransportSocketAddr, TransportTarget};

/// 有序、可靠、双向的字节流。
///
/// 任何满足 `AsyncRead + AsyncWrite + Send + Unpin + 'static` 的类型自动实现该 trait，
/// 因此 `tokio::net::TcpStream` 与 `tokio::io::DuplexStream` 都可直接交给协议核心注册。
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

/// 建连或接受成功后交付的通道部件。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 协议核心需要在拆分读写半部之前记录地址元数据，供连接清单与日志使用；
/// - 保持流的所有权转移语义：一旦交付，实现方不再持有该流。
///
/// ## 契约（What）
/// - `stream`：原始字节流；
/// - `local_addr` / `peer_addr`：若实现无法提供（如内存管道）则为 `None`。
#[derive(Debug)]
pub struct ChannelParts<S> {
    pub stream: S,
    pub local_addr: Option<TransportSocketAddr>,
    pub peer_addr: Option<TransportSocketAddr>,
}

impl<S: ByteStream> ChannelParts<S> {
    /// 包装不带地址信息的流。
    pub fn detached(stream: S) -> Self {
        Self {
            stream,
            local_addr: None,
            peer_addr: None,
        }
    }
}

/// 主动建连的传输契约。
///
/// # 教案式说明
/// - **意图 (Why)**：拨号端点只需要“给定目标，产出一条字节流”，重连节律由上层策略驱动；
/// - **契约 (What)**：`connect` 成功返回已建立的通道；失败返回 [`TransportError`]，
///   调用方据此记录日志并按策略重试；
/// - **前置条件**：调用方需处于实现所要求的异步运行时中。
#[async_trait]
pub trait StreamConnector: Send + Sync + 'static {
    /// 建连产出的流类型。
    type Stream: ByteStream;

    /// 协议标识，如 `"tcp"`。
    fn scheme(&self) -> &'static str;

    /// 建立到目标的连接。
    async fn connect(
        &self,
        target: &TransportTarget,
    ) -> Result<ChannelParts<Self::Stream>, TransportError>;
}
