use async_trait::async_trait;
use socket2::SockRef;
use spark_transport::{
    ChannelParts, OperationKind, StreamConnector, TransportError, TransportSocketAddr,
    TransportTarget,
};
use std::{io, time::Duration};
use tokio::net::TcpStream as TokioTcpStream;

/// 建连方未指定主机时使用的默认主机。
const DEFAULT_CONNECT_HOST: &str = "localhost";

/// TCP 套接字级配置项，实现对内核行为的显式控制。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 消息帧普遍很小，默认开启 `TCP_NODELAY`，避免请求/响应往返被 Nagle 算法拖慢；
/// - 将 `SO_LINGER` 显式配置化，避免调用方直接操作 `socket2` 或平台相关常量。
///
/// ## 契约说明（What）
/// - `with_nodelay` / `with_linger`：返回新的配置实例；
/// - **前置条件**：`apply` 前 `TcpStream` 必须已成功创建；
/// - **后置条件**：若 `apply` 返回 `Ok(())`，则套接字选项已落地。
///
/// ## 设计取舍（Trade-offs）
/// - 若 linger 设置过小，仍在发送缓冲区的数据可能被丢弃并触发对端 `ECONNRESET`。
#[derive(Clone, Debug)]
pub struct TcpSocketConfig {
    nodelay: bool,
    linger: Option<Duration>,
}

impl Default for TcpSocketConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TcpSocketConfig {
    /// 创建默认配置：开启 `TCP_NODELAY`，`linger = None`。
    pub const fn new() -> Self {
        Self {
            nodelay: true,
            linger: None,
        }
    }

    /// 设置 `TCP_NODELAY`。
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// 设置 `SO_LINGER` 超时时长。
    pub fn with_linger(mut self, linger: Option<Duration>) -> Self {
        self.linger = linger;
        self
    }

    /// 是否开启 `TCP_NODELAY`。
    pub fn nodelay(&self) -> bool {
        self.nodelay
    }

    /// 读取当前配置的超时时长。
    pub fn linger(&self) -> Option<Duration> {
        self.linger
    }

    pub(crate) fn apply(&self, stream: &TokioTcpStream) -> io::Result<()> {
        stream.set_nodelay(self.nodelay)?;
        if self.linger.is_some() {
            SockRef::from(stream).set_linger(self.linger)?;
        }
        Ok(())
    }
}

/// 将已建立的 `TcpStream` 应用配置并拆解为带地址元数据的通道部件。
pub(crate) fn into_parts(
    stream: TokioTcpStream,
    config: &TcpSocketConfig,
    operation: OperationKind,
) -> Result<ChannelParts<TokioTcpStream>, TransportError> {
    config
        .apply(&stream)
        .map_err(|err| TransportError::from_io(OperationKind::CONFIGURE, err))?;
    let local = stream
        .local_addr()
        .map_err(|err| TransportError::from_io(operation, err))?;
    let peer = stream
        .peer_addr()
        .map_err(|err| TransportError::from_io(operation, err))?;
    Ok(ChannelParts {
        stream,
        local_addr: Some(TransportSocketAddr::from(local)),
        peer_addr: Some(TransportSocketAddr::from(peer)),
    })
}

/// TCP 建连器。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 拨号端点只依赖 [`StreamConnector`] 契约，本类型是其默认实现；
/// - 套接字配置在建连成功后立刻落地，保证首帧发送前 `TCP_NODELAY` 已生效。
///
/// ## 逻辑 (How)
/// - 目标未指定主机时回落到 `localhost`；
/// - 解析与多地址尝试交给 `TcpStream::connect((host, port))`。
///
/// ## 契约 (What)
/// - 成功返回的 [`ChannelParts`] 已携带本地/对端地址；
/// - 失败时返回 `spark.transport.connect_failed` 或 `spark.transport.configure_failed`。
#[derive(Clone, Debug, Default)]
pub struct TcpConnector {
    config: TcpSocketConfig,
}

impl TcpConnector {
    /// 使用默认套接字配置创建建连器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 使用指定套接字配置创建建连器。
    pub fn with_config(config: TcpSocketConfig) -> Self {
        Self { config }
    }

    /// 当前套接字配置。
    pub fn config(&self) -> &TcpSocketConfig {
        &self.config
    }
}

#[async_trait]
impl StreamConnector for TcpConnector {
    type Stream = TokioTcpStream;

    fn scheme(&self) -> &'static str {
        "tcp"
    }

    async fn connect(
        &self,
        target: &TransportTarget,
    ) -> Result<ChannelParts<Self::Stream>, TransportError> {
        let host = target.host_or(DEFAULT_CONNECT_HOST);
        let stream = TokioTcpStream::connect((host, target.port()))
            .await
            .map_err(|err| TransportError::from_io(OperationKind::CONNECT, err))?;
        tracing::trace!(addr = %target, "tcp connection established");
        into_parts(stream, &self.config, OperationKind::CONNECT)
    }
}
