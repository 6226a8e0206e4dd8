use crate::channel::{TcpSocketConfig, into_parts};
use async_trait::async_trait;
use spark_transport::{
    ChannelParts, OperationKind, StreamBinder, StreamListener, TransportError,
    TransportSocketAddr, TransportTarget,
};
use tokio::net::{TcpListener as TokioTcpListener, TcpStream as TokioTcpStream};

/// 监听方未指定主机时绑定的通配地址。
const DEFAULT_BIND_HOST: &str = "0.0.0.0";

/// 对 Tokio `TcpListener` 的语义封装。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 在不暴露 Tokio 具体类型的前提下，提供“监听 → 接受连接”的最小能力；
/// - 每条入站连接继承监听器的默认 [`TcpSocketConfig`]，保证服务端连接策略一致。
///
/// ## 契约 (What)
/// - **前置条件**：调用方必须在 Tokio 运行时中使用该监听器；
/// - **后置条件**：`accept` 成功返回的通道已应用套接字配置并携带地址；
/// - 丢弃监听器即关闭监听套接字，已接受的连接不受影响。
#[derive(Debug)]
pub struct TcpListener {
    inner: TokioTcpListener,
    local_addr: TransportSocketAddr,
    default_config: TcpSocketConfig,
}

impl TcpListener {
    /// 绑定到指定目标并设置默认的套接字配置。
    pub async fn bind_with_config(
        target: &TransportTarget,
        default_config: TcpSocketConfig,
    ) -> Result<Self, TransportError> {
        let host = target.host_or(DEFAULT_BIND_HOST);
        let listener = TokioTcpListener::bind((host, target.port()))
            .await
            .map_err(|err| TransportError::from_io(OperationKind::BIND, err))?;
        let local = listener
            .local_addr()
            .map_err(|err| TransportError::from_io(OperationKind::BIND, err))?;
        Ok(Self {
            inner: listener,
            local_addr: TransportSocketAddr::from(local),
            default_config,
        })
    }

    /// 读取监听器为后续 `accept` 预设的默认套接字配置。
    pub fn default_socket_config(&self) -> &TcpSocketConfig {
        &self.default_config
    }
}

#[async_trait]
impl StreamListener for TcpListener {
    type Stream = TokioTcpStream;

    fn local_addr(&self) -> TransportSocketAddr {
        self.local_addr
    }

    async fn accept(&self) -> Result<ChannelParts<Self::Stream>, TransportError> {
        let (stream, remote) = self
            .inner
            .accept()
            .await
            .map_err(|err| TransportError::from_io(OperationKind::ACCEPT, err))?;
        tracing::trace!(peer = %remote, "tcp connection accepted");
        into_parts(stream, &self.default_config, OperationKind::ACCEPT)
    }
}

/// `TcpListener` 的建造器，监听端点通过它按需（重新）绑定。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 监听失败后端点需要多次重新绑定，建造器保存配置、可重复调用 `bind`；
/// - 在绑定前一次性设定默认套接字行为，避免在业务层重复操作 `socket2`。
#[derive(Clone, Debug, Default)]
pub struct TcpBinder {
    default_config: TcpSocketConfig,
}

impl TcpBinder {
    /// 使用默认套接字配置创建绑定器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 覆盖默认的套接字配置。
    pub fn with_default_socket_config(mut self, config: TcpSocketConfig) -> Self {
        self.default_config = config;
        self
    }
}

#[async_trait]
impl StreamBinder for TcpBinder {
    type Listener = TcpListener;

    fn scheme(&self) -> &'static str {
        "tcp"
    }

    async fn bind(&self, target: &TransportTarget) -> Result<Self::Listener, TransportError> {
        TcpListener::bind_with_config(target, self.default_config.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// 验证绑定器能够将自定义配置写入监听器，并应用到接受的连接上。
    #[tokio::test(flavor = "multi_thread")]
    async fn binder_applies_default_config() {
        let config = TcpSocketConfig::new().with_linger(Some(Duration::from_secs(2)));
        let listener = TcpBinder::new()
            .with_default_socket_config(config)
            .bind(&TransportTarget::new("127.0.0.1", 0))
            .await
            .expect("bind listener");

        assert_eq!(
            listener.default_socket_config().linger(),
            Some(Duration::from_secs(2))
        );

        let port = listener.local_addr().port();
        assert_ne!(port, 0);
        let client = tokio::spawn(async move {
            tokio::net::TcpStream::connect(("127.0.0.1", port)).await
        });

        let parts = listener.accept().await.expect("accept");
        assert!(parts.stream.nodelay().expect("read nodelay"));
        assert!(parts.peer_addr.is_some());
        client.await.expect("join client").expect("client connect");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn binding_a_taken_port_fails_with_bind_code() {
        let first = TcpBinder::new()
            .bind(&TransportTarget::new("127.0.0.1", 0))
            .await
            .expect("bind first");
        let port = first.local_addr().port();

        let err = TcpBinder::new()
            .bind(&TransportTarget::new("127.0.0.1", port))
            .await
            .expect_err("port already taken");
        assert_eq!(err.code(), "spark.transport.bind_failed");
    }
}
