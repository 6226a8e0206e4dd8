use std::{
    ops::Deref,
    sync::{Arc, Weak},
};

use spark_transport::{StreamConnector, TransportTarget};

use super::{CLIENT_STOPPED_REASON, Endpoint, EndpointCore};
use crate::{config::EndpointConfig, event::EndpointEvent, id::ConnectionId, retry::RetryPolicy};

/// 主动拨号的端点。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 客户端只维护一条保留 ID 为 `"main"` 的出站连接；连接断开且没有其它连接时，
///   按固定间隔无限重试，直到被显式停止；
///
/// ## 逻辑 (How)
/// - 每一轮会话：先执行停止流程（拒绝挂起请求、销毁连接、发出 `Stopped`），
///   再拨号、注册 `"main"`、依次发出 `Connect` 与 `Started`，然后等待该连接被移除；
/// - 拨号失败按断线处理并发出 `Disconnect(None)`；
/// - 连接移除后若清单为空，按 [`RetryPolicy`] 等待后进入下一轮；
///
/// ## 契约 (What)
/// - `start` 立即返回；再次 `start` 会替换正在运行的会话；
/// - `stop` 在 `Stopped` 通知发出后完成，之后不会再重连。
/// - `"main"` 在拨号成功后才注册，出站帧不会在建连前缓存：`Started` 之前的
///   `send`/`request` 立即以 [`SendError::NoDestination`](crate::SendError::NoDestination) 失败，
///   调用方应先等待 `Started` 通知。
pub struct DialingEndpoint<C: StreamConnector> {
    endpoint: Endpoint,
    connector: Arc<C>,
}

#[cfg(feature = "runtime-tokio")]
impl DialingEndpoint<spark_transport_tcp::TcpConnector> {
    /// 使用默认 TCP 建连器。
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_connector(config, spark_transport_tcp::TcpConnector::new())
    }
}

impl<C: StreamConnector> DialingEndpoint<C> {
    pub fn with_connector(config: EndpointConfig, connector: C) -> Self {
        Self::from_parts(Endpoint::new(config), connector)
    }

    /// 以已有端点（例如使用了自定义 ID 生成器）与建连器组装。
    pub fn from_parts(endpoint: Endpoint, connector: C) -> Self {
        Self {
            endpoint,
            connector: Arc::new(connector),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 开始（或重新开始）拨号会话。
    pub fn start(&self, target: impl Into<TransportTarget>) {
        let target = target.into();
        tracing::info!(addr = %target, scheme = self.connector.scheme(), "dialing endpoint starting");
        let connector = self.connector.clone();
        self.endpoint
            .core()
            .restart(move |core, generation| run_session(core, connector, target, generation));
    }

    /// 停止会话：拒绝挂起请求、销毁连接，并在 `Stopped` 发出后返回。
    pub async fn stop(&self) {
        self.endpoint.core().stop(CLIENT_STOPPED_REASON).await;
    }
}

impl<C: StreamConnector> Deref for DialingEndpoint<C> {
    type Target = Endpoint;

    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

async fn run_session<C: StreamConnector>(
    core: Weak<EndpointCore>,
    connector: Arc<C>,
    target: TransportTarget,
    generation: u64,
) {
    let mut attempt = 0_u32;
    loop {
        let Some(strong) = core.upgrade() else {
            return;
        };
        strong.teardown(CLIENT_STOPPED_REASON).await;
        if !strong.is_current(generation) {
            return;
        }
        let policy = RetryPolicy::forever(strong.config().reconnect_delay());
        drop(strong);

        let dialed = connector.connect(&target).await;
        let Some(strong) = core.upgrade() else {
            return;
        };
        if !strong.is_current(generation) {
            return;
        }
        let closed = match dialed {
            Ok(parts) => match strong.attach(ConnectionId::main(), parts) {
                Ok(attached) => {
                    attempt = 0;
                    tracing::info!(addr = %target, peer_addr = ?attached.info.peer_addr(), "dialing endpoint connected");
                    strong.emit(EndpointEvent::Started);
                    Some(attached.closed)
                }
                Err(err) => {
                    tracing::warn!(addr = %target, error = %err, "cannot register outbound connection");
                    None
                }
            },
            Err(err) => {
                tracing::warn!(addr = %target, code = err.code(), retryable = err.is_retryable(), error = %err, "dial failed");
                strong.emit(EndpointEvent::Disconnect(None));
                None
            }
        };
        drop(strong);

        if let Some(closed) = closed {
            let _ = closed.await;
        }

        match core.upgrade() {
            Some(strong) if strong.has_connections() => {
                tracing::info!(addr = %target, "other connections remain, reconnect skipped");
                return;
            }
            Some(_) => {}
            None => return,
        }

        attempt = attempt.saturating_add(1);
        tracing::debug!(addr = %target, attempt, delay_ms = policy.delay().as_millis() as u64, "scheduling reconnect");
        let expired = || {
            core.upgrade()
                .is_none_or(|strong| !strong.is_current(generation))
        };
        if !policy.backoff(attempt, expired).await {
            return;
        }
    }
}
