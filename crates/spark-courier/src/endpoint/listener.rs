use std::{
    ops::Deref,
    sync::{Arc, Weak},
    time::Duration,
};

use parking_lot::Mutex;
use spark_transport::{StreamBinder, StreamListener, TransportSocketAddr, TransportTarget};

use super::{Endpoint, EndpointCore, SERVER_STOPPED_REASON};
use crate::{config::EndpointConfig, event::EndpointEvent, id::ConnectionId, retry::RetryPolicy};

/// 被动监听的端点。
///
/// # 教案式注释
///
/// ## 意图 (Why)
/// - 服务端为每条入站连接签发唯一 ID 并注册，之后双方对等：任一方都可以发送、请求与回复；
///
/// ## 逻辑 (How)
/// - 每一轮会话先执行停止流程，再绑定监听；绑定失败按 [`RetryPolicy`] 固定间隔重试；
/// - 监听就绪后发出 `Started`，随后循环接受连接，每条连接注册时发出 `Connect`；
/// - 接受失败只记录告警并在间隔后继续接受，不影响已建立的连接；
///
/// ## 契约 (What)
/// - [`ListeningEndpoint::local_addr`] 在就绪后返回实际绑定地址，绑定端口 0 时据此得知端口；
/// - `stop` 关闭监听器、拒绝挂起请求、销毁全部连接，并在 `Stopped` 发出后返回。
pub struct ListeningEndpoint<B: StreamBinder> {
    endpoint: Endpoint,
    binder: Arc<B>,
    bound: Arc<Mutex<Option<TransportSocketAddr>>>,
}

#[cfg(feature = "runtime-tokio")]
impl ListeningEndpoint<spark_transport_tcp::TcpBinder> {
    /// 使用默认 TCP 绑定器。
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_binder(config, spark_transport_tcp::TcpBinder::new())
    }
}

impl<B: StreamBinder> ListeningEndpoint<B> {
    pub fn with_binder(config: EndpointConfig, binder: B) -> Self {
        Self::from_parts(Endpoint::new(config), binder)
    }

    /// 以已有端点与绑定器组装。
    pub fn from_parts(endpoint: Endpoint, binder: B) -> Self {
        Self {
            endpoint,
            binder: Arc::new(binder),
            bound: Arc::new(Mutex::new(None)),
        }
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// 当前监听地址；未就绪或已停止时为 `None`。
    pub fn local_addr(&self) -> Option<TransportSocketAddr> {
        *self.bound.lock()
    }

    /// 开始（或重新开始）监听会话。
    pub fn start(&self, target: impl Into<TransportTarget>) {
        let target = target.into();
        tracing::info!(addr = %target, scheme = self.binder.scheme(), "listening endpoint starting");
        let binder = self.binder.clone();
        let bound = self.bound.clone();
        self.endpoint.core().restart(move |core, generation| {
            run_session(core, binder, target, bound, generation)
        });
    }

    /// 停止会话，在 `Stopped` 发出后返回。
    pub async fn stop(&self) {
        self.endpoint.core().stop(SERVER_STOPPED_REASON).await;
        *self.bound.lock() = None;
    }
}

impl<B: StreamBinder> Deref for ListeningEndpoint<B> {
    type Target = Endpoint;

    fn deref(&self) -> &Self::Target {
        &self.endpoint
    }
}

async fn run_session<B: StreamBinder>(
    core: Weak<EndpointCore>,
    binder: Arc<B>,
    target: TransportTarget,
    bound: Arc<Mutex<Option<TransportSocketAddr>>>,
    generation: u64,
) {
    let mut attempt = 0_u32;
    loop {
        let Some(strong) = core.upgrade() else {
            return;
        };
        *bound.lock() = None;
        strong.teardown(SERVER_STOPPED_REASON).await;
        if !strong.is_current(generation) {
            return;
        }
        let delay = strong.config().relisten_delay();
        drop(strong);

        match binder.bind(&target).await {
            Ok(listener) => {
                let Some(strong) = core.upgrade() else {
                    return;
                };
                if !strong.is_current(generation) {
                    return;
                }
                let local = listener.local_addr();
                *bound.lock() = Some(local);
                tracing::info!(local_addr = %local, "listening endpoint ready");
                strong.emit(EndpointEvent::Started);
                drop(strong);
                accept_loop(&core, &listener, delay, generation).await;
                return;
            }
            Err(err) => {
                tracing::warn!(addr = %target, code = err.code(), retryable = err.is_retryable(), error = %err, "listen failed");
            }
        }

        attempt = attempt.saturating_add(1);
        let expired = || {
            core.upgrade()
                .is_none_or(|strong| !strong.is_current(generation))
        };
        if !RetryPolicy::forever(delay).backoff(attempt, expired).await {
            return;
        }
    }
}

/// 接受循环；仅在端点释放或会话过期时返回。
async fn accept_loop<L: StreamListener>(
    core: &Weak<EndpointCore>,
    listener: &L,
    delay: Duration,
    generation: u64,
) {
    loop {
        let accepted = listener.accept().await;
        let Some(strong) = core.upgrade() else {
            return;
        };
        if !strong.is_current(generation) {
            return;
        }
        match accepted {
            Ok(parts) => {
                let id = ConnectionId::new(strong.ids().generate());
                if let Err(err) = strong.attach(id, parts) {
                    tracing::warn!(error = %err, "cannot register inbound connection");
                }
            }
            Err(err) => {
                drop(strong);
                tracing::warn!(code = err.code(), error = %err, "accept failed, retrying");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
