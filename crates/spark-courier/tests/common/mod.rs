#![allow(dead_code)]

use std::{future::Future, time::Duration};

use anyhow::{Context, Result, anyhow};
use spark_courier::{
    ConnectionId, EndpointConfig, EndpointEvent, EventKind, EventStream, TcpDialingEndpoint,
    TcpListeningEndpoint, TransportTarget,
};
use tracing_subscriber::EnvFilter;

/// 单个等待步骤的上限，防止测试在失败时挂起。
pub const WAIT: Duration = Duration::from_secs(5);

pub const LOCALHOST: &str = "127.0.0.1";

/// 安装测试日志订阅者，输出受 `RUST_LOG` 控制。
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 缩短重试间隔的配置。
pub fn fast_config() -> EndpointConfig {
    EndpointConfig::default()
        .with_reconnect_delay(Duration::from_millis(150))
        .with_relisten_delay(Duration::from_millis(150))
        .with_request_timeout(Duration::from_secs(3))
}

pub async fn within<F: Future>(future: F) -> Result<F::Output> {
    tokio::time::timeout(WAIT, future)
        .await
        .map_err(|_| anyhow!("timed out after {WAIT:?}"))
}

pub async fn expect_event(events: &mut EventStream, kind: EventKind) -> Result<EndpointEvent> {
    within(events.wait_for(kind))
        .await?
        .with_context(|| format!("event stream closed before {kind:?}"))
}

/// 等待下一条 `Connect` 并返回连接 ID。
pub async fn expect_connect(events: &mut EventStream) -> Result<ConnectionId> {
    match expect_event(events, EventKind::Connect).await? {
        EndpointEvent::Connect(info) => Ok(info.id().clone()),
        other => Err(anyhow!("unexpected event {other:?}")),
    }
}

/// 在本地临时端口上启动监听端点，返回端点、端口与其通知流。
pub async fn start_server(config: EndpointConfig) -> Result<(TcpListeningEndpoint, u16, EventStream)> {
    let server = TcpListeningEndpoint::new(config);
    let mut events = server.events();
    server.start(TransportTarget::new(LOCALHOST, 0));
    expect_event(&mut events, EventKind::Started).await?;
    let port = server.local_addr().context("listener has no bound address")?.port();
    Ok((server, port, events))
}

/// 启动拨号端点并等待其连上，返回端点与其通知流。
pub async fn start_client(config: EndpointConfig, port: u16) -> Result<(TcpDialingEndpoint, EventStream)> {
    let client = TcpDialingEndpoint::new(config);
    let mut events = client.events();
    client.start((LOCALHOST, port));
    expect_event(&mut events, EventKind::Started).await?;
    Ok((client, events))
}

/// 取一个当前空闲的端口。
pub async fn free_port() -> Result<u16> {
    let scratch = tokio::net::TcpListener::bind((LOCALHOST, 0)).await?;
    Ok(scratch.local_addr()?.port())
}
