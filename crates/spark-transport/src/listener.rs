use async_trait::async_trait;

use crate::{ByteStream, ChannelParts, TransportError, TransportSocketAddr, TransportTarget};

/// 统一的监听器接口。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - 监听端点以循环方式不断 `accept`，并为每条入站流分配连接 ID；
/// - 将“绑定”与“接受”拆分为两个契约，使绑定失败的重试与接受循环互不干扰。
///
/// ## 契约说明（What）
/// - `local_addr`：监听器实际绑定的地址（端口 0 时可借此获得系统分配的端口）；
/// - `accept`：等待下一条入站连接；失败不代表监听器失效，调用方可继续调用；
/// - 丢弃监听器即关闭监听套接字。
#[async_trait]
pub trait StreamListener: Send + Sync + 'static {
    /// 接受产出的流类型。
    type Stream: ByteStream;

    /// 查询实际绑定地址。
    fn local_addr(&self) -> TransportSocketAddr;

    /// 接受一个入站连接。
    async fn accept(&self) -> Result<ChannelParts<Self::Stream>, TransportError>;
}

/// 绑定监听器的传输契约。
#[async_trait]
pub trait StreamBinder: Send + Sync + 'static {
    /// 绑定产出的监听器类型。
    type Listener: StreamListener;

    /// 协议标识。
    fn scheme(&self) -> &'static str;

    /// 绑定到目标地址并开始监听。
    async fn bind(&self, target: &TransportTarget) -> Result<Self::Listener, TransportError>;
}
