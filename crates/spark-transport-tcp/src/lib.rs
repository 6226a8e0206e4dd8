#![doc = r#"
# spark-transport-tcp

## 设计动机（Why）
- **定位**：该 crate 在 Tokio 运行时上实现 `spark-transport` 的字节流契约，
  为消息端点提供默认的 TCP 建连与监听能力。
- **架构角色**：作为传输实现层的基础积木，向上只暴露 [`TcpConnector`]、
  [`TcpBinder`] 与 [`TcpListener`]，协议核心不接触 Tokio 套接字细节。

## 核心契约（What）
- **输入条件**：调用方必须在 Tokio 运行时中使用本实现；
- **输出保障**：建连与接受均返回携带本地/对端地址的 `ChannelParts`，
  失败时映射为带稳定错误码的 `TransportError`；
- **套接字策略**：每条连接默认开启 `TCP_NODELAY`，帧以小包为主，避免 Nagle 引入的延迟。

## 风险与考量（Trade-offs）
- 主机名解析委托给 Tokio 的 `lookup_host`，多地址时按解析顺序尝试；
- `SO_LINGER` 在不同平台的精度不同（Linux 取整到秒）。
"#]

mod channel;
mod listener;

pub use channel::{TcpConnector, TcpSocketConfig};
pub use listener::{TcpBinder, TcpListener};
