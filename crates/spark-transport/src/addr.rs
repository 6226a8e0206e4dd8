use std::fmt;
use std::net::{Ipv6Addr, SocketAddr};
use std::str::FromStr;

/// `TransportSocketAddr` 为连接元数据提供统一的 Socket 地址表达。
///
/// # 教案级注释
///
/// ## 意图（Why）
/// - **统一抽象**：TCP 与内存管道等实现都通过该结构上报本地/对端地址，调用方无需依赖具体实现类型；
/// - **稳定格式**：`Display` 输出固定格式，适合作为日志字段或连接清单展示。
///
/// ## 合同（What）
/// - `V4` 与 `V6` 分别表示 IPv4/IPv6，端口号为主机序 `u16`；
/// - **后置条件**：枚举值不可变，格式化输出稳定。
///
/// ## 设计权衡（Trade-offs）
/// - IPv6 未做零压缩，优先保障可读性。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[non_exhaustive]
pub enum TransportSocketAddr {
    /// IPv4 地址。
    V4 { addr: [u8; 4], port: u16 },
    /// IPv6 地址。
    V6 { addr: [u16; 8], port: u16 },
}

impl TransportSocketAddr {
    /// 返回端口号。
    pub fn port(&self) -> u16 {
        match self {
            Self::V4 { port, .. } | Self::V6 { port, .. } => *port,
        }
    }
}

impl fmt::Display for TransportSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportSocketAddr::V4 { addr, port } => write!(
                f,
                "{}.{}.{}.{}:{}",
                addr[0], addr[1], addr[2], addr[3], port
            ),
            TransportSocketAddr::V6 { addr, port } => {
                let segments: Vec<String> = addr
                    .iter()
                    .map(|segment| format!("{:x}", segment))
                    .collect();
                write!(f, "[{}]:{}", segments.join(":"), port)
            }
        }
    }
}

impl From<SocketAddr> for TransportSocketAddr {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::V4 {
                addr: v4.ip().octets(),
                port: v4.port(),
            },
            SocketAddr::V6(v6) => Self::V6 {
                addr: v6.ip().segments(),
                port: v6.port(),
            },
        }
    }
}

impl From<TransportSocketAddr> for SocketAddr {
    fn from(addr: TransportSocketAddr) -> Self {
        match addr {
            TransportSocketAddr::V4 { addr, port } => SocketAddr::from((addr, port)),
            TransportSocketAddr::V6 { addr, port } => {
                SocketAddr::from((Ipv6Addr::from(addr), port))
            }
        }
    }
}

/// 建连或监听的目标：端口必填，主机可选。
///
/// # 契约说明（What）
/// - `host` 缺省时由具体实现决定默认值：建连方通常回落到 `localhost`，监听方回落到通配地址；
/// - 主机名不在此处解析，交由实现按需进行 DNS 查询，因此可以携带 `localhost` 这类名字。
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TransportTarget {
    host: Option<String>,
    port: u16,
}

impl TransportTarget {
    /// 以主机与端口构造目标。
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
        }
    }

    /// 仅指定端口，主机由实现决定。
    pub fn port_only(port: u16) -> Self {
        Self { host: None, port }
    }

    /// 目标端口。
    pub fn port(&self) -> u16 {
        self.port
    }

    /// 显式指定的主机名。
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// 返回主机名，缺省时使用 `fallback`。
    pub fn host_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.host.as_deref().unwrap_or(fallback)
    }
}

impl fmt::Display for TransportTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.host {
            Some(host) if host.contains(':') => write!(f, "[{}]:{}", host, self.port),
            Some(host) => write!(f, "{}:{}", host, self.port),
            None => write!(f, "*:{}", self.port),
        }
    }
}

impl From<u16> for TransportTarget {
    fn from(port: u16) -> Self {
        Self::port_only(port)
    }
}

impl From<(&str, u16)> for TransportTarget {
    fn from((host, port): (&str, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<(String, u16)> for TransportTarget {
    fn from((host, port): (String, u16)) -> Self {
        Self::new(host, port)
    }
}

impl From<SocketAddr> for TransportTarget {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl From<TransportSocketAddr> for TransportTarget {
    fn from(addr: TransportSocketAddr) -> Self {
        SocketAddr::from(addr).into()
    }
}

/// 解析 `host:port` 或 `[v6]:port` 形式的目标字符串失败。
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid transport target `{input}`: expected `host:port`")]
pub struct ParseTargetError {
    input: String,
}

impl FromStr for TransportTarget {
    type Err = ParseTargetError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseTargetError {
            input: input.to_owned(),
        };
        let (host, port) = input.rsplit_once(':').ok_or_else(invalid)?;
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        let host = host
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(host);
        if host.is_empty() {
            return Ok(Self::port_only(port));
        }
        Ok(Self::new(host, port))
    }
}
