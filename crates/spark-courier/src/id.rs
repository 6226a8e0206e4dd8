//! 连接标识与唯一 ID 生成。

use std::{borrow::Borrow, fmt, sync::Arc};

/// 拨号端点唯一出站连接保留的 ID。
pub const MAIN_CONNECTION_ID: &str = "main";

/// 连接标识：拨号端点固定为 [`MAIN_CONNECTION_ID`]，监听端点由 [`IdGenerator`] 为每条入站连接签发。
///
/// 内部以 `Arc<str>` 存储，克隆与作为 `HashMap` 键都不复制字符串。
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Arc<str>);

impl ConnectionId {
    /// 以任意字符串构造连接标识。
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self(id.into())
    }

    /// 拨号端点的保留连接标识。
    pub fn main() -> Self {
        Self::new(MAIN_CONNECTION_ID)
    }

    /// 字符串视图。
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ConnectionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ConnectionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ConnectionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ConnectionId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&ConnectionId> for ConnectionId {
    fn from(value: &ConnectionId) -> Self {
        value.clone()
    }
}

/// 不透明唯一字符串的生成器。
///
/// # 教案式说明
/// - **意图 (Why)**：消息 ID 与入站连接 ID 只要求全局唯一，生成方式属于外部协作者，
///   以 trait 注入便于测试替换为确定性序列；
/// - **契约 (What)**：每次调用返回非空且不重复的字符串；实现需 `Send + Sync`，
///   会被多条连接的读任务并发调用。
pub trait IdGenerator: Send + Sync + 'static {
    /// 生成一个新的唯一 ID。
    fn generate(&self) -> String;
}

/// 默认生成器：UUID v4。
#[derive(Clone, Copy, Debug, Default)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

impl<F> IdGenerator for F
where
    F: Fn() -> String + Send + Sync + 'static,
{
    fn generate(&self) -> String {
        self()
    }
}
