//! 端点配置。
//!
//! # 教案式说明
//! - **意图 (Why)**：请求超时、重连间隔、重新监听间隔与 `stopped` 通知延迟原本共用同一个短间隔，
//!   这里拆成独立的命名选项，部署方可以分别调优；
//! - **契约 (What)**：所有字段都有默认值，TOML 中缺省的键回落到默认；
//!   时长以毫秒配置，通过 `*_delay()` / `request_timeout()` 读出 [`Duration`]；
//! - **风险 (Trade-offs)**：`max_frame_len` 默认不设上限，与线上格式保持兼容，
//!   面向不可信对端时应显式设置。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_000;
const DEFAULT_RELISTEN_DELAY_MS: u64 = 1_000;
const DEFAULT_STOP_NOTIFY_DELAY_MS: u64 = 0;
const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// 单个端点实例的配置。
///
/// ```
/// use spark_courier::EndpointConfig;
///
/// let config = EndpointConfig::from_toml_str("request_timeout_ms = 250").unwrap();
/// assert_eq!(config.request_timeout().as_millis(), 250);
/// assert_eq!(config.reconnect_delay().as_millis(), 1000);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointConfig {
    /// 默认请求超时（毫秒）。
    pub request_timeout_ms: u64,
    /// 拨号端点断线后的重连间隔（毫秒）。
    pub reconnect_delay_ms: u64,
    /// 监听端点绑定/接受失败后的重试间隔（毫秒）。
    pub relisten_delay_ms: u64,
    /// 停止后发出 `stopped` 通知前的延迟（毫秒）。
    pub stop_notify_delay_ms: u64,
    /// 单帧最大字节数；`None` 表示不限制。
    pub max_frame_len: Option<usize>,
    /// 每次读取的缓冲大小。
    pub read_buffer_size: usize,
    /// 通知通道容量，慢订阅者超出后会丢失最旧的通知。
    pub event_capacity: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY_MS,
            relisten_delay_ms: DEFAULT_RELISTEN_DELAY_MS,
            stop_notify_delay_ms: DEFAULT_STOP_NOTIFY_DELAY_MS,
            max_frame_len: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl EndpointConfig {
    /// 从 TOML 文本加载。
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_to_ms(timeout);
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay_ms = duration_to_ms(delay);
        self
    }

    pub fn with_relisten_delay(mut self, delay: Duration) -> Self {
        self.relisten_delay_ms = duration_to_ms(delay);
        self
    }

    pub fn with_stop_notify_delay(mut self, delay: Duration) -> Self {
        self.stop_notify_delay_ms = duration_to_ms(delay);
        self
    }

    pub fn with_max_frame_len(mut self, limit: Option<usize>) -> Self {
        self.max_frame_len = limit;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn relisten_delay(&self) -> Duration {
        Duration::from_millis(self.relisten_delay_ms)
    }

    pub fn stop_notify_delay(&self) -> Duration {
        Duration::from_millis(self.stop_notify_delay_ms)
    }

    /// 读缓冲大小，至少 1 字节。
    pub(crate) fn effective_read_buffer_size(&self) -> usize {
        self.read_buffer_size.max(1)
    }

    /// 通知通道容量，`broadcast` 要求至少为 1。
    pub(crate) fn effective_event_capacity(&self) -> usize {
        self.event_capacity.max(1)
    }
}

fn duration_to_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
