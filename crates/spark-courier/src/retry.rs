//! 重试策略。
//!
//! # 教案式说明
//! - **意图 (Why)**：断线重连与重新监听都是“固定间隔、无限重试”的节律，
//!   把间隔与放弃条件收进独立的策略对象，使其可以脱离拨号/监听单独测试；
//! - **契约 (What)**：[`RetryPolicy::backoff`] 在等待前后各检查一次放弃条件，
//!   任一次成立即返回 `false`，调用方据此结束会话；
//! - **风险 (Trade-offs)**：间隔不随失败次数增长，对端长期不可用时会以固定频率持续尝试。

use std::time::Duration;

/// 固定间隔的重试策略。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    delay: Duration,
    max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// 无次数上限的固定间隔重试。
    pub const fn forever(delay: Duration) -> Self {
        Self {
            delay,
            max_attempts: None,
        }
    }

    /// 限制最多重试次数。
    pub const fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// 第 `attempt` 次（从 1 开始）重试前的等待时长；超过上限时返回 `None`。
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match self.max_attempts {
            Some(max) if attempt > max => None,
            _ => Some(self.delay),
        }
    }

    /// 等待下一次重试；返回 `false` 表示应当放弃。
    pub async fn backoff<F>(&self, attempt: u32, should_abort: F) -> bool
    where
        F: Fn() -> bool,
    {
        if should_abort() {
            return false;
        }
        let Some(delay) = self.next_delay(attempt) else {
            tracing::debug!(attempt, "retry attempts exhausted");
            return false;
        };
        tokio::time::sleep(delay).await;
        !should_abort()
    }
}
