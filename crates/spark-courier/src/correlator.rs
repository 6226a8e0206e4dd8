//! 请求/回复关联器。
//!
//! # 教案式说明
//! - **意图 (Why)**：请求与回复通过相同的 `id` 关联；关联器以显式的 `id → 挂起项` 映射
//!   承载每个在途请求，保证每个请求恰好结算一次；
//! - **逻辑 (How)**：
//!   1. [`Correlator::issue`] 先登记挂起项并启动计时器，再执行发送；发送失败立即以该错误结算；
//!   2. 回复到达时 [`Correlator::resolve`] 原子地摘除挂起项，按 `body.error` 决定成功或失败；
//!   3. 计时器触发时以 [`RequestError::TimedOut`] 结算；
//!   4. [`Correlator::clear_all`] 以给定原因结算全部挂起项，可重复调用；
//! - **契约 (What)**：先到者获胜，挂起项在结算时立即移除；之后到达的同 `id` 消息不再被视为回复，
//!   交给路由器按普通消息处理。

use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{Arc, Weak},
    task::{Context, Poll},
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::{sync::oneshot, task::AbortHandle};

use crate::{
    error::{RemoteError, RequestError, SendError},
    message::Message,
};

/// 显式清理挂起请求且未给出原因时使用的错误消息。
pub const DEFAULT_CLEAR_REASON: &str = "Clearing pending requests.";

type Settlement = Result<Message, RequestError>;

struct PendingRequest {
    settle: oneshot::Sender<Settlement>,
    timer: Option<AbortHandle>,
}

impl PendingRequest {
    fn finish(self, outcome: Settlement) {
        if let Some(timer) = self.timer {
            timer.abort();
        }
        // 调用方可能已放弃等待。
        let _ = self.settle.send(outcome);
    }
}

/// 在途请求表。
#[derive(Default)]
pub(crate) struct Correlator {
    pending: Mutex<HashMap<Arc<str>, PendingRequest>>,
}

impl Correlator {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// 登记请求、启动计时器并执行发送。
    ///
    /// 同一 `id` 的旧挂起项会被以 [`RequestError::Abandoned`] 结算。
    pub(crate) fn issue<F>(self: &Arc<Self>, id: &str, timeout: Duration, send: F) -> ResponseFuture
    where
        F: FnOnce() -> Result<(), SendError>,
    {
        let id: Arc<str> = Arc::from(id);
        let (tx, rx) = oneshot::channel();
        let displaced = self.pending.lock().insert(
            id.clone(),
            PendingRequest {
                settle: tx,
                timer: None,
            },
        );
        if let Some(displaced) = displaced {
            tracing::debug!(message_id = %id, "request id reused, abandoning previous request");
            displaced.finish(Err(RequestError::Abandoned));
        }

        let timer = tokio::spawn(expire(Arc::downgrade(self), id.clone(), timeout));
        match self.pending.lock().get_mut(&id) {
            Some(entry) => entry.timer = Some(timer.abort_handle()),
            // 已被结算（例如被并发清理），计时器不再需要。
            None => timer.abort(),
        }

        if let Err(err) = send() {
            tracing::debug!(message_id = %id, code = err.code(), error = %err, "request send failed");
            self.settle(&id, Err(RequestError::Send(err)));
        }

        ResponseFuture {
            id,
            state: ResponseState::Waiting(rx),
        }
    }

    /// 以给定结果结算挂起请求；请求不存在时返回 `false`。
    pub(crate) fn settle(&self, id: &str, outcome: Settlement) -> bool {
        let entry = self.pending.lock().remove(id);
        match entry {
            Some(entry) => {
                entry.finish(outcome);
                true
            }
            None => false,
        }
    }

    /// 若消息 `id` 对应某个挂起请求则据此结算，否则原样交还消息。
    pub(crate) fn resolve(&self, response: Message) -> Result<(), Message> {
        let Some(entry) = self.pending.lock().remove(response.id()) else {
            return Err(response);
        };
        tracing::trace!(message_id = %response.id(), "response correlated");
        entry.finish(response_outcome(response));
        Ok(())
    }

    /// 以 [`RequestError::Cleared`] 结算全部挂起请求，返回被清理的数量。
    pub(crate) fn clear_all(&self, reason: &str) -> usize {
        let drained: Vec<PendingRequest> = self.pending.lock().drain().map(|(_, v)| v).collect();
        let count = drained.len();
        for entry in drained {
            entry.finish(Err(RequestError::Cleared {
                reason: reason.to_owned(),
            }));
        }
        if count > 0 {
            tracing::debug!(count, reason, "pending requests cleared");
        }
        count
    }

    pub(crate) fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.lock().len()
    }
}

async fn expire(correlator: Weak<Correlator>, id: Arc<str>, timeout: Duration) {
    tokio::time::sleep(timeout).await;
    if let Some(correlator) = correlator.upgrade()
        && correlator.settle(&id, Err(RequestError::TimedOut))
    {
        tracing::debug!(message_id = %id, timeout_ms = timeout.as_millis() as u64, "request timed out");
    }
}

/// 根据回复体的 `error` 字段决定结算结果。
///
/// `null`、`false`、`0` 与空字符串视为没有错误。
fn response_outcome(response: Message) -> Settlement {
    let error = match response.body().get("error") {
        Some(error) if is_truthy(error) => error.clone(),
        _ => return Ok(response),
    };
    let (message, fields) = match error {
        Value::String(message) => (message, Map::new()),
        Value::Object(fields) => {
            let message = fields
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned();
            (message, fields)
        }
        _ => (String::new(), Map::new()),
    };
    Err(RequestError::Remote(Box::new(RemoteError::new(
        message, fields, response,
    ))))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

enum ResponseState {
    Waiting(oneshot::Receiver<Settlement>),
    Ready(Option<Settlement>),
}

/// 等待请求结算的 future。
///
/// 输出 `Ok(回复消息)` 或 [`RequestError`]；丢弃该 future 不会撤销请求，
/// 挂起项仍按回复或超时正常移除。
#[must_use = "a request does nothing useful unless its response is awaited"]
pub struct ResponseFuture {
    id: Arc<str>,
    state: ResponseState,
}

impl ResponseFuture {
    /// 已经结算的 future。
    pub(crate) fn settled(id: &str, outcome: Settlement) -> Self {
        Self {
            id: Arc::from(id),
            state: ResponseState::Ready(Some(outcome)),
        }
    }

    /// 请求消息的 `id`。
    pub fn request_id(&self) -> &str {
        &self.id
    }
}

impl Future for ResponseFuture {
    type Output = Settlement;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        match &mut this.state {
            ResponseState::Waiting(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(RequestError::Abandoned))),
            ResponseState::Ready(outcome) => {
                Poll::Ready(outcome.take().unwrap_or(Err(RequestError::Abandoned)))
            }
        }
    }
}

impl std::fmt::Debug for ResponseFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseFuture")
            .field("request_id", &self.id)
            .finish_non_exhaustive()
    }
}
