//! 处理链分发。
//!
//! # 教案式说明
//! - **意图 (Why)**：处理器按注册顺序组成一条链，每个处理器自行决定是否把消息交给下一个，
//!   从而既能组合“预处理 → 业务”的中间件，也能让某个处理器成为终点；
//! - **逻辑 (How)**：
//!   1. 每个条目带单调递增的序号，[`Next`] 记住上一个被调用条目的序号；
//!   2. 续接时在锁内查找序号更大且模式匹配的第一个条目，一次性条目在锁内被摘除，
//!      保证它至多触发一次；
//!   3. 释放锁之后再调用处理器，处理器内部可以继续注册或续接；
//!   4. 处理器返回错误或 panic 时在分发边界捕获，序列化后自动回复远端发送者，链路就此停止；
//! - **契约 (What)**：按序号续接使得并发的摘除与追加不会让链跳过或重复条目。

use std::{
    any::Any,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{error::Fault, message::Message, pattern::PathPattern};

/// 无法提取错误消息时的兜底文本。
pub const INTERNAL_ERROR_MESSAGE: &str = "Internal error.";

/// 消息处理器：拿到可变消息与续接句柄。
pub type Handler = Arc<dyn Fn(&mut Message, Next) -> anyhow::Result<()> + Send + Sync>;

/// 把闭包包装为 [`Handler`]。
pub fn handler<F>(callback: F) -> Handler
where
    F: Fn(&mut Message, Next) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(callback)
}

#[derive(Clone)]
struct Entry {
    seq: u64,
    pattern: PathPattern,
    handler: Handler,
    once: bool,
}

#[derive(Default)]
struct RouterInner {
    entries: Mutex<Vec<Entry>>,
    next_seq: AtomicU64,
}

/// 有序处理器表。
#[derive(Clone, Default)]
pub(crate) struct Router {
    inner: Arc<RouterInner>,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 以同一模式注册一组处理器，保持参数顺序。
    pub(crate) fn add<I>(&self, pattern: PathPattern, handlers: I, once: bool)
    where
        I: IntoIterator<Item = Handler>,
    {
        let mut entries = self.inner.entries.lock();
        for handler in handlers {
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
            entries.push(Entry {
                seq,
                pattern: pattern.clone(),
                handler,
                once,
            });
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// 从链首开始分发。
    pub(crate) fn dispatch(&self, message: &mut Message) {
        Next {
            router: self.clone(),
            after: 0,
        }
        .run(message);
    }

    fn take_next(&self, after: u64, path: &str) -> Option<Entry> {
        let mut entries = self.inner.entries.lock();
        let index = entries
            .iter()
            .position(|entry| entry.seq > after && entry.pattern.matches(path))?;
        if entries[index].once {
            Some(entries.remove(index))
        } else {
            Some(entries[index].clone())
        }
    }
}

/// 续接句柄：把消息交给链上的下一个匹配处理器。
///
/// 按值消费，因此每个处理器至多续接一次；不调用即终止处理链。
pub struct Next {
    router: Router,
    after: u64,
}

impl Next {
    /// 续接处理链。
    pub fn run(self, message: &mut Message) {
        let Some(entry) = self.router.take_next(self.after, message.path()) else {
            tracing::trace!(message_id = %message.id(), path = %message.path(), "dispatch chain exhausted");
            return;
        };
        let next = Next {
            router: self.router,
            after: entry.seq,
        };
        let handler = entry.handler;
        let outcome = catch_unwind(AssertUnwindSafe(|| handler(message, next)));
        let serialized = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(err)) => serialize_error(&err),
            Err(payload) => serialize_panic(payload.as_ref()),
        };
        tracing::debug!(
            message_id = %message.id(),
            path = %message.path(),
            error = %serialized,
            "message handler failed"
        );
        if !message.is_local() && !message.is_replied() {
            let _ = message.respond(json!({ "error": serialized }));
        }
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").field("after", &self.after).finish()
    }
}

/// 把处理器错误序列化为错误对象：[`Fault`] 保留全部字段，其余错误只保留消息。
pub(crate) fn serialize_error(err: &anyhow::Error) -> Value {
    if let Some(fault) = err.downcast_ref::<Fault>() {
        return fault.to_value();
    }
    let message = err.to_string();
    if message.is_empty() {
        json!({ "message": INTERNAL_ERROR_MESSAGE })
    } else {
        json!({ "message": message })
    }
}

fn serialize_panic(payload: &(dyn Any + Send)) -> Value {
    let message = payload
        .downcast_ref::<&str>()
        .map(|text| (*text).to_owned())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .filter(|text| !text.is_empty())
        .unwrap_or_else(|| INTERNAL_ERROR_MESSAGE.to_owned());
    json!({ "message": message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{id::IdGenerator, message::MessageSeed};
    use std::sync::atomic::AtomicUsize;

    fn message(path: &str) -> Message {
        let ids = || "m".to_owned();
        Message::from_seed(MessageSeed::new(path), &ids as &dyn IdGenerator).expect("valid")
    }

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str, forward: bool) -> Handler {
        let log = log.clone();
        handler(move |message, next| {
            log.lock().push(name);
            if forward {
                next.run(message);
            }
            Ok(())
        })
    }

    #[test]
    fn chain_visits_matching_handlers_in_order() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.add(PathPattern::Any, [recorder(&log, "any", true)], false);
        router.add("other".into(), [recorder(&log, "other", true)], false);
        router.add(
            "echo".into(),
            [recorder(&log, "first", true), recorder(&log, "second", true)],
            false,
        );

        router.dispatch(&mut message("echo"));
        assert_eq!(*log.lock(), vec!["any", "first", "second"]);
    }

    #[test]
    fn handler_that_skips_next_ends_chain() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.add(PathPattern::Any, [recorder(&log, "terminal", false)], false);
        router.add(PathPattern::Any, [recorder(&log, "unreached", true)], false);

        router.dispatch(&mut message("x"));
        assert_eq!(*log.lock(), vec!["terminal"]);
    }

    #[test]
    fn once_handler_fires_at_most_once() {
        let router = Router::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        router.add(
            "job".into(),
            [handler(move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })],
            true,
        );

        for _ in 0..3 {
            router.dispatch(&mut message("job"));
        }
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(router.len(), 0);
    }

    #[test]
    fn later_handlers_observe_earlier_mutations() {
        let router = Router::new();
        router.add(
            PathPattern::Any,
            [handler(|message, next| {
                message.locals_mut().insert("user".into(), json!("jane"));
                next.run(message);
                Ok(())
            })],
            false,
        );
        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        router.add(
            PathPattern::Any,
            [handler(move |message, _| {
                *slot.lock() = message.locals().get("user").cloned();
                Ok(())
            })],
            false,
        );

        router.dispatch(&mut message("profile"));
        assert_eq!(*seen.lock(), Some(json!("jane")));
    }

    #[test]
    fn failing_handler_stops_chain() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.add(
            PathPattern::Any,
            [handler(|_, _| Err(anyhow::anyhow!("boom")))],
            false,
        );
        router.add(PathPattern::Any, [recorder(&log, "after", true)], false);

        router.dispatch(&mut message("x"));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn panicking_handler_is_contained() {
        let router = Router::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        router.add(
            "panic".into(),
            [handler(|_, _| panic!("handler panicked"))],
            false,
        );
        router.add(PathPattern::Any, [recorder(&log, "after", true)], false);

        router.dispatch(&mut message("panic"));
        router.dispatch(&mut message("calm"));
        assert_eq!(*log.lock(), vec!["after"]);
    }

    #[test]
    fn errors_serialize_with_message_and_fault_fields() {
        let plain = anyhow::anyhow!("boom");
        assert_eq!(serialize_error(&plain), json!({"message": "boom"}));

        let fault = anyhow::Error::new(Fault::new("denied").with_field("status", 403));
        assert_eq!(
            serialize_error(&fault),
            json!({"message": "denied", "status": 403})
        );

        let opaque: Box<dyn Any + Send> = Box::new(17_u32);
        assert_eq!(
            serialize_panic(opaque.as_ref()),
            json!({"message": INTERNAL_ERROR_MESSAGE})
        );
    }
}
