//! 端点通知。
//!
//! 每个端点实例拥有独立的 `broadcast` 通道，不存在全局监听者注册表。
//! 订阅只能看到订阅之后发出的通知，需要观察 `Started` 的调用方应在 `start` 之前调用
//! [`Endpoint::events`](crate::Endpoint::events)。

use tokio::sync::broadcast;

use crate::registry::ConnectionInfo;

/// 端点生命周期通知。
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EndpointEvent {
    /// 连接已注册。
    Connect(ConnectionInfo),
    /// 连接已销毁；销毁一个不存在的连接时为 `None`。
    Disconnect(Option<ConnectionInfo>),
    /// 拨号成功或监听就绪。
    Started,
    /// 停止流程完成。
    Stopped,
}

impl EndpointEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EndpointEvent::Connect(_) => EventKind::Connect,
            EndpointEvent::Disconnect(_) => EventKind::Disconnect,
            EndpointEvent::Started => EventKind::Started,
            EndpointEvent::Stopped => EventKind::Stopped,
        }
    }
}

/// 通知种类。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    Started,
    Stopped,
}

/// 单个订阅者的通知流。
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<EndpointEvent>,
}

impl EventStream {
    pub(crate) fn new(rx: broadcast::Receiver<EndpointEvent>) -> Self {
        Self { rx }
    }

    /// 下一条通知；端点释放后返回 `None`。
    ///
    /// 订阅者落后超过通道容量时，最旧的通知被跳过并记录告警。
    pub async fn next(&mut self) -> Option<EndpointEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "endpoint event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// 跳过其它通知，直到出现指定种类。
    pub async fn wait_for(&mut self, kind: EventKind) -> Option<EndpointEvent> {
        while let Some(event) = self.next().await {
            if event.kind() == kind {
                return Some(event);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_for_skips_other_kinds() {
        let (tx, rx) = broadcast::channel(8);
        let mut stream = EventStream::new(rx);
        tx.send(EndpointEvent::Stopped).expect("subscriber");
        tx.send(EndpointEvent::Disconnect(None)).expect("subscriber");
        tx.send(EndpointEvent::Started).expect("subscriber");

        assert_eq!(
            stream.wait_for(EventKind::Disconnect).await,
            Some(EndpointEvent::Disconnect(None))
        );
        assert_eq!(stream.next().await, Some(EndpointEvent::Started));
        drop(tx);
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn lagging_subscriber_keeps_latest_events() {
        let (tx, rx) = broadcast::channel(2);
        let mut stream = EventStream::new(rx);
        for _ in 0..3 {
            tx.send(EndpointEvent::Stopped).expect("subscriber");
        }
        tx.send(EndpointEvent::Started).expect("subscriber");
        assert_eq!(
            stream.wait_for(EventKind::Started).await,
            Some(EndpointEvent::Started)
        );
    }
}
