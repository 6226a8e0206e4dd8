//! # endpoint 模块说明
//!
//! ## 角色定位（Why）
//! - 端点组合连接清单、处理链与关联器，对外提供发送、请求、注册处理器与连接管理；
//! - 拨号端点（[`DialingEndpoint`]）与监听端点（[`ListeningEndpoint`]）只在会话策略上不同：
//!   前者断线后固定间隔重连，后者监听失败后固定间隔重新监听。
//!
//! ## 并发模型（How）
//! - 每条连接一个读任务、一个写任务；出站帧经无界队列交给写任务，`send`/`respond` 因此是同步且非阻塞的；
//! - 三张共享表（连接、处理器、挂起请求）各由一把 `parking_lot::Mutex` 保护，
//!   任何锁都不会跨越处理器回调或 `.await` 持有；
//! - 会话由“代次”标识：`start`/`stop` 递增代次，旧会话在下一个检查点发现自己过期后退出，
//!   因此停止之后不会再触发重连。
//!
//! ## 契约（What）
//! - 连接、分发层的失败都不致命：要么重试，要么记录后丢弃，要么以被拒绝的
//!   [`ResponseFuture`] 交给等待回复的调用方；
//! - `start` 需在 Tokio 运行时内调用，立即返回，实际工作由会话任务完成。

mod dialer;
mod io;
mod listener;

use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use parking_lot::Mutex;
use serde_json::Value;
use spark_transport::{ByteStream, ChannelParts};
use tokio::{
    sync::{broadcast, mpsc, oneshot},
    task::JoinHandle,
};

use crate::{
    config::EndpointConfig,
    correlator::{Correlator, DEFAULT_CLEAR_REASON, ResponseFuture},
    error::{DecodeError, RegistryError, RequestError, SendError, ValidationError},
    event::{EndpointEvent, EventStream},
    frame::{FrameDecoder, encode_frame},
    id::{ConnectionId, IdGenerator, UuidGenerator},
    message::{Destination, Message, MessageSeed},
    pattern::PathPattern,
    registry::{ConnectionEntry, ConnectionInfo, Registry},
    router::{Handler, Next, Router},
};

pub use dialer::DialingEndpoint;
pub use listener::ListeningEndpoint;

/// 拨号端点停止时挂起请求收到的错误消息。
pub const CLIENT_STOPPED_REASON: &str = "Client stopped.";
/// 监听端点停止时挂起请求收到的错误消息。
pub const SERVER_STOPPED_REASON: &str = "Server stopped.";

/// 注册成功的连接。
pub(crate) struct Attached {
    pub(crate) info: ConnectionInfo,
    /// 连接从清单移除时完成。
    pub(crate) closed: oneshot::Receiver<()>,
}

/// 端点的共享状态。
pub(crate) struct EndpointCore {
    config: EndpointConfig,
    ids: Arc<dyn IdGenerator>,
    registry: Registry,
    router: Router,
    correlator: Arc<Correlator>,
    events: broadcast::Sender<EndpointEvent>,
    generation: AtomicU64,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl EndpointCore {
    fn new(config: EndpointConfig, ids: Arc<dyn IdGenerator>) -> Arc<Self> {
        let (events, _) = broadcast::channel(config.effective_event_capacity());
        Arc::new(Self {
            config,
            ids,
            registry: Registry::new(),
            router: Router::new(),
            correlator: Correlator::new(),
            events,
            generation: AtomicU64::new(0),
            session: Mutex::new(None),
        })
    }

    pub(crate) fn ids(&self) -> &dyn IdGenerator {
        self.ids.as_ref()
    }

    pub(crate) fn config(&self) -> &EndpointConfig {
        &self.config
    }

    pub(crate) fn emit(&self, event: EndpointEvent) {
        tracing::trace!(kind = ?event.kind(), "endpoint event");
        // 没有订阅者时发送失败，属正常情况。
        let _ = self.events.send(event);
    }

    /// 注册一条已建立的流：拆分读写半部、登记清单、发出 `Connect` 并启动读写任务。
    pub(crate) fn attach<S: ByteStream>(
        self: &Arc<Self>,
        id: ConnectionId,
        parts: ChannelParts<S>,
    ) -> Result<Attached, RegistryError> {
        let info = ConnectionInfo::new(id.clone(), parts.peer_addr, parts.local_addr);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = oneshot::channel();
        let seq = self.registry.insert(info.clone(), outbound_tx, closed_tx)?;
        tracing::debug!(
            connection_id = %id,
            peer_addr = ?info.peer_addr(),
            "connection registered"
        );
        self.emit(EndpointEvent::Connect(info.clone()));

        let (reader, writer) = tokio::io::split(parts.stream);
        let decoder = FrameDecoder::with_max_frame_len(self.config.max_frame_len);
        let read = tokio::spawn(io::read_loop(
            Arc::downgrade(self),
            id.clone(),
            seq,
            reader,
            decoder,
            self.config.effective_read_buffer_size(),
        ));
        let write = tokio::spawn(io::write_loop(
            Arc::downgrade(self),
            id.clone(),
            seq,
            writer,
            outbound_rx,
        ));
        let tasks = vec![read.abort_handle(), write.abort_handle()];
        if !self.registry.attach_tasks(&id, seq, tasks) {
            read.abort();
            write.abort();
        }
        Ok(Attached {
            info,
            closed: closed_rx,
        })
    }

    /// 处理一帧：解码、绑定来源，然后交给关联器或处理链。
    pub(crate) fn handle_frame(self: &Arc<Self>, origin: &ConnectionId, frame: &[u8]) {
        match Message::decode(frame, self.ids()) {
            Ok(message) => self.route(message.bind(Arc::downgrade(self), Some(origin.clone()))),
            Err(err) => tracing::debug!(
                connection_id = %origin,
                code = err.code(),
                error = %err,
                "dropping undecodable frame"
            ),
        }
    }

    fn route(&self, message: Message) {
        if let Err(mut message) = self.correlator.resolve(message) {
            tracing::trace!(message_id = %message.id(), path = %message.path(), "dispatching message");
            self.router.dispatch(&mut message);
        }
    }

    pub(crate) fn send_message(
        &self,
        message: &Message,
        destination: &Destination,
    ) -> Result<(), SendError> {
        let frame = encode_frame(&message.encode()?);
        let targets = self.registry.targets(destination).inspect_err(|err| {
            tracing::debug!(message_id = %message.id(), code = err.code(), "no route for message");
        })?;
        let mut last_error = None;
        for (id, outbound) in targets {
            if outbound.send(frame.clone()).is_err() {
                tracing::debug!(connection_id = %id, message_id = %message.id(), "connection writer gone");
                last_error = Some(SendError::ConnectionClosed(id));
            } else {
                tracing::trace!(connection_id = %id, message_id = %message.id(), path = %message.path(), "message queued");
            }
        }
        last_error.map_or(Ok(()), Err)
    }

    pub(crate) fn issue_request(
        &self,
        message: &Message,
        destination: Option<ConnectionId>,
        timeout: Option<Duration>,
    ) -> ResponseFuture {
        let timeout = timeout.unwrap_or_else(|| self.config.request_timeout());
        let target = destination
            .filter(|id| self.registry.contains(id.as_str()))
            .or_else(|| self.registry.first_id());
        self.correlator.issue(message.id(), timeout, || {
            let target = target.ok_or(SendError::NoDestination)?;
            self.send_message(message, &Destination::One(target))
        })
    }

    /// 销毁连接；无论连接是否存在都会发出 `Disconnect`。
    pub(crate) fn destroy(&self, id: &ConnectionId) -> Option<ConnectionInfo> {
        let info = self.registry.remove(id).map(ConnectionEntry::close);
        if info.is_some() {
            tracing::debug!(connection_id = %id, "connection destroyed");
        }
        self.emit(EndpointEvent::Disconnect(info.clone()));
        info
    }

    /// 读写任务结束时调用，仅销毁属于自己的那次注册。
    pub(crate) fn destroy_registration(&self, id: &ConnectionId, seq: u64) {
        if let Some(entry) = self.registry.remove_if(id, seq) {
            tracing::debug!(connection_id = %id, "connection destroyed");
            self.emit(EndpointEvent::Disconnect(Some(entry.close())));
        }
    }

    pub(crate) fn destroy_all(&self) {
        for id in self.registry.ids() {
            self.destroy(&id);
        }
    }

    pub(crate) fn has_connections(&self) -> bool {
        !self.registry.is_empty()
    }

    pub(crate) fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) == generation
    }

    /// 以新会话替换当前会话。
    ///
    /// 新会话先等待旧会话任务真正退出，避免两个会话同时注册连接。
    pub(crate) fn restart<F, Fut>(self: &Arc<Self>, session: F)
    where
        F: FnOnce(std::sync::Weak<EndpointCore>, u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let mut slot = self.session.lock();
        let previous = slot.take();
        if let Some(previous) = &previous {
            previous.abort();
        }
        let session = session(Arc::downgrade(self), generation);
        *slot = Some(tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            session.await;
        }));
    }

    /// 结束当前会话并执行停止流程。
    pub(crate) async fn stop(&self, reason: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        let previous = self.session.lock().take();
        if let Some(previous) = previous {
            previous.abort();
            let _ = previous.await;
        }
        self.teardown(reason).await;
        tracing::info!(reason, "endpoint stopped");
    }

    /// 清理挂起请求、销毁全部连接，随后异步发出 `Stopped`。
    pub(crate) async fn teardown(&self, reason: &str) {
        self.correlator.clear_all(reason);
        self.destroy_all();
        let delay = self.config.stop_notify_delay();
        if delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(delay).await;
        }
        self.emit(EndpointEvent::Stopped);
    }
}

impl Drop for EndpointCore {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().take() {
            session.abort();
        }
        self.registry.abort_all();
    }
}

/// 端点的公共操作，拨号端点与监听端点都解引用到它。
///
/// 克隆得到同一端点的另一个句柄；最后一个句柄释放时会话与连接任务随之中止。
///
/// ```no_run
/// use spark_courier::{Endpoint, EndpointConfig};
///
/// let endpoint = Endpoint::new(EndpointConfig::default());
/// endpoint.use_handler("echo", |message, _next| {
///     let body = message.body().clone();
///     message.respond(body)?;
///     Ok(())
/// });
/// ```
#[derive(Clone)]
pub struct Endpoint {
    core: Arc<EndpointCore>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> Self {
        Self::with_id_generator(config, UuidGenerator)
    }

    /// 使用自定义 ID 生成器（消息 ID 与入站连接 ID）。
    pub fn with_id_generator(config: EndpointConfig, ids: impl IdGenerator) -> Self {
        Self {
            core: EndpointCore::new(config, Arc::new(ids)),
        }
    }

    pub(crate) fn core(&self) -> &Arc<EndpointCore> {
        &self.core
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.core.config
    }

    /// 订阅此后发出的通知。
    pub fn events(&self) -> EventStream {
        EventStream::new(self.core.events.subscribe())
    }

    /// 注册处理器。
    pub fn use_handler<F>(&self, pattern: impl Into<PathPattern>, handler: F) -> &Self
    where
        F: Fn(&mut Message, Next) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.core
            .router
            .add(pattern.into(), [Arc::new(handler) as Handler], false);
        self
    }

    /// 注册只触发一次的处理器。
    pub fn use_once<F>(&self, pattern: impl Into<PathPattern>, handler: F) -> &Self
    where
        F: Fn(&mut Message, Next) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.core
            .router
            .add(pattern.into(), [Arc::new(handler) as Handler], true);
        self
    }

    /// 以同一模式按顺序注册一组处理器。
    pub fn use_chain<I>(&self, pattern: impl Into<PathPattern>, handlers: I) -> &Self
    where
        I: IntoIterator<Item = Handler>,
    {
        self.core.router.add(pattern.into(), handlers, false);
        self
    }

    /// 以同一模式按顺序注册一组一次性处理器。
    pub fn use_once_chain<I>(&self, pattern: impl Into<PathPattern>, handlers: I) -> &Self
    where
        I: IntoIterator<Item = Handler>,
    {
        self.core.router.add(pattern.into(), handlers, true);
        self
    }

    /// 当前登记的处理器数量（一次性处理器触发后即移除）。
    pub fn handler_count(&self) -> usize {
        self.core.router.len()
    }

    /// 构造归属本端点的本地消息，稍后可发送或作为请求发出。
    pub fn message(&self, path: &str, body: impl Into<Value>) -> Result<Message, ValidationError> {
        let seed = MessageSeed::new(path).with_body(body);
        Ok(Message::from_seed(seed, self.core.ids())?.bind(Arc::downgrade(&self.core), None))
    }

    /// 发送消息，返回已发送的消息。
    pub fn send(
        &self,
        path: &str,
        body: impl Into<Value>,
        destination: impl Into<Destination>,
    ) -> Result<Message, SendError> {
        let message = self.message(path, body)?;
        message.send(destination)?;
        Ok(message)
    }

    /// 发出请求。
    ///
    /// `destination` 缺省或不存在时发往第一条连接；`timeout` 缺省时使用配置的默认超时。
    ///
    /// 超时计时器由 `tokio::spawn` 启动，必须在 Tokio 运行时内调用。
    pub fn request(
        &self,
        path: &str,
        body: impl Into<Value>,
        destination: Option<ConnectionId>,
        timeout: Option<Duration>,
    ) -> ResponseFuture {
        match self.message(path, body) {
            Ok(message) => message.send_as_request(destination, timeout),
            Err(err) => ResponseFuture::settled(
                &self.core.ids().generate(),
                Err(RequestError::Send(err.into())),
            ),
        }
    }

    /// 把数据记录作为本地消息注入关联/分发流程。
    pub fn inject(&self, seed: MessageSeed) -> Result<(), ValidationError> {
        let message = Message::from_seed(seed, self.core.ids())?;
        self.core
            .route(message.bind(Arc::downgrade(&self.core), None));
        Ok(())
    }

    /// 把原始 JSON 文本作为本地消息注入关联/分发流程。
    pub fn inject_raw(&self, raw: &[u8]) -> Result<(), DecodeError> {
        let message = Message::decode(raw, self.core.ids())?;
        self.core
            .route(message.bind(Arc::downgrade(&self.core), None));
        Ok(())
    }

    /// 注册任意字节流为连接并立即开始收发。
    ///
    /// 读写任务由 `tokio::spawn` 启动，必须在 Tokio 运行时内调用。
    pub fn register<S: ByteStream>(
        &self,
        id: impl Into<ConnectionId>,
        parts: ChannelParts<S>,
    ) -> Result<ConnectionInfo, RegistryError> {
        self.core
            .attach(id.into(), parts)
            .map(|attached| attached.info)
    }

    pub fn connection(&self, id: &str) -> Option<ConnectionInfo> {
        self.core.registry.get(id)
    }

    /// 全部连接，按注册顺序排列。
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.core.registry.list()
    }

    pub fn connection_count(&self) -> usize {
        self.core.registry.len()
    }

    /// 销毁连接（幂等），返回被移除的连接。
    pub fn destroy(&self, id: &str) -> Option<ConnectionInfo> {
        self.core.destroy(&ConnectionId::from(id))
    }

    pub fn destroy_all(&self) {
        self.core.destroy_all();
    }

    /// 以给定原因拒绝全部挂起请求，返回被拒绝的数量。
    pub fn clear_pending_requests(&self, reason: Option<&str>) -> usize {
        self.core
            .correlator
            .clear_all(reason.unwrap_or(DEFAULT_CLEAR_REASON))
    }

    pub fn pending_requests(&self) -> usize {
        self.core.correlator.len()
    }

    pub fn is_pending(&self, request_id: &str) -> bool {
        self.core.correlator.is_pending(request_id)
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("connections", &self.core.registry.len())
            .field("handlers", &self.core.router.len())
            .field("pending_requests", &self.core.correlator.len())
            .finish()
    }
}
