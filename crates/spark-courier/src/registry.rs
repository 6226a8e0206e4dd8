//! 连接清单。
//!
//! # 教案式说明
//! - **意图 (Why)**：清单独占全部连接；消息只记住来源连接的 ID，用于回复路由，
//!   从不参与连接的生命周期管理；
//! - **逻辑 (How)**：每个条目保存出站队列、读写任务的中止句柄与一个“已关闭”信号；
//!   移除条目即丢弃出站队列与关闭信号，调用方随后中止读写任务；
//! - **契约 (What)**：条目带单调递增的注册序号，列表按序号（即注册顺序）返回，
//!   序号最小者为“第一条连接”；读写任务只能移除与自身序号一致的条目，
//!   过期任务不会误删同名的新连接。

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use spark_transport::TransportSocketAddr;
use tokio::{
    sync::{mpsc, oneshot},
    task::AbortHandle,
};

use crate::{
    error::{RegistryError, SendError},
    id::ConnectionId,
    message::Destination,
};

/// 连接的只读快照。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionInfo {
    id: ConnectionId,
    peer_addr: Option<TransportSocketAddr>,
    local_addr: Option<TransportSocketAddr>,
}

impl ConnectionInfo {
    pub(crate) fn new(
        id: ConnectionId,
        peer_addr: Option<TransportSocketAddr>,
        local_addr: Option<TransportSocketAddr>,
    ) -> Self {
        Self {
            id,
            peer_addr,
            local_addr,
        }
    }

    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    pub fn peer_addr(&self) -> Option<TransportSocketAddr> {
        self.peer_addr
    }

    pub fn local_addr(&self) -> Option<TransportSocketAddr> {
        self.local_addr
    }
}

pub(crate) struct ConnectionEntry {
    seq: u64,
    info: ConnectionInfo,
    outbound: mpsc::UnboundedSender<Bytes>,
    tasks: Vec<AbortHandle>,
    _closed: oneshot::Sender<()>,
}

impl ConnectionEntry {
    /// 中止读写任务并交出快照；流随任务一起被释放。
    pub(crate) fn close(self) -> ConnectionInfo {
        for task in &self.tasks {
            task.abort();
        }
        self.info
    }
}

#[derive(Default)]
struct RegistryState {
    next_seq: u64,
    entries: HashMap<ConnectionId, ConnectionEntry>,
}

impl RegistryState {
    fn ordered(&self) -> Vec<&ConnectionEntry> {
        let mut entries: Vec<&ConnectionEntry> = self.entries.values().collect();
        entries.sort_by_key(|entry| entry.seq);
        entries
    }
}

#[derive(Default)]
pub(crate) struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// 登记连接，返回注册序号。
    pub(crate) fn insert(
        &self,
        info: ConnectionInfo,
        outbound: mpsc::UnboundedSender<Bytes>,
        closed: oneshot::Sender<()>,
    ) -> Result<u64, RegistryError> {
        let mut state = self.state.lock();
        if state.entries.contains_key(&info.id) {
            return Err(RegistryError::DuplicateConnection(info.id));
        }
        state.next_seq += 1;
        let seq = state.next_seq;
        state.entries.insert(
            info.id.clone(),
            ConnectionEntry {
                seq,
                info,
                outbound,
                tasks: Vec::new(),
                _closed: closed,
            },
        );
        Ok(seq)
    }

    /// 为条目挂上读写任务；条目已被移除时返回 `false`。
    pub(crate) fn attach_tasks(&self, id: &ConnectionId, seq: u64, tasks: Vec<AbortHandle>) -> bool {
        match self.state.lock().entries.get_mut(id) {
            Some(entry) if entry.seq == seq => {
                entry.tasks = tasks;
                true
            }
            _ => false,
        }
    }

    pub(crate) fn remove(&self, id: &ConnectionId) -> Option<ConnectionEntry> {
        self.state.lock().entries.remove(id)
    }

    /// 仅当条目仍是序号 `seq` 的那次注册时移除。
    pub(crate) fn remove_if(&self, id: &ConnectionId, seq: u64) -> Option<ConnectionEntry> {
        let mut state = self.state.lock();
        let current = state.entries.get(id).is_some_and(|entry| entry.seq == seq);
        if current { state.entries.remove(id) } else { None }
    }

    pub(crate) fn ids(&self) -> Vec<ConnectionId> {
        self.state
            .lock()
            .ordered()
            .into_iter()
            .map(|entry| entry.info.id.clone())
            .collect()
    }

    pub(crate) fn get(&self, id: &str) -> Option<ConnectionInfo> {
        self.state.lock().entries.get(id).map(|entry| entry.info.clone())
    }

    pub(crate) fn list(&self) -> Vec<ConnectionInfo> {
        self.state
            .lock()
            .ordered()
            .into_iter()
            .map(|entry| entry.info.clone())
            .collect()
    }

    pub(crate) fn contains(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    pub(crate) fn first_id(&self) -> Option<ConnectionId> {
        self.state
            .lock()
            .entries
            .values()
            .min_by_key(|entry| entry.seq)
            .map(|entry| entry.info.id.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// 解析目的地，得到各目标连接的出站队列。
    pub(crate) fn targets(
        &self,
        destination: &Destination,
    ) -> Result<Vec<(ConnectionId, mpsc::UnboundedSender<Bytes>)>, SendError> {
        let state = self.state.lock();
        let targets: Vec<_> = match destination {
            Destination::One(id) => {
                let entry = state
                    .entries
                    .get(id)
                    .ok_or_else(|| SendError::UnknownConnection(id.clone()))?;
                vec![(entry.info.id.clone(), entry.outbound.clone())]
            }
            Destination::All => state
                .ordered()
                .into_iter()
                .map(|entry| (entry.info.id.clone(), entry.outbound.clone()))
                .collect(),
            Destination::Many(ids) => state
                .ordered()
                .into_iter()
                .filter(|entry| ids.contains(&entry.info.id))
                .map(|entry| (entry.info.id.clone(), entry.outbound.clone()))
                .collect(),
        };
        if targets.is_empty() {
            return Err(SendError::NoDestination);
        }
        Ok(targets)
    }

    /// 移除全部条目并中止其任务，用于端点释放。
    pub(crate) fn abort_all(&self) {
        let drained: Vec<ConnectionEntry> =
            self.state.lock().entries.drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            entry.close();
        }
    }
}
