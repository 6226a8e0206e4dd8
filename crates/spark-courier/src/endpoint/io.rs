//! 单条连接的读写任务。
//!
//! 读任务按到达顺序分帧并同步完成每条消息的关联或分发，之后才读取下一块数据，
//! 因此同一连接上的消息严格有序；不同连接的任务之间没有相对顺序。
//! 两个任务都只持有端点的弱引用，端点释放后自行退出。

use std::sync::Weak;

use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::mpsc,
};

use super::EndpointCore;
use crate::{frame::FrameDecoder, id::ConnectionId};

pub(super) async fn read_loop<R>(
    core: Weak<EndpointCore>,
    id: ConnectionId,
    seq: u64,
    mut reader: R,
    mut decoder: FrameDecoder,
    buffer_size: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut buffer = vec![0_u8; buffer_size];
    loop {
        let read = match reader.read(&mut buffer).await {
            Ok(0) => {
                tracing::debug!(connection_id = %id, "connection closed by peer");
                break;
            }
            Ok(read) => read,
            Err(err) => {
                tracing::warn!(connection_id = %id, error = %err, "connection read failed");
                break;
            }
        };
        let frames = match decoder.decode(&buffer[..read]) {
            Ok(frames) => frames,
            Err(err) => {
                tracing::warn!(connection_id = %id, error = %err, "protocol violation, dropping connection");
                break;
            }
        };
        let Some(core) = core.upgrade() else {
            return;
        };
        for frame in frames {
            tracing::trace!(connection_id = %id, len = frame.len(), "frame received");
            core.handle_frame(&id, &frame);
        }
    }
    if let Some(core) = core.upgrade() {
        core.destroy_registration(&id, seq);
    }
}

pub(super) async fn write_loop<W>(
    core: Weak<EndpointCore>,
    id: ConnectionId,
    seq: u64,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let written = match writer.write_all(&frame).await {
            Ok(()) if outbound.is_empty() => writer.flush().await,
            other => other,
        };
        if let Err(err) = written {
            tracing::warn!(connection_id = %id, error = %err, "connection write failed");
            if let Some(core) = core.upgrade() {
                core.destroy_registration(&id, seq);
            }
            return;
        }
    }
    let _ = writer.shutdown().await;
}
