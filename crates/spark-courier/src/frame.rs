//! 分隔符分帧。
//!
//! # 教案式说明
//! - **意图 (Why)**：线上没有长度前缀，帧边界完全依赖单字节分隔符 `0x00`；
//!   JSON 文本的合法字符集中不会出现裸 `0x00`，因此无需转义；
//! - **逻辑 (How)**：每条连接持有一个 [`FrameDecoder`]，把新到达的字节追加到保留缓冲，
//!   按分隔符切出所有完整帧，最后一个残片留作下次的保留缓冲；
//! - **契约 (What)**：帧按字节到达顺序产出；分隔符出现之前不产出帧；
//!   任意的分块方式都得到相同的帧序列。按字节而非文本切分，
//!   跨块截断的多字节 UTF-8 序列得以完整保留，UTF-8 校验推迟到消息解码。

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::FrameError;

/// 帧分隔符。
pub const FRAME_DELIMITER: u8 = 0x00;

/// 增量分帧器，对应一条连接的保留缓冲。
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    /// 保留缓冲中已确认不含分隔符的前缀长度。
    scanned: usize,
    max_frame_len: Option<usize>,
}

impl FrameDecoder {
    /// 不限制帧长的分帧器。
    pub fn new() -> Self {
        Self::default()
    }

    /// 设置帧预算：保留缓冲在遇到分隔符前超过该长度即视为协议违例。
    pub fn with_max_frame_len(limit: Option<usize>) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_frame_len: limit,
        }
    }

    /// 消费一个数据块，返回其中所有完整帧。
    ///
    /// 出错后保留缓冲已清空，调用方应销毁该连接。
    pub fn decode(&mut self, chunk: &[u8]) -> Result<Vec<Bytes>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();
        // 只扫描新到达的字节，逐字节到达的大帧也保持线性开销。
        while let Some(offset) = self.buffer[self.scanned..]
            .iter()
            .position(|byte| *byte == FRAME_DELIMITER)
        {
            let position = self.scanned + offset;
            self.scanned = 0;
            let mut frame = self.buffer.split_to(position + 1);
            frame.truncate(position);
            self.check_budget(frame.len())?;
            frames.push(frame.freeze());
        }
        self.scanned = self.buffer.len();
        self.check_budget(self.buffer.len())?;
        Ok(frames)
    }

    /// 当前保留的未定界字节数。
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    fn check_budget(&mut self, len: usize) -> Result<(), FrameError> {
        match self.max_frame_len {
            Some(limit) if len > limit => {
                self.buffer.clear();
                self.scanned = 0;
                Err(FrameError::Oversized {
                    buffered: len,
                    limit,
                })
            }
            _ => Ok(()),
        }
    }
}

/// 为负载追加分隔符，得到可直接写出的帧。
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + 1);
    frame.put_slice(payload);
    frame.put_u8(FRAME_DELIMITER);
    frame.freeze()
}
