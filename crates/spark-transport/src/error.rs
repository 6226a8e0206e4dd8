use std::io;

use thiserror::Error;

/// 描述一次底层操作对应的稳定错误码与默认文案。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OperationKind {
    pub code: &'static str,
    pub message: &'static str,
}

impl OperationKind {
    pub const BIND: OperationKind = OperationKind {
        code: "spark.transport.bind_failed",
        message: "bind",
    };
    pub const ACCEPT: OperationKind = OperationKind {
        code: "spark.transport.accept_failed",
        message: "accept",
    };
    pub const CONNECT: OperationKind = OperationKind {
        code: "spark.transport.connect_failed",
        message: "connect",
    };
    pub const CONFIGURE: OperationKind = OperationKind {
        code: "spark.transport.configure_failed",
        message: "configure",
    };
}

/// 传输实现上报给协议核心的结构化错误。
///
/// # 教案式说明
/// - **意图 (Why)**：协议核心只关心“哪一步失败、是否值得重试”，不关心具体的 IO 实现；
/// - **契约 (What)**：`code()` 返回稳定错误码，`is_retryable()` 依据 `io::ErrorKind` 给出重试建议，
///   原始 `io::Error` 通过 `source()` 保留；
/// - **权衡 (Trade-offs)**：重试建议仅作为日志字段，端点的重连策略本身固定重试，不据此放弃。
#[derive(Debug, Error)]
#[error("{}: {source}", .operation.message)]
pub struct TransportError {
    operation: OperationKind,
    #[source]
    source: io::Error,
}

impl TransportError {
    /// 将 IO 错误映射为传输错误。
    pub fn from_io(operation: OperationKind, source: io::Error) -> Self {
        Self { operation, source }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        self.operation.code
    }

    /// 失败的操作。
    pub fn operation(&self) -> OperationKind {
        self.operation
    }

    /// 对端拒绝、连接重置、地址占用等瞬态故障视为可重试。
    pub fn is_retryable(&self) -> bool {
        use io::ErrorKind;
        matches!(
            self.source.kind(),
            ErrorKind::TimedOut
                | ErrorKind::WouldBlock
                | ErrorKind::Interrupted
                | ErrorKind::ConnectionRefused
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
                | ErrorKind::NotConnected
                | ErrorKind::AddrInUse
                | ErrorKind::AddrNotAvailable
                | ErrorKind::BrokenPipe
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_connect_is_retryable() {
        let err = TransportError::from_io(
            OperationKind::CONNECT,
            io::Error::from(io::ErrorKind::ConnectionRefused),
        );
        assert_eq!(err.code(), "spark.transport.connect_failed");
        assert!(err.is_retryable());
        assert!(err.to_string().starts_with("connect: "));
    }

    #[test]
    fn permission_denied_is_not_retryable() {
        let err = TransportError::from_io(
            OperationKind::BIND,
            io::Error::from(io::ErrorKind::PermissionDenied),
        );
        assert!(!err.is_retryable());
    }
}
