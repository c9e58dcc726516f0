//! 驱动层错误类型定义

use gantry_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
///
/// 超时（组合等待截止）与流终止（连接关闭）是两种不同的失败，
/// 调用方可以据此区分「设备暂时没有应答」与「不会再有任何应答」。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 串行链路 IO 错误
    #[error("link IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 协议编解码错误
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 组合等待在截止时刻前未全部满足
    #[error("wait deadline exceeded")]
    Timeout,

    /// 报文流已终止，期望不可能再被满足
    #[error("packet stream terminated")]
    StreamTerminated,

    /// 应答回显的目标与请求不一致（完整性故障，不自动重试）
    #[error("acknowledged target mismatch: expected {expected}, got {actual}")]
    TargetMismatch { expected: i64, actual: i64 },

    /// 重发预算耗尽
    #[error("retry budget exhausted after {attempts} attempts")]
    RetryExhausted { attempts: u32 },

    /// 锁被毒化（线程 panic）
    #[error("poisoned lock (thread panic)")]
    PoisonedLock,
}
