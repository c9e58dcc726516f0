//! 电机层错误类型定义

use gantry_driver::DriverError;
use thiserror::Error;

/// 电机层错误类型
///
/// 用法错误（非法参数组合）在任何 IO 之前同步拒绝。
#[derive(Error, Debug)]
pub enum ClientError {
    /// 驱动层错误
    #[error(transparent)]
    Driver(#[from] DriverError),

    /// 微步细分必须是 1..=128 内 2 的幂
    #[error("microsteps must be a power of two in 1..=128, got {0}")]
    InvalidMicrosteps(u8),

    /// 运动速率（时长或速度）必须为正
    #[error("move rate must be positive, got {0}")]
    NonPositiveRate(f64),
}
