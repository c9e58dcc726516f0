//! # Gantry Protocol
//!
//! 龙门控制器串行协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `wire`: 定长小端整数编解码
//! - `cobs`: COBS 帧定界
//! - `packet`: 报文线格式与自校验和
//! - `motion`: 电机指令负载结构体
//!
//! ## 线格式
//!
//! 每一帧在传输层表现为 `0x00 <overhead> <stuffed payload> 0x00`，
//! 负载经 COBS 变换后不含零字节，零字节因此可以无歧义地作为帧定界符。
//!
//! 去除填充后的帧内容：byte 0 为滚动 XOR 校验和（整帧 XOR 为零即有效），
//! byte 1 高四位是方法码、低四位是属性码，其余为属性相关负载。

pub mod cobs;
pub mod motion;
pub mod packet;
pub mod wire;

// 重新导出常用类型
pub use motion::*;
pub use packet::*;
pub use wire::{FieldReader, WireInt};

use thiserror::Error;

/// 协议层统一错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// COBS 原始负载超过单帧上限（[`cobs::MAX_FRAME_PAYLOAD`]）
    #[error("frame payload too long for COBS: {len} bytes (max 254)")]
    FrameTooLong { len: usize },

    /// 字段声明宽度超出剩余字节数
    #[error("truncated field: need {need} bytes, have {have}")]
    Truncated { need: usize, have: usize },

    /// 负载未被字段表完全消费
    #[error("payload not fully consumed: {count} trailing bytes")]
    TrailingBytes { count: usize },

    /// 整帧 XOR 校验不为零
    #[error("bad checksum: residual 0x{residual:02x}")]
    BadChecksum { residual: u8 },

    /// 方法/属性四位码无法识别
    #[error("bad frame header 0x{code:02x}")]
    BadHeader { code: u8 },
}
