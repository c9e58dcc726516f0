//! 报文线格式
//!
//! 去除 COBS 填充后的帧内容即一个报文：byte 0 为滚动 XOR 校验和，
//! byte 1 高四位是方法码、低四位是属性码，其余字节为属性相关负载。
//! 校验和的构造保证整帧按字节 XOR 为零即有效。

use std::fmt;

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::ProtocolError;

/// 方法码掩码（高四位）
pub const METHOD_MASK: u8 = 0xF0;

/// 属性码掩码（低四位）
pub const PROP_MASK: u8 = 0x0F;

/// 报文方法
///
/// GET/SET 为主机到设备方向，ACK/REJ/SYN 为设备到主机方向。
/// LOG 是文本旁路通道，不参与属性协议，也不会进入报文流。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Method {
    Nop = 0x00,
    /// 主机 -> 设备：读属性
    Get = 0x10,
    /// 主机 -> 设备：写属性
    Set = 0x20,
    /// 设备 -> 主机：应答
    Ack = 0x30,
    /// 设备 -> 主机：拒绝
    Rej = 0x40,
    /// 设备 -> 主机：异步事件
    Syn = 0x80,
    /// 日志旁路通道
    Log = 0xF0,
}

/// 可寻址属性（设备侧寄存器）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Property {
    /// 固件标识字符串
    FwInfo = 0x0,
    /// 全局使能
    SysEna = 0x1,
    /// 单电机使能
    MotEna = 0x2,
    /// 电机驱动配置
    MotCfg = 0x3,
    /// 移动指令 / 位置计数
    MotMov = 0x4,
    /// 归位（固件保留）
    MotHome = 0x5,
    /// 电机诊断状态
    MotStat = 0x6,
    /// LED 程序
    LedProg = 0xA,
    /// 里程计通道
    OdomSensor = 0xB,
    /// 颜色传感器通道
    ColorSensor = 0xC,
}

/// 解码后的报文
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub method: Method,
    pub property: Property,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(method: Method, property: Property, payload: Vec<u8>) -> Self {
        Self {
            method,
            property,
            payload,
        }
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}::{:?} [", self.method, self.property)?;
        for (i, byte) in self.payload.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{byte:02X}")?;
        }
        write!(f, "]")
    }
}

/// 编码一个报文帧（未做 COBS 填充）
pub fn encode(method: Method, property: Property, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push(0);
    frame.push(u8::from(method) | u8::from(property));
    frame.extend_from_slice(payload);
    let mut checksum = 0u8;
    for &byte in &frame[1..] {
        checksum ^= byte;
    }
    frame[0] = checksum;
    frame
}

/// 解码一个报文帧
///
/// 校验和不为零返回 [`ProtocolError::BadChecksum`]，方法/属性码无法识别
/// 返回 [`ProtocolError::BadHeader`]。调用方（接收管线）记录日志后丢弃，
/// 不会中断接收循环。
pub fn decode(frame: &[u8]) -> Result<Packet, ProtocolError> {
    if frame.len() < 2 {
        return Err(ProtocolError::Truncated {
            need: 2,
            have: frame.len(),
        });
    }
    let mut residual = 0u8;
    for &byte in frame {
        residual ^= byte;
    }
    if residual != 0 {
        return Err(ProtocolError::BadChecksum { residual });
    }
    let code = frame[1];
    let method = Method::try_from(code & METHOD_MASK)
        .map_err(|_| ProtocolError::BadHeader { code })?;
    let property = Property::try_from(code & PROP_MASK)
        .map_err(|_| ProtocolError::BadHeader { code })?;
    Ok(Packet {
        method,
        property,
        payload: frame[2..].to_vec(),
    })
}
