//! 电机指令负载结构体
//!
//! `MOT_*` 属性族的负载布局。所有多字节字段均为小端；解码一律经过
//! [`FieldReader`]，负载长度与字段表不符即报错。

use crate::ProtocolError;
use crate::wire::{FieldReader, WireInt};

/// 电机驱动配置
///
/// 对应 `MOT_CFG` 负载（id 前缀之后的部分）：
/// `[invert:u8, microsteps:u8, stall_sensitivity:u8, rms_current:u16le]`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorConfig {
    /// 正转方向电平取反
    pub invert: bool,
    /// 微步细分，2 的幂
    pub microsteps: u8,
    /// StallGuard 灵敏度，0 为关闭
    pub stall_sensitivity: u8,
    /// 驱动电流（mA）
    pub rms_current: u16,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            invert: false,
            microsteps: 32,
            stall_sensitivity: 50,
            rms_current: 1000,
        }
    }
}

impl MotorConfig {
    /// 编码为带电机 id 前缀的 `MOT_CFG` 负载
    pub fn encode(&self, id: u8) -> Vec<u8> {
        let mut buf = Vec::with_capacity(6);
        id.put(&mut buf);
        u8::from(self.invert).put(&mut buf);
        self.microsteps.put(&mut buf);
        self.stall_sensitivity.put(&mut buf);
        self.rms_current.put(&mut buf);
        buf
    }

    /// 解码 `ACK::MOT_CFG` 负载，返回 `(id, 配置)`
    pub fn decode(payload: &[u8]) -> Result<(u8, Self), ProtocolError> {
        let mut r = FieldReader::new(payload);
        let id: u8 = r.take()?;
        let invert: u8 = r.take()?;
        let microsteps: u8 = r.take()?;
        let stall_sensitivity: u8 = r.take()?;
        let rms_current: u16 = r.take()?;
        r.finish()?;
        Ok((
            id,
            Self {
                invert: invert != 0,
                microsteps,
                stall_sensitivity,
                rms_current,
            },
        ))
    }
}

/// 移动指令（请求与应答同构）
///
/// `step_interval_us == 0` 表示直接改写设备内部位置计数，不产生运动。
/// 设备在电机实际到达目标后才回送 `ACK::MOT_MOV`，因此对移动指令的
/// 应答同时充当运动完成事件。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MoveCommand {
    pub id: u8,
    /// 绝对目标（有符号步数）
    pub target: i64,
    /// 每步间隔（微秒）
    pub step_interval_us: u64,
}

impl MoveCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(17);
        self.id.put(&mut buf);
        self.target.put(&mut buf);
        self.step_interval_us.put(&mut buf);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FieldReader::new(payload);
        let id: u8 = r.take()?;
        let target: i64 = r.take()?;
        let step_interval_us: u64 = r.take()?;
        r.finish()?;
        Ok(Self {
            id,
            target,
            step_interval_us,
        })
    }
}

/// 电机诊断状态快照（设备权威，只读）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorStatus {
    pub id: u8,
    /// DIAG 引脚电平
    pub diag_pin: u8,
    /// StallGuard 读数
    pub stall_guard: u16,
    /// 当前位置（有符号步数）
    pub position: i64,
}

impl MotorStatus {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(12);
        self.id.put(&mut buf);
        self.diag_pin.put(&mut buf);
        self.stall_guard.put(&mut buf);
        self.position.put(&mut buf);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FieldReader::new(payload);
        let id: u8 = r.take()?;
        let diag_pin: u8 = r.take()?;
        let stall_guard: u16 = r.take()?;
        let position: i64 = r.take()?;
        r.finish()?;
        Ok(Self {
            id,
            diag_pin,
            stall_guard,
            position,
        })
    }
}

/// 单电机使能开关（`MOT_ENA` 请求与应答负载）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorEnable {
    pub id: u8,
    pub enable: bool,
}

impl MotorEnable {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(2);
        self.id.put(&mut buf);
        u8::from(self.enable).put(&mut buf);
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let mut r = FieldReader::new(payload);
        let id: u8 = r.take()?;
        let enable: u8 = r.take()?;
        r.finish()?;
        Ok(Self {
            id,
            enable: enable != 0,
        })
    }
}

/// 读取负载的电机 id 前缀，忽略剩余字节
///
/// 多电机共享同一属性码，应答按 id 路由；路由阶段只看前缀，
/// 命中后再做完整解码。
pub fn peek_motor_id(payload: &[u8]) -> Result<u8, ProtocolError> {
    let mut r = FieldReader::new(payload);
    let id: u8 = r.take()?;
    let _ = r.rest();
    Ok(id)
}
