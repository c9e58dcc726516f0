//! 无硬件测试：内存链路 + 设备仿真
//!
//! [`MockLink`] 在进程内模拟控制器固件的请求处理：GET/SET 回送 ACK，
//! 未知电机或坏负载回送 REJ（文本负载）。移动指令瞬间完成（仿真中
//! 位置直接跳到目标），因此 `ACK::MOT_MOV` 立即回送。
//!
//! 支持故障注入：丢弃设备应答（重试路径）、注入原始垃圾字节
//! （再同步路径）、排入 LOG 报文（旁路通道）。
//!
//! 句柄内部是 `Arc<Mutex<_>>`，克隆后可以在链路被驱动接管之后继续
//! 注入故障与断言设备状态。

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use gantry_protocol::{
    Method, MotorConfig, MotorEnable, MotorStatus, MoveCommand, Packet, Property, cobs, packet,
    peek_motor_id,
};

use crate::link::SerialLink;

/// 仿真设备的固件标识
pub const MOCK_IDENTITY: &str = "Gantry Controller FW 2.0 (simulated)";

/// 仿真的电机数量
pub const MOTOR_COUNT: usize = 3;

const NO_SUCH_MOTOR: &str = "No such motor";
const BAD_PAYLOAD: &str = "Invalid payload";
const MOTOR_DISABLED: &str = "Motor Disabled";

#[derive(Debug, Clone)]
struct SimMotor {
    enabled: bool,
    config: MotorConfig,
    command: MoveCommand,
}

impl SimMotor {
    fn new(id: u8) -> Self {
        Self {
            enabled: false,
            config: MotorConfig::default(),
            command: MoveCommand {
                id,
                target: 0,
                step_interval_us: 0,
            },
        }
    }
}

struct MockInner {
    /// 主机到设备方向的字节积累，帧边界由 COBS 解码发现
    inbound: Vec<u8>,
    /// 设备到主机方向的待读字节
    outbound: VecDeque<u8>,
    sys_enabled: bool,
    motors: [SimMotor; MOTOR_COUNT],
    /// 故障注入：丢弃接下来 N 个设备应答帧
    drop_replies: usize,
    /// 仿真的 StallGuard 读数
    stall_guard: u16,
}

/// 内存串行链路句柄（可克隆）
#[derive(Clone)]
pub struct MockLink {
    inner: Arc<Mutex<MockInner>>,
}

impl Default for MockLink {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLink {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockInner {
                inbound: Vec::new(),
                outbound: VecDeque::new(),
                sys_enabled: false,
                motors: [SimMotor::new(0), SimMotor::new(1), SimMotor::new(2)],
                drop_replies: 0,
                stall_guard: 250,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 丢弃接下来 `n` 个设备应答帧（驱动重发路径测试）
    pub fn drop_next_replies(&self, n: usize) {
        self.lock().drop_replies += n;
    }

    /// 向主机方向注入原始字节（垃圾 / 再同步测试）
    pub fn inject_raw(&self, bytes: &[u8]) {
        self.lock().outbound.extend(bytes);
    }

    /// 向主机方向排入一个 LOG 报文
    pub fn push_log(&self, text: &str) {
        self.lock()
            .enqueue(Method::Log, Property::FwInfo, text.as_bytes());
    }

    /// 预置某电机的设备侧位置计数（测试初始状态）
    pub fn preset_position(&self, id: u8, steps: i64) {
        let mut inner = self.lock();
        if let Some(motor) = inner.motors.get_mut(id as usize) {
            motor.command.target = steps;
        }
    }

    pub fn sys_enabled(&self) -> bool {
        self.lock().sys_enabled
    }

    pub fn motor_enabled(&self, id: u8) -> bool {
        self.lock()
            .motors
            .get(id as usize)
            .is_some_and(|m| m.enabled)
    }

    pub fn motor_config(&self, id: u8) -> Option<MotorConfig> {
        self.lock().motors.get(id as usize).map(|m| m.config)
    }

    pub fn last_command(&self, id: u8) -> Option<MoveCommand> {
        self.lock().motors.get(id as usize).map(|m| m.command)
    }
}

impl MockInner {
    fn enqueue(&mut self, method: Method, property: Property, payload: &[u8]) {
        let frame = cobs::encode(&packet::encode(method, property, payload))
            .expect("mock reply fits in one frame");
        self.outbound.extend(frame);
    }

    fn reply(&mut self, method: Method, property: Property, payload: &[u8]) {
        if self.drop_replies > 0 {
            self.drop_replies -= 1;
            return;
        }
        self.enqueue(method, property, payload);
    }

    fn reject(&mut self, property: Property, text: &str) {
        self.reply(Method::Rej, property, text.as_bytes());
    }

    fn handle_packet(&mut self, request: Packet) {
        use Method::{Ack, Get, Set};
        use Property::*;

        match (request.method, request.property) {
            (Get, FwInfo) => self.reply(Ack, FwInfo, MOCK_IDENTITY.as_bytes()),

            (Set, SysEna) => {
                self.sys_enabled = request.payload.first().is_some_and(|&b| b != 0);
                let state = u8::from(self.sys_enabled);
                self.reply(Ack, SysEna, &[state]);
            }
            (Get, SysEna) => {
                let state = u8::from(self.sys_enabled);
                self.reply(Ack, SysEna, &[state]);
            }

            (Set, MotEna) => match MotorEnable::decode(&request.payload) {
                Ok(cmd) => match self.motors.get_mut(cmd.id as usize) {
                    Some(motor) => {
                        motor.enabled = cmd.enable;
                        let echo = MotorEnable {
                            id: cmd.id,
                            enable: motor.enabled,
                        }
                        .encode();
                        self.reply(Ack, MotEna, &echo);
                    }
                    None => self.reject(MotEna, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotEna, BAD_PAYLOAD),
            },
            (Get, MotEna) => match peek_motor_id(&request.payload) {
                Ok(id) => match self.motors.get(id as usize) {
                    Some(motor) => {
                        let echo = MotorEnable {
                            id,
                            enable: motor.enabled,
                        }
                        .encode();
                        self.reply(Ack, MotEna, &echo);
                    }
                    None => self.reject(MotEna, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotEna, BAD_PAYLOAD),
            },

            (Set, MotCfg) => match MotorConfig::decode(&request.payload) {
                Ok((id, config)) => match self.motors.get_mut(id as usize) {
                    Some(motor) => {
                        motor.config = config;
                        let echo = motor.config.encode(id);
                        self.reply(Ack, MotCfg, &echo);
                    }
                    None => self.reject(MotCfg, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotCfg, BAD_PAYLOAD),
            },
            (Get, MotCfg) => match peek_motor_id(&request.payload) {
                Ok(id) => match self.motors.get(id as usize) {
                    Some(motor) => {
                        let echo = motor.config.encode(id);
                        self.reply(Ack, MotCfg, &echo);
                    }
                    None => self.reject(MotCfg, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotCfg, BAD_PAYLOAD),
            },

            (Set, MotMov) => match MoveCommand::decode(&request.payload) {
                Ok(cmd) => match self.motors.get_mut(cmd.id as usize) {
                    Some(motor) if motor.enabled => {
                        // 仿真中运动瞬间完成，立即回送完成应答
                        motor.command = cmd;
                        self.reply(Ack, MotMov, &cmd.encode());
                    }
                    Some(_) => self.reject(MotMov, MOTOR_DISABLED),
                    None => self.reject(MotMov, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotMov, BAD_PAYLOAD),
            },
            (Get, MotMov) => match peek_motor_id(&request.payload) {
                Ok(id) => match self.motors.get(id as usize) {
                    Some(motor) => {
                        let echo = motor.command.encode();
                        self.reply(Ack, MotMov, &echo);
                    }
                    None => self.reject(MotMov, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotMov, BAD_PAYLOAD),
            },

            (Get, MotStat) => match peek_motor_id(&request.payload) {
                Ok(id) => match self.motors.get(id as usize) {
                    Some(motor) => {
                        let status = MotorStatus {
                            id,
                            diag_pin: 0,
                            stall_guard: self.stall_guard,
                            position: motor.command.target,
                        };
                        self.reply(Ack, MotStat, &status.encode());
                    }
                    None => self.reject(MotStat, NO_SUCH_MOTOR),
                },
                Err(_) => self.reject(MotStat, BAD_PAYLOAD),
            },

            (_, property) => self.reject(property, "Unsupported request"),
        }
    }
}

impl SerialLink for MockLink {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut inner = self.lock();
        let n = buf.len().min(inner.outbound.len());
        for slot in buf[..n].iter_mut() {
            // n 以队列长度为界，pop 必然成功
            *slot = inner.outbound.pop_front().unwrap_or_default();
        }
        Ok(n)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut inner = self.lock();
        inner.inbound.extend_from_slice(bytes);
        loop {
            let (frame, consumed) = cobs::decode(&inner.inbound);
            if consumed == 0 {
                break;
            }
            inner.inbound.drain(..consumed);
            let Some(frame) = frame else { continue };
            if let Ok(request) = packet::decode(&frame) {
                inner.handle_packet(request);
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
