//! 单轴电机状态机
//!
//! 每个 [`Motor`] 持有自己的配置副本与位置缓存。缓存在发出移动指令时
//! 失效，由移动完成应答或显式位置查询重新填充；设备侧的位置计数始终
//! 是权威值。
//!
//! 状态只有 Disabled 与 Enabled 两个，且只能通过成对的使能守卫切换：
//! [`Motor::enable`] 发送使能并返回 [`EnabledMotor`]，其 Drop 在任何
//! 退出路径上回送去使能。

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, MutexGuard};

use gantry_driver::{Driver, DriverError, Expect, Expectation, Predicate, ReplySpec};
use gantry_protocol::{
    Method, MotorConfig, MotorEnable, MotorStatus, MoveCommand, Property, peek_motor_id,
};
use tracing::warn;

use crate::error::ClientError;

/// 运动速率：时长或速度二选一，由类型保证
///
/// 数值必须为正，否则在任何 IO 之前被拒绝。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rate {
    /// 整段运动的总时长（秒）
    Seconds(f64),
    /// 运动速度（单位每秒）
    UnitsPerSec(f64),
}

/// 配置的增量更新
///
/// 未给出的字段保持当前值。
#[derive(Debug, Clone, Copy, Default)]
pub struct ConfigUpdate {
    pub invert: Option<bool>,
    pub microsteps: Option<u8>,
    pub stall_sensitivity: Option<u8>,
    pub rms_current: Option<u16>,
}

/// 电机构造器
///
/// # Example
///
/// ```no_run
/// # fn demo(driver: &gantry_driver::Driver) -> Result<(), gantry_client::ClientError> {
/// use gantry_client::MotorBuilder;
///
/// let mut motor = MotorBuilder::new(0)
///     .scale(6.0 / 360.0)
///     .invert(true)
///     .microsteps(16)
///     .rms_current(2000)
///     .initial_position(0.0)
///     .attach(driver)?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct MotorBuilder {
    id: u8,
    scale: f64,
    init_pos: Option<f64>,
    config: MotorConfig,
}

impl MotorBuilder {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            scale: 1.0,
            init_pos: None,
            config: MotorConfig::default(),
        }
    }

    /// 单位换算系数：`scale == 1.0` 时一个单位对应电机轴一整圈
    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// 使能时强制写入设备位置计数的初始值
    pub fn initial_position(mut self, position: f64) -> Self {
        self.init_pos = Some(position);
        self
    }

    pub fn invert(mut self, invert: bool) -> Self {
        self.config.invert = invert;
        self
    }

    pub fn microsteps(mut self, microsteps: u8) -> Self {
        self.config.microsteps = microsteps;
        self
    }

    pub fn stall_sensitivity(mut self, sensitivity: u8) -> Self {
        self.config.stall_sensitivity = sensitivity;
        self
    }

    pub fn rms_current(mut self, milliamps: u16) -> Self {
        self.config.rms_current = milliamps;
        self
    }

    /// 连接驱动并推送初始配置（SET/MOT_CFG 往返）
    pub fn attach(self, driver: &Driver) -> Result<Motor<'_>, ClientError> {
        validate_microsteps(self.config.microsteps)?;
        let motor = Motor {
            driver,
            id: self.id,
            scale: self.scale,
            init_pos: self.init_pos,
            config: self.config,
            cached_position: Arc::new(Mutex::new(None)),
        };
        motor.push_config()?;
        Ok(motor)
    }
}

fn validate_microsteps(microsteps: u8) -> Result<(), ClientError> {
    if microsteps.is_power_of_two() {
        Ok(())
    } else {
        Err(ClientError::InvalidMicrosteps(microsteps))
    }
}

/// 单轴电机
pub struct Motor<'d> {
    driver: &'d Driver,
    id: u8,
    scale: f64,
    init_pos: Option<f64>,
    config: MotorConfig,
    /// 位置缓存（单位制）；移动指令发出后失效，由完成应答重新填充。
    /// 与移动期望的谓词共享，谓词在匹配时写入。
    cached_position: Arc<Mutex<Option<f64>>>,
}

impl std::fmt::Debug for Motor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Motor")
            .field("id", &self.id)
            .field("scale", &self.scale)
            .field("init_pos", &self.init_pos)
            .field("config", &self.config)
            .field("cached_position", &self.cached_position)
            .finish_non_exhaustive()
    }
}

impl<'d> Motor<'d> {
    pub fn id(&self) -> u8 {
        self.id
    }

    pub fn config(&self) -> MotorConfig {
        self.config
    }

    /// 每单位对应的微步数
    pub fn steps_per_unit(&self) -> f64 {
        self.scale * f64::from(self.config.microsteps) * 200.0
    }

    fn absolute_steps(&self, units: f64) -> i64 {
        (units * self.steps_per_unit()).round() as i64
    }

    fn cache(&self) -> MutexGuard<'_, Option<f64>> {
        match self.cached_position.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// 按 id 匹配本电机应答的谓词
    fn id_filter(&self) -> impl FnMut(&[u8]) -> Result<bool, DriverError> + Send + use<> {
        let id = self.id;
        move |payload| Ok(peek_motor_id(payload)? == id)
    }

    /// 合并增量更新并同步到设备
    pub fn configure(&mut self, update: ConfigUpdate) -> Result<(), ClientError> {
        let mut merged = self.config;
        if let Some(invert) = update.invert {
            merged.invert = invert;
        }
        if let Some(microsteps) = update.microsteps {
            validate_microsteps(microsteps)?;
            merged.microsteps = microsteps;
        }
        if let Some(sensitivity) = update.stall_sensitivity {
            merged.stall_sensitivity = sensitivity;
        }
        if let Some(milliamps) = update.rms_current {
            merged.rms_current = milliamps;
        }
        self.config = merged;
        self.push_config()
    }

    fn push_config(&self) -> Result<(), ClientError> {
        self.driver.send_request(
            Method::Set,
            Property::MotCfg,
            &self.config.encode(self.id),
            Some(ReplySpec::matching(
                Method::Ack,
                Property::MotCfg,
                self.id_filter(),
            )),
        )?;
        Ok(())
    }

    /// 使能本电机
    ///
    /// 若构造时给过初始位置，使能后立即把设备位置计数强制为该值。
    /// 返回的守卫在作用域退出时（含错误路径）回送去使能。
    pub fn enable(&mut self) -> Result<EnabledMotor<'_, 'd>, ClientError> {
        self.set_enable(true)?;
        if let Some(position) = self.init_pos {
            self.set_position(position)?;
        }
        Ok(EnabledMotor { motor: self })
    }

    fn set_enable(&self, enable: bool) -> Result<(), ClientError> {
        let cmd = MotorEnable {
            id: self.id,
            enable,
        };
        self.driver.send_request(
            Method::Set,
            Property::MotEna,
            &cmd.encode(),
            Some(ReplySpec::matching(
                Method::Ack,
                Property::MotEna,
                self.id_filter(),
            )),
        )?;
        Ok(())
    }

    /// 当前位置（单位制）：有缓存用缓存，否则查询设备
    pub fn position(&mut self) -> Result<f64, ClientError> {
        let cached = *self.cache();
        match cached {
            Some(position) => Ok(position),
            None => self.get_position(),
        }
    }

    /// 查询设备位置计数并刷新缓存
    pub fn get_position(&mut self) -> Result<f64, ClientError> {
        let payload = self.driver.send_request(
            Method::Get,
            Property::MotMov,
            &[self.id],
            Some(ReplySpec::matching(
                Method::Ack,
                Property::MotMov,
                self.id_filter(),
            )),
        )?;
        let command = MoveCommand::decode(&payload).map_err(DriverError::from)?;
        let position = command.target as f64 / self.steps_per_unit();
        *self.cache() = Some(position);
        Ok(position)
    }

    /// 直接改写设备位置计数（零步进间隔，不产生运动）
    ///
    /// 缓存先乐观更新；若有在途移动期望，其应答处理会覆盖缓存。
    pub fn set_position(&mut self, position: f64) -> Result<(), ClientError> {
        *self.cache() = Some(position);
        let cmd = MoveCommand {
            id: self.id,
            target: self.absolute_steps(position),
            step_interval_us: 0,
        };
        self.driver.send_request(
            Method::Set,
            Property::MotMov,
            &cmd.encode(),
            Some(ReplySpec::matching(
                Method::Ack,
                Property::MotMov,
                self.id_filter(),
            )),
        )?;
        Ok(())
    }

    /// 读取实时诊断快照，不触碰位置缓存
    pub fn status(&self) -> Result<MotorStatus, ClientError> {
        let payload = self.driver.send_request(
            Method::Get,
            Property::MotStat,
            &[self.id],
            Some(ReplySpec::matching(
                Method::Ack,
                Property::MotStat,
                self.id_filter(),
            )),
        )?;
        Ok(MotorStatus::decode(&payload).map_err(DriverError::from)?)
    }

    /// 规划并发出一次移动，返回运动完成期望
    ///
    /// 目标与当前缓存位置换算后步数为零时，直接返回预先满足的期望，
    /// 不发出任何帧。否则计算
    /// `step_interval_us = round(1e6 × duration / steps)`，使缓存失效，
    /// 注册完成期望后发出非阻塞 SET。
    ///
    /// 期望的谓词校验设备回显的目标步数：不一致是协议完整性故障
    /// （[`DriverError::TargetMismatch`]），不会静默重试；一致时用
    /// 应答回填位置缓存。设备在电机实际到达目标后才回送应答，
    /// 因此该期望同时是运动完成事件。
    pub fn move_to(&mut self, position: f64, rate: Rate) -> Result<Expectation, ClientError> {
        match rate {
            Rate::Seconds(seconds) if seconds <= 0.0 => {
                return Err(ClientError::NonPositiveRate(seconds));
            }
            Rate::UnitsPerSec(speed) if speed <= 0.0 => {
                return Err(ClientError::NonPositiveRate(speed));
            }
            _ => {}
        }

        let current = self.position()?;
        let target_steps = self.absolute_steps(position);
        let current_steps = self.absolute_steps(current);
        let steps = target_steps.abs_diff(current_steps);
        if steps == 0 {
            return Ok(Expectation::fulfilled());
        }

        let duration = match rate {
            Rate::Seconds(seconds) => seconds,
            Rate::UnitsPerSec(speed) => ((position - current) / speed).abs(),
        };
        let step_interval_us = (1e6 * duration / steps as f64).round() as u64;

        *self.cache() = None;
        let expect = self.register_completion(target_steps);
        let cmd = MoveCommand {
            id: self.id,
            target: target_steps,
            step_interval_us,
        };
        self.driver
            .send_request(Method::Set, Property::MotMov, &cmd.encode(), None)?;
        Ok(Expectation::Pending(expect))
    }

    fn register_completion(&self, target_steps: i64) -> Expect {
        let id = self.id;
        let steps_per_unit = self.steps_per_unit();
        let cache = Arc::clone(&self.cached_position);
        let predicate: Predicate = Box::new(move |payload| {
            let ack = MoveCommand::decode(payload)?;
            if ack.id != id {
                return Ok(false);
            }
            if ack.target != target_steps {
                return Err(DriverError::TargetMismatch {
                    expected: target_steps,
                    actual: ack.target,
                });
            }
            let mut cache = match cache.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *cache = Some(ack.target as f64 / steps_per_unit);
            Ok(true)
        });
        self.driver
            .expect(Method::Ack, Property::MotMov, Some(predicate))
    }
}

/// 使能状态下的电机
///
/// 通过 Deref 透传全部电机操作；Drop 无条件回送去使能并等待确认，
/// 失败只记录日志。
pub struct EnabledMotor<'m, 'd> {
    motor: &'m mut Motor<'d>,
}

impl<'d> Deref for EnabledMotor<'_, 'd> {
    type Target = Motor<'d>;

    fn deref(&self) -> &Self::Target {
        self.motor
    }
}

impl DerefMut for EnabledMotor<'_, '_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.motor
    }
}

impl Drop for EnabledMotor<'_, '_> {
    fn drop(&mut self) {
        if let Err(err) = self.motor.set_enable(false) {
            warn!("motor {} disable on scope exit failed: {err}", self.motor.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_driver::DriverConfig;
    use gantry_driver::mock::MockLink;
    use gantry_protocol::{cobs, packet};
    use std::time::Duration;

    fn driver_pair() -> (MockLink, Driver) {
        let link = MockLink::new();
        let driver = Driver::with_config(
            Box::new(link.clone()),
            DriverConfig {
                retry_interval: Duration::from_millis(30),
                ..DriverConfig::default()
            },
        );
        (link, driver)
    }

    fn scaled_motor(driver: &Driver) -> Motor<'_> {
        MotorBuilder::new(0)
            .scale(6.0 / 360.0)
            .microsteps(16)
            .attach(driver)
            .unwrap()
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() < 1e-9,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_steps_per_unit() {
        let (_link, driver) = driver_pair();
        let motor = scaled_motor(&driver);
        // scale × microsteps × 200 = (6/360) × 16 × 200
        let expected = 6.0 / 360.0 * 16.0 * 200.0;
        assert!((motor.steps_per_unit() - expected).abs() < 1e-9);
        assert_eq!(motor.absolute_steps(90.0), 4800);
        assert_eq!(motor.absolute_steps(-90.0), -4800);
    }

    #[test]
    fn test_builder_pushes_config() {
        let (link, driver) = driver_pair();
        let motor = MotorBuilder::new(1)
            .invert(true)
            .microsteps(16)
            .stall_sensitivity(10)
            .rms_current(2000)
            .attach(&driver)
            .unwrap();
        assert_eq!(motor.id(), 1);
        let device = link.motor_config(1).unwrap();
        assert_eq!(device, motor.config());
        assert_eq!(device.rms_current, 2000);
    }

    #[test]
    fn test_invalid_microsteps_rejected_without_io() {
        let (link, driver) = driver_pair();
        let err = MotorBuilder::new(0)
            .microsteps(24)
            .attach(&driver)
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidMicrosteps(24)));
        // 同步拒绝，设备配置未被触碰
        assert_eq!(link.motor_config(0).unwrap(), MotorConfig::default());
    }

    #[test]
    fn test_configure_merges_partial_update() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        motor
            .configure(ConfigUpdate {
                rms_current: Some(1500),
                ..ConfigUpdate::default()
            })
            .unwrap();
        let device = link.motor_config(0).unwrap();
        assert_eq!(device.rms_current, 1500);
        assert_eq!(device.microsteps, 16);
    }

    #[test]
    fn test_move_to_zero_distance_sends_nothing() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        let mut enabled = motor.enable().unwrap();
        enabled.set_position(5.0).unwrap();
        let before = link.last_command(0).unwrap();
        let mut expectation = enabled.move_to(5.0, Rate::UnitsPerSec(10.0)).unwrap();
        assert!(expectation.poll().unwrap());
        assert_eq!(link.last_command(0).unwrap(), before);
    }

    #[test]
    fn test_move_rate_validated_before_io() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        let mut enabled = motor.enable().unwrap();
        enabled.set_position(0.0).unwrap();
        let before = link.last_command(0).unwrap();
        assert!(matches!(
            enabled.move_to(10.0, Rate::Seconds(0.0)),
            Err(ClientError::NonPositiveRate(_))
        ));
        assert!(matches!(
            enabled.move_to(10.0, Rate::UnitsPerSec(-3.0)),
            Err(ClientError::NonPositiveRate(_))
        ));
        assert_eq!(link.last_command(0).unwrap(), before);
    }

    #[test]
    fn test_move_plan_math() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        let mut enabled = motor.enable().unwrap();
        enabled.set_position(0.0).unwrap();

        let expectation = enabled.move_to(90.0, Rate::UnitsPerSec(20.0)).unwrap();
        let sent = link.last_command(0).unwrap();
        assert_eq!(sent.target, 4800);
        // 90 单位 / 20 单位每秒 = 4.5s，1e6 × 4.5 / 4800 = 937.5 → 938
        assert_eq!(sent.step_interval_us, 938);

        expectation.wait(Some(Duration::from_millis(500))).unwrap();
        // 完成应答回填缓存
        assert_close(enabled.position().unwrap(), 90.0);
    }

    #[test]
    fn test_move_by_duration() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        let mut enabled = motor.enable().unwrap();
        enabled.set_position(0.0).unwrap();
        let expectation = enabled.move_to(-90.0, Rate::Seconds(2.0)).unwrap();
        let sent = link.last_command(0).unwrap();
        assert_eq!(sent.target, -4800);
        assert_eq!(sent.step_interval_us, (1e6f64 * 2.0 / 4800.0).round() as u64);
        expectation.wait(Some(Duration::from_millis(500))).unwrap();
    }

    #[test]
    fn test_move_invalidates_cache_until_ack() {
        let (link, driver) = driver_pair();
        link.preset_position(0, 2400);
        let mut motor = scaled_motor(&driver);
        // 缓存为空时 position() 查询设备
        assert_close(motor.position().unwrap(), 45.0);
        let mut enabled = motor.enable().unwrap();
        let expectation = enabled.move_to(90.0, Rate::Seconds(1.0)).unwrap();
        expectation.wait(Some(Duration::from_millis(500))).unwrap();
        assert_close(enabled.position().unwrap(), 90.0);
    }

    #[test]
    fn test_target_mismatch_is_integrity_fault() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        // 设备位置计数默认为 0；电机未使能，SET 被拒绝，期望保持未决
        let mut expectation = motor.move_to(90.0, Rate::Seconds(1.0)).unwrap();
        assert!(!expectation.poll().unwrap());

        // 伪造目标不一致的完成应答
        let forged = MoveCommand {
            id: 0,
            target: 4700,
            step_interval_us: 938,
        };
        let frame =
            cobs::encode(&packet::encode(Method::Ack, Property::MotMov, &forged.encode()))
                .unwrap();
        link.inject_raw(&frame);
        std::thread::sleep(Duration::from_millis(50));
        assert!(matches!(
            expectation.poll(),
            Err(DriverError::TargetMismatch {
                expected: 4800,
                actual: 4700,
            })
        ));
    }

    #[test]
    fn test_status_does_not_touch_cache() {
        let (link, driver) = driver_pair();
        let mut motor = scaled_motor(&driver);
        let mut enabled = motor.enable().unwrap();
        enabled.set_position(1.0).unwrap();
        let status = enabled.status().unwrap();
        assert_eq!(status.position, link.last_command(0).unwrap().target);
        // 状态查询不改写缓存
        assert_eq!(enabled.position().unwrap(), 1.0);
    }

    #[test]
    fn test_enable_guard_round_trip() {
        let (link, driver) = driver_pair();
        let mut motor = MotorBuilder::new(2)
            .initial_position(1.0)
            .attach(&driver)
            .unwrap();
        {
            let enabled = motor.enable().unwrap();
            assert!(link.motor_enabled(2));
            // 初始位置被强制写入设备计数
            let spu = enabled.steps_per_unit();
            assert_eq!(link.last_command(2).unwrap().target, spu.round() as i64);
        }
        assert!(!link.motor_enabled(2));
    }
}
