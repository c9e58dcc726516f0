//! 多条件等待原语
//!
//! [`Expect`] 把「方法 + 属性 + 负载谓词」绑在一个独立的流游标上；
//! [`wait_all`] 在可选截止时刻内轮询一组期望直到全部满足。
//! 流在期望未决时终止是与超时不同的致命同步失败。

use std::time::{Duration, Instant};

use gantry_protocol::{Method, Property};

use crate::error::DriverError;
use crate::stream::{POLL_INTERVAL, StreamCursor};

/// 负载谓词
///
/// `Ok(true)` 命中；`Ok(false)` 与本期望无关（继续向后扫描）；
/// `Err` 是完整性故障，立即上浮、不再重试。
pub type Predicate = Box<dyn FnMut(&[u8]) -> Result<bool, DriverError> + Send>;

/// 对未来报文的一个未决期望
///
/// 每个期望独占一个游标，推进自己时不影响其他等待者。
pub struct Expect {
    cursor: StreamCursor,
    method: Method,
    property: Property,
    predicate: Option<Predicate>,
}

impl Expect {
    pub(crate) fn new(
        cursor: StreamCursor,
        method: Method,
        property: Property,
        predicate: Option<Predicate>,
    ) -> Self {
        Self {
            cursor,
            method,
            property,
            predicate,
        }
    }

    /// 评估一次：游标推进过所有已发布的不匹配报文
    ///
    /// - `Ok(true)`：命中
    /// - `Ok(false)`：已发布的报文扫描完毕，期望仍未决
    /// - `Err(StreamTerminated)`：流在期望未决时终止
    /// - 其余 `Err`：谓词报告的完整性故障
    pub fn poll(&mut self) -> Result<bool, DriverError> {
        while let Some(packet) = self.cursor.poll()? {
            if packet.method == self.method && packet.property == self.property {
                let matched = match self.predicate.as_mut() {
                    Some(check) => check(&packet.payload)?,
                    None => true,
                };
                if matched {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }
}

/// 可能已预先满足的期望
///
/// 调用点没有未决工作时（例如零距离移动）返回 [`Expectation::Fulfilled`]，
/// 等待方无须特判。
pub enum Expectation {
    Pending(Expect),
    Fulfilled,
}

impl Expectation {
    /// 构造预先满足的期望
    pub fn fulfilled() -> Self {
        Self::Fulfilled
    }

    pub fn poll(&mut self) -> Result<bool, DriverError> {
        match self {
            Self::Pending(expect) => expect.poll(),
            Self::Fulfilled => Ok(true),
        }
    }

    /// 阻塞等待单个期望
    pub fn wait(self, timeout: Option<Duration>) -> Result<(), DriverError> {
        wait_all(vec![self], timeout, None)
    }
}

/// 等待全部期望满足
///
/// 循环：截止已过返回 [`DriverError::Timeout`]；否则评估每个未决期望
/// 一次并移除已满足者；全部满足返回成功。两轮评估之间调用 `tick`
/// 回调（协作式周期性工作），未提供时短暂休眠。
///
/// 超时作用于整个组合等待，不作用于单次评估。
pub fn wait_all(
    expectations: Vec<Expectation>,
    timeout: Option<Duration>,
    mut tick: Option<&mut dyn FnMut()>,
) -> Result<(), DriverError> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut pending = expectations;
    loop {
        if let Some(deadline) = deadline {
            if Instant::now() > deadline {
                return Err(DriverError::Timeout);
            }
        }
        let mut unsatisfied = Vec::with_capacity(pending.len());
        for mut expectation in pending {
            if !expectation.poll()? {
                unsatisfied.push(expectation);
            }
        }
        pending = unsatisfied;
        if pending.is_empty() {
            return Ok(());
        }
        match tick.as_mut() {
            Some(tick) => tick(),
            None => spin_sleep::sleep(POLL_INTERVAL),
        }
    }
}
