//! 传输引擎
//!
//! [`Driver`] 持有串行链路、运行接收线程，并提供同步请求原语与
//! 成对的系统使能生命周期。出站写阶段（组帧 + 写入 + 冲刷）在
//! 连接级互斥下完成，等待应答在锁外进行，因此一个调用方的重发
//! 不会破坏另一个调用方正在写出的帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use gantry_protocol::{Method, Property, cobs, packet};
use tracing::{debug, error, trace, warn};

use crate::error::DriverError;
use crate::expect::{Expect, Predicate};
use crate::link::SerialLink;
use crate::pipeline::{PipelineConfig, rx_loop};
use crate::stream::{PacketStream, StreamCursor};

/// 驱动配置
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// 重发间隔：一个间隔内未等到匹配应答即重发同一请求
    pub retry_interval: Duration,

    /// 重发预算
    ///
    /// `None`（默认）为无限重试：点对点嵌入式链路上假定设备终将可达。
    /// 设备永久失联时这表现为无限等待；需要硬上限的调用方设置预算，
    /// 超出后 `send_request` 返回 [`DriverError::RetryExhausted`]。
    pub retry_budget: Option<u32>,

    /// 设备 LOG 文本的可选程序化出口（始终另经 `tracing` 记录）
    pub log_sink: Option<Sender<String>>,

    /// 接收管线配置
    pub pipeline: PipelineConfig,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retry_interval: Duration::from_millis(500),
            retry_budget: None,
            log_sink: None,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// 期望的应答描述
///
/// 应答按 `(方法, 属性)` 匹配，可再附加负载谓词（例如按电机 id 路由）。
pub struct ReplySpec {
    method: Method,
    property: Property,
    predicate: Option<Predicate>,
}

impl ReplySpec {
    /// 只按方法与属性匹配
    pub fn new(method: Method, property: Property) -> Self {
        Self {
            method,
            property,
            predicate: None,
        }
    }

    /// 附加负载谓词
    pub fn matching(
        method: Method,
        property: Property,
        predicate: impl FnMut(&[u8]) -> Result<bool, DriverError> + Send + 'static,
    ) -> Self {
        Self {
            method,
            property,
            predicate: Some(Box::new(predicate)),
        }
    }
}

/// 串行传输引擎（每条连接一个实例）
///
/// Drop 时置终止标志并 join 接收线程，线程退出路径发布终止哨兵，
/// 因此链路在接收线程结束之前不会被释放。
pub struct Driver {
    link: Arc<Mutex<Box<dyn SerialLink>>>,
    stream: Arc<PacketStream>,
    running: Arc<AtomicBool>,
    rx_thread: Option<JoinHandle<()>>,
    config: DriverConfig,
}

impl Driver {
    /// 以默认配置接管一条已打开的链路
    pub fn new(link: Box<dyn SerialLink>) -> Self {
        Self::with_config(link, DriverConfig::default())
    }

    pub fn with_config(link: Box<dyn SerialLink>, config: DriverConfig) -> Self {
        let link = Arc::new(Mutex::new(link));
        let stream = Arc::new(PacketStream::new());
        let running = Arc::new(AtomicBool::new(true));

        let rx_thread = std::thread::spawn({
            let link = Arc::clone(&link);
            let stream = Arc::clone(&stream);
            let running = Arc::clone(&running);
            let log_sink = config.log_sink.clone();
            let pipeline = config.pipeline.clone();
            move || rx_loop(link, stream, running, log_sink, pipeline)
        });

        Self {
            link,
            stream,
            running,
            rx_thread: Some(rx_thread),
            config,
        }
    }

    fn lock_link(&self) -> Result<MutexGuard<'_, Box<dyn SerialLink>>, DriverError> {
        self.link.lock().map_err(|_| DriverError::PoisonedLock)
    }

    /// 发送请求，可选地阻塞等待匹配应答
    ///
    /// 游标在首次写入之前取自流尾，应答不可能先于游标出现。每个
    /// `retry_interval` 内扫描不到匹配报文就重发同一帧并继续等待；
    /// 默认无限重试（见 [`DriverConfig::retry_budget`]）。
    ///
    /// # 错误
    /// - [`DriverError::StreamTerminated`]: 等待期间连接关闭
    /// - [`DriverError::RetryExhausted`]: 配置了预算且已超出
    /// - 谓词报告的完整性故障原样上浮
    pub fn send_request(
        &self,
        method: Method,
        property: Property,
        payload: &[u8],
        expect: Option<ReplySpec>,
    ) -> Result<Vec<u8>, DriverError> {
        let frame = cobs::encode(&packet::encode(method, property, payload))?;
        let mut cursor = self.stream.cursor();
        let mut expect = expect;
        let mut attempts: u32 = 0;
        loop {
            {
                // 写阶段互斥；等待应答在锁外，不阻塞其他调用方的写入
                let mut link = self.lock_link()?;
                link.write_all(&frame)?;
                link.flush()?;
            }
            trace!("tx {:?}::{:?} ({} bytes)", method, property, payload.len());

            let Some(spec) = expect.as_mut() else {
                return Ok(Vec::new());
            };
            let deadline = Instant::now() + self.config.retry_interval;
            while let Some(reply) = cursor.next_before(deadline)? {
                if reply.method == spec.method && reply.property == spec.property {
                    let matched = match spec.predicate.as_mut() {
                        Some(check) => check(&reply.payload)?,
                        None => true,
                    };
                    if matched {
                        return Ok(reply.payload.clone());
                    }
                }
                trace!(
                    "skipping {reply} (expected {:?}::{:?})",
                    spec.method, spec.property
                );
            }

            attempts += 1;
            if let Some(budget) = self.config.retry_budget {
                if attempts > budget {
                    return Err(DriverError::RetryExhausted { attempts });
                }
            }
            debug!(
                "no reply within {:?}, retransmitting {:?}::{:?}",
                self.config.retry_interval, method, property
            );
        }
    }

    /// 查询固件标识字符串
    pub fn firmware_info(&self) -> Result<String, DriverError> {
        let payload = self.send_request(
            Method::Get,
            Property::FwInfo,
            &[],
            Some(ReplySpec::new(Method::Ack, Property::FwInfo)),
        )?;
        if payload.is_empty() {
            Ok("Unknown Device".to_owned())
        } else {
            Ok(String::from_utf8_lossy(&payload).into_owned())
        }
    }

    /// 进入系统使能状态
    ///
    /// 发送 `SET SYS_ENA=1` 并等待确认；返回的守卫在 Drop 时无条件
    /// 回送去使能（包括错误展开路径），失败只记录日志。
    pub fn enable(&self) -> Result<SystemEnableGuard<'_>, DriverError> {
        self.set_system_enable(true)?;
        Ok(SystemEnableGuard { driver: self })
    }

    fn set_system_enable(&self, enable: bool) -> Result<(), DriverError> {
        let value = u8::from(enable);
        self.send_request(
            Method::Set,
            Property::SysEna,
            &[value],
            Some(ReplySpec::matching(
                Method::Ack,
                Property::SysEna,
                move |payload| Ok(payload == [value]),
            )),
        )?;
        Ok(())
    }

    /// 注册一个对未来报文的期望，游标起始于当前流尾
    pub fn expect(
        &self,
        method: Method,
        property: Property,
        predicate: Option<Predicate>,
    ) -> Expect {
        Expect::new(self.stream.cursor(), method, property, predicate)
    }

    /// 原始流游标（监视工具用）
    pub fn cursor(&self) -> StreamCursor {
        self.stream.cursor()
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(handle) = self.rx_thread.take() {
            if handle.join().is_err() {
                error!("RX thread panicked");
            }
        }
    }
}

/// 系统使能守卫
///
/// 作用域退出（正常或错误展开）时回送 `SET SYS_ENA=0` 并等待确认。
pub struct SystemEnableGuard<'d> {
    driver: &'d Driver,
}

impl Drop for SystemEnableGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.driver.set_system_enable(false) {
            warn!("system disable on scope exit failed: {err}");
        }
    }
}
