//! 接收管线
//!
//! 每条连接一个后台线程：从链路非阻塞读取字节、COBS 解帧、报文解码，
//! 将非 LOG 报文发布到报文流。LOG 是文本旁路通道，走 `tracing`
//! （target `gantry::device`）与可选的 channel 汇出口，从不进入流。
//!
//! 帧级与协议级错误（坏段、坏校验和、未知头部）记录日志后丢弃，
//! 接收循环继续；链路 IO 错误视为连接失效，循环退出。退出路径上
//! 必须发布终止哨兵，否则所有未决等待将永久阻塞。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::Sender;
use gantry_protocol::{Method, cobs, packet};
use tracing::{debug, error, trace, warn};

use crate::link::SerialLink;
use crate::stream::PacketStream;

/// 接收管线配置
///
/// # Example
///
/// ```
/// use gantry_driver::PipelineConfig;
/// use std::time::Duration;
///
/// // 默认：单次最多读 128 字节，空转时休眠 1ms
/// let config = PipelineConfig::default();
///
/// let config = PipelineConfig {
///     read_chunk: 64,
///     poll_interval: Duration::from_millis(2),
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// 单次链路读取的最大字节数
    pub read_chunk: usize,
    /// 链路无数据时的轮询休眠
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            read_chunk: 128,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// 接收线程主循环
///
/// # 参数
/// - `link`: 共享链路（读取时短暂持锁，不跨越休眠）
/// - `stream`: 报文流（本线程是唯一写者）
/// - `running`: 协作式终止标志，每轮循环检查一次
/// - `log_sink`: 设备 LOG 文本的可选程序化出口
pub(crate) fn rx_loop(
    link: Arc<Mutex<Box<dyn SerialLink>>>,
    stream: Arc<PacketStream>,
    running: Arc<AtomicBool>,
    log_sink: Option<Sender<String>>,
    config: PipelineConfig,
) {
    let mut buffer: Vec<u8> = Vec::new();
    let mut chunk = vec![0u8; config.read_chunk.max(1)];

    while running.load(Ordering::Relaxed) {
        let read = {
            let mut link = match link.lock() {
                Ok(guard) => guard,
                Err(_) => {
                    error!("link mutex poisoned, stopping RX loop");
                    break;
                }
            };
            match link.read(&mut chunk) {
                Ok(n) => n,
                Err(err) => {
                    error!("link read failed, stopping RX loop: {err}");
                    break;
                }
            }
        };

        if read == 0 {
            spin_sleep::sleep(config.poll_interval);
            continue;
        }
        buffer.extend_from_slice(&chunk[..read]);

        loop {
            let (frame, consumed) = cobs::decode(&buffer);
            if consumed == 0 {
                break;
            }
            buffer.drain(..consumed);
            let Some(frame) = frame else {
                warn!("dropped {consumed} bytes of undecodable input");
                continue;
            };
            match packet::decode(&frame) {
                Ok(p) if p.method == Method::Log => {
                    let text = String::from_utf8_lossy(&p.payload).into_owned();
                    debug!(target: "gantry::device", "{text}");
                    if let Some(sink) = &log_sink {
                        // 接收方已退出时丢弃即可，LOG 不参与同步
                        let _ = sink.send(text);
                    }
                }
                Ok(p) => {
                    trace!("rx {p}");
                    stream.publish(p);
                }
                Err(err) => warn!("frame dropped: {err}"),
            }
        }
    }

    // 终止哨兵必须发布：所有未决与后续的游标都要观察到流结束
    stream.terminate();
}
