//! # Gantry Driver
//!
//! 串行传输引擎，覆盖协议之上、电机语义之下的同步机制：
//!
//! - 每条连接一个后台接收线程，负责 COBS 解帧、报文解码与流发布
//! - 报文流是追加式单写多读链表，任意多个游标互不干扰地独立前进
//! - [`Driver::send_request`] 提供「发送并等待匹配应答、超时重发」的
//!   同步请求原语，出站写阶段在连接级互斥下串行化
//! - [`Expect`] / [`wait_all`] 提供对多个未决应答的组合等待
//! - [`Driver::enable`] 返回成对使能守卫，任何退出路径都会回送去使能
//!
//! 大多数用户应该使用 `gantry-client` 提供的电机层接口。

mod driver;
mod error;
pub mod expect;
mod link;
pub mod pipeline;
pub mod stream;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use driver::{Driver, DriverConfig, ReplySpec, SystemEnableGuard};
pub use error::DriverError;
pub use expect::{Expect, Expectation, Predicate, wait_all};
pub use link::SerialLink;
pub use pipeline::PipelineConfig;
pub use stream::{PacketStream, StreamCursor};
