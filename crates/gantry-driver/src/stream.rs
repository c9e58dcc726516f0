//! 报文流：追加式单写多读链
//!
//! 接收线程是唯一写者，每个 `next` 链接恰好写入一次，且在节点完整构造
//! 之后才发布，因此任意多个读者无锁地并发行走也只会观察到单调增长的
//! 一致前缀。终止哨兵是流的最后一个节点，所有游标据此得知「不会再有
//! 数据」，而不是永久阻塞。
//!
//! 语言层面用 `Arc` + [`ArcSwapOption`] 表达「只写一次、发布后不变」的
//! 链接；读者只做 load，不做任何修改。

use std::sync::Arc;
use std::time::Instant;

use arc_swap::{ArcSwap, ArcSwapOption};
use gantry_protocol::Packet;

use crate::error::DriverError;

/// 游标与组合等待的轮询休眠间隔
///
/// 协作式轮询而非事件唤醒：最坏延迟以该间隔为界，对嵌入式链路的
/// 速率而言足够。
pub(crate) const POLL_INTERVAL: std::time::Duration = std::time::Duration::from_millis(1);

enum ChainEntry {
    /// 链头占位，不携带报文
    Origin,
    Packet(Arc<Packet>),
    /// 终止哨兵：流的永久末端
    Term,
}

/// 流中的一个节点
pub struct ChainNode {
    entry: ChainEntry,
    next: ArcSwapOption<ChainNode>,
}

impl ChainNode {
    fn new(entry: ChainEntry) -> Arc<Self> {
        Arc::new(Self {
            entry,
            next: ArcSwapOption::empty(),
        })
    }
}

/// 追加式报文流
///
/// 写端只有接收管线一个线程；读端通过 [`cursor`](Self::cursor) 取得
/// 起始于当前流尾的独立游标。
pub struct PacketStream {
    tail: ArcSwap<ChainNode>,
}

impl PacketStream {
    pub(crate) fn new() -> Self {
        Self {
            tail: ArcSwap::from(ChainNode::new(ChainEntry::Origin)),
        }
    }

    /// 发布一个报文（仅接收管线调用）
    pub(crate) fn publish(&self, packet: Packet) {
        self.append(ChainEntry::Packet(Arc::new(packet)));
    }

    /// 发布终止哨兵（仅接收管线在退出时调用）
    pub(crate) fn terminate(&self) {
        self.append(ChainEntry::Term);
    }

    fn append(&self, entry: ChainEntry) {
        let node = ChainNode::new(entry);
        // 先链接后换尾：无论游标从旧尾还是新尾出发，看到的前缀一致
        self.tail.load().next.store(Some(Arc::clone(&node)));
        self.tail.store(node);
    }

    /// 取得起始于当前流尾的游标：只会观察到此后发布的报文
    pub fn cursor(&self) -> StreamCursor {
        StreamCursor {
            node: self.tail.load_full(),
        }
    }
}

/// 读者在流中的位置
///
/// 游标之间不共享任何可变状态，可在任意多个线程中并发前进。
pub struct StreamCursor {
    node: Arc<ChainNode>,
}

impl StreamCursor {
    /// 非阻塞推进一格
    ///
    /// - `Ok(Some(packet))`：前进并返回到达的报文
    /// - `Ok(None)`：下一链接尚未发布
    /// - `Err(StreamTerminated)`：已到达终止哨兵，之后每次调用都如此
    pub fn poll(&mut self) -> Result<Option<Arc<Packet>>, DriverError> {
        loop {
            let Some(next) = self.node.next.load_full() else {
                return Ok(None);
            };
            match next.entry {
                ChainEntry::Packet(ref packet) => {
                    let packet = Arc::clone(packet);
                    self.node = next;
                    return Ok(Some(packet));
                }
                ChainEntry::Term => return Err(DriverError::StreamTerminated),
                // Origin 只作链头，不会被链接进流；仅保证循环前进
                ChainEntry::Origin => self.node = next,
            }
        }
    }

    /// 阻塞推进一格，至多等到 `deadline`
    ///
    /// 截止前未有新报文返回 `Ok(None)`；终止哨兵仍以错误上浮。
    pub fn next_before(&mut self, deadline: Instant) -> Result<Option<Arc<Packet>>, DriverError> {
        loop {
            if let Some(packet) = self.poll()? {
                return Ok(Some(packet));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            spin_sleep::sleep(POLL_INTERVAL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_protocol::{Method, Property};
    use std::time::Duration;

    fn packet(tag: u8) -> Packet {
        Packet::new(Method::Ack, Property::MotMov, vec![tag])
    }

    fn drain(cursor: &mut StreamCursor) -> Vec<u8> {
        let mut tags = Vec::new();
        while let Ok(Some(p)) = cursor.poll() {
            tags.push(p.payload[0]);
        }
        tags
    }

    #[test]
    fn test_publish_order_preserved() {
        let stream = PacketStream::new();
        let mut early = stream.cursor();
        for tag in 0..5 {
            stream.publish(packet(tag));
        }
        assert_eq!(drain(&mut early), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_cursor_starts_at_tail() {
        let stream = PacketStream::new();
        stream.publish(packet(1));
        let mut late = stream.cursor();
        stream.publish(packet(2));
        // 晚创建的游标只看到之后发布的报文
        assert_eq!(drain(&mut late), vec![2]);
    }

    #[test]
    fn test_concurrent_readers_same_prefix() {
        let stream = Arc::new(PacketStream::new());
        let mut readers: Vec<_> = (0..4).map(|_| stream.cursor()).collect();
        let writer = {
            let stream = Arc::clone(&stream);
            std::thread::spawn(move || {
                for tag in 0..100 {
                    stream.publish(packet(tag));
                }
                stream.terminate();
            })
        };
        let expected: Vec<u8> = (0..100).collect();
        for cursor in readers.iter_mut() {
            let mut seen = Vec::new();
            loop {
                match cursor.poll() {
                    Ok(Some(p)) => seen.push(p.payload[0]),
                    Ok(None) => std::thread::yield_now(),
                    Err(DriverError::StreamTerminated) => break,
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }
            assert_eq!(seen, expected);
        }
        writer.join().unwrap();
    }

    #[test]
    fn test_cursor_after_termination() {
        let stream = PacketStream::new();
        stream.terminate();
        let mut cursor = stream.cursor();
        assert!(matches!(
            cursor.poll(),
            Err(DriverError::StreamTerminated)
        ));
        // 终止是永久的
        assert!(matches!(
            cursor.poll(),
            Err(DriverError::StreamTerminated)
        ));
    }

    #[test]
    fn test_next_before_deadline() {
        let stream = PacketStream::new();
        let mut cursor = stream.cursor();
        let deadline = Instant::now() + Duration::from_millis(10);
        assert!(cursor.next_before(deadline).unwrap().is_none());
        assert!(Instant::now() >= deadline);
    }
}
