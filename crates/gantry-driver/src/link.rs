//! 串行链路抽象
//!
//! 物理传输在核心层之外打开与配置；这里只依赖一条已就绪的原始字节流。

use std::io;

/// 已打开的原始字节流连接
///
/// 实现方约定：
///
/// - `read` 必须是非阻塞的，无数据可读时立即返回 `Ok(0)`
/// - 打开、关闭、波特率配置与端口发现都由调用方完成
///
/// 接收线程与请求发送方共享同一个连接（内部以互斥锁串行化），
/// 因此实现只需要 `Send`，不需要 `Sync`。
pub trait SerialLink: Send {
    /// 非阻塞读取，最多填充 `buf.len()` 字节，返回实际读取数
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 写入全部字节
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;

    /// 冲刷输出缓冲
    fn flush(&mut self) -> io::Result<()>;
}
