//! 定长小端整数编解码
//!
//! 协议中的每一个结构化字段都以固定宽度小端字节序列化。
//! 解码严格消费声明的宽度并返回剩余切片，供 [`FieldReader`] 顺序组合。

use crate::ProtocolError;

/// 定长小端整数的编解码能力
///
/// 为 u8/u16/u32/u64 与 i8/i16/i32/i64 实现。
pub trait WireInt: Sized + Copy {
    /// 编码后的字节宽度
    const WIDTH: usize;

    /// 将小端编码追加到缓冲区
    fn put(self, buf: &mut Vec<u8>);

    /// 从切片头部解码，返回值与剩余字节
    ///
    /// 剩余字节不足声明宽度时返回 [`ProtocolError::Truncated`]。
    fn take(buf: &[u8]) -> Result<(Self, &[u8]), ProtocolError>;
}

macro_rules! impl_wire_int {
    ($($ty:ty),+ $(,)?) => {
        $(impl WireInt for $ty {
            const WIDTH: usize = size_of::<$ty>();

            fn put(self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(&self.to_le_bytes());
            }

            fn take(buf: &[u8]) -> Result<(Self, &[u8]), ProtocolError> {
                if buf.len() < Self::WIDTH {
                    return Err(ProtocolError::Truncated {
                        need: Self::WIDTH,
                        have: buf.len(),
                    });
                }
                let (head, rest) = buf.split_at(Self::WIDTH);
                let mut raw = [0u8; size_of::<$ty>()];
                raw.copy_from_slice(head);
                Ok((<$ty>::from_le_bytes(raw), rest))
            }
        })+
    };
}

impl_wire_int!(u8, u16, u32, u64, i8, i16, i32, i64);

/// 顺序字段读取器
///
/// 按声明顺序对负载逐个解码类型化字段。[`finish`](Self::finish) 在负载仍有
/// 剩余字节时报错，用于发现负载与字段表不匹配；按 id 路由、尾部延后解码的
/// 场景用 [`rest`](Self::rest) 显式取走剩余部分。
///
/// # Example
///
/// ```
/// use gantry_protocol::FieldReader;
///
/// let payload = [0x01u8, 0xE8, 0x03];
/// let mut r = FieldReader::new(&payload);
/// let id: u8 = r.take().unwrap();
/// let current: u16 = r.take().unwrap();
/// r.finish().unwrap();
/// assert_eq!((id, current), (1, 1000));
/// ```
pub struct FieldReader<'a> {
    buf: &'a [u8],
}

impl<'a> FieldReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// 解码下一个字段
    pub fn take<T: WireInt>(&mut self) -> Result<T, ProtocolError> {
        let (value, rest) = T::take(self.buf)?;
        self.buf = rest;
        Ok(value)
    }

    /// 取走全部剩余字节
    pub fn rest(self) -> &'a [u8] {
        self.buf
    }

    /// 校验负载已被完全消费
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.buf.is_empty() {
            Ok(())
        } else {
            Err(ProtocolError::TrailingBytes {
                count: self.buf.len(),
            })
        }
    }
}
