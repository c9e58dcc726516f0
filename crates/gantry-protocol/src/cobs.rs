//! COBS 帧定界
//!
//! Consistent Overhead Byte Stuffing：将负载中的零字节替换为到下一个零
//! 字节的距离，从而让零字节可以无歧义地作为帧定界符。编码输出形如
//! `[0x00, overhead, stuffed..., 0x00]`，首尾零字节兼作同步标记。
//!
//! 解码端容忍任意垃圾前缀：前导零被跳过，未终结的超长前缀整体丢弃，
//! 计数校验失败的候选帧被跳过并继续向后同步。

use crate::ProtocolError;

/// 单帧原始负载的最大长度
pub const MAX_FRAME_PAYLOAD: usize = 254;

/// 未终结前缀达到该长度即判定失步，整段丢弃
const RESYNC_THRESHOLD: usize = 255;

/// 将负载编码为一个自定界帧
///
/// 零字节自尾部向前链式替换为到下一个零字节（或段尾）的距离，
/// overhead 字节等于帧起点到第一个被替换/隐含零字节的距离加一。
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_FRAME_PAYLOAD {
        return Err(ProtocolError::FrameTooLong { len: payload.len() });
    }
    let mut stuffed = payload.to_vec();
    let mut counter = 0u8;
    for i in (0..stuffed.len()).rev() {
        counter += 1;
        if stuffed[i] == 0 {
            stuffed[i] = counter;
            counter = 0;
        }
    }
    let mut frame = Vec::with_capacity(stuffed.len() + 3);
    frame.push(0);
    frame.push(counter + 1);
    frame.extend_from_slice(&stuffed);
    frame.push(0);
    Ok(frame)
}

/// 从接收缓冲区中尝试解出一帧
///
/// 返回 `(解码负载, 消费的输入字节数)`：
///
/// - 缓冲区中尚无定界符：返回 `(None, 0)` 继续积累；若未终结前缀已达
///   [`RESYNC_THRESHOLD`]，返回 `(None, input.len())` 将其整体丢弃，
///   防止失步的字节流导致无界缓冲。
/// - 找到候选段但逆填充计数未恰好落在段尾：帧无效，返回 `(None, consumed)`，
///   游标越过该段。
/// - 成功：返回 `(Some(payload), consumed)`。
pub fn decode(input: &[u8]) -> (Option<Vec<u8>>, usize) {
    // 跳过前导零（同步标记）
    let start = input
        .iter()
        .position(|&b| b != 0)
        .unwrap_or(input.len());
    let Some(len) = input[start..].iter().position(|&b| b == 0) else {
        if input.len() >= RESYNC_THRESHOLD {
            return (None, input.len());
        }
        return (None, 0);
    };
    let segment = &input[start..start + len];
    let consumed = start + len + 1;

    // 逆向填充变换：overhead 起步，距离计数归零处还原零字节
    let mut counter = segment[0].wrapping_sub(1);
    let mut payload = segment[1..].to_vec();
    for byte in payload.iter_mut() {
        if counter == 0 {
            counter = *byte;
            *byte = 0;
        }
        counter = counter.wrapping_sub(1);
    }
    if counter != 0 {
        return (None, consumed);
    }
    (Some(payload), consumed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn round_trip(payload: &[u8]) -> Vec<u8> {
        let frame = encode(payload).unwrap();
        let (decoded, consumed) = decode(&frame);
        assert_eq!(consumed, frame.len());
        decoded.unwrap()
    }

    #[test]
    fn test_encode_no_zeros() {
        assert_eq!(encode(&[1, 2, 3]).unwrap(), [0, 4, 1, 2, 3, 0]);
    }

    #[test]
    fn test_encode_embedded_zeros() {
        // 零字节替换为到下一个零（或段尾）的距离
        assert_eq!(encode(&[0]).unwrap(), [0, 1, 1, 0]);
        assert_eq!(encode(&[1, 0, 2]).unwrap(), [0, 2, 1, 2, 2, 0]);
        assert_eq!(encode(&[0, 0]).unwrap(), [0, 1, 1, 1, 0]);
    }

    #[test]
    fn test_encode_rejects_oversized() {
        let payload = vec![1u8; 255];
        assert!(matches!(
            encode(&payload),
            Err(ProtocolError::FrameTooLong { len: 255 })
        ));
        assert!(encode(&vec![1u8; 254]).is_ok());
    }

    #[test]
    fn test_decode_waits_for_delimiter() {
        let frame = encode(&[1, 2, 3]).unwrap();
        let (decoded, consumed) = decode(&frame[..frame.len() - 1]);
        assert!(decoded.is_none());
        assert_eq!(consumed, 0);
    }

    #[test]
    fn test_decode_discards_desynced_prefix() {
        // 超长未终结前缀被整体丢弃
        let garbage = vec![0xFFu8; RESYNC_THRESHOLD];
        let (decoded, consumed) = decode(&garbage);
        assert!(decoded.is_none());
        assert_eq!(consumed, garbage.len());
    }

    #[test]
    fn test_decode_skips_corrupted_segment() {
        let mut frame = encode(&[1, 0, 2]).unwrap();
        frame[1] = 9; // 破坏 overhead 计数
        let (decoded, consumed) = decode(&frame);
        assert!(decoded.is_none());
        assert_eq!(consumed, frame.len());

        // 坏帧之后的好帧仍可恢复
        let good = encode(&[7, 8]).unwrap();
        frame.extend_from_slice(&good);
        let (_, consumed) = decode(&frame);
        let (decoded, _) = decode(&frame[consumed..]);
        assert_eq!(decoded.unwrap(), vec![7, 8]);
    }

    #[test]
    fn test_decode_resyncs_past_leading_zeros() {
        let mut input = vec![0u8; 5];
        input.extend_from_slice(&encode(&[42, 0, 43]).unwrap());
        let (decoded, consumed) = decode(&input);
        assert_eq!(decoded.unwrap(), vec![42, 0, 43]);
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_round_trip_boundaries() {
        assert_eq!(round_trip(&[]), Vec::<u8>::new());
        let all_zero = vec![0u8; 254];
        assert_eq!(round_trip(&all_zero), all_zero);
        let ramp: Vec<u8> = (0..=253u8).collect();
        assert_eq!(round_trip(&ramp), ramp);
    }

    proptest! {
        #[test]
        fn prop_round_trip(payload in proptest::collection::vec(any::<u8>(), 0..=254)) {
            prop_assert_eq!(round_trip(&payload), payload);
        }

        #[test]
        fn prop_decode_never_panics(input in proptest::collection::vec(any::<u8>(), 0..600)) {
            let mut buf = input;
            // 反复推进直到不再消费，保证任意垃圾输入下解码器终止且不崩溃
            loop {
                let (_, consumed) = decode(&buf);
                if consumed == 0 {
                    break;
                }
                buf.drain(..consumed);
            }
        }
    }
}
