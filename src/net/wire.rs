//! Wire Format
//!
//! Framing limits, sequence-number serial arithmetic, and the fixed tick
//! datagram layout. Everything multi-byte on the wire is little-endian.

use crate::tick::TickKind;

/// Length of the sequence prefix on every datagram.
pub const SEQ_PREFIX_LEN: usize = 4;

/// Maximum binary frame payload on the stream (10 MiB). A frame of exactly
/// this size is accepted; one byte more is rejected.
pub const MAX_FRAME_LEN: u32 = 10 * 1024 * 1024;

/// Maximum outbound datagram payload, excluding the sequence prefix.
/// Oversized payloads are rejected outright, never truncated.
pub const MAX_DATAGRAM_PAYLOAD: usize = 1024;

/// Packet type byte of a tick datagram.
pub const TICK_PACKET_TYPE: u8 = 0x01;

/// Total length of a tick datagram payload: type (1) + kind (4) +
/// counter (8) + timestamp (8).
pub const TICK_PACKET_LEN: usize = 21;

// ---------------------------------------------------------------------------
// Serial arithmetic (RFC 1982, 32-bit)
// ---------------------------------------------------------------------------

/// Half of the 32-bit sequence space.
const SEQ_HALF_RANGE: u32 = 1 << 31;

/// Whether `incoming` is strictly newer than `last` under 32-bit serial
/// arithmetic. The sequence space is circular: `0` is newer than
/// `u32::MAX`, but a jump of 2^31 or more reads as older.
///
/// A naive `>` comparison breaks at wraparound and must not be used.
pub fn seq_newer(incoming: u32, last: u32) -> bool {
    incoming != last && incoming.wrapping_sub(last) < SEQ_HALF_RANGE
}

/// Forward distance from `last` to `incoming` in the circular sequence
/// space. Only meaningful when `seq_newer(incoming, last)` holds; a
/// distance of `n` means `n - 1` datagrams were lost in between.
pub fn seq_gap(last: u32, incoming: u32) -> u32 {
    incoming.wrapping_sub(last)
}

// ---------------------------------------------------------------------------
// Tick datagram
// ---------------------------------------------------------------------------

/// A decoded tick datagram payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickPacket {
    /// Which tick kind fired.
    pub kind: TickKind,
    /// Per-kind tick counter (first tick is 1).
    pub counter: u64,
    /// Wall-clock Unix timestamp in milliseconds.
    pub timestamp_ms: i64,
}

/// Tick datagram decode errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    /// Payload shorter than the fixed tick layout.
    #[error("tick packet of {actual} bytes, expected {expected}")]
    TruncatedPacket {
        /// Bytes present.
        actual: usize,
        /// Bytes required.
        expected: usize,
    },

    /// Leading byte is not a known packet type.
    #[error("unknown packet type {0:#04x}")]
    UnknownPacketType(u8),

    /// Kind field does not name a registered tick kind.
    #[error("unknown tick kind {0}")]
    UnknownTickKind(i32),
}

/// Encode a tick datagram payload.
pub fn encode_tick_packet(kind: TickKind, counter: u64, timestamp_ms: i64) -> [u8; TICK_PACKET_LEN] {
    let mut buf = [0u8; TICK_PACKET_LEN];
    buf[0] = TICK_PACKET_TYPE;
    buf[1..5].copy_from_slice(&kind.wire_value().to_le_bytes());
    buf[5..13].copy_from_slice(&counter.to_le_bytes());
    buf[13..21].copy_from_slice(&timestamp_ms.to_le_bytes());
    buf
}

/// Decode a tick datagram payload.
pub fn decode_tick_packet(buf: &[u8]) -> Result<TickPacket, WireError> {
    if buf.len() < TICK_PACKET_LEN {
        return Err(WireError::TruncatedPacket {
            actual: buf.len(),
            expected: TICK_PACKET_LEN,
        });
    }
    if buf[0] != TICK_PACKET_TYPE {
        return Err(WireError::UnknownPacketType(buf[0]));
    }

    let raw_kind = i32::from_le_bytes(buf[1..5].try_into().expect("slice length checked"));
    let kind = TickKind::from_wire(raw_kind).ok_or(WireError::UnknownTickKind(raw_kind))?;
    let counter = u64::from_le_bytes(buf[5..13].try_into().expect("slice length checked"));
    let timestamp_ms = i64::from_le_bytes(buf[13..21].try_into().expect("slice length checked"));

    Ok(TickPacket {
        kind,
        counter,
        timestamp_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seq_newer_simple_progression() {
        assert!(seq_newer(1, 0));
        assert!(seq_newer(2, 1));
        assert!(seq_newer(100, 42));
        assert!(!seq_newer(42, 100));
        assert!(!seq_newer(5, 5));
    }

    #[test]
    fn test_seq_newer_across_wraparound() {
        // (2^32 - 1, 0, 1) in order are each strictly newer.
        assert!(seq_newer(u32::MAX, u32::MAX - 1));
        assert!(seq_newer(0, u32::MAX));
        assert!(seq_newer(1, 0));
    }

    #[test]
    fn test_seq_newer_rejects_beyond_half_range() {
        // A jump of exactly 2^31 + 1 exceeds the half range.
        assert!(!seq_newer((1 << 31) + 1, 0));
        // Exactly 2^31 is ambiguous under RFC 1982 and also rejected.
        assert!(!seq_newer(1 << 31, 0));
        // One less than the half range is still newer.
        assert!(seq_newer((1 << 31) - 1, 0));
    }

    #[test]
    fn test_seq_gap_counts_losses() {
        assert_eq!(seq_gap(10, 11), 1); // no loss
        assert_eq!(seq_gap(10, 14), 4); // 3 lost
        assert_eq!(seq_gap(u32::MAX, 1), 2); // 1 lost across the wrap
    }

    #[test]
    fn test_tick_packet_roundtrip() {
        let encoded = encode_tick_packet(TickKind::Combat, 7_000_000_123, 1_700_000_000_000);
        assert_eq!(encoded.len(), TICK_PACKET_LEN);
        assert_eq!(encoded[0], TICK_PACKET_TYPE);

        let decoded = decode_tick_packet(&encoded).unwrap();
        assert_eq!(decoded.kind, TickKind::Combat);
        assert_eq!(decoded.counter, 7_000_000_123);
        assert_eq!(decoded.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn test_tick_packet_layout_is_little_endian() {
        let encoded = encode_tick_packet(TickKind::Movement, 1, 0x0102030405060708);
        // kind 0 as i32-le
        assert_eq!(&encoded[1..5], &[0, 0, 0, 0]);
        // counter 1 as u64-le
        assert_eq!(&encoded[5..13], &[1, 0, 0, 0, 0, 0, 0, 0]);
        // timestamp little-endian byte order
        assert_eq!(&encoded[13..21], &[8, 7, 6, 5, 4, 3, 2, 1]);
    }

    #[test]
    fn test_decode_rejects_short_and_unknown() {
        assert!(matches!(
            decode_tick_packet(&[0u8; 5]),
            Err(WireError::TruncatedPacket { actual: 5, .. })
        ));

        let mut bad_type = encode_tick_packet(TickKind::Movement, 1, 0);
        bad_type[0] = 0x7f;
        assert_eq!(
            decode_tick_packet(&bad_type),
            Err(WireError::UnknownPacketType(0x7f))
        );

        let mut bad_kind = encode_tick_packet(TickKind::Movement, 1, 0);
        bad_kind[1..5].copy_from_slice(&99i32.to_le_bytes());
        assert_eq!(
            decode_tick_packet(&bad_kind),
            Err(WireError::UnknownTickKind(99))
        );
    }
}
