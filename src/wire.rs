//! Wire framing for the shared guest/host transport.
//!
//! # Frame Format
//!
//! ```text
//! +---------+----------+----------+
//! | channel |  length  | payload  |
//! | (1 byte)| (2 bytes)| (N bytes)|
//! +---------+----------+----------+
//! ```
//!
//! - Channel is the logical sub-connection the payload belongs to
//! - Length is an unsigned 16-bit count of payload bytes, in native byte
//!   order (guest and host sit on the same machine across a virtio port,
//!   so the order is shared by construction)
//! - Length never exceeds [`MAX_PACKET_SIZE`]
//!
//! Both limits below are wire contracts with the host-side peer and must
//! not change.

/// Maximum number of multiplexed channels (one per mounted 9p volume).
pub const MAX_CHANNELS: usize = 100;

/// Maximum payload size of a single frame (16 KB).
pub const MAX_PACKET_SIZE: usize = 16384;

/// Size of the frame header: 1 channel byte + 2 length bytes.
pub const FRAME_HEADER_LEN: usize = 3;

/// Encode a frame header for `length` payload bytes on `channel`.
pub fn encode_header(channel: u8, length: u16) -> [u8; FRAME_HEADER_LEN] {
    let len = length.to_ne_bytes();
    [channel, len[0], len[1]]
}

/// Decode the 2-byte length field of a frame header.
pub fn decode_length(bytes: [u8; 2]) -> u16 {
    u16::from_ne_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout_is_channel_then_native_length() {
        let header = encode_header(7, 513);
        assert_eq!(header[0], 7);
        assert_eq!([header[1], header[2]], 513u16.to_ne_bytes());
    }

    #[test]
    fn length_roundtrips_through_header() {
        for length in [0u16, 1, 255, 256, MAX_PACKET_SIZE as u16] {
            let header = encode_header(0, length);
            assert_eq!(decode_length([header[1], header[2]]), length);
        }
    }

    #[test]
    fn limits_fit_the_header_fields() {
        assert!(MAX_PACKET_SIZE <= u16::MAX as usize);
        assert!(MAX_CHANNELS <= u8::MAX as usize + 1);
    }
}
