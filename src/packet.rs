//! Wire format: a fixed 32-byte header followed by up to [`MAX_PAYLOAD`]
//! bytes of payload. See `lab2/protocol.h` for the struct this mirrors.

use crate::checksum;

pub const HEADER_LEN: usize = 32;
pub const MAX_PAYLOAD: usize = 1400;
pub const MSS: usize = MAX_PAYLOAD;
pub const MAX_SACK_BLOCKS: usize = 10;

pub const FLAG_SYN: u8 = 0x01;
pub const FLAG_ACK: u8 = 0x02;
pub const FLAG_FIN: u8 = 0x04;
pub const FLAG_RST: u8 = 0x08;
pub const FLAG_DATA: u8 = 0x10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub wnd: u16,
    pub len: u16,
    pub checksum: u32,
}

impl Header {
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("buffer of {0} bytes is shorter than the 32-byte header")]
    ShortHeader(usize),
    #[error("header declares {declared} payload bytes but only {available} are present")]
    ShortPayload { declared: usize, available: usize },
    #[error("checksum mismatch")]
    BadChecksum,
}

impl Packet {
    /// Builds a packet, computing and storing the checksum last.
    fn build(flags: u8, seq: u32, ack: u32, wnd: u16, payload: Vec<u8>) -> Self {
        assert!(
            payload.len() <= MAX_PAYLOAD,
            "payload of {} bytes exceeds MSS of {} bytes",
            payload.len(),
            MAX_PAYLOAD
        );

        let mut packet = Packet {
            header: Header {
                seq,
                ack,
                flags,
                wnd,
                len: payload.len() as u16,
                checksum: 0,
            },
            payload,
        };
        packet.header.checksum = packet.compute_checksum();
        packet
    }

    pub fn syn(seq: u32, wnd: u16) -> Self {
        Self::build(FLAG_SYN, seq, 0, wnd, Vec::new())
    }

    pub fn syn_ack(seq: u32, ack: u32, wnd: u16) -> Self {
        Self::build(FLAG_SYN | FLAG_ACK, seq, ack, wnd, Vec::new())
    }

    pub fn ack(seq: u32, ack: u32, wnd: u16) -> Self {
        Self::build(FLAG_ACK, seq, ack, wnd, Vec::new())
    }

    /// An ACK carrying a SACK block list in its payload; see
    /// [`crate::window::recv::RecvWindow::sack_blocks`] for the encoding.
    pub fn ack_sack(seq: u32, ack: u32, wnd: u16, sack_payload: Vec<u8>) -> Self {
        Self::build(FLAG_ACK, seq, ack, wnd, sack_payload)
    }

    pub fn fin(seq: u32, ack: u32, wnd: u16) -> Self {
        Self::build(FLAG_FIN | FLAG_ACK, seq, ack, wnd, Vec::new())
    }

    pub fn rst(seq: u32, ack: u32) -> Self {
        Self::build(FLAG_RST, seq, ack, 0, Vec::new())
    }

    pub fn data(seq: u32, ack: u32, wnd: u16, payload: Vec<u8>) -> Self {
        Self::build(FLAG_DATA | FLAG_ACK, seq, ack, wnd, payload)
    }

    fn compute_checksum(&self) -> u32 {
        let mut header_bytes = [0u8; HEADER_LEN];
        encode_header(&self.header, 0, &mut header_bytes);
        checksum::checksum(&header_bytes, &self.payload)
    }

    pub fn verify_checksum(&self) -> bool {
        self.header.checksum == self.compute_checksum()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; HEADER_LEN + self.payload.len()];
        encode_header(&self.header, self.header.checksum, &mut buf[..HEADER_LEN]);
        buf[HEADER_LEN..].copy_from_slice(&self.payload);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Err(DecodeError::ShortHeader(buf.len()));
        }

        let header = decode_header(&buf[..HEADER_LEN]);
        let declared = header.len as usize;
        let available = buf.len() - HEADER_LEN;
        if available < declared {
            return Err(DecodeError::ShortPayload { declared, available });
        }

        let packet = Packet {
            header,
            payload: buf[HEADER_LEN..HEADER_LEN + declared].to_vec(),
        };

        if !packet.verify_checksum() {
            return Err(DecodeError::BadChecksum);
        }

        Ok(packet)
    }
}

fn encode_header(header: &Header, checksum: u32, out: &mut [u8]) {
    out[0..4].copy_from_slice(&header.seq.to_le_bytes());
    out[4..8].copy_from_slice(&header.ack.to_le_bytes());
    out[8] = header.flags;
    out[9] = 0;
    out[10..12].copy_from_slice(&header.wnd.to_le_bytes());
    out[12..14].copy_from_slice(&header.len.to_le_bytes());
    out[14..18].copy_from_slice(&checksum.to_le_bytes());
    out[18..32].copy_from_slice(&[0u8; 14]);
}

fn decode_header(buf: &[u8]) -> Header {
    Header {
        seq: u32::from_le_bytes(buf[0..4].try_into().unwrap()),
        ack: u32::from_le_bytes(buf[4..8].try_into().unwrap()),
        flags: buf[8],
        wnd: u16::from_le_bytes(buf[10..12].try_into().unwrap()),
        len: u16::from_le_bytes(buf[12..14].try_into().unwrap()),
        checksum: u32::from_le_bytes(buf[14..18].try_into().unwrap()),
    }
}

/// Wrapped sequence-number comparison: `a` precedes `b`. Correct while
/// the in-flight distance between the two stays under 2^31 bytes.
pub fn seq_lt(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Encodes up to [`MAX_SACK_BLOCKS`] `(start, end)` ranges as a one-byte
/// count followed by big-endian `u32` pairs, per `lab2`'s SACK option.
pub fn encode_sack_blocks(blocks: &[(u32, u32)]) -> Vec<u8> {
    let count = blocks.len().min(MAX_SACK_BLOCKS);
    let mut out = Vec::with_capacity(1 + count * 8);
    out.push(count as u8);
    for &(start, end) in &blocks[..count] {
        out.extend_from_slice(&start.to_be_bytes());
        out.extend_from_slice(&end.to_be_bytes());
    }
    out
}

pub fn decode_sack_blocks(payload: &[u8]) -> Vec<(u32, u32)> {
    let mut blocks = Vec::new();
    if payload.is_empty() {
        return blocks;
    }
    let count = (payload[0] as usize).min(MAX_SACK_BLOCKS);
    let mut offset = 1;
    for _ in 0..count {
        if offset + 8 > payload.len() {
            break;
        }
        let start = u32::from_be_bytes(payload[offset..offset + 4].try_into().unwrap());
        let end = u32::from_be_bytes(payload[offset + 4..offset + 8].try_into().unwrap());
        blocks.push((start, end));
        offset += 8;
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_data_packet() {
        let p = Packet::data(42, 7, 32, b"hello world".to_vec());
        let bytes = p.encode();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, p);
    }

    #[test]
    fn single_bit_flip_fails_checksum() {
        let p = Packet::data(1, 0, 32, b"abc".to_vec());
        let mut bytes = p.encode();
        bytes[HEADER_LEN] ^= 0x01;
        assert!(matches!(
            Packet::decode(&bytes),
            Err(DecodeError::BadChecksum)
        ));
    }

    #[test]
    fn decode_rejects_short_header() {
        assert!(matches!(
            Packet::decode(&[0u8; 10]),
            Err(DecodeError::ShortHeader(10))
        ));
    }

    #[test]
    #[should_panic]
    fn oversized_payload_is_a_programming_error() {
        let _ = Packet::data(0, 0, 32, vec![0u8; MAX_PAYLOAD + 1]);
    }

    #[test]
    fn sack_blocks_round_trip() {
        let blocks = vec![(100, 199), (300, 399)];
        let encoded = encode_sack_blocks(&blocks);
        assert_eq!(decode_sack_blocks(&encoded), blocks);
    }

    #[test]
    fn sack_blocks_capped_at_ten() {
        let blocks: Vec<(u32, u32)> = (0..20).map(|i| (i * 10, i * 10 + 5)).collect();
        let encoded = encode_sack_blocks(&blocks);
        assert_eq!(encoded[0], MAX_SACK_BLOCKS as u8);
        assert_eq!(decode_sack_blocks(&encoded).len(), MAX_SACK_BLOCKS);
    }
}
