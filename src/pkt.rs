//! The RUDP wire format.

use bytestream::{ByteOrder::BigEndian, StreamReader, StreamWriter};
use std::{
    fmt::Display,
    io::{Cursor, Error, ErrorKind, Read, Result, Write},
};

/// Protocol version carried in every packet header.
pub const RUDP_VERSION: u16 = 1;

/// Number of data bytes that can be sent in a packet, header not included.
pub const MAX_PAYLOAD: usize = 1000;

pub(crate) const HDR_SIZE: usize = 8;

/// A packet on an RUDP association.
///
/// The header is 8 bytes in network byte order: version, type and sequence
/// number. The payload length is carried by the UDP datagram length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RudpPacket {
    pub typ: PacketType,
    pub seq_no: SeqNo,
    pub content: Vec<u8>,
}

/// Type tag of a [`RudpPacket`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketType {
    Data = 1,
    Ack = 2,
    Syn = 4,
    Fin = 5,
}

impl PacketType {
    fn from_raw(raw: u16) -> Option<PacketType> {
        match raw {
            1 => Some(PacketType::Data),
            2 => Some(PacketType::Ack),
            4 => Some(PacketType::Syn),
            5 => Some(PacketType::Fin),
            _ => None,
        }
    }
}

impl Display for PacketType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PacketType::Data => write!(f, "DATA"),
            PacketType::Ack => write!(f, "ACK"),
            PacketType::Syn => write!(f, "SYN"),
            PacketType::Fin => write!(f, "FIN"),
        }
    }
}

/// A modular sequence number.
///
/// Ordering uses the sign of the 16-bit two's-complement truncation of the
/// difference, so there is deliberately no `PartialOrd`: arbitrary sequence
/// numbers have no total order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeqNo(pub u32);

impl SeqNo {
    pub fn next(self) -> SeqNo {
        SeqNo(self.0.wrapping_add(1))
    }

    pub fn back(self, n: u32) -> SeqNo {
        SeqNo(self.0.wrapping_sub(n))
    }

    pub fn before(self, other: SeqNo) -> bool {
        (self.0.wrapping_sub(other.0) as u16 as i16) < 0
    }

    pub fn at_or_after(self, other: SeqNo) -> bool {
        (self.0.wrapping_sub(other.0) as u16 as i16) >= 0
    }
}

impl Display for SeqNo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl RudpPacket {
    pub fn syn(seq_no: SeqNo) -> RudpPacket {
        RudpPacket {
            typ: PacketType::Syn,
            seq_no,
            content: Vec::new(),
        }
    }

    pub fn ack(seq_no: SeqNo) -> RudpPacket {
        RudpPacket {
            typ: PacketType::Ack,
            seq_no,
            content: Vec::new(),
        }
    }

    pub fn fin(seq_no: SeqNo) -> RudpPacket {
        RudpPacket {
            typ: PacketType::Fin,
            seq_no,
            content: Vec::new(),
        }
    }

    pub fn data(seq_no: SeqNo, content: Vec<u8>) -> RudpPacket {
        RudpPacket {
            typ: PacketType::Data,
            seq_no,
            content,
        }
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::with_capacity(HDR_SIZE + self.content.len());
        self.into_bytestream(&mut buf)?;
        Ok(buf)
    }

    fn into_bytestream(&self, bytestream: &mut impl Write) -> Result<()> {
        RUDP_VERSION.write_to(bytestream, BigEndian)?;
        (self.typ as u16).write_to(bytestream, BigEndian)?;
        self.seq_no.0.write_to(bytestream, BigEndian)?;
        bytestream.write_all(&self.content)?;
        Ok(())
    }

    pub fn from_slice(slice: &[u8]) -> Result<RudpPacket> {
        Self::from_bytestream(&mut Cursor::new(slice))
    }

    fn from_bytestream(bytestream: &mut Cursor<impl AsRef<[u8]>>) -> Result<RudpPacket> {
        let version = u16::read_from(bytestream, BigEndian)?;
        if version != RUDP_VERSION {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "unsupported rudp version",
            ));
        }

        let typ = u16::read_from(bytestream, BigEndian)?;
        let Some(typ) = PacketType::from_raw(typ) else {
            return Err(Error::new(ErrorKind::InvalidData, "unknown packet type"));
        };

        let seq_no = SeqNo(u32::read_from(bytestream, BigEndian)?);

        let mut content = Vec::new();
        bytestream.read_to_end(&mut content)?;
        if content.len() > MAX_PAYLOAD {
            return Err(Error::new(
                ErrorKind::InvalidData,
                "payload exceeds MAX_PAYLOAD",
            ));
        }

        Ok(RudpPacket { typ, seq_no, content })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let bytes = RudpPacket::data(SeqNo(0x01020304), b"hi".to_vec())
            .to_vec()
            .unwrap();
        assert_eq!(bytes, [0, 1, 0, 1, 1, 2, 3, 4, b'h', b'i']);

        let bytes = RudpPacket::ack(SeqNo(7)).to_vec().unwrap();
        assert_eq!(bytes, [0, 1, 0, 2, 0, 0, 0, 7]);
    }

    #[test]
    fn decode_rejects_hostile_input() {
        // truncated header
        assert!(RudpPacket::from_slice(&[0, 1, 0, 1]).is_err());
        // wrong version
        assert!(RudpPacket::from_slice(&[0, 2, 0, 1, 0, 0, 0, 1]).is_err());
        // unknown type
        assert!(RudpPacket::from_slice(&[0, 1, 0, 3, 0, 0, 0, 1]).is_err());
        // oversized payload
        let mut oversized = RudpPacket::ack(SeqNo(0)).to_vec().unwrap();
        oversized.extend(std::iter::repeat(0u8).take(MAX_PAYLOAD + 1));
        assert!(RudpPacket::from_slice(&oversized).is_err());
    }

    #[test]
    fn decode_accepts_full_payload() {
        let pkt = RudpPacket::data(SeqNo(42), vec![0xab; MAX_PAYLOAD]);
        let decoded = RudpPacket::from_slice(&pkt.to_vec().unwrap()).unwrap();
        assert_eq!(decoded, pkt);
    }

    #[test]
    fn modular_comparison() {
        assert!(SeqNo(1).before(SeqNo(2)));
        assert!(!SeqNo(2).before(SeqNo(2)));
        assert!(SeqNo(2).at_or_after(SeqNo(2)));
        assert!(SeqNo(2).at_or_after(SeqNo(1)));

        // wraps at the u32 boundary
        assert!(SeqNo(u32::MAX).before(SeqNo(0)));
        assert!(SeqNo(0).at_or_after(SeqNo(u32::MAX)));

        // the comparison is on the 16-bit truncated difference
        assert!(SeqNo(0xffff).before(SeqNo(0x1_0001)));
        assert!(SeqNo(0x8000).before(SeqNo(0x8005)));
    }
}
