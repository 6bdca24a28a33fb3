//! The 16-byte UDP announce frame.

use crate::error::WireError;
use crate::header::MAGIC;

/// `(tcpAddr, tcpPort, serverKey)` as broadcast by the announcer.
///
/// Layout: `magic u16 | 0x0000 u16 | addr [u8;4] | tcpPort u16 | reserved
/// u16 | serverKey u32`, 16 bytes total, all big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnounceFrame {
    /// IPv4 address of the TCP listener, as four octets.
    pub addr: [u8; 4],
    /// Port the TCP listener is bound to.
    pub tcp_port: u16,
    /// Randomized key identifying this server instance.
    pub server_key: u32,
}

impl AnnounceFrame {
    /// Encoded size in bytes.
    pub const SIZE: usize = 16;

    /// Encode to the 16-byte wire form.
    #[must_use]
    pub fn encode(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        // buf[2..4] left as 0x0000.
        buf[4..8].copy_from_slice(&self.addr);
        buf[8..10].copy_from_slice(&self.tcp_port.to_be_bytes());
        // buf[10..12] reserved, left as zero.
        buf[12..16].copy_from_slice(&self.server_key.to_be_bytes());
        buf
    }

    /// Decode a 16-byte datagram.
    pub fn decode(buf: &[u8]) -> Result<Self, WireError> {
        if buf.len() < Self::SIZE {
            return Err(WireError::Truncated {
                msgid: 0,
                len: buf.len(),
                needed: Self::SIZE,
            });
        }
        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(WireError::BadMagic { found: magic });
        }
        let addr = [buf[4], buf[5], buf[6], buf[7]];
        let tcp_port = u16::from_be_bytes([buf[8], buf[9]]);
        let server_key = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        Ok(Self {
            addr,
            tcp_port,
            server_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let frame = AnnounceFrame {
            addr: [192, 168, 1, 42],
            tcp_port: 5050,
            server_key: 0xdead_beef,
        };
        let encoded = frame.encode();
        assert_eq!(encoded.len(), AnnounceFrame::SIZE);
        assert_eq!(AnnounceFrame::decode(&encoded).unwrap(), frame);
    }

    #[test]
    fn rejects_short_buffer() {
        assert!(AnnounceFrame::decode(&[0u8; 4]).is_err());
    }
}
