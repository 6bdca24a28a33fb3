//! The 8-byte frame header shared by every TCP message.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;

/// `magic` value stamped on every frame, announce datagrams included.
pub const MAGIC: u16 = 0x5243;

/// Msgids with this bit set originate from the server; the absence of the
/// bit marks a client-origin message.
pub const SERVER_ORIGIN_BIT: u16 = 0x8000;

/// Decoded `magic | msgid | bodyLen` prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Message identifier; bit 15 set means server-origin.
    pub msgid: u16,
    /// Length in bytes of the body that follows.
    pub body_len: u32,
}

impl FrameHeader {
    /// Byte size of the header itself.
    pub const SIZE: usize = 8;

    /// True if this msgid is stamped as server-origin.
    #[must_use]
    pub const fn is_server_origin(self) -> bool {
        self.msgid & SERVER_ORIGIN_BIT != 0
    }

    /// Read a header, validating `magic` but not the msgid direction or
    /// `bodyLen` bound (callers check those against their own role and
    /// [`crate::MAX_BODY_LEN`]).
    pub async fn read(input: &mut (impl AsyncRead + Unpin + Send)) -> Result<Self, WireError> {
        let mut buf = [0u8; Self::SIZE];
        input.read_exact(&mut buf).await?;
        let magic = u16::from_be_bytes([buf[0], buf[1]]);
        if magic != MAGIC {
            return Err(WireError::BadMagic { found: magic });
        }
        let msgid = u16::from_be_bytes([buf[2], buf[3]]);
        let body_len = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { msgid, body_len })
    }

    /// Write `magic | msgid | bodyLen`. Caller writes the body separately.
    pub async fn write(
        self,
        output: &mut (impl AsyncWrite + Unpin + Send),
    ) -> Result<(), WireError> {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(&MAGIC.to_be_bytes());
        buf[2..4].copy_from_slice(&self.msgid.to_be_bytes());
        buf[4..8].copy_from_slice(&self.body_len.to_be_bytes());
        output.write_all(&buf).await?;
        Ok(())
    }
}

/// Read the body for a header already validated against [`crate::MAX_BODY_LEN`].
pub async fn read_body(
    input: &mut (impl AsyncRead + Unpin + Send),
    body_len: u32,
) -> Result<Vec<u8>, WireError> {
    let mut buf = vec![0u8; body_len as usize];
    input.read_exact(&mut buf).await?;
    Ok(buf)
}
