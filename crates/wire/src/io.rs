//! Async read/write helpers tying [`crate::header`] and [`crate::message`]
//! together for a live socket.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::WireError;
use crate::header::{read_body, FrameHeader};
use crate::message::{decode_client, ClientFrame, ServerFrame};
use crate::MAX_BODY_LEN;

/// Read one client-origin frame: header, bounds check, body, decode.
///
/// A server-origin msgid or an oversized `bodyLen` is fatal
/// ([`WireError::is_fatal`]); a body shorter than a known message's fixed
/// prefix decodes to a non-fatal [`WireError::Truncated`] that callers
/// should tolerate and keep reading.
pub async fn read_client_frame(
    input: &mut (impl AsyncRead + Unpin + Send),
) -> Result<ClientFrame, WireError> {
    let header = FrameHeader::read(input).await?;
    if header.is_server_origin() {
        return Err(WireError::WrongDirection {
            msgid: header.msgid,
        });
    }
    if header.body_len > MAX_BODY_LEN {
        return Err(WireError::BodyTooLarge {
            len: header.body_len,
            max: MAX_BODY_LEN,
        });
    }
    let body = read_body(input, header.body_len).await?;
    decode_client(header.msgid, &body)
}

/// Encode and write one server-origin frame.
pub async fn write_server_frame(
    output: &mut (impl AsyncWrite + Unpin + Send),
    frame: ServerFrame,
) -> Result<(), WireError> {
    let body = frame.encode_body();
    let header = FrameHeader {
        msgid: frame.msgid(),
        body_len: body.len() as u32,
    };
    header.write(output).await?;
    output.write_all(&body).await?;
    output.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MSG_CLIENT_DONE;

    #[tokio::test]
    async fn round_trips_server_greet_through_a_duplex_pipe() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_server_frame(&mut a, ServerFrame::Greet { version: 1 })
            .await
            .unwrap();

        let mut header_buf = [0u8; FrameHeader::SIZE];
        tokio::io::AsyncReadExt::read_exact(&mut b, &mut header_buf)
            .await
            .unwrap();
        assert_eq!(u16::from_be_bytes([header_buf[0], header_buf[1]]), crate::MAGIC);
    }

    #[tokio::test]
    async fn read_client_frame_decodes_a_done_message() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let header = FrameHeader {
            msgid: MSG_CLIENT_DONE,
            body_len: 0,
        };
        header.write(&mut a).await.unwrap();

        let frame = read_client_frame(&mut b).await.unwrap();
        assert_eq!(frame, ClientFrame::Done);
    }

    #[tokio::test]
    async fn rejects_oversized_body_len() {
        let (mut a, mut b) = tokio::io::duplex(256);
        let header = FrameHeader {
            msgid: MSG_CLIENT_DONE,
            body_len: MAX_BODY_LEN + 1,
        };
        header.write(&mut a).await.unwrap();

        let err = read_client_frame(&mut b).await.unwrap_err();
        assert!(matches!(err, WireError::BodyTooLarge { .. }));
    }
}
