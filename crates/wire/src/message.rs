//! Message bodies: the enumerated client- and server-origin payloads.

use crate::error::WireError;

/// msgid for `ServerGreet`.
pub const MSG_SERVER_GREET: u16 = 0x8001;
/// msgid for `ClientGreet`.
pub const MSG_CLIENT_GREET: u16 = 0x0001;
/// msgid for `ServerPing`.
pub const MSG_SERVER_PING: u16 = 0x8002;
/// msgid for `ClientPong`.
pub const MSG_CLIENT_PONG: u16 = 0x0002;
/// msgid for `ClientAddRecord`.
pub const MSG_CLIENT_ADD_RECORD: u16 = 0x0003;
/// msgid for `ClientDelRecord`.
pub const MSG_CLIENT_DEL_RECORD: u16 = 0x0004;
/// msgid for `ClientDone`.
pub const MSG_CLIENT_DONE: u16 = 0x0005;
/// msgid for `ClientInfo`.
pub const MSG_CLIENT_INFO: u16 = 0x0006;

/// `subtype` for a new record carrying a record type.
pub const ADD_SUBTYPE_NEW: u8 = 0;
/// `subtype` for an alias of a previously-added record.
pub const ADD_SUBTYPE_ALIAS: u8 = 1;

/// A decoded client-origin message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// `ClientGreet`: the client's opening handshake.
    Greet {
        /// Protocol version the client supports.
        version: u8,
        /// Client type tag, currently unconstrained by this service.
        client_type: u8,
        /// Opaque key the client reuses across its own reconnects.
        client_key: u32,
    },
    /// `ClientPong`: reply to a `ServerPing`.
    Pong {
        /// Must echo the nonce from the matching ping.
        nonce: u32,
    },
    /// `ClientAddRecord`: introduces a record or attaches an alias to one.
    AddRecord {
        /// Record identifier, opaque and session-scoped.
        recid: u32,
        /// Record type name; empty for an alias (`subtype = 1`).
        record_type: String,
        /// Record or alias name.
        name: String,
        /// True when this is an alias rather than a new record.
        is_alias: bool,
    },
    /// `ClientDelRecord`: retracts a previously-added record.
    DelRecord {
        /// Record identifier to retract.
        recid: u32,
    },
    /// `ClientDone`: the client has no more work for this batch.
    Done,
    /// `ClientInfo`: a key/value pair, either IOC-level (`recid == 0`) or
    /// attached to a specific record.
    Info {
        /// `0` for IOC-level info, otherwise the owning record.
        recid: u32,
        /// Info key.
        key: String,
        /// Info value.
        value: String,
    },
    /// A msgid this codec does not recognize. Per the wire contract,
    /// unknown client-origin frames are tolerated: the body is consumed
    /// and the frame is otherwise ignored.
    Unknown {
        /// The unrecognized msgid.
        msgid: u16,
    },
}

/// A server-origin message to encode and send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerFrame {
    /// `ServerGreet`: advertises the effective protocol version.
    Greet {
        /// `min(server_max, client)` negotiated version.
        version: u8,
    },
    /// `ServerPing`: keepalive probe carrying a fresh nonce.
    Ping {
        /// Random nonce the client must echo back.
        nonce: u32,
    },
}

impl ServerFrame {
    /// The msgid this frame encodes to.
    #[must_use]
    pub const fn msgid(self) -> u16 {
        match self {
            ServerFrame::Greet { .. } => MSG_SERVER_GREET,
            ServerFrame::Ping { .. } => MSG_SERVER_PING,
        }
    }

    /// Encode the body (header is written separately by the caller).
    #[must_use]
    pub fn encode_body(self) -> Vec<u8> {
        match self {
            ServerFrame::Greet { version } => vec![version],
            ServerFrame::Ping { nonce } => nonce.to_be_bytes().to_vec(),
        }
    }
}

/// Decode a client-origin body for the given msgid.
///
/// Returns [`WireError::Truncated`] (non-fatal, see
/// [`WireError::is_fatal`]) when `body` is shorter than the fixed prefix
/// required for a *known* msgid; unrecognized msgids always decode to
/// [`ClientFrame::Unknown`] regardless of body length.
pub fn decode_client(msgid: u16, body: &[u8]) -> Result<ClientFrame, WireError> {
    let need = |n: usize| -> Result<(), WireError> {
        if body.len() < n {
            Err(WireError::Truncated {
                msgid,
                len: body.len(),
                needed: n,
            })
        } else {
            Ok(())
        }
    };

    match msgid {
        MSG_CLIENT_GREET => {
            need(8)?;
            Ok(ClientFrame::Greet {
                version: body[0],
                client_type: body[1],
                client_key: u32::from_be_bytes([body[4], body[5], body[6], body[7]]),
            })
        }
        MSG_CLIENT_PONG => {
            need(4)?;
            Ok(ClientFrame::Pong {
                nonce: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            })
        }
        MSG_CLIENT_ADD_RECORD => {
            need(8)?;
            let recid = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let subtype = body[4];
            let type_len = body[5] as usize;
            let name_len = u16::from_be_bytes([body[6], body[7]]) as usize;
            need(8 + type_len + name_len)?;
            let type_bytes = &body[8..8 + type_len];
            let name_bytes = &body[8 + type_len..8 + type_len + name_len];
            Ok(ClientFrame::AddRecord {
                recid,
                record_type: String::from_utf8_lossy(type_bytes).into_owned(),
                name: String::from_utf8_lossy(name_bytes).into_owned(),
                is_alias: subtype == ADD_SUBTYPE_ALIAS,
            })
        }
        MSG_CLIENT_DEL_RECORD => {
            need(4)?;
            Ok(ClientFrame::DelRecord {
                recid: u32::from_be_bytes([body[0], body[1], body[2], body[3]]),
            })
        }
        MSG_CLIENT_DONE => Ok(ClientFrame::Done),
        MSG_CLIENT_INFO => {
            need(8)?;
            let recid = u32::from_be_bytes([body[0], body[1], body[2], body[3]]);
            let key_len = body[4] as usize;
            let value_len = u16::from_be_bytes([body[6], body[7]]) as usize;
            need(8 + key_len + value_len)?;
            let key_bytes = &body[8..8 + key_len];
            let value_bytes = &body[8 + key_len..8 + key_len + value_len];
            Ok(ClientFrame::Info {
                recid,
                key: String::from_utf8_lossy(key_bytes).into_owned(),
                value: String::from_utf8_lossy(value_bytes).into_owned(),
            })
        }
        other => Ok(ClientFrame::Unknown { msgid: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_record_round_trips_fields() {
        let mut body = Vec::new();
        body.extend_from_slice(&7u32.to_be_bytes());
        body.push(ADD_SUBTYPE_NEW);
        body.push(2); // typeLen
        body.extend_from_slice(&1u16.to_be_bytes()); // nameLen
        body.extend_from_slice(b"ai");
        body.extend_from_slice(b"A");

        let frame = decode_client(MSG_CLIENT_ADD_RECORD, &body).unwrap();
        assert_eq!(
            frame,
            ClientFrame::AddRecord {
                recid: 7,
                record_type: "ai".into(),
                name: "A".into(),
                is_alias: false,
            }
        );
    }

    #[test]
    fn truncated_body_is_non_fatal() {
        let err = decode_client(MSG_CLIENT_PONG, &[0, 1]).unwrap_err();
        assert!(!err.is_fatal());
    }

    #[test]
    fn unknown_msgid_is_tolerated() {
        let frame = decode_client(0x00aa, &[1, 2, 3]).unwrap();
        assert_eq!(frame, ClientFrame::Unknown { msgid: 0x00aa });
    }

    #[test]
    fn trailing_bytes_beyond_fixed_prefix_are_ignored() {
        let mut body = 9u32.to_be_bytes().to_vec();
        body.extend_from_slice(&[0xff, 0xff, 0xff]); // garbage past the prefix
        let frame = decode_client(MSG_CLIENT_DEL_RECORD, &body).unwrap();
        assert_eq!(frame, ClientFrame::DelRecord { recid: 9 });
    }

    #[test]
    fn server_greet_encodes_one_byte_body() {
        let frame = ServerFrame::Greet { version: 3 };
        assert_eq!(frame.encode_body(), vec![3]);
        assert_eq!(frame.msgid(), MSG_SERVER_GREET);
    }
}
