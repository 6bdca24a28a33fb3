//! Wire codec for the record-synchronization protocol.
//!
//! Every TCP message is an 8-byte big-endian header (`magic`, `msgid`,
//! `bodyLen`) followed by a fixed-layout body. The UDP announce frame is a
//! separate, self-contained 16-byte datagram. See [`header`], [`message`]
//! and [`announce`].

pub mod announce;
pub mod error;
pub mod header;
pub mod io;
pub mod message;

pub use announce::AnnounceFrame;
pub use error::WireError;
pub use header::{FrameHeader, MAGIC};
pub use io::{read_client_frame, write_server_frame};
pub use message::{ClientFrame, ServerFrame};

/// Largest body this codec will allocate for, in bytes.
///
/// The data model bounds string payloads to 65535 bytes; frames whose
/// declared `bodyLen` exceeds this are rejected before a buffer is
/// allocated, so a hostile or corrupt length prefix cannot be used to
/// exhaust memory.
pub const MAX_BODY_LEN: u32 = 65_535;
