//! The `Transaction` data model (§3) and the opaque identifiers it is keyed by.

use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;

/// Opaque, client-assigned, session-scoped record identifier.
pub type RecId = u32;

/// The connected peer, and the canonical IOC identifier (`host:port`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceAddress {
    /// Peer IPv4 address.
    pub host: Ipv4Addr,
    /// Peer TCP port.
    pub port: u16,
}

impl SourceAddress {
    /// The `host:port` string used as the IOC identifier everywhere
    /// downstream (directory processor reconciliation keys on this).
    #[must_use]
    pub fn iocid(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl std::fmt::Display for SourceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Stable identity of a session, unique for the lifetime of the service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(pub u64);

/// A record's type and name, as carried by `recordsToAdd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAdd {
    /// Record name.
    pub name: String,
    /// Record type tag (empty string permitted).
    pub record_type: String,
}

/// The unit of commit handed to the processor pipeline. Immutable once
/// constructed; see §3 for the field-by-field invariants.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Transaction {
    /// Stable session identity.
    pub srcid: Option<SessionId>,
    /// The connected peer this transaction originated from.
    pub source_address: Option<SourceAddress>,
    /// True only for the first transaction of a session.
    pub initial: bool,
    /// False only for the synthetic final transaction on disconnect.
    pub connected: bool,
    /// Session-wide key/value pairs; latest write wins.
    pub client_infos: HashMap<String, String>,
    /// Records introduced or replaced in this transaction.
    pub records_to_add: HashMap<RecId, RecordAdd>,
    /// Records retracted in this transaction.
    pub records_to_delete: HashSet<RecId>,
    /// Additional names for a record, in the order received.
    pub aliases: HashMap<RecId, Vec<String>>,
    /// Per-record metadata.
    pub record_infos: HashMap<RecId, HashMap<String, String>>,
}

impl Transaction {
    /// A fresh transaction for the given session, with no records yet.
    #[must_use]
    pub fn new(srcid: SessionId, source_address: SourceAddress, initial: bool) -> Self {
        Self {
            srcid: Some(srcid),
            source_address: Some(source_address),
            initial,
            connected: true,
            ..Default::default()
        }
    }

    /// The synthetic terminal transaction emitted when a session closes.
    #[must_use]
    pub fn disconnect(srcid: SessionId, source_address: SourceAddress) -> Self {
        Self {
            srcid: Some(srcid),
            source_address: Some(source_address),
            initial: false,
            connected: false,
            ..Default::default()
        }
    }

    /// Number of add/delete events counted against `commitSizeLimit`.
    #[must_use]
    pub fn dirty_count(&self) -> usize {
        self.records_to_add.len() + self.records_to_delete.len()
    }

    /// True if this transaction carries no record-level work at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.client_infos.is_empty()
            && self.records_to_add.is_empty()
            && self.records_to_delete.is_empty()
            && self.aliases.is_empty()
            && self.record_infos.is_empty()
    }
}
