//! Directory-processor data model (§3, §4.7).

use std::collections::HashMap;

/// A single named property on a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    /// Property name, drawn from the fixed or configured schema.
    pub name: String,
    /// Owning username; set to the processor's configured `username` for
    /// managed properties.
    pub owner: String,
    /// Property value.
    pub value: String,
}

/// A channel as represented in the remote directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirChannel {
    /// Channel name (a record name or an alias).
    pub name: String,
    /// Owning username of the channel entry itself.
    pub owner: String,
    /// All properties currently attached to the channel.
    pub properties: Vec<Property>,
}

impl DirChannel {
    /// Look up a property value by name.
    #[must_use]
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Property names this service overwrites on every commit; never merged
/// from an existing channel.
pub const MANAGED_PROPERTIES: &[&str] = &[
    "hostName",
    "iocName",
    "iocid",
    "iocIP",
    "pvStatus",
    "time",
    "recceiverID",
];

/// `pvStatus` values.
pub mod pv_status {
    /// Channel is backed by a currently-connected IOC.
    pub const ACTIVE: &str = "Active";
    /// Channel's IOC has disconnected and no prior owner remains.
    pub const INACTIVE: &str = "Inactive";
}

/// In-memory record of one IOC, keyed by `iocid` (`host:port`).
#[derive(Debug, Clone)]
pub struct IocInfo {
    /// `clientInfos.HOSTNAME`, or `host` if absent.
    pub hostname: String,
    /// `clientInfos.IOCNAME`, or `port` as a string if absent.
    pub ioc_name: String,
    /// The IOC's dotted-quad address.
    pub ioc_ip: String,
    /// `clientInfos.ENGINEER` / `CF_USERNAME`, or the processor's configured owner.
    pub owner: String,
    /// Timestamp of the last commit from this IOC, formatted per `timezone`.
    pub time: String,
    /// Number of channels currently attributed to this IOC; the entry is
    /// discarded when this reaches zero.
    pub channel_count: u64,
}

/// One record's material, derived from a transaction and collapsed by name.
#[derive(Debug, Clone, Default)]
pub struct RecordInfo {
    /// Record type, if `recordTypeEnabled`.
    pub record_type: Option<String>,
    /// Info-tag properties surviving the whitelist / env-var mapping.
    pub info: HashMap<String, String>,
    /// Alias names attached to this record.
    pub aliases: Vec<String>,
}
