//! Directory processor configuration (§4.7, §6.2).

/// Options recognized under a directory-processor config section.
#[derive(Debug, Clone)]
pub struct DirectoryConfig {
    /// Publish an `alias` property and alias channels.
    pub alias_enabled: bool,
    /// Publish the record type as a property.
    pub record_type_enabled: bool,
    /// Publish a record description property, sourced from info tags.
    pub record_description_enabled: bool,
    /// Publish IOC connection-port information.
    pub ioc_connection_info: bool,
    /// `EPICS_NAME -> property name` mappings applied to each IOC's env info.
    pub environment_vars: Vec<(String, String)>,
    /// Info-tag keys copied onto channels as properties.
    pub info_tag_whitelist: Vec<String>,
    /// Run `clean()` at startup.
    pub clean_on_start: bool,
    /// Run `clean()` at stop.
    pub clean_on_stop: bool,
    /// Owner stamped on managed properties and newly created channels.
    pub username: String,
    /// Value written to the `recceiverID` property; also used to scope `clean()`.
    pub recceiver_id: String,
    /// Timezone name used to format the `time` property.
    pub timezone: String,
    /// Batch size for `set(channels=...)` calls.
    pub query_limit: usize,
    /// Character budget per `findByArgs` `~name` query (§4.7.C).
    pub find_size_limit: usize,
    /// Base URL of the directory service's HTTP API.
    pub base_url: String,
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            alias_enabled: true,
            record_type_enabled: true,
            record_description_enabled: false,
            ioc_connection_info: false,
            environment_vars: Vec::new(),
            info_tag_whitelist: Vec::new(),
            clean_on_start: false,
            clean_on_stop: false,
            username: "recceiver".to_string(),
            recceiver_id: "recceiver".to_string(),
            timezone: "UTC".to_string(),
            query_limit: 100,
            find_size_limit: 600,
            base_url: "http://localhost:8080/ChannelFinder".to_string(),
        }
    }
}

impl DirectoryConfig {
    /// The full required-property set for this configuration (§4.7 step 1).
    #[must_use]
    pub fn required_properties(&self) -> Vec<String> {
        let mut required: Vec<String> = super::types::MANAGED_PROPERTIES
            .iter()
            .map(|s| s.to_string())
            .collect();

        if self.alias_enabled {
            required.push("alias".to_string());
        }
        if self.record_type_enabled {
            required.push("recordType".to_string());
        }
        if self.record_description_enabled {
            required.push("recordDesc".to_string());
        }
        if self.ioc_connection_info {
            required.push("iocConnectionInfo".to_string());
        }
        for (_, prop) in &self.environment_vars {
            required.push(prop.clone());
        }
        required.extend(self.info_tag_whitelist.iter().cloned());

        required.sort();
        required.dedup();
        required
    }
}
