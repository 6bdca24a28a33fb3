//! The stateful directory reconciler (§4.7).
//!
//! Maps the stream of transactions from every connected IOC onto a remote
//! directory of channels keyed by record name, tracking IOC migrations,
//! orphans and aliases via an in-memory ownership stack.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use recsync_core::pipeline::Processor;
use recsync_core::transaction::{RecId, Transaction};
use recsync_core::{Result as CoreResult, ServiceError};

use super::backoff::Backoff;
use super::client::DirectoryClient;
use super::config::DirectoryConfig;
use super::types::{pv_status, DirChannel, IocInfo, Property, RecordInfo, MANAGED_PROPERTIES};

/// Per-IOC bookkeeping the reconciler needs beyond what a single
/// transaction carries: the live `RecID -> channel name` mapping, so a
/// later `DelRecord` (by RecID) can be resolved to a channel name.
#[derive(Debug, Clone)]
struct TrackedIoc {
    info: IocInfo,
    record_names: HashMap<RecId, String>,
}

#[derive(Default)]
struct ReconcilerState {
    iocs: HashMap<String, TrackedIoc>,
    /// `channelOwners`: ordered stack of iocids that have published a
    /// channel name; the tail is the current owner.
    channel_owners: HashMap<String, Vec<String>>,
}

/// Stateful reconciler between the record stream and the remote directory.
pub struct DirectoryProcessor {
    name: String,
    config: DirectoryConfig,
    client: Arc<dyn DirectoryClient>,
    state: tokio::sync::Mutex<ReconcilerState>,
    cancelled: Arc<AtomicBool>,
}

impl DirectoryProcessor {
    /// Build a processor; `name` is its `plugname:instname` registration name.
    #[must_use]
    pub fn new(name: impl Into<String>, config: DirectoryConfig, client: Arc<dyn DirectoryClient>) -> Self {
        Self {
            name: name.into(),
            config,
            client,
            state: tokio::sync::Mutex::new(ReconcilerState::default()),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Mark the current (or next) commit as cancelled; checked between the
    /// major phases of `_updateDirectory`.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn check_cancelled(&self) -> CoreResult<()> {
        if self.cancelled.load(Ordering::Acquire) {
            Err(ServiceError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn now_string(&self) -> String {
        let tz: chrono_tz::Tz = self.config.timezone.parse().unwrap_or(chrono_tz::UTC);
        chrono::Utc::now().with_timezone(&tz).to_rfc3339()
    }

    /// Repeatedly query for and deactivate every channel this `recceiverId`
    /// still marks `Active`. Retried with backoff, but bounded unlike
    /// [`Self::poll`]: giving up here only means a future commit will
    /// still refresh the channels it owns.
    async fn clean(&self) -> CoreResult<()> {
        const RETRY_LIMIT: u32 = 5;
        let mut backoff = Backoff::default();
        let mut attempts = 0u32;

        loop {
            match self.clean_once().await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    attempts += 1;
                    if attempts >= RETRY_LIMIT {
                        return Err(ServiceError::Config(format!(
                            "directory clean() gave up after {attempts} attempts: {err}"
                        )));
                    }
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                Err(err) => return Err(ServiceError::Config(err.to_string())),
            }
        }
    }

    async fn clean_once(&self) -> Result<(), super::client::DirectoryError> {
        loop {
            let args = vec![
                ("pvStatus".to_string(), pv_status::ACTIVE.to_string()),
                ("recceiverID".to_string(), self.config.recceiver_id.clone()),
                ("~size".to_string(), self.config.find_size_limit.to_string()),
            ];
            let channels = self.client.find_by_args(&args).await?;
            if channels.is_empty() {
                return Ok(());
            }
            let names: Vec<String> = channels.iter().map(|c| c.name.clone()).collect();
            let under_limit = names.len() < self.config.find_size_limit;
            self.client
                .update_property(
                    Property {
                        name: "pvStatus".to_string(),
                        owner: self.config.username.clone(),
                        value: pv_status::INACTIVE.to_string(),
                    },
                    &names,
                )
                .await?;
            if under_limit {
                return Ok(());
            }
        }
    }

    /// Retry `_updateDirectory` with backoff until it succeeds; unlike
    /// [`Self::clean`], this has no retry limit (a commit must eventually
    /// land or be cancelled).
    async fn poll(&self, transaction: &Transaction, state: &mut ReconcilerState) -> CoreResult<()> {
        let mut backoff = Backoff::default();
        loop {
            self.check_cancelled()?;
            match self.update_directory(transaction, state).await {
                Ok(()) => return Ok(()),
                Err(err) if err.is_retryable() => {
                    tracing::warn!(error = %err, "directory commit failed, retrying");
                    tokio::time::sleep(backoff.next_delay()).await;
                }
                Err(err) => return Err(ServiceError::Config(err.to_string())),
            }
        }
    }

    fn ioc_context(&self, transaction: &Transaction) -> (String, String, String, String, String) {
        let source = transaction.source_address.expect("directory processor requires a source address");
        let iocid = source.iocid();
        let hostname = transaction
            .client_infos
            .get("HOSTNAME")
            .cloned()
            .unwrap_or_else(|| source.host.to_string());
        let ioc_name = transaction
            .client_infos
            .get("IOCNAME")
            .cloned()
            .unwrap_or_else(|| source.port.to_string());
        let owner = transaction
            .client_infos
            .get("ENGINEER")
            .or_else(|| transaction.client_infos.get("CF_USERNAME"))
            .cloned()
            .unwrap_or_else(|| self.config.username.clone());
        (iocid, hostname, ioc_name, owner, source.host.to_string())
    }

    fn materialize_records(&self, transaction: &Transaction) -> HashMap<String, RecordInfo> {
        let mut by_name: HashMap<String, RecordInfo> = HashMap::new();
        for (recid, add) in &transaction.records_to_add {
            if by_name.contains_key(&add.name) {
                tracing::warn!(name = %add.name, "duplicate record name in transaction, keeping first");
                continue;
            }
            let mut record = RecordInfo::default();
            if self.config.record_type_enabled {
                record.record_type = Some(add.record_type.clone());
            }
            if let Some(tags) = transaction.record_infos.get(recid) {
                for key in &self.config.info_tag_whitelist {
                    if let Some(value) = tags.get(key) {
                        record.info.insert(key.clone(), value.clone());
                    }
                }
            }
            if let Some(aliases) = transaction.aliases.get(recid) {
                record.aliases = aliases.clone();
            }
            by_name.insert(add.name.clone(), record);
        }
        by_name
    }

    fn env_properties(&self, transaction: &Transaction) -> Vec<Property> {
        self.config
            .environment_vars
            .iter()
            .filter_map(|(env_name, prop_name)| {
                transaction.client_infos.get(env_name).map(|value| Property {
                    name: prop_name.clone(),
                    owner: self.config.username.clone(),
                    value: value.clone(),
                })
            })
            .collect()
    }

    fn standard_properties(&self, iocid: &str, info: &IocInfo, status: &str, now: &str) -> Vec<Property> {
        let owner = self.config.username.clone();
        vec![
            Property { name: "hostName".into(), owner: owner.clone(), value: info.hostname.clone() },
            Property { name: "iocName".into(), owner: owner.clone(), value: info.ioc_name.clone() },
            Property { name: "iocid".into(), owner: owner.clone(), value: iocid.to_string() },
            Property { name: "iocIP".into(), owner: owner.clone(), value: info.ioc_ip.clone() },
            Property { name: "pvStatus".into(), owner: owner.clone(), value: status.to_string() },
            Property { name: "time".into(), owner: owner.clone(), value: now.to_string() },
            Property { name: "recceiverID".into(), owner, value: self.config.recceiver_id.clone() },
        ]
    }

    /// §4.7 property merge rule: `N ∪ { e in E : e.name not in names(N),
    /// e.name not managed }`.
    fn merge_onto(new_props: Vec<Property>, existing: Option<&DirChannel>) -> Vec<Property> {
        let mut merged = new_props;
        if let Some(existing) = existing {
            let carried_names: HashSet<String> = merged.iter().map(|p| p.name.clone()).collect();
            for prop in &existing.properties {
                if !carried_names.contains(prop.name.as_str())
                    && !MANAGED_PROPERTIES.contains(&prop.name.as_str())
                {
                    merged.push(prop.clone());
                }
            }
        }
        merged
    }

    /// Apply §4.7 step B/C's channel-level disposition and return the
    /// channel plus, if aliased, its alias channels, all ready to `set`.
    fn dispose_channel(
        &self,
        name: &str,
        status: &str,
        now: &str,
        source_iocid: &str,
        state: &mut ReconcilerState,
        existing: Option<&DirChannel>,
    ) -> Vec<DirChannel> {
        let mut out = Vec::new();

        if let Some(stack) = state.channel_owners.get_mut(name) {
            stack.retain(|id| id != source_iocid);
            let new_owner = stack.last().cloned();
            if stack.is_empty() {
                state.channel_owners.remove(name);
            }

            if let Some(owner_iocid) = new_owner {
                if let Some(owner) = state.iocs.get(&owner_iocid) {
                    let props = self.standard_properties(&owner_iocid, &owner.info, pv_status::ACTIVE, now);
                    out.push(DirChannel {
                        name: name.to_string(),
                        owner: self.config.username.clone(),
                        properties: Self::merge_onto(props, existing),
                    });
                    return out;
                }
            }
        }

        // No prior owner left: orphan the channel.
        let props = vec![
            Property { name: "pvStatus".into(), owner: self.config.username.clone(), value: status.to_string() },
            Property { name: "time".into(), owner: self.config.username.clone(), value: now.to_string() },
        ];
        out.push(DirChannel {
            name: name.to_string(),
            owner: existing.map(|c| c.owner.clone()).unwrap_or_else(|| self.config.username.clone()),
            properties: Self::merge_onto(props, existing),
        });
        out
    }

    /// `_updateDirectory`: the reconciliation algorithm proper.
    async fn update_directory(
        &self,
        transaction: &Transaction,
        state: &mut ReconcilerState,
    ) -> Result<(), super::client::DirectoryError> {
        let (iocid, hostname, ioc_name, owner, ioc_ip) = self.ioc_context(transaction);
        let now = self.now_string();

        // Step 3: update in-memory IocInfo / record-name tracking.
        let tracked = state.iocs.entry(iocid.clone()).or_insert_with(|| TrackedIoc {
            info: IocInfo {
                hostname: hostname.clone(),
                ioc_name: ioc_name.clone(),
                ioc_ip: ioc_ip.clone(),
                owner: owner.clone(),
                time: now.clone(),
                channel_count: 0,
            },
            record_names: HashMap::new(),
        });
        tracked.info.hostname = hostname;
        tracked.info.ioc_name = ioc_name;
        tracked.info.ioc_ip = ioc_ip;
        tracked.info.owner = owner;
        tracked.info.time = now.clone();

        let mut new_records = self.materialize_records(transaction);
        for (recid, add) in &transaction.records_to_add {
            tracked.record_names.insert(*recid, add.name.clone());
        }

        let mut deleted_names: HashSet<String> = HashSet::new();
        for recid in &transaction.records_to_delete {
            if let Some(name) = tracked.record_names.remove(recid) {
                deleted_names.insert(name);
            }
        }
        if !transaction.connected {
            deleted_names.extend(tracked.record_names.drain().map(|(_, name)| name));
        }

        for name in new_records.keys() {
            let stack = state.channel_owners.entry(name.clone()).or_default();
            if stack.last().map(|id| id != &iocid).unwrap_or(true) {
                stack.push(iocid.clone());
            }
        }

        self.check_cancelled().map_err(|_| super::client::DirectoryError::Permanent("cancelled".into()))?;

        // Step A: everything the directory currently attributes to this IOC.
        let old_channels = self
            .client
            .find_by_args(&[
                ("iocid".to_string(), iocid.clone()),
                ("~size".to_string(), self.config.find_size_limit.to_string()),
            ])
            .await?;

        let mut to_write: Vec<DirChannel> = Vec::new();

        // Step B.
        for channel in &old_channels {
            if new_records.is_empty() || deleted_names.contains(&channel.name) {
                to_write.extend(self.dispose_channel(
                    &channel.name,
                    pv_status::INACTIVE,
                    &now,
                    &iocid,
                    state,
                    Some(channel),
                ));
            } else if new_records.contains_key(&channel.name) {
                let props = self.standard_properties(&iocid, &state.iocs[&iocid].info, pv_status::ACTIVE, &now);
                to_write.push(DirChannel {
                    name: channel.name.clone(),
                    owner: channel.owner.clone(),
                    properties: Self::merge_onto(props, Some(channel)),
                });
                new_records.remove(&channel.name);
            }
        }

        self.check_cancelled().map_err(|_| super::client::DirectoryError::Permanent("cancelled".into()))?;

        // Step C: remaining new names, batched lookups within the query budget.
        let remaining: Vec<String> = new_records.keys().cloned().collect();
        let env_props = self.env_properties(transaction);
        for batch in chunk_by_budget(&remaining, self.config.find_size_limit) {
            let lookup = format!("~name={}", batch.join("|"));
            let existing = self
                .client
                .find_by_args(&[("~name".to_string(), lookup), ("~size".to_string(), batch.len().to_string())])
                .await?;
            let existing_by_name: HashMap<&str, &DirChannel> =
                existing.iter().map(|c| (c.name.as_str(), c)).collect();

            for name in &batch {
                let record = &new_records[name];
                let mut props = self.standard_properties(&iocid, &state.iocs[&iocid].info, pv_status::ACTIVE, &now);
                props.extend(env_props.clone());
                if let Some(record_type) = &record.record_type {
                    props.push(Property {
                        name: "recordType".into(),
                        owner: self.config.username.clone(),
                        value: record_type.clone(),
                    });
                }
                for (key, value) in &record.info {
                    props.push(Property {
                        name: key.clone(),
                        owner: self.config.username.clone(),
                        value: value.clone(),
                    });
                }

                let existing_channel = existing_by_name.get(name.as_str()).copied();
                to_write.push(DirChannel {
                    name: name.clone(),
                    owner: existing_channel.map(|c| c.owner.clone()).unwrap_or_else(|| self.config.username.clone()),
                    properties: Self::merge_onto(props.clone(), existing_channel),
                });

                if self.config.alias_enabled && !record.aliases.is_empty() {
                    for alias in &record.aliases {
                        let mut alias_props = props.clone();
                        alias_props.push(Property {
                            name: "alias".into(),
                            owner: self.config.username.clone(),
                            value: name.clone(),
                        });
                        let existing_alias = existing_by_name.get(alias.as_str()).copied();
                        to_write.push(DirChannel {
                            name: alias.clone(),
                            owner: existing_alias.map(|c| c.owner.clone()).unwrap_or_else(|| self.config.username.clone()),
                            properties: Self::merge_onto(alias_props, existing_alias),
                        });
                        let stack = state.channel_owners.entry(alias.clone()).or_default();
                        if stack.last().map(|id| id != &iocid).unwrap_or(true) {
                            stack.push(iocid.clone());
                        }
                    }
                }
            }
        }

        self.check_cancelled().map_err(|_| super::client::DirectoryError::Permanent("cancelled".into()))?;

        // Step D: write everything back in query_limit-sized chunks.
        for chunk in to_write.chunks(self.config.query_limit.max(1)) {
            self.client.set_channels(chunk.to_vec()).await?;
        }

        if let Some(tracked) = state.iocs.get_mut(&iocid) {
            tracked.info.channel_count = tracked.record_names.len() as u64;
            if !transaction.connected && tracked.record_names.is_empty() {
                state.iocs.remove(&iocid);
            }
        }

        Ok(())
    }
}

/// Group `names` into batches whose `|`-joined length stays within `budget`
/// characters (§4.7 step C).
fn chunk_by_budget(names: &[String], budget: usize) -> Vec<Vec<String>> {
    let mut batches = Vec::new();
    let mut current = Vec::new();
    let mut current_len = 0usize;

    for name in names {
        let added_len = if current.is_empty() { name.len() } else { name.len() + 1 };
        if !current.is_empty() && current_len + added_len > budget {
            batches.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current_len += if current.is_empty() { name.len() } else { name.len() + 1 };
        current.push(name.clone());
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_by_budget_respects_the_character_budget() {
        let names: Vec<String> = vec!["aaaa".into(), "bbbb".into(), "cccc".into()];
        let batches = chunk_by_budget(&names, 9);
        // "aaaa|bbbb" is 9 chars, "cccc" alone is its own batch.
        assert_eq!(batches, vec![vec!["aaaa".to_string(), "bbbb".to_string()], vec!["cccc".to_string()]]);
    }

    #[test]
    fn chunk_by_budget_never_drops_a_name_even_if_it_exceeds_the_budget_alone() {
        let names: Vec<String> = vec!["a-very-long-channel-name-that-alone-exceeds-the-budget".into()];
        let batches = chunk_by_budget(&names, 4);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0], names);
    }

    #[test]
    fn merge_onto_keeps_unmanaged_existing_properties_and_drops_managed_ones() {
        let existing = DirChannel {
            name: "chan".into(),
            owner: "someone".into(),
            properties: vec![
                Property { name: "pvStatus".into(), owner: "someone".into(), value: "Inactive".into() },
                Property { name: "description".into(), owner: "someone".into(), value: "kept".into() },
            ],
        };
        let fresh = vec![Property { name: "pvStatus".into(), owner: "recceiver".into(), value: "Active".into() }];

        let merged = DirectoryProcessor::merge_onto(fresh, Some(&existing));

        assert_eq!(merged.len(), 2);
        assert!(merged.iter().any(|p| p.name == "pvStatus" && p.value == "Active"));
        assert!(merged.iter().any(|p| p.name == "description" && p.value == "kept"));
    }

    #[test]
    fn merge_onto_with_no_existing_channel_returns_fresh_properties_unchanged() {
        let fresh = vec![Property { name: "pvStatus".into(), owner: "recceiver".into(), value: "Active".into() }];
        let merged = DirectoryProcessor::merge_onto(fresh.clone(), None);
        assert_eq!(merged, fresh);
    }

    #[test]
    fn merge_onto_keeps_an_existing_alias_property_since_it_is_unmanaged() {
        let existing = DirChannel {
            name: "chan-alias".into(),
            owner: "someone".into(),
            properties: vec![
                Property { name: "pvStatus".into(), owner: "someone".into(), value: "Active".into() },
                Property { name: "alias".into(), owner: "someone".into(), value: "chan".into() },
            ],
        };
        let fresh = vec![Property { name: "pvStatus".into(), owner: "recceiver".into(), value: "Inactive".into() }];

        let merged = DirectoryProcessor::merge_onto(fresh, Some(&existing));

        assert!(merged.iter().any(|p| p.name == "alias" && p.value == "chan"));
    }
}

#[async_trait]
impl Processor for DirectoryProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn start(&self) -> CoreResult<()> {
        let existing: HashSet<String> = self
            .client
            .get_all_properties()
            .await
            .map_err(|e| ServiceError::Config(e.to_string()))?
            .into_iter()
            .collect();

        for required in self.config.required_properties() {
            if !existing.contains(&required) {
                self.client
                    .set_property(&required, &self.config.username)
                    .await
                    .map_err(|e| ServiceError::Config(e.to_string()))?;
            }
        }

        if self.config.clean_on_start {
            self.clean().await?;
        }

        Ok(())
    }

    async fn stop(&self) {
        if self.config.clean_on_stop {
            if let Err(err) = self.clean().await {
                tracing::warn!(error = %err, "clean() on stop failed");
            }
        }
    }

    async fn commit(&self, transaction: Arc<Transaction>) -> CoreResult<()> {
        let mut state = self.state.lock().await;
        self.poll(&transaction, &mut state).await
    }
}
