//! Print processor: renders each transaction to the log (§2, "Print processor").

use std::sync::Arc;

use async_trait::async_trait;
use recsync_core::pipeline::Processor;
use recsync_core::transaction::Transaction;
use recsync_core::Result;

/// Logs every transaction it receives; never fails.
pub struct PrintProcessor {
    name: String,
}

impl PrintProcessor {
    /// `name` is the processor instance name from config (`plugname:instname`).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl Processor for PrintProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn commit(&self, transaction: Arc<Transaction>) -> Result<()> {
        let iocid = transaction
            .source_address
            .map(|a| a.iocid())
            .unwrap_or_default();

        tracing::info!(
            iocid,
            initial = transaction.initial,
            connected = transaction.connected,
            "transaction"
        );

        for (key, value) in &transaction.client_infos {
            tracing::info!(iocid, key, value, "iocinfo");
        }
        for (recid, add) in &transaction.records_to_add {
            tracing::info!(iocid, recid, name = add.name.as_str(), record_type = add.record_type.as_str(), "addRecord");
        }
        for (recid, names) in &transaction.aliases {
            for alias in names {
                tracing::info!(iocid, recid, alias = alias.as_str(), "addAlias");
            }
        }
        for (recid, infos) in &transaction.record_infos {
            for (key, value) in infos {
                tracing::info!(iocid, recid, key, value, "recInfo");
            }
        }
        for recid in &transaction.records_to_delete {
            tracing::info!(iocid, recid, "delRecord");
        }

        Ok(())
    }
}
