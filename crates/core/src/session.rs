//! Session transaction batcher and per-session commit chain (§4.5).
//!
//! [`SessionBatcher`] is owned exclusively by the connection task that
//! decodes events off the wire; it has no internal locking. The commit
//! chain that feeds flushed transactions to the [`PipelineDispatcher`] runs
//! as a separate worker task so that dispatch latency never blocks reading
//! the next frame off the socket, while still committing each session's
//! transactions to the pipeline strictly in order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::pipeline::PipelineDispatcher;
use crate::transaction::{RecId, RecordAdd, SessionId, SourceAddress, Transaction};

/// Accumulates protocol events into one in-flight [`Transaction`] and
/// decides, event by event, whether it is safe to flush.
pub struct SessionBatcher {
    id: SessionId,
    source: SourceAddress,
    commit_interval: tokio::time::Duration,
    commit_size_limit: usize,
    current: Transaction,
    deadline: Option<Instant>,
}

impl SessionBatcher {
    /// A fresh batcher; the first transaction it ever flushes carries
    /// `initial = true`.
    #[must_use]
    pub fn new(
        id: SessionId,
        source: SourceAddress,
        commit_interval: tokio::time::Duration,
        commit_size_limit: usize,
    ) -> Self {
        Self {
            id,
            source,
            commit_interval,
            commit_size_limit,
            current: Transaction::new(id, source, true),
            deadline: None,
        }
    }

    fn mark_dirty(&mut self) {
        if self.deadline.is_none() {
            self.deadline = Some(Instant::now() + self.commit_interval);
        }
    }

    fn deadline_elapsed(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    fn size_limit_reached(&self) -> bool {
        self.commit_size_limit > 0 && self.current.dirty_count() >= self.commit_size_limit
    }

    /// Flush now if a safe boundary has been reached (deadline elapsed or
    /// size limit hit); otherwise leave the in-flight transaction as is.
    ///
    /// Must only be called immediately before incorporating an Add, Del or
    /// Done event — never between a record and its attached info/aliases.
    fn flush_if_due(&mut self) -> Option<Transaction> {
        if self.deadline_elapsed() || self.size_limit_reached() {
            Some(self.take_and_reset())
        } else {
            None
        }
    }

    fn take_and_reset(&mut self) -> Transaction {
        self.deadline = None;
        std::mem::replace(&mut self.current, Transaction::new(self.id, self.source, false))
    }

    /// `ClientInfo(recid=0)`: session-wide key/value.
    pub fn ioc_info(&mut self, key: String, value: String) {
        self.current.client_infos.insert(key, value);
        self.mark_dirty();
    }

    /// `ClientInfo(recid!=0)`: per-record metadata.
    pub fn rec_info(&mut self, recid: RecId, key: String, value: String) {
        self.current
            .record_infos
            .entry(recid)
            .or_default()
            .insert(key, value);
        self.mark_dirty();
    }

    /// `ClientAddRecord` with a record type: introduces or replaces a record.
    ///
    /// Returns a flushed transaction if the safe boundary check tripped
    /// before this event.
    pub fn add_record(
        &mut self,
        recid: RecId,
        record_type: String,
        name: String,
    ) -> Option<Transaction> {
        let flushed = self.flush_if_due();
        self.current.records_to_delete.remove(&recid);
        self.current
            .records_to_add
            .insert(recid, RecordAdd { name, record_type });
        self.mark_dirty();
        flushed
    }

    /// `ClientAddRecord` with `subtype = 1`: an alias of a record already
    /// introduced earlier in this (or a prior) transaction. Never triggers
    /// a flush, so it always lands with the record it decorates.
    pub fn add_alias(&mut self, recid: RecId, alias: String) {
        self.current.aliases.entry(recid).or_default().push(alias);
        self.mark_dirty();
    }

    /// `ClientDelRecord`: retracts a record.
    pub fn del_record(&mut self, recid: RecId) -> Option<Transaction> {
        let flushed = self.flush_if_due();
        self.current.records_to_add.remove(&recid);
        self.current.records_to_delete.insert(recid);
        self.mark_dirty();
        flushed
    }

    /// `ClientDone`: flush unconditionally, even if the in-flight
    /// transaction carries no records.
    pub fn done(&mut self) -> Transaction {
        self.take_and_reset()
    }

    /// Connection lost or closed: discard whatever was accumulated since
    /// the last flush and build the terminal `connected = false`
    /// transaction.
    #[must_use]
    pub fn close(&self) -> Transaction {
        Transaction::disconnect(self.id, self.source)
    }
}

/// Feeds one session's flushed transactions to the pipeline dispatcher in
/// order, decoupled from the connection task that produces them.
pub struct SessionCommitChain {
    tx: mpsc::UnboundedSender<Transaction>,
    failed: Arc<AtomicBool>,
}

impl SessionCommitChain {
    /// Spawn the worker task that drains transactions and dispatches them
    /// one at a time.
    #[must_use]
    pub fn spawn(session_id: SessionId, dispatcher: Arc<PipelineDispatcher>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Transaction>();
        let failed = Arc::new(AtomicBool::new(false));
        let failed_worker = failed.clone();

        tokio::spawn(async move {
            while let Some(transaction) = rx.recv().await {
                if failed_worker.load(Ordering::Acquire) {
                    // Commit chain is cancelled; drain without dispatching
                    // so the channel does not back up indefinitely.
                    continue;
                }
                match dispatcher.dispatch(Arc::new(transaction)).await {
                    Ok(()) => {}
                    Err(err) if err.is_cancelled() => {}
                    Err(err) => {
                        tracing::warn!(
                            ?session_id,
                            error = %err,
                            "commit failed, closing session"
                        );
                        failed_worker.store(true, Ordering::Release);
                    }
                }
            }
        });

        Self { tx, failed }
    }

    /// Enqueue the next transaction in this session's chain. Appending
    /// happens unconditionally; backpressure toward the pipeline is
    /// absorbed by the worker task, not by blocking the caller.
    pub fn submit(&self, transaction: Transaction) {
        let _ = self.tx.send(transaction);
    }

    /// True once a non-cancellation dispatch error has closed this chain;
    /// the connection driving it must close its socket.
    #[must_use]
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    fn addr() -> SourceAddress {
        SourceAddress {
            host: std::net::Ipv4Addr::new(127, 0, 0, 1),
            port: 1234,
        }
    }

    #[test]
    fn first_transaction_is_marked_initial() {
        let mut batcher = SessionBatcher::new(SessionId(1), addr(), StdDuration::from_secs(60), 0);
        let txn = batcher.done();
        assert!(txn.initial);
        assert!(txn.records_to_add.is_empty());
    }

    #[test]
    fn second_transaction_is_not_initial() {
        let mut batcher = SessionBatcher::new(SessionId(1), addr(), StdDuration::from_secs(60), 0);
        let _ = batcher.done();
        let second = batcher.done();
        assert!(!second.initial);
    }

    #[test]
    fn size_limit_splits_into_fixed_size_transactions() {
        let mut batcher = SessionBatcher::new(SessionId(1), addr(), StdDuration::from_secs(3600), 100);
        let mut flushed = Vec::new();
        for i in 0..1000u32 {
            if let Some(t) = batcher.add_record(i, "ai".into(), format!("rec{i}")) {
                flushed.push(t);
            }
        }
        flushed.push(batcher.done());

        assert!(flushed.len() >= 10);
        let mut seen = std::collections::HashSet::new();
        for (idx, t) in flushed.iter().enumerate() {
            if idx + 1 < flushed.len() {
                assert_eq!(t.records_to_add.len(), 100);
            }
            for recid in t.records_to_add.keys() {
                assert!(seen.insert(*recid), "record {recid} appeared twice");
            }
        }
        assert_eq!(seen.len(), 1000);
    }

    #[test]
    fn alias_never_triggers_a_flush() {
        let mut batcher = SessionBatcher::new(SessionId(1), addr(), StdDuration::from_secs(3600), 1);
        assert!(batcher.add_record(1, "ai".into(), "A".into()).is_none());
        // Size limit of 1 was already reached by the add above, but an
        // alias attaches to the same record and must not split it off
        // into a separate transaction.
        batcher.add_alias(1, "A_alias".into());
        let txn = batcher.done();
        assert_eq!(txn.records_to_add.len(), 1);
        assert_eq!(txn.aliases.get(&1).unwrap(), &vec!["A_alias".to_string()]);
    }

    #[test]
    fn close_discards_unflushed_work() {
        let mut batcher = SessionBatcher::new(SessionId(1), addr(), StdDuration::from_secs(3600), 0);
        let _ = batcher.add_record(1, "ai".into(), "A".into());
        let final_txn = batcher.close();
        assert!(!final_txn.connected);
        assert!(final_txn.records_to_add.is_empty());
    }
}
