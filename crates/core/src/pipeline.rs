//! Processor pipeline dispatcher (§4.6).
//!
//! Fans a transaction out to every registered processor concurrently,
//! waits for all of them (`consumeErrors = true`), removes any processor
//! that fails with something other than [`ServiceError::Cancelled`], and
//! reports the first such error upward.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{Result, ServiceError};
use crate::transaction::Transaction;

/// A downstream consumer of transactions.
///
/// Per session, `commit` calls arrive strictly in the order the session
/// produced them; across processors, commits for the same transaction run
/// concurrently; across sessions, calls may interleave in any order.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Name this processor was registered under; used for logging and for
    /// removing it from the pipeline on failure.
    fn name(&self) -> &str;

    /// Called once before the pipeline accepts any transactions.
    async fn start(&self) -> Result<()> {
        Ok(())
    }

    /// Called once at shutdown; may block on in-flight work.
    async fn stop(&self) {}

    /// Commit one transaction. Returning an error other than
    /// [`ServiceError::Cancelled`] removes this processor from the
    /// pipeline.
    async fn commit(&self, transaction: Arc<Transaction>) -> Result<()>;
}

/// Owns the live set of processors and dispatches transactions to them.
pub struct PipelineDispatcher {
    processors: Mutex<Vec<Arc<dyn Processor>>>,
}

impl PipelineDispatcher {
    /// Build a dispatcher from an ordered processor registry. Order only
    /// matters for logging; dispatch itself is concurrent.
    #[must_use]
    pub fn new(processors: Vec<Arc<dyn Processor>>) -> Self {
        Self {
            processors: Mutex::new(processors),
        }
    }

    /// Start every registered processor. Aborts on the first failure.
    pub async fn start_all(&self) -> Result<()> {
        let snapshot = self.snapshot();
        for processor in snapshot {
            processor.start().await?;
        }
        Ok(())
    }

    /// Stop every registered processor, waiting for each in turn.
    pub async fn stop_all(&self) {
        let snapshot = self.snapshot();
        for processor in snapshot {
            processor.stop().await;
        }
    }

    /// Names of the processors still in the pipeline, in registration order.
    #[must_use]
    pub fn processor_names(&self) -> Vec<String> {
        self.snapshot().iter().map(|p| p.name().to_string()).collect()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Processor>> {
        self.processors.lock().unwrap().clone()
    }

    fn remove(&self, name: &str) {
        self.processors.lock().unwrap().retain(|p| p.name() != name);
    }

    /// Dispatch one transaction to every live processor concurrently.
    pub async fn dispatch(&self, transaction: Arc<Transaction>) -> Result<()> {
        let snapshot = self.snapshot();
        let mut tasks = tokio::task::JoinSet::new();
        for processor in snapshot {
            let t = transaction.clone();
            tasks.spawn(async move {
                let result = processor.commit(t).await;
                (processor, result)
            });
        }

        let mut first_error: Option<ServiceError> = None;
        while let Some(joined) = tasks.join_next().await {
            let (processor, result) = joined.expect("processor commit task panicked");
            match result {
                Ok(()) => {}
                Err(err) if err.is_cancelled() => {
                    tracing::debug!(processor = processor.name(), "commit cancelled");
                }
                Err(err) => {
                    tracing::warn!(
                        processor = processor.name(),
                        error = %err,
                        "processor failed, removing from pipeline"
                    );
                    self.remove(processor.name());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::SessionId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        name: String,
        calls: AtomicUsize,
        fail_after: Option<usize>,
    }

    #[async_trait]
    impl Processor for CountingProcessor {
        fn name(&self) -> &str {
            &self.name
        }

        async fn commit(&self, _transaction: Arc<Transaction>) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_after == Some(n) {
                return Err(ServiceError::Protocol("boom".into()));
            }
            Ok(())
        }
    }

    fn txn() -> Arc<Transaction> {
        Arc::new(Transaction::new(
            SessionId(1),
            crate::transaction::SourceAddress {
                host: std::net::Ipv4Addr::LOCALHOST,
                port: 1,
            },
            true,
        ))
    }

    #[tokio::test]
    async fn dispatches_to_all_processors_and_returns_ok() {
        let a = Arc::new(CountingProcessor {
            name: "a".into(),
            calls: AtomicUsize::new(0),
            fail_after: None,
        });
        let b = Arc::new(CountingProcessor {
            name: "b".into(),
            calls: AtomicUsize::new(0),
            fail_after: None,
        });
        let dispatcher = PipelineDispatcher::new(vec![a.clone(), b.clone()]);
        dispatcher.dispatch(txn()).await.unwrap();
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failing_processor_is_removed_but_others_still_run() {
        let bad = Arc::new(CountingProcessor {
            name: "bad".into(),
            calls: AtomicUsize::new(0),
            fail_after: Some(1),
        });
        let good = Arc::new(CountingProcessor {
            name: "good".into(),
            calls: AtomicUsize::new(0),
            fail_after: None,
        });
        let dispatcher = PipelineDispatcher::new(vec![bad, good]);

        let err = dispatcher.dispatch(txn()).await.unwrap_err();
        assert!(!err.is_cancelled());
        assert_eq!(dispatcher.processor_names(), vec!["good".to_string()]);

        dispatcher.dispatch(txn()).await.unwrap();
        assert_eq!(dispatcher.processor_names(), vec!["good".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_processor_is_not_removed() {
        struct AlwaysCancelled;
        #[async_trait]
        impl Processor for AlwaysCancelled {
            fn name(&self) -> &str {
                "cancelled"
            }
            async fn commit(&self, _transaction: Arc<Transaction>) -> Result<()> {
                Err(ServiceError::Cancelled)
            }
        }
        let dispatcher = PipelineDispatcher::new(vec![Arc::new(AlwaysCancelled)]);
        let err = dispatcher.dispatch(txn()).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(dispatcher.processor_names(), vec!["cancelled".to_string()]);
    }
}
