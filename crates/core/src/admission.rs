//! Connection admission control (§4.3).
//!
//! Bounds the number of concurrently *active* uploads. Connections beyond
//! `maxActive` are queued; the admission controller never rejects, it only
//! delays. Promotion is FIFO, and a queued connection that disconnects
//! before promotion is dropped from the queue the next time a slot frees
//! rather than tracked eagerly.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::oneshot;

struct AdmissionState {
    active: usize,
    max_active: usize,
    queue: VecDeque<oneshot::Sender<()>>,
}

/// Caps concurrent active connections; the rest wait in FIFO order.
pub struct AdmissionController {
    state: Mutex<AdmissionState>,
}

impl AdmissionController {
    /// `max_active` must be at least 1; a value of 0 would admit nothing.
    #[must_use]
    pub fn new(max_active: usize) -> Self {
        Self {
            state: Mutex::new(AdmissionState {
                active: 0,
                max_active: max_active.max(1),
                queue: VecDeque::new(),
            }),
        }
    }

    /// Number of connections holding an active slot.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.state.lock().unwrap().active
    }

    /// Number of connections waiting for a slot.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.state.lock().unwrap().queue.len()
    }

    /// Request a slot. Resolves immediately if one is free, otherwise
    /// resolves once this connection is promoted off the queue.
    pub async fn admit(self: &std::sync::Arc<Self>) -> AdmissionTicket {
        let rx = {
            let mut state = self.state.lock().unwrap();
            if state.active < state.max_active {
                state.active += 1;
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.queue.push_back(tx);
                Some(rx)
            }
        };

        if let Some(rx) = rx {
            // The sender side is only ever dropped by `release` replacing
            // it with a send, so a recv error here cannot happen in
            // practice; treat it the same as a successful promotion.
            let _ = rx.await;
        }

        AdmissionTicket {
            controller: self.clone(),
        }
    }

    /// Release a slot, promoting the oldest live queued waiter if any.
    fn release(&self) {
        let mut state = self.state.lock().unwrap();
        while let Some(tx) = state.queue.pop_front() {
            if tx.send(()).is_ok() {
                // Ownership of the slot transfers to the promoted waiter;
                // `active` does not change.
                return;
            }
            // The waiting connection was lost before promotion; drop it
            // silently and try the next one.
        }
        state.active -= 1;
    }
}

/// Proof of an admitted slot. Dropping it frees the slot.
pub struct AdmissionTicket {
    controller: std::sync::Arc<AdmissionController>,
}

impl Drop for AdmissionTicket {
    fn drop(&mut self) {
        self.controller.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn admits_up_to_max_then_queues() {
        let ctrl = Arc::new(AdmissionController::new(1));
        let first = ctrl.admit().await;
        assert_eq!(ctrl.active_count(), 1);

        let ctrl2 = ctrl.clone();
        let waiting = tokio::spawn(async move { ctrl2.admit().await });
        tokio::task::yield_now().await;
        assert_eq!(ctrl.queued_count(), 1);

        drop(first);
        let second = waiting.await.unwrap();
        assert_eq!(ctrl.active_count(), 1);
        assert_eq!(ctrl.queued_count(), 0);
        drop(second);
        assert_eq!(ctrl.active_count(), 0);
    }

    #[tokio::test]
    async fn lost_waiter_is_skipped_on_release() {
        let ctrl = Arc::new(AdmissionController::new(1));
        let first = ctrl.admit().await;

        let ctrl2 = ctrl.clone();
        let lost = tokio::spawn(async move { ctrl2.admit().await });
        tokio::task::yield_now().await;
        lost.abort();
        let _ = lost.await;

        let ctrl3 = ctrl.clone();
        let next = tokio::spawn(async move { ctrl3.admit().await });
        tokio::task::yield_now().await;
        drop(first);
        let ticket = next.await.unwrap();
        assert_eq!(ctrl.active_count(), 1);
        drop(ticket);
    }
}
