//! Multiplexes the Link's single event stream into many outstanding
//! request/response waiters.
use crate::link::{Link, LinkEvent};
use packet_codec::DecodedMessage;
use shared::Filter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, thiserror::Error)]
pub enum CorrelatorError {
    #[error("timed out waiting for a matching message")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
}

struct Waiter {
    id: u64,
    filter: Filter,
    sender: Option<oneshot::Sender<DecodedMessage>>,
}

struct Shared {
    waiters: Mutex<Vec<Waiter>>,
}

pub struct Correlator {
    shared: Arc<Shared>,
    next_id: AtomicU64,
    heartbeats: broadcast::Sender<DecodedMessage>,
    task: JoinHandle<()>,
}

impl Correlator {
    /// Subscribes to the Link's event stream and begins dispatching.
    pub fn attach(link: &Link) -> Self {
        let mut events = link.subscribe();
        let shared = Arc::new(Shared {
            waiters: Mutex::new(Vec::new()),
        });
        let (heartbeats_tx, _) = broadcast::channel(64);

        let task_shared = shared.clone();
        let task_heartbeats = heartbeats_tx.clone();
        let task = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match event {
                    LinkEvent::Message(message) => {
                        Self::dispatch(&task_shared, &message).await;
                        if message.class == "HEARTBEAT" {
                            let _ = task_heartbeats.send(message);
                        }
                    }
                    LinkEvent::Closed => {
                        Self::cancel_all(&task_shared).await;
                        break;
                    }
                    LinkEvent::Error(_) => {}
                }
            }
        });

        Self {
            shared,
            next_id: AtomicU64::new(0),
            heartbeats: heartbeats_tx,
            task,
        }
    }

    /// All matching waiters are resolved, not just one — needed because a
    /// HEARTBEAT both populates the inventory and can satisfy a
    /// `waitForModules` gate. Iterates newest-first.
    async fn dispatch(shared: &Arc<Shared>, message: &DecodedMessage) {
        let mut guard = shared.waiters.lock().await;
        for waiter in guard.iter_mut().rev() {
            if waiter.filter.matches(message)
                && let Some(sender) = waiter.sender.take()
            {
                let _ = sender.send(message.clone());
            }
        }
        guard.retain(|w| w.sender.is_some());
    }

    async fn cancel_all(shared: &Arc<Shared>) {
        let mut guard = shared.waiters.lock().await;
        guard.clear();
    }

    /// Subscribes to HEARTBEAT messages, forked independently of any
    /// in-flight request waiter.
    pub fn subscribe_heartbeats(&self) -> broadcast::Receiver<DecodedMessage> {
        self.heartbeats.subscribe()
    }

    /// Registers a filtered waiter with an explicit deadline; resolves with
    /// the first message any future dispatch matches, or times out.
    /// Waiter lifetimes are strictly bounded by timeout or cancel.
    pub async fn wait_for(
        &self,
        filter: Filter,
        timeout_ms: u64,
    ) -> Result<DecodedMessage, CorrelatorError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        {
            let mut guard = self.shared.waiters.lock().await;
            guard.push(Waiter {
                id,
                filter,
                sender: Some(tx),
            });
        }

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await;

        // Always drop our own registration once we stop waiting, matched or
        // not — explicit timeout/cancel bound every waiter's lifetime.
        let mut guard = self.shared.waiters.lock().await;
        guard.retain(|w| w.id != id);
        drop(guard);

        match result {
            Ok(Ok(message)) => Ok(message),
            Ok(Err(_)) => Err(CorrelatorError::Cancelled),
            Err(_) => Err(CorrelatorError::Timeout),
        }
    }

    /// Cancels every outstanding waiter immediately.
    pub async fn cancel_all_waiters(&self) {
        Self::cancel_all(&self.shared).await;
    }

    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for Correlator {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packet_codec::Instruction;
    use std::collections::BTreeMap;

    fn heartbeat(sx: i8, sy: i8) -> DecodedMessage {
        let mut params = BTreeMap::new();
        params.insert("SX".to_string(), sx.to_string().into());
        params.insert("SY".to_string(), sy.to_string().into());
        DecodedMessage {
            sx,
            sy,
            class: "HEARTBEAT".to_string(),
            instruction: Instruction::Report,
            params,
        }
    }

    #[tokio::test]
    async fn dispatch_resolves_every_matching_waiter() {
        let shared = Arc::new(Shared {
            waiters: Mutex::new(Vec::new()),
        });
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        {
            let mut guard = shared.waiters.lock().await;
            guard.push(Waiter {
                id: 0,
                filter: Filter::new().class("HEARTBEAT"),
                sender: Some(tx_a),
            });
            guard.push(Waiter {
                id: 1,
                filter: Filter::new().class("HEARTBEAT").sx(0),
                sender: Some(tx_b),
            });
        }

        Correlator::dispatch(&shared, &heartbeat(0, 0)).await;

        assert!(rx_a.await.is_ok());
        assert!(rx_b.await.is_ok());
        assert!(shared.waiters.lock().await.is_empty());
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_pending_waiter_with_cancelled() {
        let shared = Arc::new(Shared {
            waiters: Mutex::new(Vec::new()),
        });
        let (tx_a, rx_a) = oneshot::channel();
        let (tx_b, rx_b) = oneshot::channel();
        {
            let mut guard = shared.waiters.lock().await;
            guard.push(Waiter {
                id: 0,
                filter: Filter::new().class("CONFIG"),
                sender: Some(tx_a),
            });
            guard.push(Waiter {
                id: 1,
                filter: Filter::new().class("PAGEACTIVE"),
                sender: Some(tx_b),
            });
        }

        Correlator::cancel_all(&shared).await;

        assert!(rx_a.await.is_err(), "dropped sender must surface as a terminal error");
        assert!(rx_b.await.is_err(), "dropped sender must surface as a terminal error");
        assert!(shared.waiters.lock().await.is_empty());
    }
}
