//! Reply correlation over the transport's event stream.
//!
//! One dispatcher task consumes the stream for the lifetime of the process.
//! Each in-flight request registers a one-shot waiter keyed by channel and
//! expected author. A matching event resolves every waiter whose key matches,
//! and waiters unregister themselves on timeout and on drop, so the table
//! never accumulates dead entries. Once the dispatcher is gone the table is
//! closed and every remaining wait resolves with an error.

use crate::conversation::ActivityLedger;
use crate::error::{Error, Result};
use crate::transport::EventStream;
use crate::{ChannelId, MessageEvent, UserId};

use futures::StreamExt as _;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

/// A waiter registered for one request.
struct PendingReply {
    channel_id: ChannelId,
    author_id: UserId,
    tx: oneshot::Sender<String>,
}

/// Waiter table shared between the dispatcher task and request futures.
#[derive(Default)]
struct DispatchTable {
    pending: Mutex<HashMap<u64, PendingReply>>,
    next_token: AtomicU64,
    closed: AtomicBool,
}

impl DispatchTable {
    fn register(&self, waiter: PendingReply) -> u64 {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut pending) = self.pending.lock() {
            // Checked under the lock so a concurrent close cannot miss this
            // entry. A waiter dropped here resolves its receiver at once.
            if !self.closed.load(Ordering::Relaxed) {
                pending.insert(token, waiter);
            }
        }
        token
    }

    fn close(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            self.closed.store(true, Ordering::Relaxed);
            pending.clear();
        }
    }

    fn remove(&self, token: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&token);
        }
    }

    /// Resolve every waiter matching this event's channel and author.
    fn dispatch(&self, event: &MessageEvent) {
        let matched: Vec<PendingReply> = {
            let Ok(mut pending) = self.pending.lock() else {
                return;
            };
            let tokens: Vec<u64> = pending
                .iter()
                .filter(|(_, w)| {
                    w.channel_id == event.channel_id && w.author_id == event.author_id
                })
                .map(|(token, _)| *token)
                .collect();
            tokens.iter().filter_map(|t| pending.remove(t)).collect()
        };

        if !matched.is_empty() {
            tracing::debug!(
                channel_id = event.channel_id,
                waiters = matched.len(),
                "reply matched pending requests"
            );
        }

        for waiter in matched {
            // The receiving request may have timed out or been dropped in the
            // meantime; there is nothing left to notify then.
            let _ = waiter.tx.send(event.content.clone());
        }
    }
}

/// Removes a waiter from the table when its awaiting future goes away.
struct Unregister {
    table: Arc<DispatchTable>,
    token: u64,
}

impl Drop for Unregister {
    fn drop(&mut self) {
        self.table.remove(self.token);
    }
}

/// A registered waiter. Must be registered before the message it answers is
/// sent, so a fast reply cannot slip past. Dropping the ticket unregisters it.
pub struct ReplyTicket {
    rx: oneshot::Receiver<String>,
    _guard: Unregister,
}

impl ReplyTicket {
    /// Wait for the reply. With `timeout` unset the wait is unbounded,
    /// mirroring a long-poll HTTP caller that holds the connection open.
    pub async fn wait(self, timeout: Option<Duration>) -> Result<String> {
        let ReplyTicket { rx, _guard } = self;

        let reply = match timeout {
            Some(limit) => tokio::time::timeout(limit, rx)
                .await
                .map_err(|_| Error::ReplyTimeout)?,
            None => rx.await,
        };

        reply.map_err(|_| Error::Other(anyhow::anyhow!("reply dispatcher stopped")))
    }
}

/// Correlates inbound messages with requests waiting on them.
#[derive(Default)]
pub struct ReplyCorrelator {
    table: Arc<DispatchTable>,
}

impl ReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn the dispatcher task over the transport's event stream.
    ///
    /// Call once. Every observed event also marks its channel active in the
    /// ledger, which is what the least-recently-used eviction policy ranks by.
    pub fn run(
        &self,
        mut events: EventStream,
        ledger: Arc<ActivityLedger>,
    ) -> tokio::task::JoinHandle<()> {
        let table = self.table.clone();
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                ledger.touch(event.channel_id);
                table.dispatch(&event);
            }
            tracing::debug!("event stream ended, reply dispatcher stopping");
            table.close();
        })
    }

    /// Register a waiter for the next message in `channel_id` authored by
    /// `author_id`.
    pub fn register(&self, channel_id: ChannelId, author_id: UserId) -> ReplyTicket {
        let (tx, rx) = oneshot::channel();
        let token = self.table.register(PendingReply {
            channel_id,
            author_id,
            tx,
        });
        ReplyTicket {
            rx,
            _guard: Unregister {
                table: self.table.clone(),
                token,
            },
        }
    }

    /// Register and wait in one step.
    pub async fn await_reply(
        &self,
        channel_id: ChannelId,
        author_id: UserId,
        timeout: Option<Duration>,
    ) -> Result<String> {
        self.register(channel_id, author_id).wait(timeout).await
    }

    /// Refuse new registrations and drop every pending one; their waits
    /// resolve with an error. Shutdown calls this after stopping the
    /// dispatcher so no request stays parked on a reply that cannot come.
    pub fn close(&self) {
        self.table.close();
    }

    /// Number of registered waiters. Exposed for tests and debugging.
    pub fn pending_count(&self) -> usize {
        self.table.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}
