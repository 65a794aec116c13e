//! In-memory transport double for unit tests.

use crate::error::{Error, Result};
use crate::transport::traits::{ChatTransport, EventStream};
use crate::{ChannelInfo, ConnectionState, MessageEvent};

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};

/// Scriptable transport backed by plain collections.
pub(crate) struct ScriptedTransport {
    state_tx: watch::Sender<ConnectionState>,
    channels: Mutex<Vec<ChannelInfo>>,
    next_channel_id: AtomicU64,
    create_calls: AtomicU64,
    sent: Mutex<Vec<(u64, String)>>,
    fail_delete_ids: Mutex<Vec<u64>>,
    /// When set, every send is answered with an event from this author.
    auto_reply: Mutex<Option<(u64, String)>>,
    event_tx: mpsc::Sender<MessageEvent>,
    event_rx: Mutex<Option<mpsc::Receiver<MessageEvent>>>,
}

impl ScriptedTransport {
    pub(crate) fn new() -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Ready);
        let (event_tx, event_rx) = mpsc::channel(64);
        Self {
            state_tx,
            channels: Mutex::new(Vec::new()),
            next_channel_id: AtomicU64::new(1),
            create_calls: AtomicU64::new(0),
            sent: Mutex::new(Vec::new()),
            fail_delete_ids: Mutex::new(Vec::new()),
            auto_reply: Mutex::new(None),
            event_tx,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.state_tx.send_replace(state);
    }

    pub(crate) fn seed_channels(&self, count: usize) {
        let mut channels = self.channels.lock().expect("channels lock");
        for _ in 0..count {
            let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
            channels.push(ChannelInfo {
                id,
                name: format!("seeded-{id}"),
            });
        }
    }

    pub(crate) fn fail_delete(&self, channel_id: u64) {
        self.fail_delete_ids
            .lock()
            .expect("fail_delete_ids lock")
            .push(channel_id);
    }

    pub(crate) fn set_auto_reply(&self, author_id: u64, content: &str) {
        *self.auto_reply.lock().expect("auto_reply lock") = Some((author_id, content.to_string()));
    }

    pub(crate) fn remaining_channels(&self) -> Vec<ChannelInfo> {
        self.channels.lock().expect("channels lock").clone()
    }

    pub(crate) fn create_call_count(&self) -> u64 {
        self.create_calls.load(Ordering::Relaxed)
    }

    pub(crate) fn sent_messages(&self) -> Vec<(u64, String)> {
        self.sent.lock().expect("sent lock").clone()
    }
}

impl ChatTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn start(&self) -> Result<EventStream> {
        let rx = self
            .event_rx
            .lock()
            .expect("event_rx lock")
            .take()
            .expect("start called twice");
        Ok(Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx)))
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        Ok(self.channels.lock().expect("channels lock").clone())
    }

    async fn create_channel(&self, name: &str) -> Result<ChannelInfo> {
        self.create_calls.fetch_add(1, Ordering::Relaxed);
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let info = ChannelInfo {
            id,
            name: name.to_string(),
        };
        self.channels
            .lock()
            .expect("channels lock")
            .push(info.clone());
        Ok(info)
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<()> {
        if self
            .fail_delete_ids
            .lock()
            .expect("fail_delete_ids lock")
            .contains(&channel_id)
        {
            return Err(Error::Transport(anyhow::anyhow!(
                "scripted delete failure for channel {channel_id}"
            )));
        }
        self.channels
            .lock()
            .expect("channels lock")
            .retain(|c| c.id != channel_id);
        Ok(())
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<()> {
        self.sent
            .lock()
            .expect("sent lock")
            .push((channel_id, text.to_string()));

        let reply = self.auto_reply.lock().expect("auto_reply lock").clone();
        if let Some((author_id, content)) = reply {
            let _ = self
                .event_tx
                .send(MessageEvent {
                    channel_id,
                    author_id,
                    content,
                })
                .await;
        }
        Ok(())
    }
}
