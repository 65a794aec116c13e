//! Conversation identifiers and the channel directory behind them.

use crate::error::{Error, Result};
use crate::transport::ChatTransportDyn;
use crate::ChannelInfo;

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Longest accepted identifier.
const MAX_ID_LEN: usize = 32;

/// A validated conversation identifier.
///
/// Canonicalized to lowercase. Only ASCII letters and digits are accepted,
/// at most 32 of them. The identifier doubles as the name of the channel
/// that backs the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConversationId(String);

impl ConversationId {
    /// Parse a caller-supplied identifier.
    pub fn parse(raw: &str) -> Result<Self> {
        let id = raw.to_lowercase();
        if id.is_empty() || id.len() > MAX_ID_LEN || !id.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::Validation(
                "Invalid conversationID. Must be a string with only letters and numbers, no spaces and no more than 32 characters".into(),
            ));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ConversationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Maps conversation identifiers to transport channels, creating channels
/// lazily on first use.
///
/// The transport's channel listing is the source of truth. Nothing is cached
/// here, so channels deleted out from under us (by the pruner or by hand)
/// simply get recreated on the next message.
pub struct ChannelDirectory {
    transport: Arc<dyn ChatTransportDyn>,
    /// One in-flight creation guard per identifier, so concurrent first
    /// messages for the same conversation produce a single channel.
    creating: Mutex<HashMap<ConversationId, Arc<Mutex<()>>>>,
}

impl ChannelDirectory {
    pub fn new(transport: Arc<dyn ChatTransportDyn>) -> Self {
        Self {
            transport,
            creating: Mutex::new(HashMap::new()),
        }
    }

    /// Find the channel named after this conversation, if one exists.
    pub async fn resolve(&self, id: &ConversationId) -> Result<Option<ChannelInfo>> {
        let channels = self.transport.list_channels().await?;
        Ok(channels.into_iter().find(|c| c.name == id.as_str()))
    }

    /// Resolve the conversation's channel, creating it when absent.
    pub async fn create_if_absent(&self, id: &ConversationId) -> Result<ChannelInfo> {
        if let Some(channel) = self.resolve(id).await? {
            return Ok(channel);
        }

        let guard = {
            let mut creating = self.creating.lock().await;
            creating.entry(id.clone()).or_default().clone()
        };
        let _locked = guard.lock().await;

        // Re-check under the lock: another request may have created the
        // channel while we waited.
        if let Some(channel) = self.resolve(id).await? {
            return Ok(channel);
        }

        let channel = self.transport.create_channel(id.as_str()).await?;
        tracing::info!(conversation = %id, channel_id = channel.id, "created conversation channel");

        self.creating.lock().await.remove(id);
        Ok(channel)
    }

    /// Delete the conversation's channel. Returns the channel that was
    /// deleted so callers can tidy their own bookkeeping.
    pub async fn delete(&self, id: &ConversationId) -> Result<ChannelInfo> {
        let Some(channel) = self.resolve(id).await? else {
            return Err(Error::NotFound);
        };

        self.transport.delete_channel(channel.id).await?;
        tracing::info!(conversation = %id, channel_id = channel.id, "deleted conversation channel");
        Ok(channel)
    }
}
