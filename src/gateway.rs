//! Request orchestration: validate input, resolve the channel, relay the
//! message, and wait for the responder.

use crate::conversation::{ActivityLedger, ChannelDirectory, ConversationId, ReplyCorrelator};
use crate::error::{Error, Result};
use crate::transport::ChatTransportDyn;
use crate::{ConnectionState, UserId};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound on caller message length, leaving room for the mention prefix
/// inside the platform's 2000 character cap.
const MAX_MESSAGE_LEN: usize = 1850;

/// Orchestrates one conversation exchange per HTTP request.
pub struct ConversationGateway {
    transport: Arc<dyn ChatTransportDyn>,
    directory: ChannelDirectory,
    correlator: Arc<ReplyCorrelator>,
    ledger: Arc<ActivityLedger>,
    state: watch::Receiver<ConnectionState>,
    responder_id: UserId,
    reply_timeout: Option<Duration>,
}

impl ConversationGateway {
    pub fn new(
        transport: Arc<dyn ChatTransportDyn>,
        correlator: Arc<ReplyCorrelator>,
        ledger: Arc<ActivityLedger>,
        responder_id: UserId,
        reply_timeout: Option<Duration>,
    ) -> Self {
        let state = transport.state();
        Self {
            directory: ChannelDirectory::new(transport.clone()),
            transport,
            correlator,
            ledger,
            state,
            responder_id,
            reply_timeout,
        }
    }

    /// Whether the transport connection is ready for requests.
    pub fn is_ready(&self) -> bool {
        self.state.borrow().is_ready()
    }

    fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            let state = *self.state.borrow();
            tracing::debug!(%state, "refusing request, transport not ready");
            Err(Error::NotReady)
        }
    }

    /// Deliver a message into the conversation's channel and return the
    /// responder's next message there.
    pub async fn send_and_await(
        &self,
        message: Option<&str>,
        conversation_id: Option<&str>,
    ) -> Result<String> {
        self.ensure_ready()?;

        let (message, raw_id) = match (message, conversation_id) {
            (Some(m), Some(c)) if !m.is_empty() && !c.is_empty() => (m, c),
            _ => {
                return Err(Error::Validation(
                    "Please provide a message and conversationID".into(),
                ));
            }
        };

        if message.chars().count() > MAX_MESSAGE_LEN {
            return Err(Error::Validation(
                "Message is too long. Must be under 1850 characters".into(),
            ));
        }

        let id = ConversationId::parse(raw_id)?;
        let channel = self.directory.create_if_absent(&id).await?;

        // Register before sending so a fast reply cannot slip past.
        let ticket = self.correlator.register(channel.id, self.responder_id);

        // Mention the responder so it picks the message up.
        let text = format!("<@{}> {}", self.responder_id, message);
        self.transport.send_message(channel.id, &text).await?;
        self.ledger.touch(channel.id);

        tracing::debug!(conversation = %id, channel_id = channel.id, "message sent, awaiting reply");

        let reply = ticket.wait(self.reply_timeout).await?;

        tracing::debug!(conversation = %id, channel_id = channel.id, "reply received");
        Ok(reply)
    }

    /// Delete a conversation's channel.
    pub async fn delete(&self, conversation_id: Option<&str>) -> Result<()> {
        self.ensure_ready()?;

        let raw_id = match conversation_id {
            Some(c) if !c.is_empty() => c,
            _ => return Err(Error::Validation("Please provide a conversationID".into())),
        };

        let id = ConversationId::parse(raw_id)?;
        let channel = self.directory.delete(&id).await?;
        self.ledger.forget(channel.id);
        Ok(())
    }
}
