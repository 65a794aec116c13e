//! Chat transport trait and dynamic dispatch companion.

use crate::error::Result;
use crate::{ChannelId, ChannelInfo, ConnectionState, MessageEvent};
use futures::Stream;
use std::pin::Pin;
use tokio::sync::watch;

/// Message event stream type. One subscription exists per process.
pub type EventStream = Pin<Box<dyn Stream<Item = MessageEvent> + Send>>;

/// Static trait for chat transports.
/// Use this for type-safe implementations.
pub trait ChatTransport: Send + Sync + 'static {
    /// Unique name for this transport.
    fn name(&self) -> &str;

    /// Connect and return the event stream for every visible channel.
    /// Resolves once the connection is ready; a failed login is an error.
    fn start(&self) -> impl std::future::Future<Output = Result<EventStream>> + Send;

    /// Watch the connection lifecycle.
    fn state(&self) -> watch::Receiver<ConnectionState>;

    /// List every channel in the configured server.
    fn list_channels(&self) -> impl std::future::Future<Output = Result<Vec<ChannelInfo>>> + Send;

    /// Create a text channel hidden from the server's default role.
    fn create_channel(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<ChannelInfo>> + Send;

    /// Delete a channel.
    fn delete_channel(
        &self,
        channel_id: ChannelId,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Send a message to a channel.
    fn send_message(
        &self,
        channel_id: ChannelId,
        text: &str,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Graceful shutdown.
    fn shutdown(&self) -> impl std::future::Future<Output = Result<()>> + Send {
        async { Ok(()) }
    }
}

/// Dynamic trait for runtime polymorphism.
/// Use this when you need `Arc<dyn ChatTransportDyn>`.
pub trait ChatTransportDyn: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn start<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<EventStream>> + Send + 'a>>;

    fn state(&self) -> watch::Receiver<ConnectionState>;

    fn list_channels<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ChannelInfo>>> + Send + 'a>>;

    fn create_channel<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ChannelInfo>> + Send + 'a>>;

    fn delete_channel<'a>(
        &'a self,
        channel_id: ChannelId,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn send_message<'a>(
        &'a self,
        channel_id: ChannelId,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;

    fn shutdown<'a>(&'a self)
    -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>>;
}

/// Blanket implementation: any type implementing ChatTransport automatically implements ChatTransportDyn.
impl<T: ChatTransport> ChatTransportDyn for T {
    fn name(&self) -> &str {
        ChatTransport::name(self)
    }

    fn start<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<EventStream>> + Send + 'a>> {
        Box::pin(ChatTransport::start(self))
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        ChatTransport::state(self)
    }

    fn list_channels<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<Vec<ChannelInfo>>> + Send + 'a>> {
        Box::pin(ChatTransport::list_channels(self))
    }

    fn create_channel<'a>(
        &'a self,
        name: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<ChannelInfo>> + Send + 'a>> {
        Box::pin(ChatTransport::create_channel(self, name))
    }

    fn delete_channel<'a>(
        &'a self,
        channel_id: ChannelId,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(ChatTransport::delete_channel(self, channel_id))
    }

    fn send_message<'a>(
        &'a self,
        channel_id: ChannelId,
        text: &'a str,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(ChatTransport::send_message(self, channel_id, text))
    }

    fn shutdown<'a>(
        &'a self,
    ) -> Pin<Box<dyn std::future::Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(ChatTransport::shutdown(self))
    }
}
