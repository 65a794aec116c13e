//! Discord transport using serenity.

use crate::error::{Error, Result};
use crate::transport::traits::{ChatTransport, EventStream};
use crate::{ChannelInfo, ConnectionState, MessageEvent};

use anyhow::Context as _;
use async_trait::async_trait;
use serenity::all::{
    ChannelId, ChannelType, Context, CreateChannel, EventHandler, GatewayIntents, GuildId, Http,
    Message, PermissionOverwrite, PermissionOverwriteType, Permissions, Ready, RoleId,
    ShardManager,
};
use std::sync::Arc;
use tokio::sync::{RwLock, mpsc, watch};

/// Discord transport state.
pub struct DiscordTransport {
    token: String,
    guild_id: GuildId,
    http: Arc<RwLock<Option<Arc<Http>>>>,
    shard_manager: Arc<RwLock<Option<Arc<ShardManager>>>>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl DiscordTransport {
    pub fn new(token: impl Into<String>, server_id: u64) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        Self {
            token: token.into(),
            guild_id: GuildId::new(server_id),
            http: Arc::new(RwLock::new(None)),
            shard_manager: Arc::new(RwLock::new(None)),
            state_tx,
            state_rx,
        }
    }

    async fn get_http(&self) -> anyhow::Result<Arc<Http>> {
        self.http
            .read()
            .await
            .clone()
            .context("discord not connected")
    }
}

impl ChatTransport for DiscordTransport {
    fn name(&self) -> &str {
        "discord"
    }

    async fn start(&self) -> Result<EventStream> {
        let (event_tx, event_rx) = mpsc::channel(256);

        self.state_tx.send_replace(ConnectionState::Connecting);

        let handler = Handler {
            event_tx,
            state_tx: self.state_tx.clone(),
            http_slot: self.http.clone(),
        };

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT;

        let mut client = serenity::Client::builder(&self.token, intents)
            .event_handler(handler)
            .await
            .context("failed to build discord client")?;

        *self.http.write().await = Some(client.http.clone());
        *self.shard_manager.write().await = Some(client.shard_manager.clone());

        // Building the client does not authenticate; login happens inside
        // the spawned client task. Startup waits for the session so a
        // rejected token fails here.
        let state_tx = self.state_tx.clone();
        let mut gateway = tokio::spawn(async move {
            let result = client.start().await;
            state_tx.send_replace(ConnectionState::Disconnected);
            result
        });

        let mut state = self.state_tx.subscribe();
        await_session(&mut state, &mut gateway).await?;

        tokio::spawn(async move {
            match gateway.await {
                Ok(Ok(())) => tracing::info!("discord gateway stopped"),
                Ok(Err(error)) => tracing::error!(%error, "discord gateway error"),
                Err(error) => tracing::error!(%error, "discord gateway task failed"),
            }
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(event_rx);
        Ok(Box::pin(stream))
    }

    fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    async fn list_channels(&self) -> Result<Vec<ChannelInfo>> {
        let http = self.get_http().await.map_err(Error::Transport)?;

        let channels = self
            .guild_id
            .channels(&*http)
            .await
            .context("failed to list guild channels")
            .map_err(Error::Transport)?;

        Ok(channels
            .into_iter()
            .map(|(id, channel)| ChannelInfo {
                id: id.get(),
                name: channel.name,
            })
            .collect())
    }

    async fn create_channel(&self, name: &str) -> Result<ChannelInfo> {
        let http = self.get_http().await.map_err(Error::Transport)?;

        // The guild's default role shares the guild's ID. Denying it
        // VIEW_CHANNEL keeps conversation channels out of member sidebars.
        let everyone = RoleId::new(self.guild_id.get());
        let builder = CreateChannel::new(name)
            .kind(ChannelType::Text)
            .permissions(vec![PermissionOverwrite {
                allow: Permissions::empty(),
                deny: Permissions::VIEW_CHANNEL,
                kind: PermissionOverwriteType::Role(everyone),
            }]);

        let channel = self
            .guild_id
            .create_channel(&*http, builder)
            .await
            .with_context(|| format!("failed to create channel '{name}'"))
            .map_err(Error::Transport)?;

        Ok(ChannelInfo {
            id: channel.id.get(),
            name: channel.name,
        })
    }

    async fn delete_channel(&self, channel_id: u64) -> Result<()> {
        let http = self.get_http().await.map_err(Error::Transport)?;

        ChannelId::new(channel_id)
            .delete(&*http)
            .await
            .with_context(|| format!("failed to delete channel {channel_id}"))
            .map_err(Error::Transport)?;

        Ok(())
    }

    async fn send_message(&self, channel_id: u64, text: &str) -> Result<()> {
        let http = self.get_http().await.map_err(Error::Transport)?;

        ChannelId::new(channel_id)
            .say(&*http, text)
            .await
            .context("failed to send discord message")
            .map_err(Error::Transport)?;

        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(shard_manager) = self.shard_manager.read().await.as_ref() {
            shard_manager.shutdown_all().await;
        }
        self.state_tx.send_replace(ConnectionState::Disconnected);
        tracing::info!("discord transport stopped");
        Ok(())
    }
}

/// Wait for the session to report ready. If the client task ends first,
/// login failed and its error becomes the startup error.
async fn await_session(
    state: &mut watch::Receiver<ConnectionState>,
    gateway: &mut tokio::task::JoinHandle<serenity::Result<()>>,
) -> Result<()> {
    tokio::select! {
        ready = state.wait_for(|s| s.is_ready()) => {
            ready.context("transport state channel closed")?;
            Ok(())
        }
        joined = gateway => {
            let error = match joined {
                Ok(Ok(())) => anyhow::anyhow!("gateway exited before the session was ready"),
                Ok(Err(error)) => anyhow::Error::new(error),
                Err(error) => anyhow::Error::new(error),
            };
            Err(Error::Other(error.context("discord login failed")))
        }
    }
}

// -- Serenity EventHandler --

struct Handler {
    event_tx: mpsc::Sender<MessageEvent>,
    state_tx: watch::Sender<ConnectionState>,
    http_slot: Arc<RwLock<Option<Arc<Http>>>>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(bot_name = %ready.user.name, "discord connected");

        *self.http_slot.write().await = Some(ctx.http.clone());
        self.state_tx.send_replace(ConnectionState::Ready);
    }

    // Every message in every visible channel is forwarded, own messages
    // included. Filtering is the correlator's job.
    async fn message(&self, _ctx: Context, message: Message) {
        let event = MessageEvent {
            channel_id: message.channel_id.get(),
            author_id: message.author.id.get(),
            content: message.content,
        };

        if let Err(error) = self.event_tx.send(event).await {
            tracing::warn!(%error, "dropping discord message, event receiver is gone");
        }
    }
}
