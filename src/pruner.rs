//! Periodic channel pruning.
//!
//! Conversation channels accumulate until somebody deletes them. The pruner
//! counts the server's channels on a fixed period and deletes once the count
//! crosses the configured ceiling, keeping the server inside the platform's
//! channel limit.

use crate::conversation::ActivityLedger;
use crate::error::Result;
use crate::transport::ChatTransportDyn;
use crate::{ChannelInfo, ConnectionState};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;

/// How victims are chosen once the ceiling is exceeded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EvictionPolicy {
    /// Delete every channel in the server.
    #[default]
    FullReset,
    /// Keep the most recently active channels up to the ceiling and delete
    /// the rest, oldest first.
    LeastRecentlyUsed,
}

impl std::str::FromStr for EvictionPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "full_reset" => Ok(Self::FullReset),
            "least_recently_used" | "lru" => Ok(Self::LeastRecentlyUsed),
            other => Err(anyhow::anyhow!("unknown eviction policy '{other}'")),
        }
    }
}

impl EvictionPolicy {
    /// Choose which channels to delete from a full listing.
    fn victims(
        self,
        channels: Vec<ChannelInfo>,
        ceiling: usize,
        ledger: &ActivityLedger,
    ) -> Vec<ChannelInfo> {
        match self {
            EvictionPolicy::FullReset => channels,
            EvictionPolicy::LeastRecentlyUsed => {
                let mut ranked = channels;
                // Unknown-activity channels sort first, then oldest to newest.
                ranked.sort_by_key(|c| ledger.last_activity(c.id));
                let victim_count = ranked.len().saturating_sub(ceiling);
                ranked.truncate(victim_count);
                ranked
            }
        }
    }
}

/// Deletes channels whenever the server holds more than the ceiling.
pub struct ChannelPruner {
    transport: Arc<dyn ChatTransportDyn>,
    ledger: Arc<ActivityLedger>,
    ceiling: usize,
    policy: EvictionPolicy,
}

impl ChannelPruner {
    pub fn new(
        transport: Arc<dyn ChatTransportDyn>,
        ledger: Arc<ActivityLedger>,
        ceiling: usize,
        policy: EvictionPolicy,
    ) -> Self {
        Self {
            transport,
            ledger,
            ceiling,
            policy,
        }
    }

    /// Count the server's channels and delete per policy when the count
    /// exceeds the ceiling.
    ///
    /// Every channel counts toward the ceiling, conversation or not. A
    /// deletion that fails is logged and skipped so one sticky channel
    /// cannot stall the rest of the sweep.
    pub async fn sweep(&self) -> Result<()> {
        let channels = self.transport.list_channels().await?;
        let count = channels.len();

        if count <= self.ceiling {
            tracing::debug!(count, ceiling = self.ceiling, "channel count under ceiling");
            return Ok(());
        }

        let victims = self.policy.victims(channels, self.ceiling, &self.ledger);
        tracing::info!(
            count,
            ceiling = self.ceiling,
            victims = victims.len(),
            policy = ?self.policy,
            "channel ceiling exceeded, deleting channels"
        );

        let mut deleted = 0usize;
        for channel in victims {
            match self.transport.delete_channel(channel.id).await {
                Ok(()) => {
                    self.ledger.forget(channel.id);
                    deleted += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        %error,
                        channel_id = channel.id,
                        channel_name = %channel.name,
                        "failed to delete channel during sweep"
                    );
                }
            }
        }

        tracing::info!(deleted, "sweep finished");
        Ok(())
    }

    /// Sweep once as soon as the transport reports ready, then keep sweeping
    /// on a fixed period.
    pub fn spawn(
        self: Arc<Self>,
        period: Duration,
        mut state: watch::Receiver<ConnectionState>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if state.wait_for(|s| s.is_ready()).await.is_err() {
                tracing::debug!("transport state channel closed before ready, pruner stopping");
                return;
            }

            if let Err(error) = self.sweep().await {
                tracing::error!(%error, "startup sweep failed");
            }

            let mut ticker = interval(period);
            // Skip the immediate first tick, which would double the startup sweep.
            ticker.tick().await;

            loop {
                ticker.tick().await;
                if let Err(error) = self.sweep().await {
                    tracing::error!(%error, "periodic sweep failed");
                }
            }
        })
    }
}
