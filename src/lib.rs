//! Bridgebot: an HTTP front door for Discord conversations. Each caller-chosen
//! conversation identifier maps to a dedicated channel; messages are relayed to
//! a designated responder and the responder's next reply is returned.

pub mod api;
pub mod config;
pub mod conversation;
pub mod error;
pub mod gateway;
pub mod pruner;
pub mod transport;

pub use error::{Error, Result};

/// Numeric channel identifier on the chat platform.
pub type ChannelId = u64;

/// Numeric user identifier on the chat platform.
pub type UserId = u64;

/// A channel as seen by the directory and the pruner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelInfo {
    pub id: ChannelId,
    pub name: String,
}

/// A message observed on the transport's event stream.
///
/// The stream is not filtered at the source: every message in every visible
/// channel produces one of these, and the correlator picks out the ones that
/// in-flight requests are waiting for.
#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub content: String,
}

/// Transport connection lifecycle, published through a watch channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Ready,
}

impl ConnectionState {
    pub fn is_ready(self) -> bool {
        matches!(self, ConnectionState::Ready)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Ready => write!(f, "ready"),
        }
    }
}
