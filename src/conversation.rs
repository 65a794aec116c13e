//! Conversation identity, channel directory, and reply correlation.

pub mod activity;
pub mod correlator;
pub mod directory;

pub use activity::ActivityLedger;
pub use correlator::{ReplyCorrelator, ReplyTicket};
pub use directory::{ChannelDirectory, ConversationId};
