//! Chat transport trait and platform adapters.

pub mod discord;
pub mod traits;

#[cfg(test)]
pub(crate) mod testing;

pub use discord::DiscordTransport;
pub use traits::{ChatTransport, ChatTransportDyn, EventStream};
