//! Change notification infrastructure.
//!
//! Provides:
//! - Local change feed shared by every live query of a database
//! - Cross-context broadcast transports

pub mod broadcast;
pub mod notify;

pub use broadcast::{BroadcastTransport, ChannelEndpoint, ChannelHub, InboundStream, NoopTransport};
pub use notify::{ChangeEvent, ChangeFeed};
