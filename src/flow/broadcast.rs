//! Cross-context broadcast transport.
//!
//! Carries serialized [`Changes`](crate::Changes) between execution
//! contexts that share one database file. Delivery is best effort:
//! unordered across senders, no acknowledgement, messages may be lost.

use futures::{stream, Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use uuid::Uuid;

/// Stream of raw inbound messages from other contexts.
pub type InboundStream = Pin<Box<dyn Stream<Item = String> + Send + 'static>>;

/// A best-effort message channel between execution contexts.
pub trait BroadcastTransport: Send + Sync + 'static {
    /// Send a message to every other context. Never fails the caller.
    fn send(&self, message: String);

    /// Messages sent by other contexts from now on.
    fn inbound(&self) -> InboundStream;
}

/// Transport for a database that is the only context on its file.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTransport;

impl BroadcastTransport for NoopTransport {
    fn send(&self, _message: String) {}

    fn inbound(&self) -> InboundStream {
        Box::pin(stream::pending())
    }
}

#[derive(Debug, Clone)]
struct Envelope {
    origin: Uuid,
    payload: Arc<str>,
}

/// In-process hub of named broadcast channels.
///
/// Endpoints joined to the same channel name receive each other's
/// messages but never their own. An endpoint that falls more than
/// `capacity` messages behind loses the oldest ones. A capacity of zero
/// is raised to one.
#[derive(Debug)]
pub struct ChannelHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Envelope>>>,
    capacity: usize,
}

impl ChannelHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Join the channel called `name`, creating it on first use.
    pub fn join(&self, name: &str) -> ChannelEndpoint {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        let sender = channels
            .entry(name.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone();

        let endpoint = ChannelEndpoint {
            id: Uuid::now_v7(),
            name: name.to_string(),
            sender,
        };
        tracing::debug!(channel = name, context = %endpoint.id, "Joined broadcast channel");
        endpoint
    }
}

impl Default for ChannelHub {
    fn default() -> Self {
        Self::new(256)
    }
}

/// One context's membership in a [`ChannelHub`] channel.
#[derive(Debug, Clone)]
pub struct ChannelEndpoint {
    id: Uuid,
    name: String,
    sender: broadcast::Sender<Envelope>,
}

impl ChannelEndpoint {
    /// Context id stamped on every message this endpoint sends.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn channel(&self) -> &str {
        &self.name
    }
}

impl BroadcastTransport for ChannelEndpoint {
    fn send(&self, message: String) {
        let envelope = Envelope {
            origin: self.id,
            payload: message.into(),
        };
        // No receivers means no other context is listening.
        let _ = self.sender.send(envelope);
    }

    fn inbound(&self) -> InboundStream {
        let id = self.id;
        let channel = self.name.clone();
        let messages = BroadcastStream::new(self.sender.subscribe()).filter_map(move |item| {
            let channel = channel.clone();
            async move {
                match item {
                    Ok(envelope) if envelope.origin != id => Some(envelope.payload.to_string()),
                    Ok(_) => None,
                    Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                        tracing::warn!(channel = %channel, skipped, "Broadcast endpoint lagged, messages lost");
                        None
                    }
                }
            }
        });
        Box::pin(messages)
    }
}
