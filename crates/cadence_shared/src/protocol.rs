//! Protocol message types seen by the interception pipeline.
//!
//! The core never decodes a message. It only needs the packet id to let
//! interceptors match on it and a cheap handle to the encoded payload.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Direction of a protocol message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Server → client, before it reaches the simulation.
    Inbound,
    /// Client → server, before it reaches the socket.
    Outbound,
}

impl Origin {
    /// Both origins, in a fixed order.
    pub const ALL: [Self; 2] = [Self::Inbound, Self::Outbound];

    /// Dense index for per-origin tables.
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Inbound => 0,
            Self::Outbound => 1,
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbound => f.write_str("inbound"),
            Self::Outbound => f.write_str("outbound"),
        }
    }
}

/// Decision an interceptor takes for one message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    /// Forward immediately.
    #[default]
    Pass,
    /// Drop permanently; the message never reaches its destination.
    Cancel,
    /// Hold until the origin queue is flushed.
    Queue,
}

/// An encoded protocol message.
///
/// Cloning is cheap: the payload is reference counted.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Message {
    /// Protocol packet id.
    pub packet_id: u16,
    /// Encoded body, opaque to the core.
    pub payload: Arc<[u8]>,
}

impl Message {
    /// Creates a message from a packet id and its encoded body.
    #[must_use]
    pub fn new(packet_id: u16, payload: impl Into<Arc<[u8]>>) -> Self {
        Self {
            packet_id,
            payload: payload.into(),
        }
    }

    /// Creates a message with an empty body.
    #[must_use]
    pub fn empty(packet_id: u16) -> Self {
        Self::new(packet_id, Vec::new())
    }

    /// Encoded size in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the body is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("packet_id", &format_args!("{:#04x}", self.packet_id))
            .field("len", &self.payload.len())
            .finish()
    }
}
