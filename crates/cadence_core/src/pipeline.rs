//! # Packet Interception Pipeline
//!
//! Every protocol message passes here before it reaches its destination.
//!
//! ```text
//! message ──> Intercept(origin)  interceptors, first non-Pass wins
//!         ──> Packet(origin)     observers and OnEvent waits see the final decision
//!         ──> Pass    -> returned to the caller
//!             Cancel  -> dropped
//!             Queue   -> origin queue ──flush──> MessageSink (FIFO)
//! ```
//!
//! Until the host sets a sink for an origin, released messages go to a
//! built-in [`ReleaseBuffer`] and are kept there until taken.
//!
//! An origin queue is released as a whole, never partially, so a check made
//! during one tick sees either every held message or none of them.

use std::collections::VecDeque;
use std::sync::Arc;

use cadence_shared::{Action, Message, Origin, OwnerId, Tick};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use crate::config::PipelineConfig;
use crate::error::HandlerResult;
use crate::event::Event;
use crate::owner::OwnerRegistry;
use crate::runtime::Runtime;

/// Destination of released messages.
pub trait MessageSink: Send + Sync {
    /// Receives one released message.
    fn deliver(&self, origin: Origin, message: Message);
}

/// Sink that keeps released messages until they are taken.
#[derive(Default)]
pub struct ReleaseBuffer {
    released: Mutex<Vec<(Origin, Message)>>,
}

impl ReleaseBuffer {
    /// Creates an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes everything released so far, in release order.
    pub fn take(&self) -> Vec<(Origin, Message)> {
        std::mem::take(&mut *self.released.lock())
    }

    /// Number of buffered messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.released.lock().len()
    }

    /// Returns true if nothing is buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.released.lock().is_empty()
    }
}

impl MessageSink for ReleaseBuffer {
    fn deliver(&self, origin: Origin, message: Message) {
        self.released.lock().push((origin, message));
    }
}

/// A message held by the pipeline.
#[derive(Clone, Debug)]
pub struct QueuedMessage {
    /// The held message.
    pub message: Message,
    /// Its direction.
    pub origin: Origin,
    /// Tick it was queued on.
    pub enqueued_at: Tick,
    /// Owner of the interceptor that queued it.
    pub holder: Option<OwnerId>,
}

/// What happened to a message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict {
    /// Forward it now.
    Pass(Message),
    /// Dropped permanently.
    Cancelled,
    /// Held until its origin is flushed.
    Queued,
}

impl Verdict {
    /// The message to forward, if it passed.
    #[must_use]
    pub fn into_passed(self) -> Option<Message> {
        match self {
            Self::Pass(message) => Some(message),
            Self::Cancelled | Self::Queued => None,
        }
    }
}

/// Inbound/outbound interception with per-origin hold queues.
pub struct PacketPipeline {
    queues: [Mutex<VecDeque<QueuedMessage>>; 2],
    sinks: [RwLock<Arc<dyn MessageSink>>; 2],
    unclaimed: Arc<ReleaseBuffer>,
    config: PipelineConfig,
}

impl PacketPipeline {
    /// Creates a pipeline with empty queues. Both origins release into the
    /// built-in buffer until a sink is set.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let capacity = config.queue_capacity;
        let queue = || Mutex::new(VecDeque::with_capacity(capacity));
        let unclaimed = Arc::new(ReleaseBuffer::new());
        let sink = || RwLock::new(Arc::clone(&unclaimed) as Arc<dyn MessageSink>);
        Self {
            queues: [queue(), queue()],
            sinks: [sink(), sink()],
            unclaimed: Arc::clone(&unclaimed),
            config,
        }
    }

    /// Sets the destination of released messages for one origin. Messages
    /// already in the built-in buffer stay there.
    pub fn set_sink(&self, origin: Origin, sink: Arc<dyn MessageSink>) {
        *self.sinks[origin.index()].write() = sink;
    }

    /// Takes the messages released while no sink was set, in release order.
    pub fn take_unclaimed(&self) -> Vec<(Origin, Message)> {
        self.unclaimed.take()
    }

    /// Runs one message through interceptors and observers.
    pub(crate) fn evaluate(&self, rt: &Runtime, origin: Origin, message: Message) -> Verdict {
        let mut intercept = Event::intercept(origin, message.clone());
        rt.publish_in_place(&mut intercept);
        let decision = intercept.decision();

        let mut observed = Event::packet(origin, message.clone(), decision);
        rt.publish_in_place(&mut observed);

        match decision {
            Action::Pass => Verdict::Pass(message),
            Action::Cancel => {
                trace!(%origin, packet_id = message.packet_id, owner = ?intercept.decided_by(), "message cancelled");
                Verdict::Cancelled
            }
            Action::Queue => {
                self.enqueue(QueuedMessage {
                    message,
                    origin,
                    enqueued_at: rt.tick(),
                    holder: intercept.decided_by(),
                });
                Verdict::Queued
            }
        }
    }

    fn enqueue(&self, queued: QueuedMessage) {
        let origin = queued.origin;
        let full = {
            let queue = self.queues[origin.index()].lock();
            self.config.queue_capacity > 0 && queue.len() >= self.config.queue_capacity
        };
        if full {
            debug!(%origin, capacity = self.config.queue_capacity, "queue full, releasing");
            self.flush(origin);
        }
        trace!(%origin, packet_id = queued.message.packet_id, "message queued");
        self.queues[origin.index()].lock().push_back(queued);
    }

    /// Releases every held message of an origin to its sink, oldest first.
    /// Returns how many were released; `0` when the queue was empty.
    pub fn flush(&self, origin: Origin) -> usize {
        let released: Vec<QueuedMessage> = self.queues[origin.index()].lock().drain(..).collect();
        if released.is_empty() {
            return 0;
        }
        let count = released.len();
        let sink = Arc::clone(&*self.sinks[origin.index()].read());
        for queued in released {
            sink.deliver(origin, queued.message);
        }
        debug!(%origin, count, "queue flushed");
        count
    }

    /// End-of-tick check: releases an origin whose holder was disabled or
    /// whose oldest message outlived `max_hold_ticks`.
    pub(crate) fn release_lapsed(&self, owners: &OwnerRegistry, now: Tick) -> usize {
        let mut released = 0;
        for origin in Origin::ALL {
            let reason = {
                let queue = self.queues[origin.index()].lock();
                let Some(oldest) = queue.front() else {
                    continue;
                };
                let max_hold = u64::from(self.config.max_hold_ticks);
                if queue
                    .iter()
                    .any(|q| q.holder.is_some_and(|holder| !owners.is_enabled(holder)))
                {
                    Some("holder disabled")
                } else if max_hold > 0 && now.since(oldest.enqueued_at) >= max_hold {
                    Some("hold lapsed")
                } else {
                    None
                }
            };
            if let Some(reason) = reason {
                debug!(%origin, %now, reason, "releasing held messages");
                released += self.flush(origin);
            }
        }
        released
    }

    /// Number of held messages for an origin.
    #[must_use]
    pub fn queued(&self, origin: Origin) -> usize {
        self.queues[origin.index()].lock().len()
    }

    /// Snapshot of the held messages of an origin, oldest first.
    #[must_use]
    pub fn held(&self, origin: Origin) -> Vec<QueuedMessage> {
        self.queues[origin.index()].lock().iter().cloned().collect()
    }
}

/// Adapts an interceptor into an `Intercept` event handler.
pub(crate) fn interceptor_handler<F>(
    owner: OwnerId,
    mut interceptor: F,
) -> impl FnMut(&mut Event, &Runtime) -> HandlerResult + Send + 'static
where
    F: FnMut(&Message, &Runtime) -> HandlerResult<Action> + Send + 'static,
{
    move |event, rt| {
        let Some(message) = event.message() else {
            return Ok(());
        };
        let action = interceptor(message, rt)?;
        if action != Action::Pass {
            event.decide(action, owner);
        }
        Ok(())
    }
}
