//! Streaming events
//!
//! Requests are fire-and-forget, so the outcome of a load or unload is only
//! visible through status, statistics, and these events.

use crate::id::ResourceId;
use crossbeam_channel::{Receiver, Sender, TrySendError};

/// Outcome of a request processed by a channel
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingEvent {
    /// Resource finished loading
    Loaded { id: ResourceId, size: usize },
    /// Resource failed to load and is back to `Unloaded`
    LoadFailed { id: ResourceId, error: String },
    /// Resource was unloaded
    Unloaded { id: ResourceId, size: usize },
    /// Handler failed to unload; the resource is `Unloaded` regardless
    UnloadFailed { id: ResourceId, error: String },
}

impl StreamingEvent {
    /// Resource the event refers to
    pub fn id(&self) -> ResourceId {
        match self {
            Self::Loaded { id, .. }
            | Self::LoadFailed { id, .. }
            | Self::Unloaded { id, .. }
            | Self::UnloadFailed { id, .. } => *id,
        }
    }
}

/// Bounded event queue; full queues drop new events
pub(crate) struct EventSink {
    sender: Option<Sender<StreamingEvent>>,
    receiver: Receiver<StreamingEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        if capacity == 0 {
            return Self {
                sender: None,
                receiver: crossbeam_channel::never(),
            };
        }

        let (sender, receiver) = crossbeam_channel::bounded(capacity);
        Self {
            sender: Some(sender),
            receiver,
        }
    }

    pub fn emit(&self, event: StreamingEvent) {
        let Some(sender) = &self.sender else {
            return;
        };

        match sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                log::trace!("Event queue full, dropping {:?}", event);
            }
            // The sink holds a receiver, so the channel cannot disconnect.
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    pub fn receiver(&self) -> Receiver<StreamingEvent> {
        self.receiver.clone()
    }
}
