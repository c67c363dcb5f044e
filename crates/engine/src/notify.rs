use thiserror::Error;

use modarch_core::ids::{ActorId, DraftId, ModId};

/// Events emitted after a lifecycle transition completes. Delivery is
/// fire-and-forget: a failing sink is logged and never aborts the
/// transition that produced the event.
#[derive(Debug, Clone)]
pub enum NotifyEvent {
    /// An archivist marked a draft ready for moderator review.
    DraftReady {
        draft: DraftId,
        name: String,
        owner: ActorId,
    },
    /// A moderator merged a draft into a live mod.
    DraftMerged {
        draft: DraftId,
        merged_into: ModId,
        name: String,
        owner: ActorId,
    },
}

#[derive(Debug, Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

pub trait Notifier {
    fn notify(&mut self, event: &NotifyEvent) -> Result<(), NotifyError>;
}

/// Default sink that discards all events.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&mut self, _event: &NotifyEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}
