//! Parent/child mailbox
//!
//! One slot per direction. Posting into an occupied slot replaces the
//! unread message: last write wins, nothing is queued.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::warn;
use uuid::Uuid;

#[derive(Debug, Default)]
struct Slots {
    from_parent: Option<String>,
    from_child: Option<String>,
    pending_tool_call_id: Option<String>,
}

/// Channel between exactly one parent and one child worker.
///
/// Clones share the same slots; the parent keeps one clone and the child
/// the other.
#[derive(Debug, Clone)]
pub struct Mailbox {
    id: Uuid,
    slots: Arc<Mutex<Slots>>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            slots: Arc::new(Mutex::new(Slots::default())),
        }
    }

    /// Conversation id recorded in the metadata of the parent's pending block
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Post a message to the child. Returns `true` if an unread message was
    /// overwritten.
    pub fn post_from_parent(&self, message: impl Into<String>) -> bool {
        let overwritten = self.slots.lock().from_parent.replace(message.into()).is_some();
        if overwritten {
            warn!(mailbox = %self.id, "Unread parent message overwritten");
        }
        overwritten
    }

    /// Post a reply to the parent. Returns `true` if an unread reply was
    /// overwritten.
    pub fn post_from_child(&self, message: impl Into<String>) -> bool {
        let overwritten = self.slots.lock().from_child.replace(message.into()).is_some();
        if overwritten {
            warn!(mailbox = %self.id, "Unread child reply overwritten");
        }
        overwritten
    }

    pub fn take_from_parent(&self) -> Option<String> {
        self.slots.lock().from_parent.take()
    }

    pub fn take_from_child(&self) -> Option<String> {
        self.slots.lock().from_child.take()
    }

    pub fn has_from_parent(&self) -> bool {
        self.slots.lock().from_parent.is_some()
    }

    pub fn has_from_child(&self) -> bool {
        self.slots.lock().from_child.is_some()
    }

    pub fn set_pending_tool_call_id(&self, call_id: Option<String>) {
        self.slots.lock().pending_tool_call_id = call_id;
    }

    pub fn pending_tool_call_id(&self) -> Option<String> {
        self.slots.lock().pending_tool_call_id.clone()
    }
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}
