use std::fmt;

use tokio::sync::mpsc;

/// An addressable process reference.
///
/// A [ProcessRef] exposes a single capability: best-effort asynchronous delivery of a
/// message to the process mailbox it addresses. References are cheap to clone and are
/// the values stored in the name registry.
pub struct ProcessRef<M> {
    sender: mpsc::UnboundedSender<M>,
}

impl<M> ProcessRef<M> {
    /// Mints a reference together with the mailbox it addresses.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<M>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Wraps an existing mailbox sender in a reference.
    pub fn from_sender(sender: mpsc::UnboundedSender<M>) -> Self {
        Self { sender }
    }

    /// Delivers a message to the addressed mailbox. A message sent to a mailbox
    /// whose receiver is gone is dropped silently.
    pub fn deliver(&self, message: M) {
        let _ = self.sender.send(message);
    }

    /// Whether both references address the same mailbox. This compares identity,
    /// never message contents.
    pub fn same_process(&self, other: &Self) -> bool {
        self.sender.same_channel(&other.sender)
    }
}

impl<M> Clone for ProcessRef<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M> fmt::Debug for ProcessRef<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessRef").finish_non_exhaustive()
    }
}
