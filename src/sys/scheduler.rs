//! The command queue feeding the affine thread.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tracing::trace;

use super::message::Waker;

/// Deferred unit of work, run exactly once on the affine thread.
pub type Command = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, thiserror::Error)]
#[error("command queue is disconnected")]
pub struct Disconnected;

/// Producer side. Cheap to clone, usable from any thread.
#[derive(Clone)]
pub struct Scheduler {
    tx: Sender<Command>,
    waker: Arc<dyn Waker>,
}

/// Consumer side, owned by the run loop.
pub struct CommandQueue {
    rx: Receiver<Command>,
}

/// Creates a queue. `capacity == 0` means unbounded; otherwise submitters block
/// while the queue is full.
pub fn channel(capacity: usize) -> (Sender<Command>, CommandQueue) {
    let (tx, rx) = if capacity == 0 {
        crossbeam_channel::unbounded()
    } else {
        crossbeam_channel::bounded(capacity)
    };
    (tx, CommandQueue { rx })
}

impl Scheduler {
    pub fn new(tx: Sender<Command>, waker: Arc<dyn Waker>) -> Scheduler { Scheduler { tx, waker } }

    /// Queues `command` and wakes the pump. Commands from one thread run in the
    /// order they were submitted.
    pub fn submit(&self, command: impl FnOnce() + Send + 'static) -> Result<(), Disconnected> {
        self.submit_boxed(Box::new(command))
    }

    pub fn submit_boxed(&self, command: Command) -> Result<(), Disconnected> {
        self.tx.send(command).map_err(|_| Disconnected)?;
        trace!(queued = self.tx.len(), "command submitted");
        self.waker.wake();
        Ok(())
    }

    pub fn waker(&self) -> &Arc<dyn Waker> { &self.waker }
}

impl CommandQueue {
    /// Pops the next command without blocking.
    pub fn try_next(&self) -> Option<Command> {
        match self.rx.try_recv() {
            Ok(command) => Some(command),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    pub fn len(&self) -> usize { self.rx.len() }

    pub fn is_empty(&self) -> bool { self.rx.is_empty() }

    #[cfg(test)]
    pub(crate) fn rx_for_test(&self) -> Receiver<Command> { self.rx.clone() }
}
