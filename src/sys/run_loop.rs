//! The affine thread's loop: queued commands interleaved with the native pump.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info_span, trace};

use super::affine::{AffineContext, Installed};
use super::latch::Latch;
use super::message::{MessageSource, Message};
use super::scheduler::{Command, CommandQueue};
use crate::model::ViewRegistry;

/// Per-window interception of pumped messages.
pub trait MessageHook: Send + Sync {
    /// Returns whether the message should continue to default dispatch.
    fn on_message(&self, cx: &AffineContext, message: &Message) -> bool;

    /// Called on the affine thread when the runtime shuts down.
    fn teardown(&self, _cx: &AffineContext) {}

    fn name(&self) -> &str { "view" }
}

/// Outcome of one loop iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Command,
    Message,
    Quit,
}

pub struct RunLoop<S: MessageSource> {
    /// Dropped on exit so late submitters see the queue disconnected.
    queue: Option<CommandQueue>,
    source: S,
    registry: ViewRegistry,
    started: Arc<Latch>,
    stopping: Arc<AtomicBool>,
    cx: AffineContext,
    _installed: Installed,
}

impl<S: MessageSource> RunLoop<S> {
    pub(crate) fn new(
        queue: CommandQueue,
        source: S,
        registry: ViewRegistry,
        started: Arc<Latch>,
        stopping: Arc<AtomicBool>,
        cx: AffineContext,
        installed: Installed,
    ) -> Self {
        RunLoop {
            queue: Some(queue),
            source,
            registry,
            started,
            stopping,
            cx,
            _installed: installed,
        }
    }

    /// Runs until the message source quits or the runtime is shut down.
    pub fn run(&mut self) {
        let span = info_span!("run_loop");
        let _guard = span.enter();
        self.started.close();
        debug!("consuming commands");

        loop {
            if self.stopping.load(Ordering::Acquire) {
                debug!("stop requested");
                break;
            }
            if self.turn() == Turn::Quit {
                debug!("message source quit");
                break;
            }
        }
        self.abandon_pending();
    }

    /// One iteration. Commands always go first; the loop only blocks on the
    /// message source when the queue is empty.
    pub fn turn(&mut self) -> Turn {
        if let Some(command) = self.next_command() {
            command();
            return Turn::Command;
        }

        let Some(message) = self.source.next_message() else {
            return Turn::Quit;
        };
        self.source.translate(&message);
        if self.route(&message) {
            self.source.dispatch(&message);
        }
        Turn::Message
    }

    /// Runs every queued command without touching the message source.
    /// For hosts that pump messages themselves.
    pub fn run_pending(&mut self) -> usize {
        self.started.close();
        let mut ran = 0;
        while let Some(command) = self.next_command() {
            command();
            ran += 1;
        }
        ran
    }

    /// Offers `message` to the owning view. Returns whether it should continue
    /// to default dispatch; messages for unknown windows always do.
    pub fn route(&self, message: &Message) -> bool {
        let Some(hook) = self.registry.get(message.window) else {
            return true;
        };
        let next = hook.on_message(&self.cx, message);
        trace!(hook = hook.name(), kind = message.kind, window = %message.window, next, "routed");
        next
    }

    pub fn context(&self) -> &AffineContext { &self.cx }

    fn next_command(&self) -> Option<Command> { self.queue.as_ref()?.try_next() }

    fn abandon_pending(&mut self) {
        self.stopping.store(true, Ordering::Release);
        let Some(queue) = self.queue.take() else {
            return;
        };
        let mut dropped = 0;
        while let Some(command) = queue.try_next() {
            drop(command);
            dropped += 1;
        }
        // Anything sent after the drain is discarded with the receiver.
        drop(queue);
        if dropped > 0 {
            debug!(dropped, "abandoned queued commands");
        }
    }
}
