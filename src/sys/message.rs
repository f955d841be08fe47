//! Native UI messages as seen by the pump.

use std::fmt;
use std::sync::Arc;

use num_enum::TryFromPrimitive;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Host window handle used for native message delivery.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct WindowHandle(usize);

impl WindowHandle {
    pub const NONE: WindowHandle = WindowHandle(0);

    pub fn new(raw: usize) -> WindowHandle { WindowHandle(raw) }

    pub fn get(&self) -> usize { self.0 }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:#x}", self.0) }
}

pub const VK_F5: usize = 0x74;
pub const VK_F12: usize = 0x7B;

/// First message id available for private use by a backend.
pub const APP_MESSAGE_BASE: u32 = 0x8000;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, TryFromPrimitive, Display)]
#[repr(u32)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum KnownMessage {
    Null = 0x0000,
    Destroy = 0x0002,
    Close = 0x0010,
    Quit = 0x0012,
    KeyDown = 0x0100,
    KeyUp = 0x0101,
    Char = 0x0102,
    DropFiles = 0x0233,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Message {
    pub window: WindowHandle,
    pub kind: u32,
    pub wparam: usize,
    pub lparam: isize,
}

impl Message {
    pub fn new(window: WindowHandle, kind: u32, wparam: usize, lparam: isize) -> Message {
        Message { window, kind, wparam, lparam }
    }

    pub fn known(window: WindowHandle, kind: KnownMessage, wparam: usize) -> Message {
        Message::new(window, kind as u32, wparam, 0)
    }

    /// Thread message used only to unblock a waiting pump.
    pub fn wake() -> Message { Message::known(WindowHandle::NONE, KnownMessage::Null, 0) }

    pub fn known_kind(&self) -> Option<KnownMessage> { KnownMessage::try_from(self.kind).ok() }

    pub fn is(&self, kind: KnownMessage) -> bool { self.kind == kind as u32 }
}

/// Cross-thread handle that can unblock or stop a pump parked in
/// [`MessageSource::next_message`].
pub trait Waker: Send + Sync {
    /// Makes the next (or current) `next_message` call return promptly.
    /// Multiple wakes may collapse into one.
    fn wake(&self);

    /// Makes `next_message` return `None` once pending messages are consumed.
    fn quit(&self);
}

/// The native message queue of the affine thread.
pub trait MessageSource {
    /// Blocks until the next message for any window of this thread arrives.
    /// Returns `None` once the queue has been told to quit.
    fn next_message(&mut self) -> Option<Message>;

    /// Input translation that must happen before dispatch (key to char messages).
    fn translate(&mut self, message: &Message);

    /// Forwards the message to the default window procedure.
    fn dispatch(&mut self, message: &Message);

    fn waker(&self) -> Arc<dyn Waker>;
}
