use tracing::{debug, trace, warn};

use super::View;
use crate::model::ViewEvent;
use crate::sys::affine::AffineContext;
use crate::sys::drop_files::{DropGuard, DropHandle};
use crate::sys::engine::WindowOp;
use crate::sys::message::{KnownMessage, Message};
use crate::sys::run_loop::MessageHook;

impl MessageHook for View {
    fn on_message(&self, cx: &AffineContext, message: &Message) -> bool {
        match message.known_kind() {
            Some(KnownMessage::Close) => self.on_close(cx),
            Some(KnownMessage::KeyDown) => self.on_key_down(message.wparam),
            Some(KnownMessage::DropFiles) => self.on_drop_files(cx, DropHandle(message.wparam)),
            _ => true,
        }
    }

    fn teardown(&self, cx: &AffineContext) { self.destroy_on_thread(cx); }
}

impl View {
    fn on_close(&self, cx: &AffineContext) -> bool {
        if self.is_destroyed() || !self.hides_on_close() {
            return true;
        }
        debug!(handle = %self.handle(), "close request hides the window");
        cx.engine().apply(self.handle(), WindowOp::Hide);
        false
    }

    fn on_key_down(&self, vk: usize) -> bool {
        let config = self.runtime().config();
        if vk == config.keys.reload {
            trace!(handle = %self.handle(), "reload key");
            self.reload_in_background();
            false
        } else if vk == config.keys.devtools && config.runtime.debug {
            trace!(handle = %self.handle(), "devtools key");
            self.devtools_in_background();
            false
        } else {
            true
        }
    }

    /// Continues to default dispatch only for an empty drop or when a subscriber
    /// took the files; an unobserved non-empty drop is consumed.
    fn on_drop_files(&self, cx: &AffineContext, token: DropHandle) -> bool {
        let accepts = self.accepts_files();
        let Some(query) = cx.engine().drag_query(token) else {
            warn!(handle = %self.handle(), ?token, "drop handle could not be queried");
            return accepts;
        };
        let guard = DropGuard::new(query);
        if !accepts {
            return false;
        }
        let paths = guard.paths();
        drop(guard);

        if paths.is_empty() {
            return true;
        }
        debug!(handle = %self.handle(), count = paths.len(), "files dropped");
        self.emit(ViewEvent::FilesDropped { window: self.handle(), paths })
    }
}
