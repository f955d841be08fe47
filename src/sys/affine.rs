//! Access to the engine from the affine thread.

use std::cell::RefCell;
use std::rc::Rc;

use super::engine::Engine;

thread_local! {
    static ENGINE: RefCell<Option<Rc<dyn Engine>>> = const { RefCell::new(None) };
}

/// Proof of running on the affine thread, handing out the engine.
///
/// Only obtainable on a thread that has an engine installed. It is `!Send`, so
/// it cannot leak to another thread.
#[derive(Clone)]
pub struct AffineContext {
    engine: Rc<dyn Engine>,
}

impl AffineContext {
    pub fn current() -> Option<AffineContext> {
        ENGINE.with(|slot| slot.borrow().clone()).map(|engine| AffineContext { engine })
    }

    pub(crate) fn from_engine(engine: Rc<dyn Engine>) -> AffineContext { AffineContext { engine } }

    pub fn engine(&self) -> &dyn Engine { &*self.engine }
}

pub fn is_affine_thread() -> bool { ENGINE.with(|slot| slot.borrow().is_some()) }

/// Keeps `engine` installed on the current thread until dropped.
pub struct Installed(());

impl Drop for Installed {
    fn drop(&mut self) {
        ENGINE.with(|slot| slot.borrow_mut().take());
    }
}

pub(crate) fn install(engine: Rc<dyn Engine>) -> Installed {
    ENGINE.with(|slot| {
        let previous = slot.borrow_mut().replace(engine);
        debug_assert!(previous.is_none(), "engine already installed on this thread");
    });
    Installed(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::headless::HeadlessController;

    #[test]
    fn context_exists_only_while_installed() {
        assert!(!is_affine_thread());
        assert!(AffineContext::current().is_none());

        let (engine, _source) = HeadlessController::new().backend();
        let installed = install(Rc::new(engine));
        assert!(is_affine_thread());
        let cx = AffineContext::current().unwrap();
        assert_eq!("", cx.engine().title(crate::sys::engine::EngineWindow::new(1)));

        drop(installed);
        assert!(!is_affine_thread());
        let other = std::thread::spawn(|| AffineContext::current().is_none());
        assert!(other.join().unwrap());
    }
}
