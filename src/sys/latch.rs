//! One-shot broadcast signals.
//!
//! A [`Latch`] starts open and can be closed exactly once. Closing drops the only
//! sender of an internal channel, which disconnects every receiver at once, so all
//! waiters (present and future) are released together.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, select};
use parking_lot::Mutex;

pub struct Latch {
    tx: Mutex<Option<Sender<()>>>,
    rx: Receiver<()>,
}

/// Which of two latches released [`Latch::wait_either`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Either {
    First,
    Second,
}

impl Default for Latch {
    fn default() -> Self { Self::new() }
}

impl std::fmt::Debug for Latch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Latch").field("closed", &self.is_closed()).finish()
    }
}

impl Latch {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(0);
        Latch { tx: Mutex::new(Some(tx)), rx }
    }

    /// Closes the latch. Returns `true` only for the call that performed the
    /// transition; every later call is a no-op returning `false`.
    pub fn close(&self) -> bool {
        let tx = self.tx.lock().take();
        tx.is_some()
    }

    pub fn is_closed(&self) -> bool { self.tx.lock().is_none() }

    /// Blocks until the latch is closed.
    pub fn wait(&self) {
        // Nothing is ever sent, so this only returns on disconnect.
        let _ = self.rx.recv();
    }

    /// Returns `true` if the latch closed within `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Blocks until either latch is closed. If both already are, `First` wins.
    pub fn wait_either(first: &Latch, second: &Latch) -> Either {
        if first.is_closed() {
            return Either::First;
        }
        select! {
            recv(first.rx) -> _ => Either::First,
            recv(second.rx) -> _ => Either::Second,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    use super::*;

    #[test]
    fn close_is_idempotent() {
        let latch = Latch::new();
        assert!(!latch.is_closed());
        assert!(latch.close());
        assert!(!latch.close());
        assert!(latch.is_closed());
        latch.wait();
    }

    #[test]
    fn concurrent_close_transitions_once() {
        const CLOSERS: usize = 16;
        let latch = Arc::new(Latch::new());
        let transitions = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..CLOSERS)
            .map(|_| {
                let latch = latch.clone();
                let transitions = transitions.clone();
                thread::spawn(move || {
                    if latch.close() {
                        transitions.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(1, transitions.load(Ordering::SeqCst));
        assert!(latch.is_closed());
    }

    #[test]
    fn waiters_released_on_close() {
        let latch = Arc::new(Latch::new());
        let released = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let latch = latch.clone();
                let released = released.clone();
                thread::spawn(move || {
                    latch.wait();
                    released.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        assert_eq!(0, released.load(Ordering::SeqCst));

        latch.close();
        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(4, released.load(Ordering::SeqCst));
    }

    #[test]
    fn wait_timeout_reports_state() {
        let latch = Latch::new();
        assert!(!latch.wait_timeout(Duration::from_millis(5)));
        latch.close();
        assert!(latch.wait_timeout(Duration::from_millis(5)));
    }

    #[test]
    fn wait_either_picks_closed_latch() {
        let first = Arc::new(Latch::new());
        let second = Arc::new(Latch::new());

        let closer = {
            let second = second.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(10));
                second.close();
            })
        };
        assert_eq!(Either::Second, Latch::wait_either(&first, &second));
        closer.join().unwrap();

        first.close();
        assert_eq!(Either::First, Latch::wait_either(&first, &second));
    }
}
