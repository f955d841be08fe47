//! A window showing engine content, operated from any thread.
//!
//! Every operation that touches the engine is bridged onto the affine thread
//! and blocks the caller until it has run there. None of them may be called
//! from the affine thread itself (subscribers included); they fail with
//! [`Error::CalledFromAffineThread`] if they are.

use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, instrument, trace, warn};

mod hook;
mod script;

pub use script::ScriptOp;

use crate::common::config::WindowSettings;
use crate::error::{Error, Result};
use crate::model::ViewEvent;
use crate::runtime::Runtime;
use crate::sys::affine::AffineContext;
use crate::sys::engine::{Bounds, EngineEvent, EngineWindow, EventSink, WindowOp, WindowOptions};
use crate::sys::latch::{Either, Latch};
use crate::sys::message::WindowHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewOptions {
    pub bounds: Bounds,
    pub transparent: bool,
    pub hide_on_close: bool,
    pub accept_files: bool,
    pub auto_title: bool,
}

impl From<&WindowSettings> for ViewOptions {
    fn from(settings: &WindowSettings) -> Self {
        ViewOptions {
            bounds: WindowOptions::from(settings).bounds,
            transparent: settings.transparent,
            hide_on_close: settings.hide_on_close,
            accept_files: settings.accept_files,
            auto_title: settings.auto_title,
        }
    }
}

impl Default for ViewOptions {
    fn default() -> Self { ViewOptions::from(&WindowSettings::default()) }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Subscriber = Arc<dyn Fn(&View, &ViewEvent) + Send + Sync>;

#[derive(Clone)]
pub struct View {
    shared: Arc<ViewShared>,
}

struct ViewShared {
    runtime: Runtime,
    window: EngineWindow,
    handle: WindowHandle,
    ready: Latch,
    destroyed: Latch,
    hide_on_close: AtomicBool,
    auto_title: AtomicBool,
    accept_files: AtomicBool,
    /// Set by the first teardown, before any of its effects.
    tearing_down: AtomicBool,
    subscribers: Mutex<Vec<(SubscriptionId, Subscriber)>>,
    next_subscription: AtomicU64,
}

impl std::fmt::Debug for View {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("View")
            .field("handle", &self.shared.handle)
            .field("window", &self.shared.window)
            .field("destroyed", &self.shared.destroyed.is_closed())
            .finish()
    }
}

impl View {
    /// Creates the window on the affine thread and registers it for message
    /// routing.
    #[instrument(name = "view::new", skip(runtime))]
    pub fn new(runtime: &Runtime, options: ViewOptions) -> Result<View> {
        let owner = runtime.clone();
        runtime.call(move |cx| View::create(cx, owner, options))?
    }

    fn create(cx: &AffineContext, runtime: Runtime, options: ViewOptions) -> Result<View> {
        // The sink exists before the view does, so it finds the view late.
        let slot: Rc<OnceCell<Weak<ViewShared>>> = Rc::default();
        let sink: EventSink = {
            let slot = slot.clone();
            Rc::new(move |event| {
                match slot.get().and_then(Weak::upgrade) {
                    Some(shared) => View { shared }.on_engine_event(event),
                    None => trace!(?event, "event for a view that is gone"),
                }
            })
        };

        let engine_options = WindowOptions {
            bounds: options.bounds,
            transparent: options.transparent,
            accept_files: options.accept_files,
        };
        let (window, handle) = cx.engine().create_window(&engine_options, sink)?;

        let view = View {
            shared: Arc::new(ViewShared {
                runtime,
                window,
                handle,
                ready: Latch::new(),
                destroyed: Latch::new(),
                hide_on_close: AtomicBool::new(options.hide_on_close),
                auto_title: AtomicBool::new(options.auto_title),
                accept_files: AtomicBool::new(options.accept_files),
                tearing_down: AtomicBool::new(false),
                subscribers: Mutex::new(Vec::new()),
                next_subscription: AtomicU64::new(1),
            }),
        };
        let _ = slot.set(Arc::downgrade(&view.shared));

        view.shared.runtime.registry().insert(handle, Arc::new(view.clone()));
        view.bind_script_ops(cx);
        debug!(%handle, %window, "view created");
        Ok(view)
    }

    pub fn handle(&self) -> WindowHandle { self.shared.handle }

    pub fn engine_window(&self) -> EngineWindow { self.shared.window }

    pub fn runtime(&self) -> &Runtime { &self.shared.runtime }

    /// Closed once the document has loaded.
    pub fn ready(&self) -> &Latch { &self.shared.ready }

    /// Closed once teardown has begun.
    pub fn destroyed(&self) -> &Latch { &self.shared.destroyed }

    pub fn is_destroyed(&self) -> bool { self.shared.destroyed.is_closed() }

    pub fn hides_on_close(&self) -> bool { self.shared.hide_on_close.load(Ordering::Acquire) }

    pub fn set_hide_on_close(&self, hide: bool) {
        self.shared.hide_on_close.store(hide, Ordering::Release);
    }

    pub fn auto_title(&self) -> bool { self.shared.auto_title.load(Ordering::Acquire) }

    pub fn accepts_files(&self) -> bool { self.shared.accept_files.load(Ordering::Acquire) }

    /// Runs `f` on the affine thread unless the view is, or becomes, destroyed.
    fn bridged<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&AffineContext, &View) -> R + Send + 'static,
    {
        if self.is_destroyed() {
            return Err(Error::ViewDestroyed);
        }
        let view = self.clone();
        self.shared.runtime.call(move |cx| {
            if view.is_destroyed() {
                return Err(Error::ViewDestroyed);
            }
            Ok(f(cx, &view))
        })?
    }

    fn window_op(&self, op: WindowOp) -> Result<()> {
        self.bridged(move |cx, view| cx.engine().apply(view.handle(), op))
    }

    pub fn load_url(&self, url: &str) -> Result<()> {
        let url = url.to_owned();
        self.bridged(move |cx, view| cx.engine().load_url(view.engine_window(), &url))
    }

    pub fn reload(&self) -> Result<()> {
        self.bridged(|cx, view| cx.engine().reload(view.engine_window()))
    }

    pub fn show_devtools(&self) -> Result<()> {
        self.bridged(|cx, view| cx.engine().show_devtools(view.engine_window()))
    }

    pub fn set_window_title(&self, title: &str) -> Result<()> {
        let title = title.to_owned();
        self.bridged(move |cx, view| cx.engine().set_title(view.engine_window(), &title))
    }

    /// Document title. Waits for the document to be ready first.
    pub fn title(&self) -> Result<String> {
        // Only the affine thread can close `ready`, so it must never wait here.
        if self.shared.runtime.is_affine_thread() {
            return Err(Error::CalledFromAffineThread);
        }
        if Latch::wait_either(&self.shared.ready, &self.shared.destroyed) == Either::Second {
            return Err(Error::ViewDestroyed);
        }
        self.bridged(|cx, view| cx.engine().title(view.engine_window()))
    }

    /// Keeps the window title in sync with the document title, starting now.
    pub fn enable_auto_title(&self) -> Result<()> {
        self.shared.auto_title.store(true, Ordering::Release);
        let title = self.title()?;
        self.set_window_title(&title)
    }

    pub fn disable_auto_title(&self) { self.shared.auto_title.store(false, Ordering::Release); }

    pub fn show(&self) -> Result<()> { self.window_op(WindowOp::Show) }

    pub fn hide(&self) -> Result<()> { self.window_op(WindowOp::Hide) }

    pub fn minimize(&self) -> Result<()> { self.window_op(WindowOp::Minimize) }

    pub fn maximize(&self) -> Result<()> { self.window_op(WindowOp::Maximize) }

    pub fn restore(&self) -> Result<()> { self.window_op(WindowOp::Restore) }

    pub fn to_top(&self) -> Result<()> { self.window_op(WindowOp::ToTop) }

    pub fn set_topmost(&self, topmost: bool) -> Result<()> { self.window_op(WindowOp::Topmost(topmost)) }

    pub fn show_caption(&self) -> Result<()> { self.window_op(WindowOp::Caption(true)) }

    pub fn hide_caption(&self) -> Result<()> { self.window_op(WindowOp::Caption(false)) }

    pub fn show_taskbar_icon(&self) -> Result<()> { self.window_op(WindowOp::TaskbarIcon(true)) }

    pub fn hide_taskbar_icon(&self) -> Result<()> { self.window_op(WindowOp::TaskbarIcon(false)) }

    pub fn move_to_center(&self) -> Result<()> { self.window_op(WindowOp::Center) }

    pub fn set_accept_files(&self, accept: bool) -> Result<()> {
        self.shared.accept_files.store(accept, Ordering::Release);
        self.window_op(WindowOp::AcceptFiles(accept))
    }

    /// Loads the window icon from an `.ico` file. A missing file is reported
    /// here; a file the engine cannot load is logged and skipped.
    pub fn set_icon_from_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref().to_path_buf();
        std::fs::metadata(&path).map_err(|source| Error::Io { path: path.clone(), source })?;
        self.bridged(move |cx, view| {
            if let Err(e) = cx.engine().set_icon(view.handle(), &path) {
                warn!(handle = %view.handle(), "icon not applied: {e}");
            }
        })
    }

    /// Stages icon bytes in the working directory, then loads them.
    pub fn set_icon(&self, ico: &[u8]) -> Result<PathBuf> {
        let path = self
            .shared
            .runtime
            .config()
            .runtime
            .temp_dir()
            .join(format!("icon-{:x}.ico", self.handle().get()));
        std::fs::write(&path, ico).map_err(|source| Error::Io { path: path.clone(), source })?;
        self.set_icon_from_path(&path)?;
        Ok(path)
    }

    /// Starts a reload without waiting for it.
    pub fn reload_in_background(&self) { self.detached("reload", View::reload); }

    /// Opens devtools without waiting for it.
    pub fn devtools_in_background(&self) { self.detached("devtools", View::show_devtools); }

    fn detached(&self, what: &'static str, op: fn(&View) -> Result<()>) {
        let view = self.clone();
        let spawned = thread::Builder::new().name(format!("blink-{what}")).spawn(move || {
            if let Err(e) = op(&view) {
                warn!(handle = %view.handle(), what, "background task failed: {e}");
            }
        });
        if let Err(e) = spawned {
            warn!(what, "could not spawn background task: {e}");
        }
    }

    /// Tears the view down. Safe to call repeatedly and concurrently; only
    /// the first call does anything.
    #[instrument(skip(self), fields(handle = %self.handle()))]
    pub fn destroy(&self) -> Result<()> {
        if self.is_destroyed() {
            return Ok(());
        }
        let view = self.clone();
        self.shared.runtime.call(move |cx| view.destroy_on_thread(cx))
    }

    fn destroy_on_thread(&self, cx: &AffineContext) {
        if !self.mark_destroyed() {
            return;
        }
        cx.engine().destroy_window(self.engine_window());
    }

    /// Unregisters the window, then closes the destruction latch, so anyone
    /// released by the latch sees the teardown complete. Returns whether this
    /// call made the transition.
    fn mark_destroyed(&self) -> bool {
        if self.shared.tearing_down.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.shared.hide_on_close.store(false, Ordering::Release);
        self.shared.runtime.registry().remove(self.handle());
        self.shared.destroyed.close();
        debug!(handle = %self.handle(), "view destroyed");
        self.emit(ViewEvent::Destroyed { window: self.handle() });
        true
    }

    fn on_engine_event(&self, event: EngineEvent) {
        let handle = self.handle();
        match event {
            EngineEvent::DocumentReady => {
                if self.shared.ready.close() {
                    debug!(%handle, "document ready");
                }
                self.emit(ViewEvent::DocumentReady { window: handle });
            }
            EngineEvent::TitleChanged(title) => {
                if self.auto_title() && !self.is_destroyed() {
                    match AffineContext::current() {
                        Some(cx) => cx.engine().set_title(self.engine_window(), &title),
                        None => warn!(%handle, "title event off the affine thread"),
                    }
                }
                self.emit(ViewEvent::TitleChanged { window: handle, title });
            }
            EngineEvent::ScriptCall { name, args } => match AffineContext::current() {
                Some(cx) => self.on_script_call(&cx, &name, &args),
                None => warn!(%handle, name, "script call off the affine thread"),
            },
            EngineEvent::Destroyed => {
                self.mark_destroyed();
            }
        }
    }

    /// Registers `f` for this view's events. `f` runs on the affine thread and
    /// must not call bridged view operations.
    pub fn subscribe(&self, f: impl Fn(&View, &ViewEvent) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.shared.subscribers.lock().push((id, Arc::new(f)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.shared.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|(sub, _)| *sub != id);
        subscribers.len() != before
    }

    /// Delivers `event` to every subscriber. Returns whether there were any.
    pub(crate) fn emit(&self, event: ViewEvent) -> bool {
        let subscribers: Vec<Subscriber> =
            self.shared.subscribers.lock().iter().map(|(_, f)| f.clone()).collect();
        trace!(event = event.name(), count = subscribers.len(), "emit");
        for subscriber in &subscribers {
            subscriber(self, &event);
        }
        !subscribers.is_empty()
    }
}
