//! In-process backend: an engine and message queue with no native window system.
//!
//! [`HeadlessController`] plays the role of the OS and the user. It posts input
//! (close requests, keys, dropped files, page events) from any thread and reads
//! back what the engine did to each window.

use std::cell::{Cell, RefCell};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::drop_files::{DropHandle, DropQuery};
use super::engine::{
    AssetSource, Bounds, Engine, EngineError, EngineEvent, EngineSettings, EngineWindow,
    EventSink, WindowOp, WindowOptions,
};
use super::message::{
    APP_MESSAGE_BASE, KnownMessage, Message, MessageSource, Waker, WindowHandle,
};
use crate::common::collections::HashMap;

/// Page finished loading in `message.window`.
pub const APP_DOCUMENT_READY: u32 = APP_MESSAGE_BASE + 1;
/// Page title changed; `wparam` is a payload token.
pub const APP_PAGE_TITLE: u32 = APP_MESSAGE_BASE + 2;
/// Page script called a bound function; `wparam` is a payload token.
pub const APP_SCRIPT_CALL: u32 = APP_MESSAGE_BASE + 3;

const ICON_MAGIC: [u8; 4] = [0, 0, 1, 0];

/// Engine-side state of one window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowRecord {
    pub window: EngineWindow,
    pub handle: WindowHandle,
    pub bounds: Bounds,
    pub transparent: bool,
    pub url: Option<String>,
    pub page_title: String,
    pub window_title: String,
    pub visible: bool,
    pub minimized: bool,
    pub maximized: bool,
    pub topmost: bool,
    pub caption: bool,
    pub taskbar_icon: bool,
    pub accept_files: bool,
    pub raised: usize,
    pub reloads: usize,
    pub devtools_opened: usize,
    pub icon: Option<PathBuf>,
    /// Function names exposed to page script, in binding order.
    pub bindings: Vec<String>,
    pub destroyed: bool,
}

enum Payload {
    Files(Vec<String>),
    Title(String),
    Script { name: String, args: Vec<serde_json::Value> },
}

struct Shared {
    tx: Sender<Message>,
    rx: Receiver<Message>,
    windows: Mutex<HashMap<WindowHandle, WindowRecord>>,
    payloads: Mutex<HashMap<usize, Payload>>,
    file_systems: Mutex<HashMap<String, Arc<dyn AssetSource>>>,
    settings: Mutex<Option<EngineSettings>>,
    next_token: AtomicUsize,
    next_window: AtomicU64,
    released_drops: AtomicUsize,
    translated: AtomicUsize,
    auto_ready: AtomicBool,
    fail_init: AtomicBool,
}

#[derive(Clone)]
pub struct HeadlessController {
    shared: Arc<Shared>,
}

impl Default for HeadlessController {
    fn default() -> Self { Self::new() }
}

impl HeadlessController {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        HeadlessController {
            shared: Arc::new(Shared {
                tx,
                rx,
                windows: Mutex::new(HashMap::default()),
                payloads: Mutex::new(HashMap::default()),
                file_systems: Mutex::new(HashMap::default()),
                settings: Mutex::new(None),
                next_token: AtomicUsize::new(1),
                next_window: AtomicU64::new(1),
                released_drops: AtomicUsize::new(0),
                translated: AtomicUsize::new(0),
                auto_ready: AtomicBool::new(true),
                fail_init: AtomicBool::new(false),
            }),
        }
    }

    /// Builds the engine and message source. Call on the affine thread.
    pub fn backend(&self) -> (HeadlessEngine, HeadlessSource) {
        let core = Rc::new(Core {
            shared: self.shared.clone(),
            sinks: RefCell::new(HashMap::default()),
        });
        (HeadlessEngine { core: core.clone() }, HeadlessSource { core })
    }

    /// When set (the default), loading a URL completes immediately. Otherwise
    /// pages stay loading until [`Self::document_ready`].
    pub fn set_auto_ready(&self, auto: bool) { self.shared.auto_ready.store(auto, Ordering::SeqCst); }

    pub fn set_fail_init(&self, fail: bool) { self.shared.fail_init.store(fail, Ordering::SeqCst); }

    pub fn post(&self, message: Message) { let _ = self.shared.tx.send(message); }

    pub fn close(&self, handle: WindowHandle) {
        self.post(Message::known(handle, KnownMessage::Close, 0));
    }

    pub fn key_down(&self, handle: WindowHandle, vk: usize) {
        self.post(Message::known(handle, KnownMessage::KeyDown, vk));
    }

    /// Posts a drop-files message carrying `paths`. Returns the drop handle.
    pub fn drop_files(&self, handle: WindowHandle, paths: &[&str]) -> DropHandle {
        let drop = self.stage_drop(paths);
        self.post(Message::known(handle, KnownMessage::DropFiles, drop.0));
        drop
    }

    /// Prepares a drop without posting its message.
    pub fn stage_drop(&self, paths: &[&str]) -> DropHandle {
        DropHandle(self.stash(Payload::Files(paths.iter().map(|p| p.to_string()).collect())))
    }

    pub fn document_ready(&self, handle: WindowHandle) {
        self.post(Message::new(handle, APP_DOCUMENT_READY, 0, 0));
    }

    pub fn page_title(&self, handle: WindowHandle, title: &str) {
        let token = self.stash(Payload::Title(title.to_string()));
        self.post(Message::new(handle, APP_PAGE_TITLE, token, 0));
    }

    /// Page script in `handle` calls the bound function `name`.
    pub fn script_call(&self, handle: WindowHandle, name: &str, args: Vec<serde_json::Value>) {
        let token = self.stash(Payload::Script { name: name.to_string(), args });
        self.post(Message::new(handle, APP_SCRIPT_CALL, token, 0));
    }

    pub fn window(&self, handle: WindowHandle) -> Option<WindowRecord> {
        self.shared.windows.lock().get(&handle).cloned()
    }

    pub fn windows(&self) -> Vec<WindowRecord> {
        let mut windows: Vec<_> = self.shared.windows.lock().values().cloned().collect();
        windows.sort_by_key(|w| w.window.get());
        windows
    }

    /// Number of drop handles released so far.
    pub fn released_drops(&self) -> usize { self.shared.released_drops.load(Ordering::SeqCst) }

    pub fn is_drop_pending(&self, drop: DropHandle) -> bool {
        self.shared.payloads.lock().contains_key(&drop.0)
    }

    pub fn translated(&self) -> usize { self.shared.translated.load(Ordering::SeqCst) }

    pub fn file_systems(&self) -> Vec<String> {
        let mut names: Vec<_> = self.shared.file_systems.lock().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn settings(&self) -> Option<EngineSettings> { self.shared.settings.lock().clone() }

    fn stash(&self, payload: Payload) -> usize {
        let token = self.shared.next_token.fetch_add(1, Ordering::SeqCst);
        self.shared.payloads.lock().insert(token, payload);
        token
    }
}

/// Affine-thread half shared by the engine and the message source.
struct Core {
    shared: Arc<Shared>,
    sinks: RefCell<HashMap<WindowHandle, (EngineWindow, EventSink)>>,
}

impl Core {
    fn handle_of(&self, window: EngineWindow) -> Option<WindowHandle> {
        self.sinks.borrow().iter().find(|(_, (w, _))| *w == window).map(|(h, _)| *h)
    }

    fn update(&self, handle: WindowHandle, f: impl FnOnce(&mut WindowRecord)) {
        match self.shared.windows.lock().get_mut(&handle) {
            Some(record) => f(record),
            None => warn!(%handle, "operation on unknown window"),
        }
    }

    fn update_window(&self, window: EngineWindow, f: impl FnOnce(&mut WindowRecord)) {
        match self.handle_of(window) {
            Some(handle) => self.update(handle, f),
            None => warn!(%window, "operation on destroyed window"),
        }
    }

    /// Sinks may re-enter the engine, so no borrow is held while they run.
    fn fire(&self, handle: WindowHandle, event: EngineEvent) {
        let sink = self.sinks.borrow().get(&handle).map(|(_, sink)| sink.clone());
        match sink {
            Some(sink) => {
                trace!(%handle, ?event, "engine event");
                sink(event);
            }
            None => debug!(%handle, ?event, "event for window without sink"),
        }
    }

    fn destroy(&self, handle: WindowHandle) {
        let Some((_, sink)) = self.sinks.borrow_mut().remove(&handle) else {
            return;
        };
        self.update(handle, |record| {
            record.destroyed = true;
            record.visible = false;
        });
        debug!(%handle, "window destroyed");
        sink(EngineEvent::Destroyed);
    }

    fn resolve_title(&self, url: &str) -> String {
        let Some((scheme, path)) = url.split_once("://") else {
            return url.to_string();
        };
        let fs = self.shared.file_systems.lock().get(scheme).cloned();
        let Some(fs) = fs else {
            return url.to_string();
        };
        let Some(bytes) = fs.read(path) else {
            warn!(url, "asset not found");
            return url.to_string();
        };
        let text = String::from_utf8_lossy(&bytes);
        text.split_once("<title>")
            .and_then(|(_, rest)| rest.split_once("</title>"))
            .map(|(title, _)| title.trim().to_string())
            .unwrap_or_else(|| path.to_string())
    }

    fn take_payload(&self, token: usize) -> Option<Payload> { self.shared.payloads.lock().remove(&token) }
}

pub struct HeadlessEngine {
    core: Rc<Core>,
}

impl Engine for HeadlessEngine {
    fn init(&self, settings: &EngineSettings) -> Result<(), EngineError> {
        if self.core.shared.fail_init.load(Ordering::SeqCst) {
            return Err(EngineError::Init("engine library refused to load".into()));
        }
        if !settings.temp_dir.is_dir() {
            return Err(EngineError::Init(format!(
                "{} is not a directory",
                settings.temp_dir.display()
            )));
        }
        *self.core.shared.settings.lock() = Some(settings.clone());
        Ok(())
    }

    fn register_file_system(&self, name: &str, fs: Arc<dyn AssetSource>) {
        debug!(name, "file system registered");
        self.core.shared.file_systems.lock().insert(name.to_string(), fs);
    }

    fn create_window(
        &self,
        options: &WindowOptions,
        events: EventSink,
    ) -> Result<(EngineWindow, WindowHandle), EngineError> {
        let id = self.core.shared.next_window.fetch_add(1, Ordering::SeqCst);
        let window = EngineWindow::new(id);
        let handle = WindowHandle::new(0x1000 + (id as usize) * 0x10);
        let record = WindowRecord {
            window,
            handle,
            bounds: options.bounds,
            transparent: options.transparent,
            url: None,
            page_title: String::new(),
            window_title: String::new(),
            visible: true,
            minimized: false,
            maximized: false,
            topmost: false,
            caption: true,
            taskbar_icon: true,
            accept_files: options.accept_files,
            raised: 0,
            reloads: 0,
            devtools_opened: 0,
            icon: None,
            bindings: Vec::new(),
            destroyed: false,
        };
        self.core.shared.windows.lock().insert(handle, record);
        self.core.sinks.borrow_mut().insert(handle, (window, events));
        Ok((window, handle))
    }

    fn destroy_window(&self, window: EngineWindow) {
        if let Some(handle) = self.core.handle_of(window) {
            self.core.destroy(handle);
        }
    }

    fn load_url(&self, window: EngineWindow, url: &str) {
        let Some(handle) = self.core.handle_of(window) else {
            return;
        };
        self.core.update(handle, |record| record.url = Some(url.to_string()));
        if self.core.shared.auto_ready.load(Ordering::SeqCst) {
            let title = self.core.resolve_title(url);
            self.core.update(handle, |record| record.page_title = title.clone());
            self.core.fire(handle, EngineEvent::TitleChanged(title));
            self.core.fire(handle, EngineEvent::DocumentReady);
        }
    }

    fn reload(&self, window: EngineWindow) {
        let Some(handle) = self.core.handle_of(window) else {
            return;
        };
        self.core.update(handle, |record| record.reloads += 1);
        if self.core.shared.auto_ready.load(Ordering::SeqCst) {
            self.core.fire(handle, EngineEvent::DocumentReady);
        }
    }

    fn title(&self, window: EngineWindow) -> String {
        self.core
            .handle_of(window)
            .and_then(|handle| self.core.shared.windows.lock().get(&handle).map(|r| r.page_title.clone()))
            .unwrap_or_default()
    }

    fn set_title(&self, window: EngineWindow, title: &str) {
        self.core.update_window(window, |record| record.window_title = title.to_string());
    }

    fn show_devtools(&self, window: EngineWindow) {
        self.core.update_window(window, |record| record.devtools_opened += 1);
    }

    fn bind_function(&self, window: EngineWindow, name: &str) {
        self.core.update_window(window, |record| {
            if !record.bindings.iter().any(|bound| bound == name) {
                record.bindings.push(name.to_string());
            }
        });
    }

    fn set_icon(&self, handle: WindowHandle, path: &Path) -> Result<(), EngineError> {
        let icon_error = |reason: String| EngineError::Icon { path: path.to_path_buf(), reason };
        let bytes = std::fs::read(path).map_err(|e| icon_error(e.to_string()))?;
        if !bytes.starts_with(&ICON_MAGIC) {
            return Err(icon_error("not an icon resource".into()));
        }
        self.core.update(handle, |record| record.icon = Some(path.to_path_buf()));
        Ok(())
    }

    fn apply(&self, handle: WindowHandle, op: WindowOp) {
        self.core.update(handle, |record| match op {
            WindowOp::Show => record.visible = true,
            WindowOp::Hide => record.visible = false,
            WindowOp::Minimize => {
                record.minimized = true;
                record.maximized = false;
            }
            WindowOp::Maximize => {
                record.maximized = true;
                record.minimized = false;
            }
            WindowOp::Restore => {
                record.maximized = false;
                record.minimized = false;
            }
            WindowOp::ToTop => record.raised += 1,
            WindowOp::Topmost(on) => record.topmost = on,
            WindowOp::Caption(on) => record.caption = on,
            WindowOp::TaskbarIcon(on) => record.taskbar_icon = on,
            WindowOp::AcceptFiles(on) => record.accept_files = on,
            WindowOp::Center => {
                const SCREEN: (i32, i32) = (1920, 1080);
                record.bounds.x = (SCREEN.0 - record.bounds.width) / 2;
                record.bounds.y = (SCREEN.1 - record.bounds.height) / 2;
            }
        });
    }

    fn drag_query(&self, drop: DropHandle) -> Option<Box<dyn DropQuery + '_>> {
        match self.core.take_payload(drop.0) {
            Some(Payload::Files(paths)) => Some(Box::new(HeadlessDrop {
                shared: &self.core.shared,
                paths: paths.iter().map(|p| p.encode_utf16().collect()).collect(),
                finished: Cell::new(false),
            })),
            Some(Payload::Title(_) | Payload::Script { .. }) | None => {
                warn!(?drop, "unknown drop handle");
                None
            }
        }
    }
}

struct HeadlessDrop<'a> {
    shared: &'a Shared,
    paths: Vec<Vec<u16>>,
    finished: Cell<bool>,
}

impl DropQuery for HeadlessDrop<'_> {
    fn count(&self) -> u32 { self.paths.len() as u32 }

    fn path_len(&self, index: u32) -> usize { self.paths[index as usize].len() }

    fn copy_path(&self, index: u32, buf: &mut [u16]) -> usize {
        let Some(last) = buf.len().checked_sub(1) else {
            return 0;
        };
        let path = &self.paths[index as usize];
        let n = path.len().min(last);
        buf[..n].copy_from_slice(&path[..n]);
        buf[n] = 0;
        n
    }

    fn finish(&mut self) {
        if !self.finished.replace(true) {
            self.shared.released_drops.fetch_add(1, Ordering::SeqCst);
        }
    }
}

pub struct HeadlessSource {
    core: Rc<Core>,
}

impl MessageSource for HeadlessSource {
    fn next_message(&mut self) -> Option<Message> {
        match self.core.shared.rx.recv() {
            Ok(message) if message.is(KnownMessage::Quit) => None,
            Ok(message) => Some(message),
            Err(_) => None,
        }
    }

    fn translate(&mut self, message: &Message) {
        if !message.is(KnownMessage::KeyDown) {
            return;
        }
        self.core.shared.translated.fetch_add(1, Ordering::SeqCst);
        if let Some(ch) = char::from_u32(message.wparam as u32).filter(|c| c.is_ascii_digit() || c.is_ascii_uppercase()) {
            let _ = self.core.shared.tx.send(Message::known(
                message.window,
                KnownMessage::Char,
                ch.to_ascii_lowercase() as usize,
            ));
        }
    }

    fn dispatch(&mut self, message: &Message) {
        match message.kind {
            APP_DOCUMENT_READY => self.core.fire(message.window, EngineEvent::DocumentReady),
            APP_PAGE_TITLE => {
                if let Some(Payload::Title(title)) = self.core.take_payload(message.wparam) {
                    self.core.update(message.window, |record| record.page_title = title.clone());
                    self.core.fire(message.window, EngineEvent::TitleChanged(title));
                }
            }
            APP_SCRIPT_CALL => {
                if let Some(Payload::Script { name, args }) = self.core.take_payload(message.wparam) {
                    let bound = self
                        .core
                        .shared
                        .windows
                        .lock()
                        .get(&message.window)
                        .is_some_and(|record| record.bindings.contains(&name));
                    if bound {
                        self.core.fire(message.window, EngineEvent::ScriptCall { name, args });
                    } else {
                        warn!(window = %message.window, name, "call to unbound script function");
                    }
                }
            }
            _ if message.is(KnownMessage::Close) => self.core.destroy(message.window),
            _ => {}
        }
    }

    fn waker(&self) -> Arc<dyn Waker> { Arc::new(HeadlessWaker { tx: self.core.shared.tx.clone() }) }
}

struct HeadlessWaker {
    tx: Sender<Message>,
}

impl Waker for HeadlessWaker {
    fn wake(&self) { let _ = self.tx.send(Message::wake()); }

    fn quit(&self) { let _ = self.tx.send(Message::known(WindowHandle::NONE, KnownMessage::Quit, 0)); }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::sys::drop_files::DropGuard;

    fn options() -> WindowOptions {
        WindowOptions {
            bounds: Bounds { x: 0, y: 0, width: 800, height: 600 },
            transparent: false,
            accept_files: true,
        }
    }

    fn recording_sink() -> (EventSink, Rc<RefCell<Vec<EngineEvent>>>) {
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink_events = events.clone();
        (Rc::new(move |event| sink_events.borrow_mut().push(event)), events)
    }

    struct Pages;

    impl AssetSource for Pages {
        fn read(&self, path: &str) -> Option<Cow<'_, [u8]>> {
            (path == "index.html").then(|| Cow::Borrowed(&b"<html><title> Home </title></html>"[..]))
        }
    }

    #[test]
    fn load_url_fires_title_then_ready() {
        let controller = HeadlessController::new();
        let (engine, _source) = controller.backend();
        let (sink, events) = recording_sink();
        let (window, handle) = engine.create_window(&options(), sink).unwrap();

        engine.register_file_system("app", Arc::new(Pages));
        engine.load_url(window, "app://index.html");

        assert_eq!(
            vec![EngineEvent::TitleChanged("Home".into()), EngineEvent::DocumentReady],
            *events.borrow()
        );
        assert_eq!("Home", engine.title(window));
        assert_eq!(Some("app://index.html".into()), controller.window(handle).unwrap().url);
    }

    #[test]
    fn close_through_default_dispatch_destroys() {
        let controller = HeadlessController::new();
        let (engine, mut source) = controller.backend();
        let (sink, events) = recording_sink();
        let (_, handle) = engine.create_window(&options(), sink).unwrap();

        controller.close(handle);
        let message = source.next_message().unwrap();
        source.dispatch(&message);

        assert_eq!(vec![EngineEvent::Destroyed], *events.borrow());
        assert!(controller.window(handle).unwrap().destroyed);
    }

    #[test]
    fn drop_query_releases_once() {
        let controller = HeadlessController::new();
        let (engine, _source) = controller.backend();
        let (sink, _) = recording_sink();
        let (_, handle) = engine.create_window(&options(), sink).unwrap();

        let drop = controller.drop_files(handle, &["/a", "/b"]);
        assert!(controller.is_drop_pending(drop));
        let paths = DropGuard::new(engine.drag_query(drop).unwrap()).paths();
        assert_eq!(vec![PathBuf::from("/a"), PathBuf::from("/b")], paths);
        assert_eq!(1, controller.released_drops());
        assert!(engine.drag_query(drop).is_none());
    }

    #[test]
    fn waker_unblocks_and_quits() {
        let controller = HeadlessController::new();
        let (_engine, mut source) = controller.backend();
        let waker = source.waker();
        waker.wake();
        waker.quit();
        assert_eq!(Some(Message::wake()), source.next_message());
        assert_eq!(None, source.next_message());
    }

    #[test]
    fn icon_must_be_an_icon() {
        let controller = HeadlessController::new();
        let (engine, _source) = controller.backend();
        let (sink, _) = recording_sink();
        let (_, handle) = engine.create_window(&options(), sink).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.ico");
        std::fs::write(&bad, b"PNG").unwrap();
        assert!(matches!(engine.set_icon(handle, &bad), Err(EngineError::Icon { .. })));

        let good = dir.path().join("good.ico");
        std::fs::write(&good, [0, 0, 1, 0, 1, 0]).unwrap();
        engine.set_icon(handle, &good).unwrap();
        assert_eq!(Some(good), controller.window(handle).unwrap().icon);
    }

    #[test]
    fn script_calls_reach_only_bound_functions() {
        let controller = HeadlessController::new();
        let (engine, mut source) = controller.backend();
        let (sink, events) = recording_sink();
        let (window, handle) = engine.create_window(&options(), sink).unwrap();
        engine.bind_function(window, "ToTop");
        engine.bind_function(window, "ToTop");
        assert_eq!(vec!["ToTop".to_string()], controller.window(handle).unwrap().bindings);

        controller.script_call(handle, "Unbound", vec![]);
        controller.script_call(handle, "ToTop", vec![serde_json::json!(1)]);
        for _ in 0..2 {
            let message = source.next_message().unwrap();
            source.dispatch(&message);
        }

        assert_eq!(
            vec![EngineEvent::ScriptCall { name: "ToTop".into(), args: vec![serde_json::json!(1)] }],
            *events.borrow()
        );
    }

    #[test]
    fn key_translation_posts_char() {
        let controller = HeadlessController::new();
        let (_engine, mut source) = controller.backend();
        let handle = WindowHandle::new(0x1010);
        controller.key_down(handle, 'A' as usize);
        let key = source.next_message().unwrap();
        source.translate(&key);
        let ch = source.next_message().unwrap();
        assert!(ch.is(KnownMessage::Char));
        assert_eq!('a' as usize, ch.wparam);
        assert_eq!(1, controller.translated());
    }
}
