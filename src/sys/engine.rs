//! Binding surface of the native rendering engine.
//!
//! Every method is called on the affine thread only, which is why the trait
//! requires neither `Send` nor `Sync` and takes `&self`: engine callbacks may
//! re-enter the engine while one of its calls is still on the stack.

use std::borrow::Cow;
use std::fmt;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::drop_files::{DropHandle, DropQuery};
use super::message::WindowHandle;
use crate::common::config::WindowSettings;

/// Engine-side window handle, unique while the window is alive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EngineWindow(u64);

impl EngineWindow {
    pub fn new(raw: u64) -> EngineWindow { EngineWindow(raw) }

    pub fn get(&self) -> u64 { self.0 }
}

impl fmt::Display for EngineWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "wke#{}", self.0) }
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("engine initialization failed: {0}")]
    Init(String),
    #[error("could not create window: {0}")]
    CreateWindow(String),
    #[error("could not load icon {}: {reason}", path.display())]
    Icon { path: PathBuf, reason: String },
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub temp_dir: PathBuf,
    pub cookie_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowOptions {
    pub bounds: Bounds,
    pub transparent: bool,
    pub accept_files: bool,
}

impl From<&WindowSettings> for WindowOptions {
    fn from(settings: &WindowSettings) -> Self {
        WindowOptions {
            bounds: Bounds {
                x: settings.x,
                y: settings.y,
                width: settings.width,
                height: settings.height,
            },
            transparent: settings.transparent,
            accept_files: settings.accept_files,
        }
    }
}

/// Window-manager operations on the host window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowOp {
    Show,
    Hide,
    Minimize,
    Maximize,
    Restore,
    ToTop,
    Topmost(bool),
    Caption(bool),
    TaskbarIcon(bool),
    Center,
    AcceptFiles(bool),
}

/// Callbacks the engine raises for a window.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    DocumentReady,
    TitleChanged(String),
    /// Page script called a function bound with [`Engine::bind_function`].
    ScriptCall { name: String, args: Vec<serde_json::Value> },
    Destroyed,
}

pub type EventSink = Rc<dyn Fn(EngineEvent)>;

/// Read-only file tree served under a reserved URL scheme.
pub trait AssetSource: Send + Sync {
    fn read(&self, path: &str) -> Option<Cow<'_, [u8]>>;
}

pub trait Engine {
    fn init(&self, settings: &EngineSettings) -> Result<(), EngineError>;

    /// Must be called before any page referencing `name` is loaded.
    fn register_file_system(&self, name: &str, fs: Arc<dyn AssetSource>);

    fn create_window(
        &self,
        options: &WindowOptions,
        events: EventSink,
    ) -> Result<(EngineWindow, WindowHandle), EngineError>;

    fn destroy_window(&self, window: EngineWindow);

    fn load_url(&self, window: EngineWindow, url: &str);

    fn reload(&self, window: EngineWindow);

    /// Title of the loaded document.
    fn title(&self, window: EngineWindow) -> String;

    /// Title of the host window.
    fn set_title(&self, window: EngineWindow, title: &str);

    fn show_devtools(&self, window: EngineWindow);

    /// Exposes `name` to page script in `window`.
    fn bind_function(&self, window: EngineWindow, name: &str);

    fn set_icon(&self, handle: WindowHandle, path: &Path) -> Result<(), EngineError>;

    fn apply(&self, handle: WindowHandle, op: WindowOp);

    /// Opens the file list behind a drop-files message.
    fn drag_query(&self, drop: DropHandle) -> Option<Box<dyn DropQuery + '_>>;
}
