//! Window operations page script may call by name.
//!
//! Every view binds the [`ScriptOp`] names into its page when it is created.
//! Calls from the page arrive on the affine thread as engine events and run
//! there directly; [`View::invoke`] reaches the same table from other threads.

use serde_json::Value;
use strum::VariantNames;
use tracing::{debug, warn};

use super::View;
use crate::error::{Error, Result};
use crate::sys::affine::AffineContext;
use crate::sys::engine::WindowOp;

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::EnumString, strum::IntoStaticStr, strum::VariantNames)]
pub enum ScriptOp {
    MoveToCenter,
    /// `(title: string)`
    SetWindowTitle,
    EnableAutoTitle,
    DisableAutoTitle,
    ShowDockIcon,
    HideDockIcon,
    ShowWindow,
    HideWindow,
    ShowDevTools,
    ToTop,
    /// `(topmost: bool)`
    MostTop,
    MinimizeWindow,
    MaximizeWindow,
    RestoreWindow,
    DestroyWindow,
}

impl ScriptOp {
    pub fn name(self) -> &'static str { self.into() }

    fn arg<'a>(self, args: &'a [Value]) -> Result<&'a Value> {
        args.first().ok_or_else(|| Error::ScriptArgs {
            op: self.name(),
            reason: "missing argument".into(),
        })
    }

    fn str_arg(self, args: &[Value]) -> Result<&str> {
        self.arg(args)?.as_str().ok_or_else(|| Error::ScriptArgs {
            op: self.name(),
            reason: "expected a string".into(),
        })
    }

    fn bool_arg(self, args: &[Value]) -> Result<bool> {
        self.arg(args)?.as_bool().ok_or_else(|| Error::ScriptArgs {
            op: self.name(),
            reason: "expected a bool".into(),
        })
    }
}

impl View {
    pub(super) fn bind_script_ops(&self, cx: &AffineContext) {
        for name in ScriptOp::VARIANTS {
            cx.engine().bind_function(self.engine_window(), name);
        }
    }

    /// Runs the script operation `name` as if page script had called it.
    pub fn invoke(&self, name: &str, args: Vec<Value>) -> Result<()> {
        let name = name.to_owned();
        self.bridged(move |cx, view| view.call_script(cx, &name, &args))?
    }

    pub(super) fn on_script_call(&self, cx: &AffineContext, name: &str, args: &[Value]) {
        if let Err(e) = self.call_script(cx, name, args) {
            warn!(handle = %self.handle(), name, "script call failed: {e}");
        }
    }

    fn call_script(&self, cx: &AffineContext, name: &str, args: &[Value]) -> Result<()> {
        if self.is_destroyed() {
            return Err(Error::ViewDestroyed);
        }
        let op: ScriptOp = name.parse().map_err(|_| Error::UnknownScriptOp(name.to_owned()))?;
        debug!(handle = %self.handle(), op = op.name(), "script call");

        let engine = cx.engine();
        let (handle, window) = (self.handle(), self.engine_window());
        match op {
            ScriptOp::MoveToCenter => engine.apply(handle, WindowOp::Center),
            ScriptOp::SetWindowTitle => engine.set_title(window, op.str_arg(args)?),
            ScriptOp::EnableAutoTitle => {
                self.shared.auto_title.store(true, std::sync::atomic::Ordering::Release);
                // Not ready yet: the next title change syncs it.
                if self.ready().is_closed() {
                    engine.set_title(window, &engine.title(window));
                }
            }
            ScriptOp::DisableAutoTitle => self.disable_auto_title(),
            ScriptOp::ShowDockIcon => engine.apply(handle, WindowOp::TaskbarIcon(true)),
            ScriptOp::HideDockIcon => engine.apply(handle, WindowOp::TaskbarIcon(false)),
            ScriptOp::ShowWindow => engine.apply(handle, WindowOp::Show),
            ScriptOp::HideWindow => engine.apply(handle, WindowOp::Hide),
            ScriptOp::ShowDevTools => engine.show_devtools(window),
            ScriptOp::ToTop => engine.apply(handle, WindowOp::ToTop),
            ScriptOp::MostTop => engine.apply(handle, WindowOp::Topmost(op.bool_arg(args)?)),
            ScriptOp::MinimizeWindow => engine.apply(handle, WindowOp::Minimize),
            ScriptOp::MaximizeWindow => engine.apply(handle, WindowOp::Maximize),
            ScriptOp::RestoreWindow => engine.apply(handle, WindowOp::Restore),
            ScriptOp::DestroyWindow => self.destroy_on_thread(cx),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::runtime::test_support::*;
    use crate::view::ViewOptions;

    #[test]
    fn every_op_is_bound_on_creation() {
        let h = spawn_headless();
        let view = View::new(&h.runtime, ViewOptions::default()).unwrap();
        let bound = h.controller.window(view.handle()).unwrap().bindings;
        assert_eq!(ScriptOp::VARIANTS.len(), bound.len());
        assert!(bound.iter().any(|name| name == "MoveToCenter"));
        assert!(bound.iter().any(|name| name == "DestroyWindow"));
    }

    #[test]
    fn page_script_drives_the_window() {
        let h = spawn_headless();
        let view = View::new(&h.runtime, ViewOptions::default()).unwrap();
        let handle = view.handle();

        h.controller.script_call(handle, "SetWindowTitle", vec![json!("From page")]);
        h.controller.script_call(handle, "MostTop", vec![json!(true)]);
        h.controller.script_call(handle, "HideDockIcon", vec![]);
        assert!(eventually(|| !h.controller.window(handle).unwrap().taskbar_icon));

        let record = h.controller.window(handle).unwrap();
        assert_eq!("From page", record.window_title);
        assert!(record.topmost);

        h.controller.script_call(handle, "DestroyWindow", vec![]);
        assert!(view.destroyed().wait_timeout(std::time::Duration::from_secs(5)));
        assert!(h.controller.window(handle).unwrap().destroyed);
    }

    #[test_log::test]
    fn bad_script_calls_are_logged_not_fatal() {
        let h = spawn_headless();
        let view = View::new(&h.runtime, ViewOptions::default()).unwrap();
        let handle = view.handle();

        h.controller.script_call(handle, "MostTop", vec![json!("yes")]);
        h.controller.script_call(handle, "ToTop", vec![]);
        assert!(eventually(|| h.controller.window(handle).unwrap().raised == 1));
        assert!(!h.controller.window(handle).unwrap().topmost);
        assert!(!view.is_destroyed());
    }

    #[test]
    fn invoke_from_another_thread() {
        let h = spawn_headless();
        let view = View::new(&h.runtime, ViewOptions::default()).unwrap();

        view.invoke("MaximizeWindow", vec![]).unwrap();
        assert!(h.controller.window(view.handle()).unwrap().maximized);

        assert!(matches!(view.invoke("Launch", vec![]), Err(Error::UnknownScriptOp(name)) if name == "Launch"));
        assert!(matches!(
            view.invoke("SetWindowTitle", vec![json!(3)]),
            Err(Error::ScriptArgs { op: "SetWindowTitle", .. })
        ));

        view.invoke("DestroyWindow", vec![]).unwrap();
        assert!(view.is_destroyed());
        assert!(matches!(view.invoke("ShowWindow", vec![]), Err(Error::ViewDestroyed)));
    }
}
