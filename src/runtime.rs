//! Owner of the affine thread and the bridge into it.

use std::future::Future;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use tracing::{debug, error, info, instrument};

use crate::common::config::Config;
use crate::error::{Error, Result};
use crate::model::ViewRegistry;
use crate::sys::affine::{self, AffineContext};
use crate::sys::engine::{AssetSource, Engine, EngineError, EngineSettings};
use crate::sys::latch::Latch;
use crate::sys::message::MessageSource;
use crate::sys::run_loop::RunLoop;
use crate::sys::scheduler::{self, Scheduler};

/// Name the devtools front-end is served under.
pub const DEVTOOLS_FS: &str = "__devtools__";

const AFFINE_THREAD_NAME: &str = "blink-affine";

/// Cloneable handle to one affine thread, its command queue and its views.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<Inner>,
}

struct Inner {
    scheduler: Scheduler,
    registry: ViewRegistry,
    config: Config,
    started: Arc<Latch>,
    stopping: Arc<AtomicBool>,
    affine_thread: ThreadId,
}

/// Join handle of a spawned affine thread.
pub struct AffineThread {
    handle: JoinHandle<()>,
}

impl AffineThread {
    /// Waits for the thread to exit. An `Err` carries the panic of a command
    /// or native call that brought the thread down.
    pub fn join(self) -> thread::Result<()> { self.handle.join() }

    pub fn is_finished(&self) -> bool { self.handle.is_finished() }
}

pub struct Builder {
    config: Config,
    file_systems: Vec<(String, Arc<dyn AssetSource>)>,
}

impl Builder {
    /// Registers `fs` under `name` before any view exists.
    pub fn file_system(mut self, name: impl Into<String>, fs: Arc<dyn AssetSource>) -> Self {
        self.file_systems.push((name.into(), fs));
        self
    }

    /// Starts a dedicated affine thread. `factory` runs on that thread and
    /// builds the engine and message source there. Returns once the engine is
    /// initialized and the thread is consuming commands.
    #[instrument(name = "runtime::spawn", skip_all)]
    pub fn spawn<E, S, F>(self, factory: F) -> Result<(Runtime, AffineThread)>
    where
        E: Engine + 'static,
        S: MessageSource + 'static,
        F: FnOnce() -> (E, S) + Send + 'static,
    {
        let settings = prepare(&self.config)?;
        let (tx, queue) = scheduler::channel(self.config.runtime.queue_capacity);
        let registry = ViewRegistry::new();
        let started = Arc::new(Latch::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let (init_tx, init_rx) = crossbeam_channel::bounded(1);

        let handle = {
            let registry = registry.clone();
            let started = started.clone();
            let stopping = stopping.clone();
            let file_systems = self.file_systems;
            thread::Builder::new()
                .name(AFFINE_THREAD_NAME.into())
                .spawn(move || {
                    let (engine, source) = factory();
                    let engine: Rc<dyn Engine> = Rc::new(engine);
                    if let Err(e) = boot(engine.as_ref(), &settings, file_systems) {
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                    let installed = affine::install(engine.clone());
                    let _ = init_tx.send(Ok(source.waker()));
                    let cx = AffineContext::from_engine(engine);
                    RunLoop::new(queue, source, registry, started, stopping, cx, installed).run();
                })
                .map_err(Error::Spawn)?
        };
        let affine_thread = handle.thread().id();

        let waker = match init_rx.recv() {
            Ok(Ok(waker)) => waker,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e.into());
            }
            Err(_) => {
                error!("affine thread exited during startup");
                let _ = handle.join();
                return Err(Error::AffineThreadGone);
            }
        };
        started.wait();
        info!("runtime started");

        let runtime = Runtime {
            inner: Arc::new(Inner {
                scheduler: Scheduler::new(tx, waker),
                registry,
                config: self.config,
                started,
                stopping,
                affine_thread,
            }),
        };
        Ok((runtime, AffineThread { handle }))
    }

    /// Makes the current thread the affine thread. The caller drives the
    /// returned loop, either with [`RunLoop::run`] or by calling
    /// [`RunLoop::run_pending`] and [`RunLoop::route`] from its own pump.
    /// Bridged calls made before the loop runs block until it does.
    #[instrument(name = "runtime::hosted", skip_all)]
    pub fn hosted<E, S>(self, engine: E, source: S) -> Result<(Runtime, RunLoop<S>)>
    where
        E: Engine + 'static,
        S: MessageSource,
    {
        let settings = prepare(&self.config)?;
        let engine: Rc<dyn Engine> = Rc::new(engine);
        boot(engine.as_ref(), &settings, self.file_systems)?;

        let (tx, queue) = scheduler::channel(self.config.runtime.queue_capacity);
        let registry = ViewRegistry::new();
        let started = Arc::new(Latch::new());
        let stopping = Arc::new(AtomicBool::new(false));
        let waker = source.waker();
        let installed = affine::install(engine.clone());
        let run_loop = RunLoop::new(
            queue,
            source,
            registry.clone(),
            started.clone(),
            stopping.clone(),
            AffineContext::from_engine(engine),
            installed,
        );

        let runtime = Runtime {
            inner: Arc::new(Inner {
                scheduler: Scheduler::new(tx, waker),
                registry,
                config: self.config,
                started,
                stopping,
                affine_thread: thread::current().id(),
            }),
        };
        Ok((runtime, run_loop))
    }
}

fn prepare(config: &Config) -> Result<EngineSettings> {
    let temp_dir = config.runtime.temp_dir();
    std::fs::create_dir_all(&temp_dir)
        .map_err(|source| Error::WorkDir { path: temp_dir.clone(), source })?;
    Ok(EngineSettings {
        cookie_file: config.runtime.cookie_file(),
        temp_dir,
    })
}

fn boot(
    engine: &dyn Engine,
    settings: &EngineSettings,
    file_systems: Vec<(String, Arc<dyn AssetSource>)>,
) -> Result<(), EngineError> {
    engine.init(settings)?;
    for (name, fs) in file_systems {
        engine.register_file_system(&name, fs);
    }
    debug!(temp_dir = %settings.temp_dir.display(), "engine initialized");
    Ok(())
}

impl Runtime {
    pub fn builder(config: Config) -> Builder { Builder { config, file_systems: Vec::new() } }

    pub fn spawn<E, S, F>(config: Config, factory: F) -> Result<(Runtime, AffineThread)>
    where
        E: Engine + 'static,
        S: MessageSource + 'static,
        F: FnOnce() -> (E, S) + Send + 'static,
    {
        Self::builder(config).spawn(factory)
    }

    pub fn hosted<E, S>(config: Config, engine: E, source: S) -> Result<(Runtime, RunLoop<S>)>
    where
        E: Engine + 'static,
        S: MessageSource,
    {
        Self::builder(config).hosted(engine, source)
    }

    pub fn config(&self) -> &Config { &self.inner.config }

    pub fn registry(&self) -> &ViewRegistry { &self.inner.registry }

    /// Closed once the affine thread has begun consuming commands.
    pub fn started(&self) -> &Latch { &self.inner.started }

    pub fn is_running(&self) -> bool { !self.inner.stopping.load(Ordering::Acquire) }

    pub fn is_affine_thread(&self) -> bool { thread::current().id() == self.inner.affine_thread }

    /// Queues `command` for the affine thread without waiting for it.
    pub fn submit(&self, command: impl FnOnce() + Send + 'static) -> Result<()> {
        if !self.is_running() {
            return Err(Error::AffineThreadGone);
        }
        Ok(self.inner.scheduler.submit(command)?)
    }

    /// Runs `f` on the affine thread and blocks until it returns.
    ///
    /// Must not be called from the affine thread itself, since that thread
    /// would wait on its own queue; such calls fail with
    /// [`Error::CalledFromAffineThread`].
    pub fn call<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&AffineContext) -> R + Send + 'static,
    {
        if self.is_affine_thread() {
            return Err(Error::CalledFromAffineThread);
        }
        let (tx, rx) = crossbeam_channel::bounded(1);
        self.submit(move || match AffineContext::current() {
            Some(cx) => {
                let _ = tx.send(f(&cx));
            }
            None => error!("bridged command ran without an engine"),
        })?;
        rx.recv().map_err(|_| Error::AffineThreadGone)
    }

    /// Like [`Runtime::call`], but completes through a future instead of
    /// blocking. Submission happens immediately and may block while the
    /// queue is full.
    pub fn call_async<R, F>(&self, f: F) -> impl Future<Output = Result<R>> + Send + 'static
    where
        R: Send + 'static,
        F: FnOnce(&AffineContext) -> R + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let submitted = self.submit(move || match AffineContext::current() {
            Some(cx) => {
                let _ = tx.send(f(&cx));
            }
            None => error!("bridged command ran without an engine"),
        });
        async move {
            submitted?;
            rx.await.map_err(|_| Error::AffineThreadGone)
        }
    }

    /// Tears down every registered view on the affine thread, then stops the
    /// loop. Commands still queued behind this one are dropped.
    #[instrument(skip(self))]
    pub fn shutdown(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }
        let registry = self.inner.registry.clone();
        let stopping = self.inner.stopping.clone();
        let result = self.call(move |cx| {
            for (handle, hook) in registry.snapshot() {
                debug!(%handle, "tearing down");
                hook.teardown(cx);
            }
            stopping.store(true, Ordering::Release);
        });
        match result {
            Ok(()) | Err(Error::AffineThreadGone) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::time::{Duration, Instant};

    use tempfile::TempDir;

    use super::*;
    use crate::sys::headless::HeadlessController;

    pub(crate) struct Headless {
        pub runtime: Runtime,
        pub thread: AffineThread,
        pub controller: HeadlessController,
        pub _dir: TempDir,
    }

    pub(crate) fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.runtime.temp_dir = Some(dir.path().join("blink"));
        config
    }

    pub(crate) fn spawn_with(config: impl FnOnce(&mut Config)) -> Headless {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config_in(&dir);
        config(&mut cfg);
        let controller = HeadlessController::new();
        let backend = controller.clone();
        let (runtime, thread) = Runtime::spawn(cfg, move || backend.backend()).unwrap();
        Headless { runtime, thread, controller, _dir: dir }
    }

    pub(crate) fn spawn_headless() -> Headless { spawn_with(|_| {}) }

    /// Polls `cond` until it holds, for state changed by background tasks.
    pub(crate) fn eventually(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(2));
        }
        cond()
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    use super::test_support::*;
    use super::*;
    use crate::sys::headless::HeadlessController;
    use crate::sys::message::{KnownMessage, Message, WindowHandle};

    #[test]
    fn call_runs_on_affine_thread() {
        let h = spawn_headless();
        assert!(h.runtime.started().is_closed());
        let name = h.runtime.call(|_| thread::current().name().map(str::to_owned)).unwrap();
        assert_eq!(Some(AFFINE_THREAD_NAME.to_string()), name);
        assert!(!h.runtime.is_affine_thread());
    }

    #[test]
    fn submitters_keep_their_own_order() {
        const THREADS: usize = 6;
        const PER_THREAD: usize = 100;
        let h = spawn_headless();
        let log = Arc::new(Mutex::new(Vec::new()));

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let runtime = h.runtime.clone();
                let log = log.clone();
                thread::spawn(move || {
                    for seq in 0..PER_THREAD {
                        let log = log.clone();
                        runtime.submit(move || log.lock().push((t, seq))).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        // FIFO: this runs after everything submitted above.
        h.runtime.call(|_| ()).unwrap();

        let log = log.lock();
        assert_eq!(THREADS * PER_THREAD, log.len());
        for t in 0..THREADS {
            let seqs: Vec<_> = log.iter().filter(|(who, _)| *who == t).map(|(_, s)| *s).collect();
            assert_eq!((0..PER_THREAD).collect::<Vec<_>>(), seqs);
        }
    }

    #[test]
    fn bridging_from_affine_thread_is_refused() {
        let h = spawn_headless();
        let runtime = h.runtime.clone();
        let nested = h.runtime.call(move |_| runtime.call(|_| 1)).unwrap();
        assert!(matches!(nested, Err(Error::CalledFromAffineThread)));
    }

    #[test]
    fn engine_init_failure_reaches_caller() {
        let dir = tempfile::tempdir().unwrap();
        let controller = HeadlessController::new();
        controller.set_fail_init(true);
        let backend = controller.clone();
        let result = Runtime::spawn(config_in(&dir), move || backend.backend());
        assert!(matches!(result, Err(Error::Engine(EngineError::Init(_)))));
    }

    #[test]
    fn unusable_work_dir_is_reported_before_spawning() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"").unwrap();
        let mut config = Config::default();
        config.runtime.temp_dir = Some(file.join("blink"));

        let controller = HeadlessController::new();
        let result = Runtime::spawn(config, move || controller.backend());
        assert!(matches!(result, Err(Error::WorkDir { .. })));
    }

    #[test]
    fn file_systems_registered_before_start() {
        struct Empty;
        impl AssetSource for Empty {
            fn read(&self, _: &str) -> Option<Cow<'_, [u8]>> { None }
        }

        let dir = tempfile::tempdir().unwrap();
        let controller = HeadlessController::new();
        let backend = controller.clone();
        let (runtime, _thread) = Runtime::builder(config_in(&dir))
            .file_system(DEVTOOLS_FS, Arc::new(Empty))
            .file_system("app", Arc::new(Empty))
            .spawn(move || backend.backend())
            .unwrap();

        assert_eq!(vec!["__devtools__".to_string(), "app".to_string()], controller.file_systems());
        let settings = controller.settings().unwrap();
        assert_eq!(runtime.config().runtime.cookie_file(), settings.cookie_file);
    }

    #[test]
    fn shutdown_stops_thread_and_later_calls_fail() {
        let h = spawn_headless();
        h.runtime.shutdown().unwrap();
        h.thread.join().unwrap();
        assert!(!h.runtime.is_running());
        assert!(matches!(h.runtime.call(|_| ()), Err(Error::AffineThreadGone)));
        h.runtime.shutdown().unwrap();
    }

    #[test]
    fn source_quit_ends_loop() {
        let h = spawn_headless();
        h.controller.post(Message::known(WindowHandle::NONE, KnownMessage::Quit, 0));
        h.thread.join().unwrap();
        assert!(matches!(h.runtime.call(|_| ()), Err(Error::AffineThreadGone)));
    }

    #[test]
    fn panicking_command_takes_thread_down() {
        let h = spawn_headless();
        let result = h.runtime.call(|_| -> () { panic!("native fault") });
        assert!(matches!(result, Err(Error::AffineThreadGone)));
        assert!(h.thread.join().is_err());
    }

    #[test]
    fn async_bridge_resolves() {
        let h = spawn_headless();
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let value = rt.block_on(h.runtime.call_async(|_| 40 + 2)).unwrap();
        assert_eq!(42, value);
    }

    #[tokio::test]
    async fn async_bridge_reports_stopped_runtime() {
        let h = spawn_headless();
        h.runtime.shutdown().unwrap();
        let result = h.runtime.call_async(|_| ()).await;
        assert!(matches!(result, Err(Error::AffineThreadGone)));
    }

    #[test]
    fn hosted_loop_serves_other_threads() {
        let dir = tempfile::tempdir().unwrap();
        let controller = HeadlessController::new();
        let (engine, source) = controller.backend();
        let (runtime, mut run_loop) =
            Runtime::hosted(config_in(&dir), engine, source).unwrap();
        assert!(runtime.is_affine_thread());
        assert!(matches!(runtime.call(|_| ()), Err(Error::CalledFromAffineThread)));

        let caller = {
            let runtime = runtime.clone();
            thread::spawn(move || {
                let value = runtime.call(|_| 7).unwrap();
                runtime.shutdown().unwrap();
                value
            })
        };
        run_loop.run();
        assert_eq!(7, caller.join().unwrap());
        assert!(runtime.started().is_closed());
    }

    #[test]
    fn exited_hosted_loop_refuses_late_commands() {
        let dir = tempfile::tempdir().unwrap();
        let controller = HeadlessController::new();
        let (engine, source) = controller.backend();
        let (runtime, mut run_loop) =
            Runtime::hosted(config_in(&dir), engine, source).unwrap();

        let stopper = {
            let runtime = runtime.clone();
            thread::spawn(move || runtime.shutdown())
        };
        run_loop.run();
        stopper.join().unwrap().unwrap();

        // A submitter that passed the running check just before the loop
        // exited must not be left waiting on a queue nobody reads.
        let late = thread::spawn({
            let scheduler = runtime.inner.scheduler.clone();
            move || scheduler.submit(|| {})
        });
        assert!(late.join().unwrap().is_err());
        let caller = thread::spawn(move || runtime.call(|_| ()));
        assert!(matches!(caller.join().unwrap(), Err(Error::AffineThreadGone)));
    }
}
