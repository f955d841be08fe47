use std::borrow::Cow;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use blink_view::common::config::{Config, config_file};
use blink_view::common::log;
use blink_view::sys::engine::AssetSource;
use blink_view::sys::headless::HeadlessController;
use blink_view::{Runtime, View, ViewOptions};
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser)]
struct Cli {
    /// Path to the configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Page to open once the window exists.
    #[arg(long, default_value = "app://index.html")]
    url: String,

    /// Directory served under the `app://` scheme.
    #[arg(long)]
    root: Option<PathBuf>,

    /// Enables debug logging and the devtools key.
    #[arg(long)]
    debug: bool,

    /// Hide the window instead of destroying it on close.
    #[arg(long)]
    hide_on_close: bool,

    /// Print the effective configuration and exit.
    #[arg(long)]
    print_config: bool,
}

struct DirAssets(PathBuf);

impl AssetSource for DirAssets {
    fn read(&self, path: &str) -> Option<Cow<'_, [u8]>> {
        let path = self.0.join(path.trim_start_matches('/'));
        std::fs::read(&path).ok().map(Cow::Owned)
    }
}

fn main() -> anyhow::Result<()> {
    let opt = Cli::parse();

    let path = opt.config.clone().or_else(config_file);
    let mut config = match &path {
        Some(path) => Config::read(path)?,
        None => Config::default(),
    };
    config.runtime.debug |= opt.debug;
    config.window.hide_on_close |= opt.hide_on_close;

    if opt.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    log::init_logging(config.runtime.debug);

    let mut builder = Runtime::builder(config.clone());
    if let Some(root) = opt.root {
        builder = builder.file_system("app", Arc::new(DirAssets(root)));
    }
    let controller = HeadlessController::new();
    let backend = controller.clone();
    let (runtime, thread) =
        builder.spawn(move || backend.backend()).context("could not start the runtime")?;

    let view = View::new(&runtime, ViewOptions::from(&config.window))?;
    view.subscribe(|_, event| match serde_json::to_string(event) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("could not serialize event: {e}"),
    });
    view.load_url(&opt.url)?;
    info!(title = %view.title()?, "page loaded");

    runtime.shutdown()?;
    if thread.join().is_err() {
        anyhow::bail!("affine thread panicked");
    }
    Ok(())
}
