use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Registry};
use tracing_tree::HierarchicalLayer;

/// Environment variable consulted for the log filter, e.g. `BLINK_LOG=blink_view=trace`.
pub const LOG_ENV: &str = "BLINK_LOG";

pub fn init_logging(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    let tree = HierarchicalLayer::default()
        .with_indent_amount(2)
        .with_indent_lines(true)
        .with_targets(true)
        .with_writer(std::io::stderr);

    // A second init (e.g. from a test harness) keeps the first subscriber.
    let _ = Registry::default().with(filter).with(tree).try_init();
}
