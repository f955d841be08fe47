pub mod event;
pub mod registry;

pub use event::ViewEvent;
pub use registry::ViewRegistry;
