pub mod common;
pub mod error;
pub mod model;
pub mod runtime;
pub mod sys;
pub mod view;

pub use error::{Error, Result};
pub use model::ViewEvent;
pub use runtime::Runtime;
pub use view::{View, ViewOptions};
