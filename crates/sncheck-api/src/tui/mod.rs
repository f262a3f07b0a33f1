//! Interactive quick-lookup mode.

mod app;
mod input;
mod ui;

pub use app::{App, run};
pub use input::TextInput;
