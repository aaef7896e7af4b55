pub mod cli;
pub mod logging;
pub mod panic_handler;
pub mod pipeline;
pub mod settings;

pub use pipeline::{LoadSession, PageRecord, PageSink, SessionOptions, SessionProgress};
