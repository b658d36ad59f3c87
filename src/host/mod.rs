//! Binary entry: logging, wiring and the stdio serve loop

mod runner;
mod serve;

pub use runner::{run, shutdown_otel};
pub use serve::serve;
