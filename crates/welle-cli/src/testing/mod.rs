//! Test discovery and execution for `welle test`

mod discovery;
mod runner;

pub use discovery::discover;
pub use runner::{run_test_file, Engine};
