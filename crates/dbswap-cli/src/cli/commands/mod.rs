//! CLI command handlers. Each command is in its own file.

mod completions;
mod hash;
mod install;

pub use completions::run_completions;
pub use hash::run_hash;
pub use install::run_install;
