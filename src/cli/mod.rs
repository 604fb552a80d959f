mod args;
mod paths;

pub use args::{Cli, Commands};
pub use paths::{format_size, resolve_config_path, short_commit};
