pub mod commands;
pub mod handlers;

pub use commands::{Cli, Commands};
pub use handlers::dispatch;
