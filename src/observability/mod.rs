pub mod log;
pub mod memory;
pub mod noop;
pub mod traits;

pub use self::log::LogSink;
pub use memory::MemorySink;
pub use noop::NoopSink;
pub use traits::{EventSink, KernelEvent};

use crate::config::ObservabilityConfig;
use std::sync::Arc;

/// Factory: create the right sink from config
pub fn create_sink(config: &ObservabilityConfig) -> Arc<dyn EventSink> {
    match config.backend.as_str() {
        "log" => Arc::new(LogSink::new()),
        "memory" => Arc::new(MemorySink::new()),
        "none" | "noop" => Arc::new(NoopSink),
        _ => {
            tracing::warn!(
                "Unknown observability backend '{}', falling back to noop",
                config.backend
            );
            Arc::new(NoopSink)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(backend: &str) -> ObservabilityConfig {
        ObservabilityConfig {
            backend: backend.into(),
            ..ObservabilityConfig::default()
        }
    }

    #[test]
    fn factory_log_returns_log() {
        assert_eq!(create_sink(&config("log")).name(), "log");
    }

    #[test]
    fn factory_memory_returns_memory() {
        assert_eq!(create_sink(&config("memory")).name(), "memory");
    }

    #[test]
    fn factory_none_returns_noop() {
        assert_eq!(create_sink(&config("none")).name(), "noop");
    }

    #[test]
    fn factory_unknown_falls_back_to_noop() {
        assert_eq!(create_sink(&config("xyzzy_garbage_123")).name(), "noop");
        assert_eq!(create_sink(&config("")).name(), "noop");
    }
}
