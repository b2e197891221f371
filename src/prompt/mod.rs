mod engine;
pub mod templates;

pub use engine::TeraEngine;
