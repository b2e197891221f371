pub mod arbiter;
pub mod commitment;
pub mod gates;
pub mod memory;
pub mod orchestrator;
pub mod preference;
pub mod problems;
pub mod providers;
pub mod signals;
pub mod stance;
pub mod turn;
