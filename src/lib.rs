#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::unnecessary_literal_bound,
    clippy::module_name_repetitions,
    clippy::struct_field_names,
    clippy::must_use_candidate,
    clippy::new_without_default,
    clippy::return_self_not_must_use
)]

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod kernel;
pub mod observability;
pub mod prompt;

pub use config::KernelConfig;
pub use error::{ErrorCode, KernelError, Result};
pub use kernel::{GovernanceKernel, Session};
