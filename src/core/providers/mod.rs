pub mod traits;

pub use traits::Provider;
