//! CLI command implementations

pub mod config;
pub mod simulate;

pub use config::execute as config;
pub use simulate::execute as simulate;
