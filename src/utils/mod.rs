pub mod constants;
pub mod config_loader;

pub use constants::*;
pub use config_loader::*;
